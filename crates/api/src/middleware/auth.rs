//! Authentication extractor for Axum handlers.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use ess_core::error::CoreError;
use ess_core::types::{DbId, SessionId};
use ess_db::models::session::UserSession;

use super::session_validation::ActiveSession;
use crate::auth::jwt::validate_token;
use crate::auth::token_source::extract_token;
use crate::error::AppError;
use crate::services::session::SessionCheck;
use crate::state::AppState;

/// Authenticated user extracted from the `auth_token` cookie or a Bearer
/// token, bound to a live session.
///
/// ```ignore
/// async fn my_handler(user: AuthUser) -> AppResult<Json<()>> {
///     tracing::info!(user_id = user.user_id, role = %user.role, "handling request");
///     Ok(Json(()))
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The user's internal database id (from `claims.sub`).
    pub user_id: DbId,
    /// The user's role name (e.g. `"admin"`, `"employee"`).
    pub role: String,
    pub session_id: SessionId,
    pub session: UserSession,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let (token, _) = extract_token(&parts.headers).ok_or_else(|| {
            AppError::Core(CoreError::Unauthorized(
                "Missing authentication token".into(),
            ))
        })?;

        let claims = validate_token(&token, &state.config.jwt)?;

        // Reuse the session validated by the middleware when it ran.
        let validated = parts
            .extensions
            .get::<ActiveSession>()
            .filter(|ActiveSession(s)| s.id == claims.sid && s.user_id == claims.sub)
            .map(|ActiveSession(s)| s.clone());

        let session = match validated {
            Some(session) => session,
            None => match state.sessions.is_session_valid(claims.sid, claims.sub).await? {
                SessionCheck::Valid(session) => session,
                SessionCheck::Invalid(_) => {
                    return Err(AppError::Core(CoreError::Unauthorized(
                        "Session is no longer valid".into(),
                    )))
                }
            },
        };

        Ok(AuthUser {
            user_id: claims.sub,
            role: claims.role,
            session_id: claims.sid,
            session,
        })
    }
}

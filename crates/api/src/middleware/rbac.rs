//! Role checks layered on top of [`AuthUser`].

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use ess_core::error::CoreError;
use ess_core::roles::ROLE_ADMIN;

use super::auth::AuthUser;
use crate::error::AppError;
use crate::state::AppState;

/// Admin-only handlers take this instead of [`AuthUser`]; any other role is
/// refused with 403 and the attempt is logged.
pub struct RequireAdmin(pub AuthUser);

impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if user.role != ROLE_ADMIN {
            tracing::warn!(
                user_id = user.user_id,
                role = %user.role,
                path = %parts.uri.path(),
                "Non-admin denied admin endpoint"
            );
            return Err(AppError::Core(CoreError::Forbidden(
                "Admin role required".into(),
            )));
        }
        Ok(RequireAdmin(user))
    }
}

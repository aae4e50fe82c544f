//! Handlers for the caller's own sessions.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use ess_core::session_policy::SessionEndReason;
use ess_core::types::SessionId;
use ess_db::models::session::SessionResponse;
use tower_cookies::Cookies;

use crate::auth::token_source::clear_auth_cookie;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::middleware::client_ip::ClientIp;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/sessions
///
/// Active sessions of the caller, oldest first, with the current one flagged.
pub async fn list_sessions(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<DataResponse<Vec<SessionResponse>>>> {
    let sessions = state.sessions.active_sessions(user.user_id).await?;
    let data = sessions
        .iter()
        .map(|s| SessionResponse::from_session(s, Some(user.session_id)))
        .collect();
    Ok(Json(DataResponse { data }))
}

/// DELETE /api/v1/sessions/{id}
///
/// End one of the caller's sessions. Sessions of other users are reported as
/// not found.
pub async fn end_session(
    State(state): State<AppState>,
    ip: ClientIp,
    cookies: Cookies,
    user: AuthUser,
    Path(session_id): Path<SessionId>,
) -> AppResult<StatusCode> {
    let owned = state
        .sessions
        .find(session_id)
        .await?
        .is_some_and(|s| s.user_id == user.user_id && s.is_active);
    if !owned {
        return Err(AppError::NotFound(format!("Session {session_id} not found")));
    }

    state
        .sessions
        .end_session(session_id, SessionEndReason::Revoked)
        .await?;
    state
        .tokens
        .revoke_for_session(session_id, SessionEndReason::Revoked.as_str(), ip.known())
        .await?;
    if session_id == user.session_id {
        clear_auth_cookie(&cookies);
    }
    Ok(StatusCode::NO_CONTENT)
}

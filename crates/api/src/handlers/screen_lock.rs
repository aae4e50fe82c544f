//! Handlers for `/screen-lock`: lock, unlock with password, status.

use axum::extract::State;
use axum::Json;
use ess_core::error::CoreError;
use ess_core::types::Timestamp;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::auth::password::verify_password;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::middleware::client_ip::ClientIp;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct UnlockRequest {
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenLockStatus {
    pub locked: bool,
    pub locked_at: Option<Timestamp>,
}

/// POST /api/v1/screen-lock/lock
pub async fn lock(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<DataResponse<ScreenLockStatus>>> {
    state.sessions.set_locked(user.session_id, true).await?;
    let locked_at = state
        .sessions
        .find(user.session_id)
        .await?
        .and_then(|s| s.locked_at);
    tracing::info!(user_id = user.user_id, session_id = %user.session_id, "Screen locked");
    Ok(Json(DataResponse {
        data: ScreenLockStatus {
            locked: true,
            locked_at,
        },
    }))
}

/// POST /api/v1/screen-lock/unlock
///
/// A wrong password is 401 and counts as a failed sign-in for the address.
pub async fn unlock(
    State(state): State<AppState>,
    ip: ClientIp,
    user: AuthUser,
    Json(input): Json<UnlockRequest>,
) -> AppResult<Json<DataResponse<ScreenLockStatus>>> {
    input.validate()?;

    let row = state
        .users
        .find_user_by_id(user.user_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "User",
            id: user.user_id,
        }))?;
    let valid = verify_password(&input.password, &row.password_hash)
        .map_err(|e| AppError::InternalError(format!("Password verification error: {e}")))?;
    if !valid {
        if let Some(addr) = ip.known() {
            if let Err(e) = state
                .ip_security
                .record_failed_login(addr, Some(user.user_id))
                .await
            {
                tracing::warn!(error = %e, "Failed to record failed unlock");
            }
        }
        return Err(AppError::Core(CoreError::Unauthorized(
            "Invalid password".into(),
        )));
    }

    state.sessions.set_locked(user.session_id, false).await?;
    tracing::info!(user_id = user.user_id, session_id = %user.session_id, "Screen unlocked");
    Ok(Json(DataResponse {
        data: ScreenLockStatus {
            locked: false,
            locked_at: None,
        },
    }))
}

/// GET /api/v1/screen-lock/status
pub async fn status(user: AuthUser) -> Json<DataResponse<ScreenLockStatus>> {
    Json(DataResponse {
        data: ScreenLockStatus {
            locked: user.session.is_locked(),
            locked_at: user.session.locked_at,
        },
    })
}

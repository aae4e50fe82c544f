//! Handlers for the `/admin` resource (users, their sessions, IP controls).
//!
//! All handlers require the `admin` role via [`RequireAdmin`].

use std::net::IpAddr;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{Duration, Utc};
use ess_core::error::CoreError;
use ess_core::roles::is_known_role;
use ess_core::session_policy::SessionEndReason;
use ess_core::types::DbId;
use ess_db::models::ip_security::{BlockedIp, IpWhitelistEntry};
use ess_db::models::session::SessionResponse;
use ess_db::models::user::{CreateUser, UserResponse};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::auth::password::{hash_password, validate_password_strength};
use crate::error::{AppError, AppResult};
use crate::middleware::rbac::RequireAdmin;
use crate::response::DataResponse;
use crate::state::AppState;

/// Longest timed block an admin can set: one year.
pub const MAX_BLOCK_MINUTES: i64 = 525_600;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Request body for `POST /admin/users`.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    #[validate(length(min = 3, max = 64, message = "Username must be 3 to 64 characters"))]
    pub username: String,
    #[validate(email(message = "Email is not valid"))]
    pub email: String,
    #[validate(length(max = 32))]
    pub employee_no: Option<String>,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
    pub role: String,
    pub manager_id: Option<DbId>,
}

/// Request body for `POST /admin/ip/blocks`. No duration means permanent.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BlockIpRequest {
    pub ip_address: String,
    #[validate(length(min = 1, max = 255, message = "Reason is required"))]
    pub reason: String,
    #[validate(range(
        min = 1,
        max = MAX_BLOCK_MINUTES,
        message = "Duration must be between one minute and one year"
    ))]
    pub duration_minutes: Option<i64>,
}

/// Request body for `POST /admin/ip/whitelist`.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct WhitelistIpRequest {
    pub ip_address: String,
    #[validate(length(max = 255))]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndedSessions {
    pub ended: u64,
    pub tokens_revoked: u64,
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// GET /api/v1/admin/users
pub async fn list_users(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> AppResult<Json<DataResponse<Vec<UserResponse>>>> {
    let users = state.users.list_users().await?;
    let data = users.iter().map(UserResponse::from).collect();
    Ok(Json(DataResponse { data }))
}

/// POST /api/v1/admin/users
///
/// Create a user. Validates the role and password strength, hashes the
/// password, and returns the safe [`UserResponse`] with 201 Created.
pub async fn create_user(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Json(input): Json<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<DataResponse<UserResponse>>)> {
    input.validate()?;
    if !is_known_role(&input.role) {
        return Err(AppError::Core(CoreError::Validation(format!(
            "Unknown role '{}'",
            input.role
        ))));
    }
    validate_password_strength(&input.password)
        .map_err(|msg| AppError::Core(CoreError::Validation(msg)))?;

    let password_hash = hash_password(&input.password)
        .map_err(|e| AppError::InternalError(format!("Password hashing error: {e}")))?;

    let user = state
        .users
        .create_user(&CreateUser {
            username: input.username,
            email: input.email,
            employee_no: input.employee_no,
            password_hash,
            role: input.role,
            manager_id: input.manager_id,
        })
        .await?;

    tracing::info!(user_id = user.id, created_by = admin.user_id, "User created");
    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: UserResponse::from(&user),
        }),
    ))
}

/// DELETE /api/v1/admin/users/{id}
///
/// Soft delete. Every session of the user ends and every refresh token is
/// revoked.
pub async fn delete_user(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<DbId>,
) -> AppResult<StatusCode> {
    if id == admin.user_id {
        return Err(AppError::Core(CoreError::Validation(
            "Administrators cannot delete their own account".into(),
        )));
    }
    let deleted = state.users.soft_delete_user(id, Utc::now()).await?;
    if !deleted {
        return Err(AppError::Core(CoreError::NotFound { entity: "User", id }));
    }

    state
        .sessions
        .end_all_user_sessions(id, None, SessionEndReason::UserDeleted)
        .await?;
    state
        .tokens
        .revoke_for_user(id, SessionEndReason::UserDeleted.as_str(), None)
        .await?;

    tracing::info!(user_id = id, deleted_by = admin.user_id, "User deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/admin/users/{id}/sessions
pub async fn user_sessions(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<Vec<SessionResponse>>>> {
    ensure_user_exists(&state, id).await?;
    let sessions = state.sessions.active_sessions(id).await?;
    let data = sessions
        .iter()
        .map(|s| SessionResponse::from_session(s, None))
        .collect();
    Ok(Json(DataResponse { data }))
}

/// DELETE /api/v1/admin/users/{id}/sessions
///
/// Force sign-out of every device of the user.
pub async fn end_user_sessions(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<EndedSessions>>> {
    ensure_user_exists(&state, id).await?;
    let ended = state
        .sessions
        .end_all_user_sessions(id, None, SessionEndReason::Revoked)
        .await?;
    let tokens_revoked = state
        .tokens
        .revoke_for_user(id, SessionEndReason::Revoked.as_str(), None)
        .await?;

    tracing::info!(user_id = id, ended, by = admin.user_id, "User sessions ended by admin");
    Ok(Json(DataResponse {
        data: EndedSessions {
            ended,
            tokens_revoked,
        },
    }))
}

// ---------------------------------------------------------------------------
// IP controls
// ---------------------------------------------------------------------------

/// GET /api/v1/admin/ip/blocks
///
/// Blocks currently in force.
pub async fn list_blocks(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> AppResult<Json<DataResponse<Vec<BlockedIp>>>> {
    let data = state.ip_security.list_blocks().await?;
    Ok(Json(DataResponse { data }))
}

/// POST /api/v1/admin/ip/blocks
pub async fn block_ip(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Json(input): Json<BlockIpRequest>,
) -> AppResult<(StatusCode, Json<DataResponse<BlockedIp>>)> {
    input.validate()?;
    let ip = parse_ip(&input.ip_address)?;
    let expires_at = match input.duration_minutes {
        Some(mins) => Some(
            Duration::try_minutes(mins)
                .and_then(|d| Utc::now().checked_add_signed(d))
                .ok_or_else(|| AppError::BadRequest("Block duration is out of range".into()))?,
        ),
        None => None,
    };

    let block = state
        .ip_security
        .block(&ip, &input.reason, expires_at, Some(admin.user_id))
        .await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: block })))
}

/// DELETE /api/v1/admin/ip/blocks/{ip}
pub async fn unblock_ip(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(ip): Path<String>,
) -> AppResult<StatusCode> {
    let ip = parse_ip(&ip)?;
    if !state.ip_security.unblock(&ip).await? {
        return Err(AppError::NotFound(format!("No block for {ip}")));
    }
    tracing::info!(ip = %ip, by = admin.user_id, "IP unblocked");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/admin/ip/whitelist
pub async fn whitelist_ip(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Json(input): Json<WhitelistIpRequest>,
) -> AppResult<(StatusCode, Json<DataResponse<IpWhitelistEntry>>)> {
    input.validate()?;
    let ip = parse_ip(&input.ip_address)?;
    let entry = state
        .ip_security
        .whitelist(&ip, input.description.as_deref())
        .await?;
    tracing::info!(ip = %ip, by = admin.user_id, "IP whitelisted");
    Ok((StatusCode::CREATED, Json(DataResponse { data: entry })))
}

/// DELETE /api/v1/admin/ip/whitelist/{ip}
pub async fn remove_whitelist(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(ip): Path<String>,
) -> AppResult<StatusCode> {
    let ip = parse_ip(&ip)?;
    if !state.ip_security.remove_from_whitelist(&ip).await? {
        return Err(AppError::NotFound(format!("{ip} is not whitelisted")));
    }
    tracing::info!(ip = %ip, by = admin.user_id, "IP removed from whitelist");
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Canonical text form of an IPv4 or IPv6 address.
fn parse_ip(raw: &str) -> AppResult<String> {
    raw.trim()
        .parse::<IpAddr>()
        .map(|ip| ip.to_canonical().to_string())
        .map_err(|_| AppError::Core(CoreError::Validation(format!("'{raw}' is not an IP address"))))
}

async fn ensure_user_exists(state: &AppState, id: DbId) -> AppResult<()> {
    state
        .users
        .find_user_by_id(id)
        .await?
        .filter(|u| u.deleted_at.is_none())
        .map(|_| ())
        .ok_or(AppError::Core(CoreError::NotFound { entity: "User", id }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_addresses_are_canonicalised() {
        assert_eq!(parse_ip(" 203.0.113.9 ").unwrap(), "203.0.113.9");
        assert_eq!(parse_ip("2001:DB8::1").unwrap(), "2001:db8::1");
    }

    #[test]
    fn non_addresses_are_rejected() {
        assert!(parse_ip("not-an-ip").is_err());
        assert!(parse_ip("300.1.1.1").is_err());
    }
}

//! Handlers for the `/auth` resource (login, refresh, logout, profile,
//! password change).

use axum::extract::State;
use axum::http::header::{ACCEPT_LANGUAGE, USER_AGENT};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{Duration, Utc};
use ess_core::brute_force::IpEventType;
use ess_core::error::CoreError;
use ess_core::session_policy::SessionEndReason;
use ess_core::types::{DbId, SessionId, Timestamp};
use ess_db::models::user::{User, UserResponse};
use serde::{Deserialize, Serialize};
use tower_cookies::Cookies;
use validator::Validate;

use crate::auth::password::{hash_password, validate_password_strength, verify_password};
use crate::auth::token_source::{clear_auth_cookie, set_auth_cookie};
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::middleware::client_ip::ClientIp;
use crate::response::DataResponse;
use crate::services::ip_security::IpCheck;
use crate::services::session::{ClientInfo, SessionCheck};
use crate::services::token::RotationError;
use crate::state::AppState;

/// Maximum consecutive failed login attempts before locking the account.
const MAX_FAILED_ATTEMPTS: i32 = 5;

/// Duration in minutes to lock an account after exceeding failed attempts.
const LOCK_DURATION_MINS: i64 = 15;

const INVALID_CREDENTIALS: &str = "Invalid login or password";

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Request body for `POST /auth/login`. `login` is a username or email.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Login is required"))]
    pub login: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
    /// Authenticator or backup code; required once two-factor is enabled.
    #[validate(length(min = 1, max = 32, message = "Two-factor code is invalid"))]
    pub two_factor_code: Option<String>,
}

/// Request body for `POST /auth/refresh-token`.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,
}

/// Request body for `POST /auth/change-password`.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,
    #[validate(length(min = 1, message = "New password is required"))]
    pub new_password: String,
}

/// Successful authentication response returned by login and refresh.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub access_token_expires_at: Timestamp,
    pub session_id: SessionId,
    pub user: UserResponse,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/auth/login
///
/// Authenticate with username or email + password. Opens a session and
/// returns access and refresh tokens; the access token is also set as the
/// `auth_token` cookie.
pub async fn login(
    State(state): State<AppState>,
    ip: ClientIp,
    cookies: Cookies,
    headers: HeaderMap,
    Json(input): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    input.validate()?;

    // 1. Refuse blocked addresses outright.
    if let Some(addr) = ip.known() {
        if let IpCheck::Blocked(_) = state.ip_security.check(addr).await? {
            return Err(AppError::Core(CoreError::Forbidden(
                "Access from this IP address is blocked".into(),
            )));
        }
    }

    // 2. Find user by username or email.
    let Some(user) = state.users.find_user_by_login(&input.login).await? else {
        record_failed_login(&state, &ip, None).await;
        return Err(AppError::Core(CoreError::Unauthorized(
            INVALID_CREDENTIALS.into(),
        )));
    };

    // 3. Check if the account is active.
    if !user.can_sign_in() {
        return Err(AppError::Core(CoreError::Forbidden(
            "Account is deactivated".into(),
        )));
    }

    // 4. Check if the account is temporarily locked.
    let now = Utc::now();
    if user.is_locked_out(now) {
        return Err(AppError::Core(CoreError::Forbidden(
            "Account is temporarily locked. Try again later.".into(),
        )));
    }

    // 5. Verify password.
    let password_valid = verify_password(&input.password, &user.password_hash)
        .map_err(|e| AppError::InternalError(format!("Password verification error: {e}")))?;

    if !password_valid {
        // 6. On failure: increment counter, lock if threshold reached.
        register_failed_attempt(&state, &ip, &user, now).await?;
        return Err(AppError::Core(CoreError::Unauthorized(
            INVALID_CREDENTIALS.into(),
        )));
    }

    // 6b. Second factor, once enrolled. A wrong code counts as a failure.
    if state.two_factor.is_enabled(user.id).await? {
        let Some(code) = input.two_factor_code.as_deref() else {
            return Err(AppError::TwoFactorRequired);
        };
        match state.two_factor.verify_second_factor(user.id, code).await? {
            Some(factor) => tracing::debug!(user_id = user.id, ?factor, "Second factor accepted"),
            None => {
                register_failed_attempt(&state, &ip, &user, now).await?;
                return Err(AppError::Core(CoreError::Unauthorized(
                    "Invalid two-factor code".into(),
                )));
            }
        }
    }

    // 7. On success: reset failed count, set last_login_at.
    state.users.record_successful_login(user.id, now).await?;
    if let Some(addr) = ip.known() {
        state
            .ip_security
            .record_event(addr, IpEventType::SuccessfulLogin, Some(user.id), None)
            .await?;
    }

    // 8. Open a session; tokens of evicted sessions die with them.
    let client = ClientInfo {
        ip_address: ip.known().map(str::to_string),
        user_agent: header_string(&headers, USER_AGENT),
        accept_language: header_string(&headers, ACCEPT_LANGUAGE),
    };
    let created = state.sessions.create_session(user.id, &client).await?;
    for evicted in &created.evicted {
        state
            .tokens
            .revoke_for_session(*evicted, SessionEndReason::Evicted.as_str(), ip.known())
            .await?;
    }

    // 9. Issue tokens.
    let refresh = state
        .tokens
        .issue_refresh_token(user.id, Some(created.session.id), None, ip.known())
        .await?;
    let response = auth_response(&state, &cookies, &user, created.session.id, refresh.token)?;

    tracing::info!(user_id = user.id, session_id = %created.session.id, "User logged in");
    Ok(Json(response))
}

/// POST /api/v1/auth/refresh-token
///
/// Rotate a refresh token. Presenting a used or revoked token revokes its
/// whole family and ends the session it was bound to.
pub async fn refresh_token(
    State(state): State<AppState>,
    ip: ClientIp,
    cookies: Cookies,
    Json(input): Json<RefreshRequest>,
) -> AppResult<Json<AuthResponse>> {
    input.validate()?;

    let rotated = match state.tokens.rotate(&input.refresh_token, ip.known()).await {
        Ok(rotated) => rotated,
        Err(RotationError::ReuseDetected {
            family_id,
            user_id,
            session_id,
        }) => {
            if let Some(sid) = session_id {
                if let Err(e) = state
                    .sessions
                    .end_session(sid, SessionEndReason::TokenReuse)
                    .await
                {
                    tracing::warn!(error = %e, session_id = %sid, "Failed to end session after token reuse");
                }
            }
            if let Some(addr) = ip.known() {
                let detail = Some(format!("family {family_id}"));
                if let Err(e) = state
                    .ip_security
                    .record_event(addr, IpEventType::TokenReuse, Some(user_id), detail)
                    .await
                {
                    tracing::warn!(error = %e, "Failed to record token reuse event");
                }
            }
            clear_auth_cookie(&cookies);
            return Err(RotationError::ReuseDetected {
                family_id,
                user_id,
                session_id,
            }
            .into());
        }
        Err(e) => return Err(e.into()),
    };

    let previous = &rotated.previous;
    let unauthorized = || AppError::Core(CoreError::Unauthorized("Invalid refresh token".into()));

    let user = state
        .users
        .find_user_by_id(previous.user_id)
        .await?
        .filter(User::can_sign_in)
        .ok_or_else(unauthorized)?;

    let session_id = previous.session_id.ok_or_else(unauthorized)?;
    match state.sessions.is_session_valid(session_id, user.id).await? {
        SessionCheck::Valid(_) => {}
        SessionCheck::Invalid(reason) => {
            tracing::info!(
                user_id = user.id,
                session_id = %session_id,
                reason = reason.as_str(),
                "Refresh for invalid session"
            );
            state
                .tokens
                .revoke_for_session(session_id, "session_invalid", ip.known())
                .await?;
            return Err(unauthorized());
        }
    }

    let response = auth_response(&state, &cookies, &user, session_id, rotated.successor.token)?;
    Ok(Json(response))
}

/// POST /api/v1/auth/logout
///
/// End the current session and revoke its refresh tokens. Returns 204.
pub async fn logout(
    State(state): State<AppState>,
    ip: ClientIp,
    cookies: Cookies,
    user: AuthUser,
) -> AppResult<StatusCode> {
    state
        .sessions
        .end_session(user.session_id, SessionEndReason::Logout)
        .await?;
    state
        .tokens
        .revoke_for_session(user.session_id, SessionEndReason::Logout.as_str(), ip.known())
        .await?;
    clear_auth_cookie(&cookies);
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/auth/logout-all
///
/// End every session of the caller and revoke all their refresh tokens.
pub async fn logout_all(
    State(state): State<AppState>,
    ip: ClientIp,
    cookies: Cookies,
    user: AuthUser,
) -> AppResult<StatusCode> {
    state
        .sessions
        .end_all_user_sessions(user.user_id, None, SessionEndReason::LogoutAll)
        .await?;
    state
        .tokens
        .revoke_for_user(user.user_id, SessionEndReason::LogoutAll.as_str(), ip.known())
        .await?;
    clear_auth_cookie(&cookies);
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/auth/me
pub async fn me(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<DataResponse<UserResponse>>> {
    let row = state
        .users
        .find_user_by_id(user.user_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "User",
            id: user.user_id,
        }))?;
    Ok(Json(DataResponse {
        data: UserResponse::from(&row),
    }))
}

/// POST /api/v1/auth/change-password
///
/// Verify the current password, store the new one, and sign out every other
/// session.
pub async fn change_password(
    State(state): State<AppState>,
    ip: ClientIp,
    user: AuthUser,
    Json(input): Json<ChangePasswordRequest>,
) -> AppResult<StatusCode> {
    input.validate()?;

    let row = state
        .users
        .find_user_by_id(user.user_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "User",
            id: user.user_id,
        }))?;

    let current_ok = verify_password(&input.current_password, &row.password_hash)
        .map_err(|e| AppError::InternalError(format!("Password verification error: {e}")))?;
    if !current_ok {
        return Err(AppError::Core(CoreError::Unauthorized(
            "Current password is incorrect".into(),
        )));
    }

    validate_password_strength(&input.new_password)
        .map_err(|msg| AppError::Core(CoreError::Validation(msg)))?;
    let hashed = hash_password(&input.new_password)
        .map_err(|e| AppError::InternalError(format!("Password hashing error: {e}")))?;
    state.users.update_password(user.user_id, &hashed).await?;

    let others: Vec<SessionId> = state
        .sessions
        .active_sessions(user.user_id)
        .await?
        .into_iter()
        .map(|s| s.id)
        .filter(|id| *id != user.session_id)
        .collect();
    state
        .sessions
        .end_all_user_sessions(
            user.user_id,
            Some(user.session_id),
            SessionEndReason::PasswordChanged,
        )
        .await?;
    for sid in others {
        state
            .tokens
            .revoke_for_session(sid, SessionEndReason::PasswordChanged.as_str(), ip.known())
            .await?;
    }

    tracing::info!(user_id = user.user_id, "Password changed");
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn header_string(headers: &HeaderMap, name: axum::http::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Count a failed sign-in against the account, locking it at the threshold.
async fn register_failed_attempt(
    state: &AppState,
    ip: &ClientIp,
    user: &User,
    now: Timestamp,
) -> AppResult<()> {
    let failures = state.users.increment_failed_login(user.id).await?;
    if failures >= MAX_FAILED_ATTEMPTS {
        let until = now + Duration::minutes(LOCK_DURATION_MINS);
        state.users.lock_account(user.id, until).await?;
        tracing::warn!(user_id = user.id, failures, %until, "Account locked");
    }
    record_failed_login(state, ip, Some(user.id)).await;
    Ok(())
}

/// Best-effort: a failure here must not mask the 401 being returned.
async fn record_failed_login(state: &AppState, ip: &ClientIp, user_id: Option<DbId>) {
    let Some(addr) = ip.known() else {
        return;
    };
    if let Err(e) = state.ip_security.record_failed_login(addr, user_id).await {
        tracing::warn!(error = %e, ip = addr, "Failed to record failed login");
    }
}

/// Sign an access token for `session_id`, set the cookie, and build the
/// response body.
fn auth_response(
    state: &AppState,
    cookies: &Cookies,
    user: &User,
    session_id: SessionId,
    refresh_token: String,
) -> AppResult<AuthResponse> {
    let access = state
        .tokens
        .issue_access_token(user.id, &user.role, session_id)
        .map_err(|e| AppError::InternalError(format!("Token generation error: {e}")))?;

    let expires_in = state.config.jwt.access_token_ttl_secs();
    set_auth_cookie(cookies, &access.token, expires_in, state.config.cookie_secure);

    Ok(AuthResponse {
        access_token: access.token,
        refresh_token,
        expires_in,
        access_token_expires_at: access.expires_at,
        session_id,
        user: UserResponse::from(user),
    })
}

//! Handlers for second factors: authenticator enrollment under `/auth/totp`
//! and backup codes under `/auth/backup-codes`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use ess_core::error::CoreError;
use ess_core::types::Timestamp;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

/// Body for confirming an enrollment or disabling two-factor.
#[derive(Debug, Deserialize, Validate)]
pub struct TotpCodeRequest {
    #[validate(length(min = 1, max = 32, message = "Code is required"))]
    pub code: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TotpEnrollmentResponse {
    pub secret: String,
    pub otpauth_uri: String,
    pub expires_at: Timestamp,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TotpStatus {
    pub enabled: bool,
    pub backup_codes_remaining: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyBackupCodeRequest {
    #[validate(length(min = 1, max = 32, message = "Code is required"))]
    pub code: String,
}

/// Freshly generated codes. Shown once.
#[derive(Debug, Serialize)]
pub struct BackupCodesResponse {
    pub codes: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BackupCodeStatus {
    pub remaining: i64,
}

#[derive(Debug, Serialize)]
pub struct BackupCodeVerified {
    pub verified: bool,
    pub remaining: i64,
}

/// GET /api/v1/auth/totp
pub async fn totp_status(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<DataResponse<TotpStatus>>> {
    let enabled = state.two_factor.is_enabled(user.user_id).await?;
    let backup_codes_remaining = state.two_factor.remaining(user.user_id).await?;
    Ok(Json(DataResponse {
        data: TotpStatus {
            enabled,
            backup_codes_remaining,
        },
    }))
}

/// POST /api/v1/auth/totp/enroll
///
/// Start an enrollment. Returns 201 with the secret and `otpauth://` URI;
/// 409 while an authenticator is already active.
pub async fn enroll(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<(StatusCode, Json<DataResponse<TotpEnrollmentResponse>>)> {
    let account = state
        .users
        .find_user_by_id(user.user_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "User",
            id: user.user_id,
        }))?
        .email;
    let enrollment = state.two_factor.begin_enrollment(user.user_id, &account).await?;
    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: TotpEnrollmentResponse {
                secret: enrollment.secret,
                otpauth_uri: enrollment.otpauth_uri,
                expires_at: enrollment.expires_at,
            },
        }),
    ))
}

/// POST /api/v1/auth/totp/confirm
///
/// Activate the pending enrollment with a code from the app. Returns the
/// first set of backup codes.
pub async fn confirm(
    State(state): State<AppState>,
    user: AuthUser,
    Json(input): Json<TotpCodeRequest>,
) -> AppResult<Json<DataResponse<BackupCodesResponse>>> {
    input.validate()?;
    let codes = state
        .two_factor
        .confirm_enrollment(user.user_id, &input.code)
        .await?;
    Ok(Json(DataResponse {
        data: BackupCodesResponse { codes },
    }))
}

/// POST /api/v1/auth/totp/disable
///
/// Turn two-factor off with a current code or a backup code. 204 on success.
pub async fn disable(
    State(state): State<AppState>,
    user: AuthUser,
    Json(input): Json<TotpCodeRequest>,
) -> AppResult<StatusCode> {
    input.validate()?;
    state.two_factor.disable(user.user_id, &input.code).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/auth/backup-codes
///
/// Replace the caller's backup codes. Returns 201 with the plaintext codes.
pub async fn regenerate(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<(StatusCode, Json<DataResponse<BackupCodesResponse>>)> {
    let codes = state.two_factor.regenerate(user.user_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: BackupCodesResponse { codes },
        }),
    ))
}

/// GET /api/v1/auth/backup-codes
pub async fn status(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<DataResponse<BackupCodeStatus>>> {
    let remaining = state.two_factor.remaining(user.user_id).await?;
    Ok(Json(DataResponse {
        data: BackupCodeStatus { remaining },
    }))
}

/// POST /api/v1/auth/backup-codes/verify
///
/// Consume one backup code. An unknown or already used code is 401.
pub async fn verify(
    State(state): State<AppState>,
    user: AuthUser,
    Json(input): Json<VerifyBackupCodeRequest>,
) -> AppResult<Json<DataResponse<BackupCodeVerified>>> {
    input.validate()?;

    if !state.two_factor.verify(user.user_id, &input.code).await? {
        return Err(AppError::Core(CoreError::Unauthorized(
            "Invalid backup code".into(),
        )));
    }
    let remaining = state.two_factor.remaining(user.user_id).await?;
    Ok(Json(DataResponse {
        data: BackupCodeVerified {
            verified: true,
            remaining,
        },
    }))
}

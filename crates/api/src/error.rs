use axum::http::header::{CONTENT_TYPE, RETRY_AFTER};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use ess_core::error::CoreError;
use ess_core::types::Timestamp;
use serde_json::{json, Map, Value};

use crate::auth::jwt::TokenError;
use crate::services::session::SessionError;
use crate::services::token::RotationError;
use crate::services::two_factor::TwoFactorError;

/// Media type of every error body.
pub const PROBLEM_JSON: &str = "application/problem+json";

/// Application-level error type for HTTP handlers and middleware.
///
/// Wraps [`CoreError`] for domain errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce RFC 7807 problem documents.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `ess_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A database error from sqlx.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Field-level validation failures on a request body.
    #[error("Validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A missing resource not addressed by a numeric id.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The access token was well-formed but past its `exp`.
    #[error("Token expired at {expired_at}")]
    TokenExpired { expired_at: Timestamp },

    #[error("Too many requests")]
    TooManyRequests { retry_after_secs: u64 },

    /// Password accepted, but the account needs a second factor.
    #[error("Two-factor code required")]
    TwoFactorRequired,

    /// The session is screen-locked.
    #[error("Locked: {0}")]
    Locked(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired { expired_at } => AppError::TokenExpired { expired_at },
            TokenError::NotYetValid => {
                AppError::Core(CoreError::Unauthorized("Token is not yet valid".into()))
            }
            TokenError::Invalid => {
                AppError::Core(CoreError::Unauthorized("Invalid token".into()))
            }
        }
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::LimitReached { max } => AppError::Core(CoreError::Conflict(format!(
                "Maximum of {max} concurrent sessions reached"
            ))),
            SessionError::Store(e) => AppError::Database(e),
        }
    }
}

impl From<RotationError> for AppError {
    fn from(err: RotationError) -> Self {
        match err {
            RotationError::Store(e) => AppError::Database(e),
            other => AppError::Core(CoreError::Unauthorized(other.to_string())),
        }
    }
}

impl From<TwoFactorError> for AppError {
    fn from(err: TwoFactorError) -> Self {
        match err {
            TwoFactorError::AlreadyEnabled | TwoFactorError::NotEnabled => {
                AppError::Core(CoreError::Conflict(err.to_string()))
            }
            TwoFactorError::NoPendingEnrollment => AppError::NotFound(err.to_string()),
            TwoFactorError::InvalidCode => AppError::Core(CoreError::Unauthorized(err.to_string())),
            TwoFactorError::Store(e) => AppError::Database(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut extra = Map::new();
        let mut retry_after = None;

        let (status, code, detail) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
                CoreError::Unauthorized(msg) => {
                    (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone())
                }
                CoreError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
                CoreError::ServiceUnavailable(msg) => {
                    tracing::warn!(error = %msg, "Service unavailable");
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "SERVICE_UNAVAILABLE",
                        msg.clone(),
                    )
                }
                CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    internal()
                }
            },

            // --- Database errors ---
            AppError::Database(err) => classify_sqlx_error(err),

            // --- HTTP-specific errors ---
            AppError::Validation(errors) => {
                extra.insert("errors".into(), field_errors(errors));
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "VALIDATION_ERROR",
                    "One or more fields are invalid".to_string(),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::TokenExpired { expired_at } => {
                extra.insert("expiredAt".into(), json!(expired_at));
                extra.insert("serverTime".into(), json!(Utc::now()));
                (
                    StatusCode::UNAUTHORIZED,
                    "TOKEN_EXPIRED",
                    "Access token has expired".to_string(),
                )
            }
            AppError::TooManyRequests { retry_after_secs } => {
                retry_after = Some(*retry_after_secs);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    "RATE_LIMITED",
                    format!("Too many requests. Retry after {retry_after_secs} seconds."),
                )
            }
            AppError::TwoFactorRequired => (
                StatusCode::UNAUTHORIZED,
                "TWO_FACTOR_REQUIRED",
                "A two-factor code is required".to_string(),
            ),
            AppError::Locked(msg) => (StatusCode::LOCKED, "SCREEN_LOCKED", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                internal()
            }
        };

        let mut body = Map::new();
        body.insert("type".into(), json!("about:blank"));
        body.insert(
            "title".into(),
            json!(status.canonical_reason().unwrap_or("Error")),
        );
        body.insert("status".into(), json!(status.as_u16()));
        body.insert("detail".into(), json!(detail));
        body.insert("code".into(), json!(code));
        body.extend(extra);

        let mut response = (status, axum::Json(Value::Object(body))).into_response();
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(PROBLEM_JSON));
        if let Some(secs) = retry_after {
            headers.insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

/// Flatten `validator` errors into `{ field: [message, ...] }`.
fn field_errors(errors: &validator::ValidationErrors) -> Value {
    let map: Map<String, Value> = errors
        .field_errors()
        .into_iter()
        .map(|(field, errs)| {
            let messages: Vec<String> = errs
                .iter()
                .map(|e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string())
                })
                .collect();
            (field.to_string(), json!(messages))
        })
        .collect();
    Value::Object(map)
}

/// Classify a sqlx error into an HTTP status, error code, and message.
///
/// - `RowNotFound` maps to 404.
/// - Unique constraint violations (constraint name starting with `uq_`) map to 409.
/// - Everything else maps to 500 with a sanitized message.
fn classify_sqlx_error(err: &sqlx::Error) -> (StatusCode, &'static str, String) {
    match err {
        sqlx::Error::RowNotFound => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "Resource not found".to_string(),
        ),
        sqlx::Error::Database(db_err) => {
            // PostgreSQL unique constraint violation: error code 23505
            if db_err.code().as_deref() == Some("23505") {
                let constraint = db_err.constraint().unwrap_or("unknown");
                if constraint.starts_with("uq_") {
                    return (
                        StatusCode::CONFLICT,
                        "CONFLICT",
                        format!("Duplicate value violates unique constraint: {constraint}"),
                    );
                }
            }
            tracing::error!(error = %db_err, "Database error");
            internal()
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            tracing::error!(error = %err, "Database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                "The database is temporarily unavailable".to_string(),
            )
        }
        other => {
            tracing::error!(error = %other, "Database error");
            internal()
        }
    }
}

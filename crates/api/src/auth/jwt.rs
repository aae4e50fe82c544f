//! JWT access-token generation and validation.
//!
//! Access tokens are HS256-signed JWTs carrying a [`Claims`] payload bound to
//! one server-side session through the `sid` claim. Signature, issuer,
//! audience and expiry are checked strictly; `nbf` tolerates a small clock
//! skew between issuing and validating hosts.

use chrono::{DateTime, Utc};
use ess_core::types::{DbId, SessionId, Timestamp};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How far in the future `nbf` may be before a token is rejected.
pub const NBF_LEEWAY_SECS: i64 = 60;

/// JWT claims embedded in every access token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject -- the user's internal database id.
    pub sub: DbId,
    /// The user's role name (e.g. `"admin"`, `"employee"`).
    pub role: String,
    /// The `user_sessions.id` this token belongs to.
    pub sid: SessionId,
    pub iss: String,
    pub aud: String,
    /// Issued-at time (UTC Unix timestamp).
    pub iat: i64,
    /// Not-before time (UTC Unix timestamp).
    pub nbf: i64,
    /// Expiration time (UTC Unix timestamp).
    pub exp: i64,
    /// Unique token identifier (UUID v4).
    pub jti: String,
}

/// Configuration for JWT token generation and validation.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// HMAC-SHA256 secret used to sign and verify tokens.
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    /// Access token lifetime in minutes (default: 15).
    pub access_token_expiry_mins: i64,
    /// Refresh token lifetime in days (default: 7).
    pub refresh_token_expiry_days: i64,
}

const DEFAULT_ACCESS_EXPIRY_MINS: i64 = 15;
const DEFAULT_REFRESH_EXPIRY_DAYS: i64 = 7;
const DEFAULT_ISSUER: &str = "ess-portal";
const DEFAULT_AUDIENCE: &str = "ess-portal-clients";

impl JwtConfig {
    /// Load JWT configuration from environment variables.
    ///
    /// | Env Var                    | Required | Default             |
    /// |----------------------------|----------|---------------------|
    /// | `JWT_SECRET`               | **yes**  | --                  |
    /// | `JWT_ISSUER`               | no       | `ess-portal`        |
    /// | `JWT_AUDIENCE`             | no       | `ess-portal-clients`|
    /// | `JWT_ACCESS_EXPIRY_MINS`   | no       | `15`                |
    /// | `JWT_REFRESH_EXPIRY_DAYS`  | no       | `7`                 |
    ///
    /// # Panics
    ///
    /// Panics if `JWT_SECRET` is not set or is empty, or if an expiry is not
    /// a positive integer.
    pub fn from_env() -> Self {
        let secret =
            std::env::var("JWT_SECRET").expect("JWT_SECRET must be set in the environment");
        assert!(!secret.is_empty(), "JWT_SECRET must not be empty");

        let access_token_expiry_mins: i64 = std::env::var("JWT_ACCESS_EXPIRY_MINS")
            .unwrap_or_else(|_| DEFAULT_ACCESS_EXPIRY_MINS.to_string())
            .parse()
            .expect("JWT_ACCESS_EXPIRY_MINS must be a valid i64");

        let refresh_token_expiry_days: i64 = std::env::var("JWT_REFRESH_EXPIRY_DAYS")
            .unwrap_or_else(|_| DEFAULT_REFRESH_EXPIRY_DAYS.to_string())
            .parse()
            .expect("JWT_REFRESH_EXPIRY_DAYS must be a valid i64");

        assert!(access_token_expiry_mins > 0, "JWT_ACCESS_EXPIRY_MINS must be positive");
        assert!(refresh_token_expiry_days > 0, "JWT_REFRESH_EXPIRY_DAYS must be positive");

        Self {
            secret,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| DEFAULT_ISSUER.into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| DEFAULT_AUDIENCE.into()),
            access_token_expiry_mins,
            refresh_token_expiry_days,
        }
    }

    /// Access token lifetime in seconds.
    pub fn access_token_ttl_secs(&self) -> i64 {
        self.access_token_expiry_mins * 60
    }
}

/// Why an access token was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("Token expired at {expired_at}")]
    Expired { expired_at: Timestamp },

    #[error("Token is not yet valid")]
    NotYetValid,

    #[error("Token is invalid")]
    Invalid,
}

/// A freshly signed access token.
#[derive(Debug, Clone)]
pub struct IssuedAccessToken {
    pub token: String,
    pub expires_at: Timestamp,
    pub jti: String,
}

/// Generate an HS256 access token for `user_id` bound to `session_id`.
pub fn generate_access_token(
    user_id: DbId,
    role: &str,
    session_id: SessionId,
    config: &JwtConfig,
) -> Result<IssuedAccessToken, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let exp = now + config.access_token_ttl_secs();
    let jti = Uuid::new_v4().to_string();

    let claims = Claims {
        sub: user_id,
        role: role.to_string(),
        sid: session_id,
        iss: config.issuer.clone(),
        aud: config.audience.clone(),
        iat: now,
        nbf: now,
        exp,
        jti: jti.clone(),
    };

    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )?;

    Ok(IssuedAccessToken {
        token,
        expires_at: DateTime::from_timestamp(exp, 0).unwrap_or_default(),
        jti,
    })
}

fn validation(config: &JwtConfig, validate_exp: bool) -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation.validate_exp = validate_exp;
    // nbf is checked by hand with its own leeway.
    validation.validate_nbf = false;
    validation.set_issuer(&[config.issuer.as_str()]);
    validation.set_audience(&[config.audience.as_str()]);
    validation.set_required_spec_claims(&["exp", "iss", "aud"]);
    validation
}

/// Validate and decode an access token, returning the embedded [`Claims`].
pub fn validate_token(token: &str, config: &JwtConfig) -> Result<Claims, TokenError> {
    let key = DecodingKey::from_secret(config.secret.as_bytes());

    let claims = match decode::<Claims>(token, &key, &validation(config, true)) {
        Ok(data) => data.claims,
        Err(e) if matches!(e.kind(), ErrorKind::ExpiredSignature) => {
            // Signature is still verified; only the expiry check is skipped.
            let expired = decode::<Claims>(token, &key, &validation(config, false))
                .map_err(|_| TokenError::Invalid)?;
            return Err(TokenError::Expired {
                expired_at: DateTime::from_timestamp(expired.claims.exp, 0).unwrap_or_default(),
            });
        }
        Err(_) => return Err(TokenError::Invalid),
    };

    if claims.nbf > Utc::now().timestamp() + NBF_LEEWAY_SECS {
        return Err(TokenError::NotYetValid);
    }

    Ok(claims)
}

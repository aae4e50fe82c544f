//! Refresh-token issuance and family rotation with reuse detection.
//!
//! A refresh token is 256 random bits, handed to the client base64url-encoded
//! and stored only as its SHA-256. Every token belongs to a family; rotating a
//! token marks it used and issues its successor in the same family. Presenting
//! a used or revoked token revokes the whole family.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use ess_core::hashing::sha256_hex;
use ess_core::types::{DbId, SessionId, Timestamp};
use ess_db::models::refresh_token::{CreateRefreshToken, RefreshToken, Revocation};
use ess_db::store::RefreshTokenStore;
use rand::RngCore;
use uuid::Uuid;

use crate::auth::jwt::{generate_access_token, IssuedAccessToken, JwtConfig};

/// Revocation reason written when a used or revoked token is presented again.
pub const REUSE_DETECTED: &str = "reuse_detected";

const REFRESH_TOKEN_BYTES: usize = 32;

/// A refresh token as handed to the client, plus its stored row.
#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    pub token: String,
    pub record: RefreshToken,
}

#[derive(Debug, thiserror::Error)]
pub enum RotationError {
    #[error("Invalid refresh token")]
    Unknown,

    #[error("Refresh token has expired")]
    Expired,

    #[error("Refresh token reuse detected")]
    ReuseDetected {
        family_id: Uuid,
        user_id: DbId,
        session_id: Option<SessionId>,
    },

    #[error(transparent)]
    Store(#[from] sqlx::Error),
}

/// Result of a successful rotation.
#[derive(Debug, Clone)]
pub struct Rotated {
    /// The row that was presented and is now marked used.
    pub previous: RefreshToken,
    pub successor: IssuedRefreshToken,
}

fn new_refresh_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn hash_refresh_token(token: &str) -> String {
    sha256_hex(token.as_bytes())
}

pub struct TokenService {
    store: Arc<dyn RefreshTokenStore>,
    jwt: JwtConfig,
}

impl TokenService {
    pub fn new(store: Arc<dyn RefreshTokenStore>, jwt: JwtConfig) -> Self {
        Self { store, jwt }
    }

    pub fn jwt(&self) -> &JwtConfig {
        &self.jwt
    }

    pub fn issue_access_token(
        &self,
        user_id: DbId,
        role: &str,
        session_id: SessionId,
    ) -> Result<IssuedAccessToken, jsonwebtoken::errors::Error> {
        generate_access_token(user_id, role, session_id, &self.jwt)
    }

    /// Issue a refresh token bound to `session_id`. `family = None` starts a
    /// new family.
    pub async fn issue_refresh_token(
        &self,
        user_id: DbId,
        session_id: Option<SessionId>,
        family: Option<Uuid>,
        ip: Option<&str>,
    ) -> Result<IssuedRefreshToken, sqlx::Error> {
        let token = new_refresh_token();
        let input = CreateRefreshToken {
            token_hash: hash_refresh_token(&token),
            user_id,
            session_id,
            family_id: family.unwrap_or_else(Uuid::new_v4),
            expires_at: Utc::now() + Duration::days(self.jwt.refresh_token_expiry_days),
            created_by_ip: ip.map(str::to_string),
        };
        let record = self.store.create_refresh_token(&input).await?;
        Ok(IssuedRefreshToken { token, record })
    }

    /// Exchange `presented` for its successor in the same family.
    pub async fn rotate(&self, presented: &str, ip: Option<&str>) -> Result<Rotated, RotationError> {
        let now = Utc::now();
        let Some(current) = self
            .store
            .find_refresh_token_by_hash(&hash_refresh_token(presented))
            .await?
        else {
            return Err(RotationError::Unknown);
        };

        if current.is_used() || current.is_revoked() {
            return Err(self.reuse_detected(&current, ip, now).await?);
        }
        if current.is_expired(now) {
            return Err(RotationError::Expired);
        }

        // Conditional update: a concurrent refresh that got here first wins.
        if !self.store.mark_refresh_token_used(current.id, now).await? {
            return Err(self.reuse_detected(&current, ip, now).await?);
        }

        let successor = self
            .issue_refresh_token(
                current.user_id,
                current.session_id,
                Some(current.family_id),
                ip,
            )
            .await?;

        Ok(Rotated {
            previous: current,
            successor,
        })
    }

    async fn reuse_detected(
        &self,
        token: &RefreshToken,
        ip: Option<&str>,
        now: Timestamp,
    ) -> Result<RotationError, sqlx::Error> {
        let revoked = self
            .store
            .revoke_refresh_token_family(token.family_id, &revocation(REUSE_DETECTED, ip, now))
            .await?;
        tracing::warn!(
            user_id = token.user_id,
            family_id = %token.family_id,
            revoked,
            "Refresh token reuse detected, family revoked"
        );
        Ok(RotationError::ReuseDetected {
            family_id: token.family_id,
            user_id: token.user_id,
            session_id: token.session_id,
        })
    }

    pub async fn revoke_for_session(
        &self,
        session_id: SessionId,
        reason: &str,
        ip: Option<&str>,
    ) -> Result<u64, sqlx::Error> {
        self.store
            .revoke_session_refresh_tokens(session_id, &revocation(reason, ip, Utc::now()))
            .await
    }

    pub async fn revoke_for_user(
        &self,
        user_id: DbId,
        reason: &str,
        ip: Option<&str>,
    ) -> Result<u64, sqlx::Error> {
        self.store
            .revoke_user_refresh_tokens(user_id, &revocation(reason, ip, Utc::now()))
            .await
    }

    /// Delete tokens expired, used or revoked before `before`.
    pub async fn purge(&self, before: Timestamp) -> Result<u64, sqlx::Error> {
        self.store.purge_refresh_tokens(before).await
    }
}

fn revocation(reason: &str, ip: Option<&str>, at: Timestamp) -> Revocation {
    Revocation {
        reason: reason.to_string(),
        revoked_by_ip: ip.map(str::to_string),
        revoked_at: at,
    }
}

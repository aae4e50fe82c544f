//! Refresh token model and DTOs.

use ess_core::types::{DbId, SessionId, Timestamp};
use sqlx::FromRow;
use uuid::Uuid;

/// A refresh token row. Only the SHA-256 of the opaque token is stored.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshToken {
    pub id: DbId,
    pub token_hash: String,
    pub user_id: DbId,
    pub session_id: Option<SessionId>,
    /// Groups a token with all of its rotated successors.
    pub family_id: Uuid,
    pub expires_at: Timestamp,
    pub created_at: Timestamp,
    pub created_by_ip: Option<String>,
    pub used_at: Option<Timestamp>,
    pub revoked_at: Option<Timestamp>,
    pub revoked_reason: Option<String>,
    pub revoked_by_ip: Option<String>,
}

impl RefreshToken {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_used(&self) -> bool {
        self.used_at.is_some()
    }

    /// Not revoked, not expired, not used.
    pub fn is_active(&self, now: Timestamp) -> bool {
        !self.is_revoked() && !self.is_used() && !self.is_expired(now)
    }
}

/// DTO for inserting a refresh token.
#[derive(Debug, Clone)]
pub struct CreateRefreshToken {
    pub token_hash: String,
    pub user_id: DbId,
    pub session_id: Option<SessionId>,
    pub family_id: Uuid,
    pub expires_at: Timestamp,
    pub created_by_ip: Option<String>,
}

/// Revocation metadata applied to one or many tokens.
#[derive(Debug, Clone)]
pub struct Revocation {
    pub reason: String,
    pub revoked_by_ip: Option<String>,
    pub revoked_at: Timestamp,
}

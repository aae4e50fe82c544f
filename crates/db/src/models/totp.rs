//! Authenticator (TOTP) secret models.

use ess_core::types::{DbId, Timestamp};
use sqlx::FromRow;

/// A confirmed secret from `user_totp_secrets`.
#[derive(Debug, Clone, FromRow)]
pub struct UserTotpSecret {
    pub id: DbId,
    pub user_id: DbId,
    /// Base32, as shown to the authenticator app.
    pub secret: String,
    pub is_active: bool,
    /// Last time step a code was accepted for; older or equal steps are replays.
    pub last_used_step: Option<i64>,
    pub created_at: Timestamp,
    /// `None` never expires.
    pub expires_at: Option<Timestamp>,
    pub deactivated_at: Option<Timestamp>,
}

impl UserTotpSecret {
    pub fn is_usable(&self, now: Timestamp) -> bool {
        self.is_active && self.expires_at.map_or(true, |at| at > now)
    }
}

/// An enrollment secret from `temp_totp_secrets`.
#[derive(Debug, Clone, FromRow)]
pub struct TempTotpSecret {
    pub id: DbId,
    pub user_id: DbId,
    pub secret: String,
    pub is_active: bool,
    pub used_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

impl TempTotpSecret {
    /// Still waiting for confirmation.
    pub fn is_pending(&self, now: Timestamp) -> bool {
        self.is_active && self.used_at.is_none() && self.expires_at > now
    }
}

/// DTO for starting an enrollment.
#[derive(Debug, Clone)]
pub struct CreateTempTotpSecret {
    pub user_id: DbId,
    pub secret: String,
    pub expires_at: Timestamp,
}

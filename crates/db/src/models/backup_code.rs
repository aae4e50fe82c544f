//! Two-factor backup code model.

use ess_core::types::{DbId, Timestamp};
use sqlx::FromRow;

/// A backup code row. `code_hash` is the SHA-256 of the normalised code.
///
/// Regenerating a set deactivates the previous one rather than deleting it;
/// the maintenance sweep removes dead rows later.
#[derive(Debug, Clone, FromRow)]
pub struct UserBackupCode {
    pub id: DbId,
    pub user_id: DbId,
    pub code_hash: String,
    pub is_active: bool,
    pub used_at: Option<Timestamp>,
    pub expires_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl UserBackupCode {
    /// Active, unused and not past its expiry.
    pub fn is_redeemable(&self, now: Timestamp) -> bool {
        self.is_active && self.used_at.is_none() && self.expires_at.map_or(true, |at| at > now)
    }
}

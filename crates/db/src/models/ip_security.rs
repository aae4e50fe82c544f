//! IP block list, allow list, and security event models.

use ess_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from `blocked_ips`. `expires_at = None` means permanent.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedIp {
    pub id: DbId,
    pub ip_address: String,
    pub reason: String,
    pub blocked_at: Timestamp,
    pub expires_at: Option<Timestamp>,
    pub blocked_by: Option<DbId>,
}

impl BlockedIp {
    pub fn is_in_force(&self, now: Timestamp) -> bool {
        self.expires_at.map_or(true, |until| until > now)
    }
}

/// DTO for creating or replacing a block.
#[derive(Debug, Clone)]
pub struct CreateBlockedIp {
    pub ip_address: String,
    pub reason: String,
    pub expires_at: Option<Timestamp>,
    pub blocked_by: Option<DbId>,
}

/// A row from `ip_whitelist`.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IpWhitelistEntry {
    pub id: DbId,
    pub ip_address: String,
    pub description: Option<String>,
    pub created_at: Timestamp,
}

/// A row from the append-only `ip_security_events` log.
#[derive(Debug, Clone, FromRow)]
pub struct IpSecurityEvent {
    pub id: DbId,
    pub ip_address: String,
    pub event_type: String,
    pub user_id: Option<DbId>,
    pub detail: Option<String>,
    pub occurred_at: Timestamp,
}

/// DTO for appending a security event.
#[derive(Debug, Clone)]
pub struct CreateIpSecurityEvent {
    pub ip_address: String,
    pub event_type: String,
    pub user_id: Option<DbId>,
    pub detail: Option<String>,
    pub occurred_at: Timestamp,
}

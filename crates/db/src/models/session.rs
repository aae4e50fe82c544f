//! User session model and DTOs.

use ess_core::types::{DbId, SessionId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A session row from the `user_sessions` table.
#[derive(Debug, Clone, FromRow)]
pub struct UserSession {
    pub id: SessionId,
    pub user_id: DbId,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_fingerprint: String,
    pub created_at: Timestamp,
    pub last_accessed_at: Timestamp,
    pub expires_at: Timestamp,
    pub is_active: bool,
    pub locked_at: Option<Timestamp>,
    pub ended_at: Option<Timestamp>,
    pub end_reason: Option<String>,
}

impl UserSession {
    /// Active and not yet past `expires_at`.
    pub fn is_live(&self, now: Timestamp) -> bool {
        self.is_active && self.expires_at > now
    }

    pub fn is_locked(&self) -> bool {
        self.locked_at.is_some()
    }
}

/// DTO for creating a new user session.
#[derive(Debug, Clone)]
pub struct CreateSession {
    pub id: SessionId,
    pub user_id: DbId,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_fingerprint: String,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

/// Session summary returned to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub id: SessionId,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: Timestamp,
    pub last_accessed_at: Timestamp,
    pub expires_at: Timestamp,
    pub is_locked: bool,
    /// Whether this is the session making the request.
    pub is_current: bool,
}

impl SessionResponse {
    pub fn from_session(session: &UserSession, current: Option<SessionId>) -> Self {
        Self {
            id: session.id,
            ip_address: session.ip_address.clone(),
            user_agent: session.user_agent.clone(),
            created_at: session.created_at,
            last_accessed_at: session.last_accessed_at,
            expires_at: session.expires_at,
            is_locked: session.is_locked(),
            is_current: current == Some(session.id),
        }
    }
}

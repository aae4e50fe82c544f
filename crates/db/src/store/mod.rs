//! Storage traits the services are written against.
//!
//! [`PgStore`] delegates each method to the matching repository. [`MemoryStore`]
//! keeps everything in process and backs the integration tests and
//! database-less development runs.

use async_trait::async_trait;
use ess_core::types::{DbId, SessionId, Timestamp};
use uuid::Uuid;

use crate::models::ip_security::{
    BlockedIp, CreateBlockedIp, CreateIpSecurityEvent, IpSecurityEvent, IpWhitelistEntry,
};
use crate::models::refresh_token::{CreateRefreshToken, RefreshToken, Revocation};
use crate::models::session::{CreateSession, UserSession};
use crate::models::totp::{CreateTempTotpSecret, TempTotpSecret, UserTotpSecret};
use crate::models::user::{CreateUser, User};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, sqlx::Error>;

#[async_trait]
pub trait UserStore: Send + Sync + 'static {
    async fn create_user(&self, input: &CreateUser) -> StoreResult<User>;
    async fn find_user_by_id(&self, id: DbId) -> StoreResult<Option<User>>;
    /// Case-insensitive match on username or email; skips deleted users.
    async fn find_user_by_login(&self, login: &str) -> StoreResult<Option<User>>;
    async fn list_users(&self) -> StoreResult<Vec<User>>;
    async fn increment_failed_login(&self, id: DbId) -> StoreResult<i32>;
    async fn lock_account(&self, id: DbId, until: Timestamp) -> StoreResult<()>;
    async fn record_successful_login(&self, id: DbId, at: Timestamp) -> StoreResult<()>;
    async fn update_password(&self, id: DbId, password_hash: &str) -> StoreResult<bool>;
    async fn soft_delete_user(&self, id: DbId, at: Timestamp) -> StoreResult<bool>;
}

#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    async fn create_session(&self, input: &CreateSession) -> StoreResult<UserSession>;
    async fn find_session(&self, id: SessionId) -> StoreResult<Option<UserSession>>;
    /// Active sessions with `expires_at > now`, oldest `created_at` first.
    async fn list_active_sessions(
        &self,
        user_id: DbId,
        now: Timestamp,
    ) -> StoreResult<Vec<UserSession>>;
    async fn touch_session(
        &self,
        id: SessionId,
        last_accessed_at: Timestamp,
        expires_at: Timestamp,
    ) -> StoreResult<bool>;
    /// Ends an active session. Returns `false` if it was already ended.
    async fn end_session(&self, id: SessionId, reason: &str, at: Timestamp) -> StoreResult<bool>;
    async fn end_user_sessions(
        &self,
        user_id: DbId,
        except: Option<SessionId>,
        reason: &str,
        at: Timestamp,
    ) -> StoreResult<u64>;
    async fn expire_sessions(&self, now: Timestamp) -> StoreResult<u64>;
    async fn set_session_lock(
        &self,
        id: SessionId,
        locked_at: Option<Timestamp>,
    ) -> StoreResult<bool>;
    async fn purge_ended_sessions(&self, before: Timestamp) -> StoreResult<u64>;
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync + 'static {
    async fn create_refresh_token(&self, input: &CreateRefreshToken) -> StoreResult<RefreshToken>;
    async fn find_refresh_token_by_hash(&self, hash: &str) -> StoreResult<Option<RefreshToken>>;
    /// Conditional on the token being neither used nor revoked.
    async fn mark_refresh_token_used(&self, id: DbId, at: Timestamp) -> StoreResult<bool>;
    async fn revoke_refresh_token_family(
        &self,
        family_id: Uuid,
        revocation: &Revocation,
    ) -> StoreResult<u64>;
    async fn revoke_session_refresh_tokens(
        &self,
        session_id: SessionId,
        revocation: &Revocation,
    ) -> StoreResult<u64>;
    async fn revoke_user_refresh_tokens(
        &self,
        user_id: DbId,
        revocation: &Revocation,
    ) -> StoreResult<u64>;
    async fn list_refresh_token_family(&self, family_id: Uuid) -> StoreResult<Vec<RefreshToken>>;
    async fn purge_refresh_tokens(&self, before: Timestamp) -> StoreResult<u64>;
}

#[async_trait]
pub trait BackupCodeStore: Send + Sync + 'static {
    /// Deactivates the user's live codes and inserts the new set atomically.
    async fn replace_backup_codes(
        &self,
        user_id: DbId,
        hashes: &[String],
        expires_at: Option<Timestamp>,
    ) -> StoreResult<u64>;
    /// Conditional on the code being active, unused and unexpired at `at`.
    async fn consume_backup_code(
        &self,
        user_id: DbId,
        hash: &str,
        at: Timestamp,
    ) -> StoreResult<bool>;
    async fn count_redeemable_backup_codes(&self, user_id: DbId, now: Timestamp)
        -> StoreResult<i64>;
    async fn deactivate_backup_codes(&self, user_id: DbId) -> StoreResult<u64>;
    /// Deletes inactive codes and codes used or expired before `before`.
    async fn purge_backup_codes(&self, before: Timestamp) -> StoreResult<u64>;
}

#[async_trait]
pub trait TotpStore: Send + Sync + 'static {
    /// Deactivates the user's other pending enrollments.
    async fn create_temp_totp_secret(
        &self,
        input: &CreateTempTotpSecret,
    ) -> StoreResult<TempTotpSecret>;
    async fn find_pending_temp_totp_secret(
        &self,
        user_id: DbId,
        now: Timestamp,
    ) -> StoreResult<Option<TempTotpSecret>>;
    /// Consumes the temp secret and makes it the user's only active secret.
    /// `None` when the temp secret is no longer pending.
    async fn activate_totp_secret(
        &self,
        temp_id: DbId,
        at: Timestamp,
    ) -> StoreResult<Option<UserTotpSecret>>;
    async fn find_active_totp_secret(
        &self,
        user_id: DbId,
        now: Timestamp,
    ) -> StoreResult<Option<UserTotpSecret>>;
    /// Conditional on `step` being later than the last accepted step.
    async fn record_totp_step(&self, id: DbId, step: i64) -> StoreResult<bool>;
    async fn deactivate_totp_secrets(&self, user_id: DbId, at: Timestamp) -> StoreResult<u64>;
    /// Deletes enrollment secrets that expired or are no longer active.
    async fn purge_temp_totp_secrets(&self, now: Timestamp) -> StoreResult<u64>;
}

#[async_trait]
pub trait IpSecurityStore: Send + Sync + 'static {
    async fn find_active_block(&self, ip: &str, now: Timestamp) -> StoreResult<Option<BlockedIp>>;
    async fn upsert_block(&self, input: &CreateBlockedIp) -> StoreResult<BlockedIp>;
    async fn remove_block(&self, ip: &str) -> StoreResult<bool>;
    async fn list_blocks(&self, now: Timestamp) -> StoreResult<Vec<BlockedIp>>;
    async fn purge_expired_blocks(&self, now: Timestamp) -> StoreResult<u64>;
    async fn is_whitelisted(&self, ip: &str) -> StoreResult<bool>;
    async fn add_whitelist(
        &self,
        ip: &str,
        description: Option<&str>,
    ) -> StoreResult<IpWhitelistEntry>;
    async fn remove_whitelist(&self, ip: &str) -> StoreResult<bool>;
    async fn record_ip_event(&self, input: &CreateIpSecurityEvent)
        -> StoreResult<IpSecurityEvent>;
    async fn count_ip_events(
        &self,
        ip: &str,
        event_type: &str,
        since: Timestamp,
    ) -> StoreResult<i64>;
    async fn purge_ip_events(&self, before: Timestamp) -> StoreResult<u64>;
}

/// Every store concern plus a liveness check.
#[async_trait]
pub trait Store:
    UserStore + SessionStore + RefreshTokenStore + BackupCodeStore + TotpStore + IpSecurityStore
{
    async fn ping(&self) -> StoreResult<()>;
}

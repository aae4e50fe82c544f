//! PostgreSQL-backed store.

use async_trait::async_trait;
use ess_core::types::{DbId, SessionId, Timestamp};
use uuid::Uuid;

use super::{
    BackupCodeStore, IpSecurityStore, RefreshTokenStore, SessionStore, Store, StoreResult,
    TotpStore, UserStore,
};
use crate::models::ip_security::{
    BlockedIp, CreateBlockedIp, CreateIpSecurityEvent, IpSecurityEvent, IpWhitelistEntry,
};
use crate::models::refresh_token::{CreateRefreshToken, RefreshToken, Revocation};
use crate::models::session::{CreateSession, UserSession};
use crate::models::totp::{CreateTempTotpSecret, TempTotpSecret, UserTotpSecret};
use crate::models::user::{CreateUser, User};
use crate::repositories::{
    BackupCodeRepo, IpSecurityRepo, RefreshTokenRepo, SessionRepo, TotpRepo, UserRepo,
};
use crate::DbPool;

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn create_user(&self, input: &CreateUser) -> StoreResult<User> {
        UserRepo::create(&self.pool, input).await
    }

    async fn find_user_by_id(&self, id: DbId) -> StoreResult<Option<User>> {
        UserRepo::find_by_id(&self.pool, id).await
    }

    async fn find_user_by_login(&self, login: &str) -> StoreResult<Option<User>> {
        UserRepo::find_by_login(&self.pool, login).await
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        UserRepo::list(&self.pool).await
    }

    async fn increment_failed_login(&self, id: DbId) -> StoreResult<i32> {
        UserRepo::increment_failed_login(&self.pool, id).await
    }

    async fn lock_account(&self, id: DbId, until: Timestamp) -> StoreResult<()> {
        UserRepo::lock_account(&self.pool, id, until).await
    }

    async fn record_successful_login(&self, id: DbId, at: Timestamp) -> StoreResult<()> {
        UserRepo::record_successful_login(&self.pool, id, at).await
    }

    async fn update_password(&self, id: DbId, password_hash: &str) -> StoreResult<bool> {
        UserRepo::update_password(&self.pool, id, password_hash).await
    }

    async fn soft_delete_user(&self, id: DbId, at: Timestamp) -> StoreResult<bool> {
        UserRepo::soft_delete(&self.pool, id, at).await
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn create_session(&self, input: &CreateSession) -> StoreResult<UserSession> {
        SessionRepo::create(&self.pool, input).await
    }

    async fn find_session(&self, id: SessionId) -> StoreResult<Option<UserSession>> {
        SessionRepo::find_by_id(&self.pool, id).await
    }

    async fn list_active_sessions(
        &self,
        user_id: DbId,
        now: Timestamp,
    ) -> StoreResult<Vec<UserSession>> {
        SessionRepo::list_active_for_user(&self.pool, user_id, now).await
    }

    async fn touch_session(
        &self,
        id: SessionId,
        last_accessed_at: Timestamp,
        expires_at: Timestamp,
    ) -> StoreResult<bool> {
        SessionRepo::touch(&self.pool, id, last_accessed_at, expires_at).await
    }

    async fn end_session(&self, id: SessionId, reason: &str, at: Timestamp) -> StoreResult<bool> {
        SessionRepo::end(&self.pool, id, reason, at).await
    }

    async fn end_user_sessions(
        &self,
        user_id: DbId,
        except: Option<SessionId>,
        reason: &str,
        at: Timestamp,
    ) -> StoreResult<u64> {
        SessionRepo::end_all_for_user(&self.pool, user_id, except, reason, at).await
    }

    async fn expire_sessions(&self, now: Timestamp) -> StoreResult<u64> {
        SessionRepo::expire_due(&self.pool, now).await
    }

    async fn set_session_lock(
        &self,
        id: SessionId,
        locked_at: Option<Timestamp>,
    ) -> StoreResult<bool> {
        SessionRepo::set_locked(&self.pool, id, locked_at).await
    }

    async fn purge_ended_sessions(&self, before: Timestamp) -> StoreResult<u64> {
        SessionRepo::purge_ended(&self.pool, before).await
    }
}

#[async_trait]
impl RefreshTokenStore for PgStore {
    async fn create_refresh_token(&self, input: &CreateRefreshToken) -> StoreResult<RefreshToken> {
        RefreshTokenRepo::create(&self.pool, input).await
    }

    async fn find_refresh_token_by_hash(&self, hash: &str) -> StoreResult<Option<RefreshToken>> {
        RefreshTokenRepo::find_by_hash(&self.pool, hash).await
    }

    async fn mark_refresh_token_used(&self, id: DbId, at: Timestamp) -> StoreResult<bool> {
        RefreshTokenRepo::mark_used(&self.pool, id, at).await
    }

    async fn revoke_refresh_token_family(
        &self,
        family_id: Uuid,
        revocation: &Revocation,
    ) -> StoreResult<u64> {
        RefreshTokenRepo::revoke_family(&self.pool, family_id, revocation).await
    }

    async fn revoke_session_refresh_tokens(
        &self,
        session_id: SessionId,
        revocation: &Revocation,
    ) -> StoreResult<u64> {
        RefreshTokenRepo::revoke_for_session(&self.pool, session_id, revocation).await
    }

    async fn revoke_user_refresh_tokens(
        &self,
        user_id: DbId,
        revocation: &Revocation,
    ) -> StoreResult<u64> {
        RefreshTokenRepo::revoke_for_user(&self.pool, user_id, revocation).await
    }

    async fn list_refresh_token_family(&self, family_id: Uuid) -> StoreResult<Vec<RefreshToken>> {
        RefreshTokenRepo::list_family(&self.pool, family_id).await
    }

    async fn purge_refresh_tokens(&self, before: Timestamp) -> StoreResult<u64> {
        RefreshTokenRepo::purge_stale(&self.pool, before).await
    }
}

#[async_trait]
impl BackupCodeStore for PgStore {
    async fn replace_backup_codes(
        &self,
        user_id: DbId,
        hashes: &[String],
        expires_at: Option<Timestamp>,
    ) -> StoreResult<u64> {
        BackupCodeRepo::replace_for_user(&self.pool, user_id, hashes, expires_at).await
    }

    async fn consume_backup_code(
        &self,
        user_id: DbId,
        hash: &str,
        at: Timestamp,
    ) -> StoreResult<bool> {
        BackupCodeRepo::consume(&self.pool, user_id, hash, at).await
    }

    async fn count_redeemable_backup_codes(
        &self,
        user_id: DbId,
        now: Timestamp,
    ) -> StoreResult<i64> {
        BackupCodeRepo::count_redeemable(&self.pool, user_id, now).await
    }

    async fn deactivate_backup_codes(&self, user_id: DbId) -> StoreResult<u64> {
        BackupCodeRepo::deactivate_for_user(&self.pool, user_id).await
    }

    async fn purge_backup_codes(&self, before: Timestamp) -> StoreResult<u64> {
        BackupCodeRepo::purge(&self.pool, before).await
    }
}

#[async_trait]
impl TotpStore for PgStore {
    async fn create_temp_totp_secret(
        &self,
        input: &CreateTempTotpSecret,
    ) -> StoreResult<TempTotpSecret> {
        TotpRepo::create_temp(&self.pool, input).await
    }

    async fn find_pending_temp_totp_secret(
        &self,
        user_id: DbId,
        now: Timestamp,
    ) -> StoreResult<Option<TempTotpSecret>> {
        TotpRepo::find_pending_temp(&self.pool, user_id, now).await
    }

    async fn activate_totp_secret(
        &self,
        temp_id: DbId,
        at: Timestamp,
    ) -> StoreResult<Option<UserTotpSecret>> {
        TotpRepo::activate(&self.pool, temp_id, at).await
    }

    async fn find_active_totp_secret(
        &self,
        user_id: DbId,
        now: Timestamp,
    ) -> StoreResult<Option<UserTotpSecret>> {
        TotpRepo::find_active(&self.pool, user_id, now).await
    }

    async fn record_totp_step(&self, id: DbId, step: i64) -> StoreResult<bool> {
        TotpRepo::record_step(&self.pool, id, step).await
    }

    async fn deactivate_totp_secrets(&self, user_id: DbId, at: Timestamp) -> StoreResult<u64> {
        TotpRepo::deactivate_for_user(&self.pool, user_id, at).await
    }

    async fn purge_temp_totp_secrets(&self, now: Timestamp) -> StoreResult<u64> {
        TotpRepo::purge_temp(&self.pool, now).await
    }
}

#[async_trait]
impl IpSecurityStore for PgStore {
    async fn find_active_block(&self, ip: &str, now: Timestamp) -> StoreResult<Option<BlockedIp>> {
        IpSecurityRepo::find_active_block(&self.pool, ip, now).await
    }

    async fn upsert_block(&self, input: &CreateBlockedIp) -> StoreResult<BlockedIp> {
        IpSecurityRepo::upsert_block(&self.pool, input).await
    }

    async fn remove_block(&self, ip: &str) -> StoreResult<bool> {
        IpSecurityRepo::delete_block(&self.pool, ip).await
    }

    async fn list_blocks(&self, now: Timestamp) -> StoreResult<Vec<BlockedIp>> {
        IpSecurityRepo::list_active_blocks(&self.pool, now).await
    }

    async fn purge_expired_blocks(&self, now: Timestamp) -> StoreResult<u64> {
        IpSecurityRepo::purge_expired_blocks(&self.pool, now).await
    }

    async fn is_whitelisted(&self, ip: &str) -> StoreResult<bool> {
        IpSecurityRepo::is_whitelisted(&self.pool, ip).await
    }

    async fn add_whitelist(
        &self,
        ip: &str,
        description: Option<&str>,
    ) -> StoreResult<IpWhitelistEntry> {
        IpSecurityRepo::upsert_whitelist(&self.pool, ip, description).await
    }

    async fn remove_whitelist(&self, ip: &str) -> StoreResult<bool> {
        IpSecurityRepo::delete_whitelist(&self.pool, ip).await
    }

    async fn record_ip_event(
        &self,
        input: &CreateIpSecurityEvent,
    ) -> StoreResult<IpSecurityEvent> {
        IpSecurityRepo::insert_event(&self.pool, input).await
    }

    async fn count_ip_events(
        &self,
        ip: &str,
        event_type: &str,
        since: Timestamp,
    ) -> StoreResult<i64> {
        IpSecurityRepo::count_events_since(&self.pool, ip, event_type, since).await
    }

    async fn purge_ip_events(&self, before: Timestamp) -> StoreResult<u64> {
        IpSecurityRepo::purge_events(&self.pool, before).await
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> StoreResult<()> {
        crate::health_check(&self.pool).await
    }
}

//! In-process store with the same observable behaviour as [`super::PgStore`],
//! including the unique and check constraints the API maps to status codes.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use async_trait::async_trait;
use chrono::Utc;
use ess_core::types::{DbId, SessionId, Timestamp};
use parking_lot::Mutex;
use sqlx::error::{DatabaseError, ErrorKind};
use uuid::Uuid;

use super::{
    BackupCodeStore, IpSecurityStore, RefreshTokenStore, SessionStore, Store, StoreResult,
    TotpStore, UserStore,
};
use crate::models::backup_code::UserBackupCode;
use crate::models::ip_security::{
    BlockedIp, CreateBlockedIp, CreateIpSecurityEvent, IpSecurityEvent, IpWhitelistEntry,
};
use crate::models::refresh_token::{CreateRefreshToken, RefreshToken, Revocation};
use crate::models::session::{CreateSession, UserSession};
use crate::models::totp::{CreateTempTotpSecret, TempTotpSecret, UserTotpSecret};
use crate::models::user::{CreateUser, User};

const UNIQUE_VIOLATION: &str = "23505";
const CHECK_VIOLATION: &str = "23514";

/// Constraint failure raised by [`MemoryStore`], shaped like a PostgreSQL one.
#[derive(Debug)]
struct ConstraintViolation {
    code: &'static str,
    constraint: &'static str,
    table: &'static str,
    message: String,
}

impl ConstraintViolation {
    fn unique(table: &'static str, constraint: &'static str) -> sqlx::Error {
        sqlx::Error::Database(Box::new(Self {
            code: UNIQUE_VIOLATION,
            constraint,
            table,
            message: format!(
                "duplicate key value violates unique constraint \"{constraint}\""
            ),
        }))
    }

    fn check(table: &'static str, constraint: &'static str) -> sqlx::Error {
        sqlx::Error::Database(Box::new(Self {
            code: CHECK_VIOLATION,
            constraint,
            table,
            message: format!(
                "new row for relation \"{table}\" violates check constraint \"{constraint}\""
            ),
        }))
    }
}

impl fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ConstraintViolation {}

impl DatabaseError for ConstraintViolation {
    fn message(&self) -> &str {
        &self.message
    }

    fn code(&self) -> Option<Cow<'_, str>> {
        Some(Cow::Borrowed(self.code))
    }

    fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self
    }

    fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
        self
    }

    fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
        self
    }

    fn constraint(&self) -> Option<&str> {
        Some(self.constraint)
    }

    fn table(&self) -> Option<&str> {
        Some(self.table)
    }

    fn kind(&self) -> ErrorKind {
        match self.code {
            UNIQUE_VIOLATION => ErrorKind::UniqueViolation,
            CHECK_VIOLATION => ErrorKind::CheckViolation,
            _ => ErrorKind::Other,
        }
    }
}

#[derive(Default)]
struct Tables {
    next_id: DbId,
    users: BTreeMap<DbId, User>,
    sessions: HashMap<SessionId, UserSession>,
    refresh_tokens: BTreeMap<DbId, RefreshToken>,
    backup_codes: Vec<UserBackupCode>,
    totp_secrets: Vec<UserTotpSecret>,
    temp_totp_secrets: Vec<TempTotpSecret>,
    blocked_ips: HashMap<String, BlockedIp>,
    whitelist: HashMap<String, IpWhitelistEntry>,
    events: Vec<IpSecurityEvent>,
}

impl Tables {
    fn allocate_id(&mut self) -> DbId {
        self.next_id += 1;
        self.next_id
    }
}

/// All tables behind one mutex, so every operation is atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn revoke(token: &mut RefreshToken, revocation: &Revocation) {
    token.revoked_at = Some(revocation.revoked_at);
    token.revoked_reason = Some(revocation.reason.clone());
    token.revoked_by_ip = revocation.revoked_by_ip.clone();
}

fn end(session: &mut UserSession, reason: &str, at: Timestamp) {
    session.is_active = false;
    session.ended_at = Some(at);
    session.end_reason = Some(reason.to_string());
}

fn deactivate_totp(secret: &mut UserTotpSecret, at: Timestamp) {
    secret.is_active = false;
    secret.deactivated_at = Some(at);
}

fn revoke_where<F>(tables: &mut Tables, revocation: &Revocation, matches: F) -> u64
where
    F: Fn(&RefreshToken) -> bool,
{
    let mut count = 0;
    for token in tables.refresh_tokens.values_mut() {
        if token.revoked_at.is_none() && matches(token) {
            revoke(token, revocation);
            count += 1;
        }
    }
    count
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, input: &CreateUser) -> StoreResult<User> {
        let mut tables = self.tables.lock();
        if tables.users.values().any(|u| u.username == input.username) {
            return Err(ConstraintViolation::unique("users", "uq_users_username"));
        }
        if tables.users.values().any(|u| u.email == input.email) {
            return Err(ConstraintViolation::unique("users", "uq_users_email"));
        }
        let now = Utc::now();
        let user = User {
            id: tables.allocate_id(),
            username: input.username.clone(),
            email: input.email.clone(),
            employee_no: input.employee_no.clone(),
            password_hash: input.password_hash.clone(),
            role: input.role.clone(),
            manager_id: input.manager_id,
            is_active: true,
            failed_login_count: 0,
            locked_until: None,
            last_login_at: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user_by_id(&self, id: DbId) -> StoreResult<Option<User>> {
        Ok(self.tables.lock().users.get(&id).cloned())
    }

    async fn find_user_by_login(&self, login: &str) -> StoreResult<Option<User>> {
        let login = login.to_lowercase();
        Ok(self
            .tables
            .lock()
            .users
            .values()
            .filter(|u| u.deleted_at.is_none())
            .find(|u| u.username.to_lowercase() == login || u.email.to_lowercase() == login)
            .cloned())
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        let tables = self.tables.lock();
        let mut users: Vec<User> = tables
            .users
            .values()
            .filter(|u| u.deleted_at.is_none())
            .cloned()
            .collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(users)
    }

    async fn increment_failed_login(&self, id: DbId) -> StoreResult<i32> {
        let mut tables = self.tables.lock();
        let user = tables.users.get_mut(&id).ok_or(sqlx::Error::RowNotFound)?;
        user.failed_login_count += 1;
        user.updated_at = Utc::now();
        Ok(user.failed_login_count)
    }

    async fn lock_account(&self, id: DbId, until: Timestamp) -> StoreResult<()> {
        if let Some(user) = self.tables.lock().users.get_mut(&id) {
            user.locked_until = Some(until);
            user.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn record_successful_login(&self, id: DbId, at: Timestamp) -> StoreResult<()> {
        if let Some(user) = self.tables.lock().users.get_mut(&id) {
            user.failed_login_count = 0;
            user.locked_until = None;
            user.last_login_at = Some(at);
            user.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_password(&self, id: DbId, password_hash: &str) -> StoreResult<bool> {
        match self.tables.lock().users.get_mut(&id) {
            Some(user) => {
                user.password_hash = password_hash.to_string();
                user.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn soft_delete_user(&self, id: DbId, at: Timestamp) -> StoreResult<bool> {
        match self.tables.lock().users.get_mut(&id) {
            Some(user) if user.deleted_at.is_none() => {
                user.deleted_at = Some(at);
                user.is_active = false;
                user.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, input: &CreateSession) -> StoreResult<UserSession> {
        if input.expires_at <= input.created_at {
            return Err(ConstraintViolation::check(
                "user_sessions",
                "ck_user_sessions_expiry",
            ));
        }
        let mut tables = self.tables.lock();
        if tables.sessions.contains_key(&input.id) {
            return Err(ConstraintViolation::unique("user_sessions", "user_sessions_pkey"));
        }
        let session = UserSession {
            id: input.id,
            user_id: input.user_id,
            ip_address: input.ip_address.clone(),
            user_agent: input.user_agent.clone(),
            device_fingerprint: input.device_fingerprint.clone(),
            created_at: input.created_at,
            last_accessed_at: input.created_at,
            expires_at: input.expires_at,
            is_active: true,
            locked_at: None,
            ended_at: None,
            end_reason: None,
        };
        tables.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn find_session(&self, id: SessionId) -> StoreResult<Option<UserSession>> {
        Ok(self.tables.lock().sessions.get(&id).cloned())
    }

    async fn list_active_sessions(
        &self,
        user_id: DbId,
        now: Timestamp,
    ) -> StoreResult<Vec<UserSession>> {
        let tables = self.tables.lock();
        let mut sessions: Vec<UserSession> = tables
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && s.is_live(now))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(sessions)
    }

    async fn touch_session(
        &self,
        id: SessionId,
        last_accessed_at: Timestamp,
        expires_at: Timestamp,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.lock();
        let Some(session) = tables.sessions.get_mut(&id).filter(|s| s.is_active) else {
            return Ok(false);
        };
        if expires_at <= session.created_at {
            return Err(ConstraintViolation::check(
                "user_sessions",
                "ck_user_sessions_expiry",
            ));
        }
        if last_accessed_at < session.created_at {
            return Err(ConstraintViolation::check(
                "user_sessions",
                "ck_user_sessions_last_access",
            ));
        }
        session.last_accessed_at = last_accessed_at;
        session.expires_at = expires_at;
        Ok(true)
    }

    async fn end_session(&self, id: SessionId, reason: &str, at: Timestamp) -> StoreResult<bool> {
        match self.tables.lock().sessions.get_mut(&id) {
            Some(session) if session.is_active => {
                end(session, reason, at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn end_user_sessions(
        &self,
        user_id: DbId,
        except: Option<SessionId>,
        reason: &str,
        at: Timestamp,
    ) -> StoreResult<u64> {
        let mut count = 0;
        for session in self.tables.lock().sessions.values_mut() {
            if session.user_id == user_id && session.is_active && Some(session.id) != except {
                end(session, reason, at);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn expire_sessions(&self, now: Timestamp) -> StoreResult<u64> {
        let mut count = 0;
        for session in self.tables.lock().sessions.values_mut() {
            if session.is_active && session.expires_at <= now {
                end(session, "expired", now);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn set_session_lock(
        &self,
        id: SessionId,
        locked_at: Option<Timestamp>,
    ) -> StoreResult<bool> {
        match self.tables.lock().sessions.get_mut(&id) {
            Some(session) if session.is_active => {
                session.locked_at = locked_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn purge_ended_sessions(&self, before: Timestamp) -> StoreResult<u64> {
        let mut tables = self.tables.lock();
        let before_len = tables.sessions.len();
        tables
            .sessions
            .retain(|_, s| s.is_active || s.ended_at.map_or(true, |at| at >= before));
        let purged = before_len - tables.sessions.len();
        // Mirrors ON DELETE SET NULL on refresh_tokens.session_id.
        let Tables {
            sessions,
            refresh_tokens,
            ..
        } = &mut *tables;
        for token in refresh_tokens.values_mut() {
            if token.session_id.is_some_and(|sid| !sessions.contains_key(&sid)) {
                token.session_id = None;
            }
        }
        Ok(purged as u64)
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryStore {
    async fn create_refresh_token(&self, input: &CreateRefreshToken) -> StoreResult<RefreshToken> {
        let mut tables = self.tables.lock();
        if tables
            .refresh_tokens
            .values()
            .any(|t| t.token_hash == input.token_hash)
        {
            return Err(ConstraintViolation::unique(
                "refresh_tokens",
                "uq_refresh_tokens_token_hash",
            ));
        }
        let token = RefreshToken {
            id: tables.allocate_id(),
            token_hash: input.token_hash.clone(),
            user_id: input.user_id,
            session_id: input.session_id,
            family_id: input.family_id,
            expires_at: input.expires_at,
            created_at: Utc::now(),
            created_by_ip: input.created_by_ip.clone(),
            used_at: None,
            revoked_at: None,
            revoked_reason: None,
            revoked_by_ip: None,
        };
        tables.refresh_tokens.insert(token.id, token.clone());
        Ok(token)
    }

    async fn find_refresh_token_by_hash(&self, hash: &str) -> StoreResult<Option<RefreshToken>> {
        Ok(self
            .tables
            .lock()
            .refresh_tokens
            .values()
            .find(|t| t.token_hash == hash)
            .cloned())
    }

    async fn mark_refresh_token_used(&self, id: DbId, at: Timestamp) -> StoreResult<bool> {
        match self.tables.lock().refresh_tokens.get_mut(&id) {
            Some(token) if token.used_at.is_none() && token.revoked_at.is_none() => {
                token.used_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_refresh_token_family(
        &self,
        family_id: Uuid,
        revocation: &Revocation,
    ) -> StoreResult<u64> {
        let mut tables = self.tables.lock();
        Ok(revoke_where(&mut tables, revocation, |t| t.family_id == family_id))
    }

    async fn revoke_session_refresh_tokens(
        &self,
        session_id: SessionId,
        revocation: &Revocation,
    ) -> StoreResult<u64> {
        let mut tables = self.tables.lock();
        Ok(revoke_where(&mut tables, revocation, |t| {
            t.session_id == Some(session_id)
        }))
    }

    async fn revoke_user_refresh_tokens(
        &self,
        user_id: DbId,
        revocation: &Revocation,
    ) -> StoreResult<u64> {
        let mut tables = self.tables.lock();
        Ok(revoke_where(&mut tables, revocation, |t| t.user_id == user_id))
    }

    async fn list_refresh_token_family(&self, family_id: Uuid) -> StoreResult<Vec<RefreshToken>> {
        Ok(self
            .tables
            .lock()
            .refresh_tokens
            .values()
            .filter(|t| t.family_id == family_id)
            .cloned()
            .collect())
    }

    async fn purge_refresh_tokens(&self, before: Timestamp) -> StoreResult<u64> {
        let mut tables = self.tables.lock();
        let before_len = tables.refresh_tokens.len();
        tables.refresh_tokens.retain(|_, t| {
            !(t.expires_at < before
                || t.used_at.is_some_and(|at| at < before)
                || t.revoked_at.is_some_and(|at| at < before))
        });
        Ok((before_len - tables.refresh_tokens.len()) as u64)
    }
}

#[async_trait]
impl BackupCodeStore for MemoryStore {
    async fn replace_backup_codes(
        &self,
        user_id: DbId,
        hashes: &[String],
        expires_at: Option<Timestamp>,
    ) -> StoreResult<u64> {
        let now = Utc::now();
        if expires_at.is_some_and(|at| at <= now) {
            return Err(ConstraintViolation::check(
                "user_backup_codes",
                "ck_user_backup_codes_expiry",
            ));
        }
        let mut tables = self.tables.lock();
        let mut fresh: Vec<UserBackupCode> = Vec::with_capacity(hashes.len());
        for hash in hashes {
            if fresh.iter().any(|c| &c.code_hash == hash) {
                return Err(ConstraintViolation::unique(
                    "user_backup_codes",
                    "uq_user_backup_codes_active_code",
                ));
            }
            fresh.push(UserBackupCode {
                id: tables.allocate_id(),
                user_id,
                code_hash: hash.clone(),
                is_active: true,
                used_at: None,
                expires_at,
                created_at: now,
            });
        }
        for code in tables.backup_codes.iter_mut() {
            if code.user_id == user_id {
                code.is_active = false;
            }
        }
        tables.backup_codes.extend(fresh);
        Ok(hashes.len() as u64)
    }

    async fn consume_backup_code(
        &self,
        user_id: DbId,
        hash: &str,
        at: Timestamp,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.lock();
        let code = tables
            .backup_codes
            .iter_mut()
            .find(|c| c.user_id == user_id && c.code_hash == hash && c.is_redeemable(at));
        match code {
            Some(code) => {
                code.used_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn count_redeemable_backup_codes(
        &self,
        user_id: DbId,
        now: Timestamp,
    ) -> StoreResult<i64> {
        Ok(self
            .tables
            .lock()
            .backup_codes
            .iter()
            .filter(|c| c.user_id == user_id && c.is_redeemable(now))
            .count() as i64)
    }

    async fn deactivate_backup_codes(&self, user_id: DbId) -> StoreResult<u64> {
        let mut count = 0;
        for code in self.tables.lock().backup_codes.iter_mut() {
            if code.user_id == user_id && code.is_active {
                code.is_active = false;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn purge_backup_codes(&self, before: Timestamp) -> StoreResult<u64> {
        let mut tables = self.tables.lock();
        let before_len = tables.backup_codes.len();
        tables.backup_codes.retain(|c| {
            c.is_active
                && !c.used_at.is_some_and(|at| at < before)
                && !c.expires_at.is_some_and(|at| at < before)
        });
        Ok((before_len - tables.backup_codes.len()) as u64)
    }
}

#[async_trait]
impl TotpStore for MemoryStore {
    async fn create_temp_totp_secret(
        &self,
        input: &CreateTempTotpSecret,
    ) -> StoreResult<TempTotpSecret> {
        let now = Utc::now();
        if input.expires_at <= now {
            return Err(ConstraintViolation::check(
                "temp_totp_secrets",
                "ck_temp_totp_secrets_expiry",
            ));
        }
        let mut tables = self.tables.lock();
        for temp in tables.temp_totp_secrets.iter_mut() {
            if temp.user_id == input.user_id {
                temp.is_active = false;
            }
        }
        let temp = TempTotpSecret {
            id: tables.allocate_id(),
            user_id: input.user_id,
            secret: input.secret.clone(),
            is_active: true,
            used_at: None,
            created_at: now,
            expires_at: input.expires_at,
        };
        tables.temp_totp_secrets.push(temp.clone());
        Ok(temp)
    }

    async fn find_pending_temp_totp_secret(
        &self,
        user_id: DbId,
        now: Timestamp,
    ) -> StoreResult<Option<TempTotpSecret>> {
        Ok(self
            .tables
            .lock()
            .temp_totp_secrets
            .iter()
            .filter(|t| t.user_id == user_id && t.is_pending(now))
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .cloned())
    }

    async fn activate_totp_secret(
        &self,
        temp_id: DbId,
        at: Timestamp,
    ) -> StoreResult<Option<UserTotpSecret>> {
        let mut tables = self.tables.lock();
        let Some(temp) = tables
            .temp_totp_secrets
            .iter_mut()
            .find(|t| t.id == temp_id && t.is_pending(at))
        else {
            return Ok(None);
        };
        temp.used_at = Some(at);
        temp.is_active = false;
        let (user_id, secret) = (temp.user_id, temp.secret.clone());

        for existing in tables.totp_secrets.iter_mut() {
            if existing.user_id == user_id && existing.is_active {
                deactivate_totp(existing, at);
            }
        }
        let active = UserTotpSecret {
            id: tables.allocate_id(),
            user_id,
            secret,
            is_active: true,
            last_used_step: None,
            created_at: at,
            expires_at: None,
            deactivated_at: None,
        };
        tables.totp_secrets.push(active.clone());
        Ok(Some(active))
    }

    async fn find_active_totp_secret(
        &self,
        user_id: DbId,
        now: Timestamp,
    ) -> StoreResult<Option<UserTotpSecret>> {
        Ok(self
            .tables
            .lock()
            .totp_secrets
            .iter()
            .find(|s| s.user_id == user_id && s.is_usable(now))
            .cloned())
    }

    async fn record_totp_step(&self, id: DbId, step: i64) -> StoreResult<bool> {
        let mut tables = self.tables.lock();
        match tables.totp_secrets.iter_mut().find(|s| s.id == id) {
            Some(secret)
                if secret.is_active && secret.last_used_step.map_or(true, |last| last < step) =>
            {
                secret.last_used_step = Some(step);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn deactivate_totp_secrets(&self, user_id: DbId, at: Timestamp) -> StoreResult<u64> {
        let mut tables = self.tables.lock();
        let mut count = 0;
        for secret in tables.totp_secrets.iter_mut() {
            if secret.user_id == user_id && secret.is_active {
                deactivate_totp(secret, at);
                count += 1;
            }
        }
        for temp in tables.temp_totp_secrets.iter_mut() {
            if temp.user_id == user_id && temp.is_active {
                temp.is_active = false;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn purge_temp_totp_secrets(&self, now: Timestamp) -> StoreResult<u64> {
        let mut tables = self.tables.lock();
        let before_len = tables.temp_totp_secrets.len();
        tables
            .temp_totp_secrets
            .retain(|t| t.is_active && t.expires_at > now);
        Ok((before_len - tables.temp_totp_secrets.len()) as u64)
    }
}

#[async_trait]
impl IpSecurityStore for MemoryStore {
    async fn find_active_block(&self, ip: &str, now: Timestamp) -> StoreResult<Option<BlockedIp>> {
        Ok(self
            .tables
            .lock()
            .blocked_ips
            .get(ip)
            .filter(|b| b.is_in_force(now))
            .cloned())
    }

    async fn upsert_block(&self, input: &CreateBlockedIp) -> StoreResult<BlockedIp> {
        let now = Utc::now();
        if input.expires_at.is_some_and(|until| until <= now) {
            return Err(ConstraintViolation::check("blocked_ips", "ck_blocked_ips_expiry"));
        }
        let mut tables = self.tables.lock();
        let id = match tables.blocked_ips.get(&input.ip_address) {
            Some(existing) => existing.id,
            None => tables.allocate_id(),
        };
        let block = BlockedIp {
            id,
            ip_address: input.ip_address.clone(),
            reason: input.reason.clone(),
            blocked_at: now,
            expires_at: input.expires_at,
            blocked_by: input.blocked_by,
        };
        tables
            .blocked_ips
            .insert(block.ip_address.clone(), block.clone());
        Ok(block)
    }

    async fn remove_block(&self, ip: &str) -> StoreResult<bool> {
        Ok(self.tables.lock().blocked_ips.remove(ip).is_some())
    }

    async fn list_blocks(&self, now: Timestamp) -> StoreResult<Vec<BlockedIp>> {
        let tables = self.tables.lock();
        let mut blocks: Vec<BlockedIp> = tables
            .blocked_ips
            .values()
            .filter(|b| b.is_in_force(now))
            .cloned()
            .collect();
        blocks.sort_by(|a, b| b.blocked_at.cmp(&a.blocked_at));
        Ok(blocks)
    }

    async fn purge_expired_blocks(&self, now: Timestamp) -> StoreResult<u64> {
        let mut tables = self.tables.lock();
        let before_len = tables.blocked_ips.len();
        tables.blocked_ips.retain(|_, b| b.is_in_force(now));
        Ok((before_len - tables.blocked_ips.len()) as u64)
    }

    async fn is_whitelisted(&self, ip: &str) -> StoreResult<bool> {
        Ok(self.tables.lock().whitelist.contains_key(ip))
    }

    async fn add_whitelist(
        &self,
        ip: &str,
        description: Option<&str>,
    ) -> StoreResult<IpWhitelistEntry> {
        let mut tables = self.tables.lock();
        if let Some(entry) = tables.whitelist.get_mut(ip) {
            entry.description = description.map(str::to_string);
            return Ok(entry.clone());
        }
        let entry = IpWhitelistEntry {
            id: tables.allocate_id(),
            ip_address: ip.to_string(),
            description: description.map(str::to_string),
            created_at: Utc::now(),
        };
        tables.whitelist.insert(ip.to_string(), entry.clone());
        Ok(entry)
    }

    async fn remove_whitelist(&self, ip: &str) -> StoreResult<bool> {
        Ok(self.tables.lock().whitelist.remove(ip).is_some())
    }

    async fn record_ip_event(
        &self,
        input: &CreateIpSecurityEvent,
    ) -> StoreResult<IpSecurityEvent> {
        let mut tables = self.tables.lock();
        let event = IpSecurityEvent {
            id: tables.allocate_id(),
            ip_address: input.ip_address.clone(),
            event_type: input.event_type.clone(),
            user_id: input.user_id,
            detail: input.detail.clone(),
            occurred_at: input.occurred_at,
        };
        tables.events.push(event.clone());
        Ok(event)
    }

    async fn count_ip_events(
        &self,
        ip: &str,
        event_type: &str,
        since: Timestamp,
    ) -> StoreResult<i64> {
        Ok(self
            .tables
            .lock()
            .events
            .iter()
            .filter(|e| e.ip_address == ip && e.event_type == event_type && e.occurred_at >= since)
            .count() as i64)
    }

    async fn purge_ip_events(&self, before: Timestamp) -> StoreResult<u64> {
        let mut tables = self.tables.lock();
        let before_len = tables.events.len();
        tables.events.retain(|e| e.occurred_at >= before);
        Ok((before_len - tables.events.len()) as u64)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

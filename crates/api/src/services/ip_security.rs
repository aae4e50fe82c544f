//! IP allow/block lists, the security event log, and automatic blocking of
//! addresses that keep failing to sign in.

use std::sync::Arc;

use chrono::Utc;
use ess_core::brute_force::{BruteForcePolicy, IpEventType};
use ess_core::types::{DbId, Timestamp};
use ess_db::models::ip_security::{
    BlockedIp, CreateBlockedIp, CreateIpSecurityEvent, IpWhitelistEntry,
};
use ess_db::store::IpSecurityStore;

/// Verdict for a request from an address.
#[derive(Debug, Clone)]
pub enum IpCheck {
    Allowed,
    Blocked(BlockedIp),
}

pub struct IpSecurityService {
    store: Arc<dyn IpSecurityStore>,
    policy: BruteForcePolicy,
}

impl IpSecurityService {
    pub fn new(store: Arc<dyn IpSecurityStore>, policy: BruteForcePolicy) -> Self {
        Self { store, policy }
    }

    /// Whitelisted addresses are always allowed; otherwise an active block
    /// denies.
    pub async fn check(&self, ip: &str) -> Result<IpCheck, sqlx::Error> {
        if self.store.is_whitelisted(ip).await? {
            return Ok(IpCheck::Allowed);
        }
        Ok(match self.store.find_active_block(ip, Utc::now()).await? {
            Some(block) => IpCheck::Blocked(block),
            None => IpCheck::Allowed,
        })
    }

    pub async fn record_event(
        &self,
        ip: &str,
        event: IpEventType,
        user_id: Option<DbId>,
        detail: Option<String>,
    ) -> Result<(), sqlx::Error> {
        self.store
            .record_ip_event(&CreateIpSecurityEvent {
                ip_address: ip.to_string(),
                event_type: event.as_str().to_string(),
                user_id,
                detail,
                occurred_at: Utc::now(),
            })
            .await?;
        Ok(())
    }

    /// Log a failed sign-in and block the address once it reaches the
    /// threshold within the window. Returns `true` when a block was applied.
    pub async fn record_failed_login(
        &self,
        ip: &str,
        user_id: Option<DbId>,
    ) -> Result<bool, sqlx::Error> {
        self.record_event(ip, IpEventType::FailedLogin, user_id, None)
            .await?;

        if self.store.is_whitelisted(ip).await? {
            return Ok(false);
        }

        let now = Utc::now();
        let failures = self
            .store
            .count_ip_events(
                ip,
                IpEventType::FailedLogin.as_str(),
                self.policy.window_start(now),
            )
            .await?;
        if !self.policy.should_block(failures) {
            return Ok(false);
        }

        let until = self.policy.block_until(now);
        self.store
            .upsert_block(&CreateBlockedIp {
                ip_address: ip.to_string(),
                reason: format!("{failures} failed sign-in attempts"),
                expires_at: Some(until),
                blocked_by: None,
            })
            .await?;
        self.record_event(
            ip,
            IpEventType::AutoBlocked,
            user_id,
            Some(format!("blocked until {until}")),
        )
        .await?;
        tracing::warn!(ip, failures, %until, "IP automatically blocked");
        Ok(true)
    }

    pub async fn block(
        &self,
        ip: &str,
        reason: &str,
        expires_at: Option<Timestamp>,
        blocked_by: Option<DbId>,
    ) -> Result<BlockedIp, sqlx::Error> {
        let block = self
            .store
            .upsert_block(&CreateBlockedIp {
                ip_address: ip.to_string(),
                reason: reason.to_string(),
                expires_at,
                blocked_by,
            })
            .await?;
        tracing::info!(ip, ?blocked_by, "IP blocked");
        Ok(block)
    }

    pub async fn unblock(&self, ip: &str) -> Result<bool, sqlx::Error> {
        self.store.remove_block(ip).await
    }

    pub async fn list_blocks(&self) -> Result<Vec<BlockedIp>, sqlx::Error> {
        self.store.list_blocks(Utc::now()).await
    }

    pub async fn whitelist(
        &self,
        ip: &str,
        description: Option<&str>,
    ) -> Result<IpWhitelistEntry, sqlx::Error> {
        self.store.add_whitelist(ip, description).await
    }

    pub async fn remove_from_whitelist(&self, ip: &str) -> Result<bool, sqlx::Error> {
        self.store.remove_whitelist(ip).await
    }

    pub async fn purge_expired_blocks(&self, now: Timestamp) -> Result<u64, sqlx::Error> {
        self.store.purge_expired_blocks(now).await
    }

    pub async fn purge_events(&self, before: Timestamp) -> Result<u64, sqlx::Error> {
        self.store.purge_ip_events(before).await
    }
}

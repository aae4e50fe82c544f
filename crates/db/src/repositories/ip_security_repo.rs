//! Repository for `blocked_ips`, `ip_whitelist` and `ip_security_events`.

use ess_core::types::Timestamp;
use sqlx::PgPool;

use crate::models::ip_security::{
    BlockedIp, CreateBlockedIp, CreateIpSecurityEvent, IpSecurityEvent, IpWhitelistEntry,
};

const BLOCK_COLUMNS: &str = "id, ip_address, reason, blocked_at, expires_at, blocked_by";
const WHITELIST_COLUMNS: &str = "id, ip_address, description, created_at";
const EVENT_COLUMNS: &str = "id, ip_address, event_type, user_id, detail, occurred_at";

/// Provides operations on the IP allow/block lists and the security event log.
pub struct IpSecurityRepo;

impl IpSecurityRepo {
    /// The block for `ip` if one exists and has not expired at `now`.
    pub async fn find_active_block(
        pool: &PgPool,
        ip: &str,
        now: Timestamp,
    ) -> Result<Option<BlockedIp>, sqlx::Error> {
        let query = format!(
            "SELECT {BLOCK_COLUMNS} FROM blocked_ips
             WHERE ip_address = $1 AND (expires_at IS NULL OR expires_at > $2)"
        );
        sqlx::query_as::<_, BlockedIp>(&query)
            .bind(ip)
            .bind(now)
            .fetch_optional(pool)
            .await
    }

    /// Insert a block, replacing any existing block for the same address.
    pub async fn upsert_block(
        pool: &PgPool,
        input: &CreateBlockedIp,
    ) -> Result<BlockedIp, sqlx::Error> {
        let query = format!(
            "INSERT INTO blocked_ips (ip_address, reason, expires_at, blocked_by)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (ip_address) DO UPDATE SET
                reason = EXCLUDED.reason,
                blocked_at = NOW(),
                expires_at = EXCLUDED.expires_at,
                blocked_by = EXCLUDED.blocked_by
             RETURNING {BLOCK_COLUMNS}"
        );
        sqlx::query_as::<_, BlockedIp>(&query)
            .bind(&input.ip_address)
            .bind(&input.reason)
            .bind(input.expires_at)
            .bind(input.blocked_by)
            .fetch_one(pool)
            .await
    }

    /// Remove a block. Returns `true` if one existed.
    pub async fn delete_block(pool: &PgPool, ip: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM blocked_ips WHERE ip_address = $1")
            .bind(ip)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All blocks still in force at `now`, newest first.
    pub async fn list_active_blocks(
        pool: &PgPool,
        now: Timestamp,
    ) -> Result<Vec<BlockedIp>, sqlx::Error> {
        let query = format!(
            "SELECT {BLOCK_COLUMNS} FROM blocked_ips
             WHERE expires_at IS NULL OR expires_at > $1
             ORDER BY blocked_at DESC"
        );
        sqlx::query_as::<_, BlockedIp>(&query)
            .bind(now)
            .fetch_all(pool)
            .await
    }

    /// Delete blocks that expired before `now`.
    pub async fn purge_expired_blocks(pool: &PgPool, now: Timestamp) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM blocked_ips WHERE expires_at <= $1")
            .bind(now)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn is_whitelisted(pool: &PgPool, ip: &str) -> Result<bool, sqlx::Error> {
        let row: (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM ip_whitelist WHERE ip_address = $1)")
                .bind(ip)
                .fetch_one(pool)
                .await?;
        Ok(row.0)
    }

    /// Add an address to the allow list (idempotent; refreshes the description).
    pub async fn upsert_whitelist(
        pool: &PgPool,
        ip: &str,
        description: Option<&str>,
    ) -> Result<IpWhitelistEntry, sqlx::Error> {
        let query = format!(
            "INSERT INTO ip_whitelist (ip_address, description)
             VALUES ($1, $2)
             ON CONFLICT (ip_address) DO UPDATE SET description = EXCLUDED.description
             RETURNING {WHITELIST_COLUMNS}"
        );
        sqlx::query_as::<_, IpWhitelistEntry>(&query)
            .bind(ip)
            .bind(description)
            .fetch_one(pool)
            .await
    }

    pub async fn delete_whitelist(pool: &PgPool, ip: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM ip_whitelist WHERE ip_address = $1")
            .bind(ip)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Append a security event.
    pub async fn insert_event(
        pool: &PgPool,
        input: &CreateIpSecurityEvent,
    ) -> Result<IpSecurityEvent, sqlx::Error> {
        let query = format!(
            "INSERT INTO ip_security_events (ip_address, event_type, user_id, detail, occurred_at)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {EVENT_COLUMNS}"
        );
        sqlx::query_as::<_, IpSecurityEvent>(&query)
            .bind(&input.ip_address)
            .bind(&input.event_type)
            .bind(input.user_id)
            .bind(&input.detail)
            .bind(input.occurred_at)
            .fetch_one(pool)
            .await
    }

    /// Count events of one type from `ip` at or after `since`.
    pub async fn count_events_since(
        pool: &PgPool,
        ip: &str,
        event_type: &str,
        since: Timestamp,
    ) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM ip_security_events
             WHERE ip_address = $1 AND event_type = $2 AND occurred_at >= $3",
        )
        .bind(ip)
        .bind(event_type)
        .bind(since)
        .fetch_one(pool)
        .await?;
        Ok(row.0)
    }

    /// Delete events older than `before`.
    pub async fn purge_events(pool: &PgPool, before: Timestamp) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM ip_security_events WHERE occurred_at < $1")
            .bind(before)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}

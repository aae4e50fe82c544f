//! Repository for the `user_sessions` table.

use ess_core::types::{DbId, SessionId, Timestamp};
use sqlx::PgPool;

use crate::models::session::{CreateSession, UserSession};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, user_id, ip_address, user_agent, device_fingerprint, created_at, \
                       last_accessed_at, expires_at, is_active, locked_at, ended_at, end_reason";

/// Provides CRUD operations for user sessions.
pub struct SessionRepo;

impl SessionRepo {
    /// Insert a new session, returning the created row.
    pub async fn create(pool: &PgPool, input: &CreateSession) -> Result<UserSession, sqlx::Error> {
        let query = format!(
            "INSERT INTO user_sessions
                (id, user_id, ip_address, user_agent, device_fingerprint,
                 created_at, last_accessed_at, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6, $6, $7)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, UserSession>(&query)
            .bind(input.id)
            .bind(input.user_id)
            .bind(&input.ip_address)
            .bind(&input.user_agent)
            .bind(&input.device_fingerprint)
            .bind(input.created_at)
            .bind(input.expires_at)
            .fetch_one(pool)
            .await
    }

    /// Find a session by id regardless of state.
    pub async fn find_by_id(
        pool: &PgPool,
        id: SessionId,
    ) -> Result<Option<UserSession>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM user_sessions WHERE id = $1");
        sqlx::query_as::<_, UserSession>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Active, unexpired sessions for a user, oldest first.
    pub async fn list_active_for_user(
        pool: &PgPool,
        user_id: DbId,
        now: Timestamp,
    ) -> Result<Vec<UserSession>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM user_sessions
             WHERE user_id = $1 AND is_active = true AND expires_at > $2
             ORDER BY created_at ASC, id ASC"
        );
        sqlx::query_as::<_, UserSession>(&query)
            .bind(user_id)
            .bind(now)
            .fetch_all(pool)
            .await
    }

    /// Record activity on an active session. Returns `true` if the row was updated.
    pub async fn touch(
        pool: &PgPool,
        id: SessionId,
        last_accessed_at: Timestamp,
        expires_at: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE user_sessions SET last_accessed_at = $2, expires_at = $3
             WHERE id = $1 AND is_active = true",
        )
        .bind(id)
        .bind(last_accessed_at)
        .bind(expires_at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// End a single active session. Returns `true` if the row was updated.
    pub async fn end(
        pool: &PgPool,
        id: SessionId,
        reason: &str,
        at: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE user_sessions SET is_active = false, ended_at = $3, end_reason = $2
             WHERE id = $1 AND is_active = true",
        )
        .bind(id)
        .bind(reason)
        .bind(at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// End every active session of a user, optionally sparing one.
    /// Returns the count of ended sessions.
    pub async fn end_all_for_user(
        pool: &PgPool,
        user_id: DbId,
        except: Option<SessionId>,
        reason: &str,
        at: Timestamp,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE user_sessions SET is_active = false, ended_at = $4, end_reason = $3
             WHERE user_id = $1 AND is_active = true
               AND ($2::uuid IS NULL OR id <> $2)",
        )
        .bind(user_id)
        .bind(except)
        .bind(reason)
        .bind(at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Mark every active session with `expires_at <= now` as ended.
    /// Returns the count of expired sessions.
    pub async fn expire_due(pool: &PgPool, now: Timestamp) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE user_sessions SET is_active = false, ended_at = $1, end_reason = 'expired'
             WHERE is_active = true AND expires_at <= $1",
        )
        .bind(now)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Set or clear the screen lock. Returns `true` if an active row was updated.
    pub async fn set_locked(
        pool: &PgPool,
        id: SessionId,
        locked_at: Option<Timestamp>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE user_sessions SET locked_at = $2 WHERE id = $1 AND is_active = true",
        )
        .bind(id)
        .bind(locked_at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete ended sessions whose `ended_at` is older than `before`.
    pub async fn purge_ended(pool: &PgPool, before: Timestamp) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM user_sessions WHERE is_active = false AND ended_at < $1",
        )
        .bind(before)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}

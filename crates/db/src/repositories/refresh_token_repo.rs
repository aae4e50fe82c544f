//! Repository for the `refresh_tokens` table.

use ess_core::types::{DbId, SessionId, Timestamp};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::refresh_token::{CreateRefreshToken, RefreshToken, Revocation};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, token_hash, user_id, session_id, family_id, expires_at, created_at, \
                       created_by_ip, used_at, revoked_at, revoked_reason, revoked_by_ip";

/// Provides CRUD operations for refresh tokens.
pub struct RefreshTokenRepo;

impl RefreshTokenRepo {
    /// Insert a new token, returning the created row.
    pub async fn create(
        pool: &PgPool,
        input: &CreateRefreshToken,
    ) -> Result<RefreshToken, sqlx::Error> {
        let query = format!(
            "INSERT INTO refresh_tokens
                (token_hash, user_id, session_id, family_id, expires_at, created_by_ip)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, RefreshToken>(&query)
            .bind(&input.token_hash)
            .bind(input.user_id)
            .bind(input.session_id)
            .bind(input.family_id)
            .bind(input.expires_at)
            .bind(&input.created_by_ip)
            .fetch_one(pool)
            .await
    }

    /// Find a token by hash in any state (used, revoked, expired included),
    /// so reuse of a spent token can be detected.
    pub async fn find_by_hash(
        pool: &PgPool,
        token_hash: &str,
    ) -> Result<Option<RefreshToken>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM refresh_tokens WHERE token_hash = $1");
        sqlx::query_as::<_, RefreshToken>(&query)
            .bind(token_hash)
            .fetch_optional(pool)
            .await
    }

    /// Mark a token used if it is still unused and unrevoked.
    ///
    /// Returns `false` when another request got there first.
    pub async fn mark_used(pool: &PgPool, id: DbId, at: Timestamp) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET used_at = $2
             WHERE id = $1 AND used_at IS NULL AND revoked_at IS NULL",
        )
        .bind(id)
        .bind(at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Revoke every unrevoked token in a family. Returns the count revoked.
    pub async fn revoke_family(
        pool: &PgPool,
        family_id: Uuid,
        revocation: &Revocation,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE refresh_tokens
             SET revoked_at = $2, revoked_reason = $3, revoked_by_ip = $4
             WHERE family_id = $1 AND revoked_at IS NULL",
        )
        .bind(family_id)
        .bind(revocation.revoked_at)
        .bind(&revocation.reason)
        .bind(&revocation.revoked_by_ip)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Revoke every unrevoked token bound to a session.
    pub async fn revoke_for_session(
        pool: &PgPool,
        session_id: SessionId,
        revocation: &Revocation,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE refresh_tokens
             SET revoked_at = $2, revoked_reason = $3, revoked_by_ip = $4
             WHERE session_id = $1 AND revoked_at IS NULL",
        )
        .bind(session_id)
        .bind(revocation.revoked_at)
        .bind(&revocation.reason)
        .bind(&revocation.revoked_by_ip)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Revoke every unrevoked token of a user.
    pub async fn revoke_for_user(
        pool: &PgPool,
        user_id: DbId,
        revocation: &Revocation,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE refresh_tokens
             SET revoked_at = $2, revoked_reason = $3, revoked_by_ip = $4
             WHERE user_id = $1 AND revoked_at IS NULL",
        )
        .bind(user_id)
        .bind(revocation.revoked_at)
        .bind(&revocation.reason)
        .bind(&revocation.revoked_by_ip)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// List tokens of a family, oldest first.
    pub async fn list_family(
        pool: &PgPool,
        family_id: Uuid,
    ) -> Result<Vec<RefreshToken>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM refresh_tokens WHERE family_id = $1 ORDER BY id ASC"
        );
        sqlx::query_as::<_, RefreshToken>(&query)
            .bind(family_id)
            .fetch_all(pool)
            .await
    }

    /// Delete tokens that expired, were used, or were revoked before `before`.
    pub async fn purge_stale(pool: &PgPool, before: Timestamp) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM refresh_tokens
             WHERE expires_at < $1 OR used_at < $1 OR revoked_at < $1",
        )
        .bind(before)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}

//! Repository for the `user_backup_codes` table.

use ess_core::types::{DbId, Timestamp};
use sqlx::PgPool;

/// Provides operations on two-factor backup codes.
pub struct BackupCodeRepo;

impl BackupCodeRepo {
    /// Deactivate a user's live codes and insert the given hashes, in one
    /// transaction. Returns the number of codes inserted.
    pub async fn replace_for_user(
        pool: &PgPool,
        user_id: DbId,
        code_hashes: &[String],
        expires_at: Option<Timestamp>,
    ) -> Result<u64, sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::query(
            "UPDATE user_backup_codes SET is_active = false
             WHERE user_id = $1 AND is_active",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(
            "INSERT INTO user_backup_codes (user_id, code_hash, expires_at)
             SELECT $1, UNNEST($2::text[]), $3",
        )
        .bind(user_id)
        .bind(code_hashes)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    /// Mark a redeemable code as used. Returns `true` if a code matched.
    pub async fn consume(
        pool: &PgPool,
        user_id: DbId,
        code_hash: &str,
        at: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE user_backup_codes SET used_at = $3
             WHERE user_id = $1 AND code_hash = $2 AND is_active AND used_at IS NULL
               AND (expires_at IS NULL OR expires_at > $3)",
        )
        .bind(user_id)
        .bind(code_hash)
        .bind(at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Number of codes a user can still redeem.
    pub async fn count_redeemable(
        pool: &PgPool,
        user_id: DbId,
        now: Timestamp,
    ) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM user_backup_codes
             WHERE user_id = $1 AND is_active AND used_at IS NULL
               AND (expires_at IS NULL OR expires_at > $2)",
        )
        .bind(user_id)
        .bind(now)
        .fetch_one(pool)
        .await?;
        Ok(row.0)
    }

    /// Deactivate every live code of a user.
    pub async fn deactivate_for_user(pool: &PgPool, user_id: DbId) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE user_backup_codes SET is_active = false WHERE user_id = $1 AND is_active",
        )
        .bind(user_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete deactivated codes and codes used or expired before `before`.
    pub async fn purge(pool: &PgPool, before: Timestamp) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM user_backup_codes
             WHERE NOT is_active OR used_at < $1 OR expires_at < $1",
        )
        .bind(before)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}

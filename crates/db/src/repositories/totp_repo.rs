//! Repository for the `user_totp_secrets` and `temp_totp_secrets` tables.

use ess_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::totp::{CreateTempTotpSecret, TempTotpSecret, UserTotpSecret};

const SECRET_COLUMNS: &str = "id, user_id, secret, is_active, last_used_step, created_at, \
                              expires_at, deactivated_at";

const TEMP_COLUMNS: &str = "id, user_id, secret, is_active, used_at, created_at, expires_at";

/// Provides operations on authenticator secrets.
pub struct TotpRepo;

impl TotpRepo {
    /// Start an enrollment. Any other pending enrollment of the user is
    /// deactivated in the same transaction.
    pub async fn create_temp(
        pool: &PgPool,
        input: &CreateTempTotpSecret,
    ) -> Result<TempTotpSecret, sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::query(
            "UPDATE temp_totp_secrets SET is_active = false WHERE user_id = $1 AND is_active",
        )
        .bind(input.user_id)
        .execute(&mut *tx)
        .await?;

        let query = format!(
            "INSERT INTO temp_totp_secrets (user_id, secret, expires_at)
             VALUES ($1, $2, $3)
             RETURNING {TEMP_COLUMNS}"
        );
        let temp = sqlx::query_as::<_, TempTotpSecret>(&query)
            .bind(input.user_id)
            .bind(&input.secret)
            .bind(input.expires_at)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(temp)
    }

    /// The user's pending (active, unused, unexpired) enrollment, newest first.
    pub async fn find_pending_temp(
        pool: &PgPool,
        user_id: DbId,
        now: Timestamp,
    ) -> Result<Option<TempTotpSecret>, sqlx::Error> {
        let query = format!(
            "SELECT {TEMP_COLUMNS} FROM temp_totp_secrets
             WHERE user_id = $1 AND is_active AND used_at IS NULL AND expires_at > $2
             ORDER BY created_at DESC, id DESC
             LIMIT 1"
        );
        sqlx::query_as::<_, TempTotpSecret>(&query)
            .bind(user_id)
            .bind(now)
            .fetch_optional(pool)
            .await
    }

    /// Complete an enrollment: consume the temp secret and make it the user's
    /// only active secret. `None` when the temp secret is no longer pending.
    pub async fn activate(
        pool: &PgPool,
        temp_id: DbId,
        at: Timestamp,
    ) -> Result<Option<UserTotpSecret>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let consumed: Option<(DbId, String)> = sqlx::query_as(
            "UPDATE temp_totp_secrets SET used_at = $2, is_active = false
             WHERE id = $1 AND is_active AND used_at IS NULL AND expires_at > $2
             RETURNING user_id, secret",
        )
        .bind(temp_id)
        .bind(at)
        .fetch_optional(&mut *tx)
        .await?;
        let Some((user_id, secret)) = consumed else {
            return Ok(None);
        };

        sqlx::query(
            "UPDATE user_totp_secrets SET is_active = false, deactivated_at = $2
             WHERE user_id = $1 AND is_active",
        )
        .bind(user_id)
        .bind(at)
        .execute(&mut *tx)
        .await?;

        let query = format!(
            "INSERT INTO user_totp_secrets (user_id, secret, created_at)
             VALUES ($1, $2, $3)
             RETURNING {SECRET_COLUMNS}"
        );
        let active = sqlx::query_as::<_, UserTotpSecret>(&query)
            .bind(user_id)
            .bind(&secret)
            .bind(at)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(active))
    }

    /// The user's active, unexpired secret.
    pub async fn find_active(
        pool: &PgPool,
        user_id: DbId,
        now: Timestamp,
    ) -> Result<Option<UserTotpSecret>, sqlx::Error> {
        let query = format!(
            "SELECT {SECRET_COLUMNS} FROM user_totp_secrets
             WHERE user_id = $1 AND is_active AND (expires_at IS NULL OR expires_at > $2)"
        );
        sqlx::query_as::<_, UserTotpSecret>(&query)
            .bind(user_id)
            .bind(now)
            .fetch_optional(pool)
            .await
    }

    /// Advance `last_used_step`. `false` when `step` was already used, which
    /// is how replays of a still-valid code are refused.
    pub async fn record_step(pool: &PgPool, id: DbId, step: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE user_totp_secrets SET last_used_step = $2
             WHERE id = $1 AND is_active AND (last_used_step IS NULL OR last_used_step < $2)",
        )
        .bind(id)
        .bind(step)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Deactivate the user's active secret and any pending enrollment.
    /// Returns the number of rows touched.
    pub async fn deactivate_for_user(
        pool: &PgPool,
        user_id: DbId,
        at: Timestamp,
    ) -> Result<u64, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let secrets = sqlx::query(
            "UPDATE user_totp_secrets SET is_active = false, deactivated_at = $2
             WHERE user_id = $1 AND is_active",
        )
        .bind(user_id)
        .bind(at)
        .execute(&mut *tx)
        .await?;

        let temps = sqlx::query(
            "UPDATE temp_totp_secrets SET is_active = false WHERE user_id = $1 AND is_active",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(secrets.rows_affected() + temps.rows_affected())
    }

    /// Delete enrollment secrets that expired or were completed or abandoned.
    pub async fn purge_temp(pool: &PgPool, now: Timestamp) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM temp_totp_secrets WHERE NOT is_active OR expires_at <= $1")
                .bind(now)
                .execute(pool)
                .await?;
        Ok(result.rows_affected())
    }
}

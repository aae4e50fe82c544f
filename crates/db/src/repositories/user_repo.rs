//! Repository for the `users` table.

use ess_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::user::{CreateUser, User};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, username, email, employee_no, password_hash, role, manager_id, \
                       is_active, failed_login_count, locked_until, last_login_at, deleted_at, \
                       created_at, updated_at";

/// Provides CRUD operations for users.
pub struct UserRepo;

impl UserRepo {
    /// Insert a new user, returning the created row.
    pub async fn create(pool: &PgPool, input: &CreateUser) -> Result<User, sqlx::Error> {
        let query = format!(
            "INSERT INTO users (username, email, employee_no, password_hash, role, manager_id)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, User>(&query)
            .bind(&input.username)
            .bind(&input.email)
            .bind(&input.employee_no)
            .bind(&input.password_hash)
            .bind(&input.role)
            .bind(input.manager_id)
            .fetch_one(pool)
            .await
    }

    /// Find a user by internal ID, including soft-deleted rows.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<User>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find a non-deleted user by username or email (case-insensitive).
    pub async fn find_by_login(pool: &PgPool, login: &str) -> Result<Option<User>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM users
             WHERE (LOWER(username) = LOWER($1) OR LOWER(email) = LOWER($1))
               AND deleted_at IS NULL
             ORDER BY id
             LIMIT 1"
        );
        sqlx::query_as::<_, User>(&query)
            .bind(login)
            .fetch_optional(pool)
            .await
    }

    /// List non-deleted users, most recently created first.
    pub async fn list(pool: &PgPool) -> Result<Vec<User>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM users WHERE deleted_at IS NULL ORDER BY created_at DESC"
        );
        sqlx::query_as::<_, User>(&query).fetch_all(pool).await
    }

    /// Increment the failed login counter by 1 and return the new value.
    pub async fn increment_failed_login(pool: &PgPool, id: DbId) -> Result<i32, sqlx::Error> {
        let row: (i32,) = sqlx::query_as(
            "UPDATE users SET failed_login_count = failed_login_count + 1
             WHERE id = $1
             RETURNING failed_login_count",
        )
        .bind(id)
        .fetch_one(pool)
        .await?;
        Ok(row.0)
    }

    /// Lock a user account until the specified timestamp.
    pub async fn lock_account(
        pool: &PgPool,
        id: DbId,
        until: Timestamp,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET locked_until = $2 WHERE id = $1")
            .bind(id)
            .bind(until)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Record a successful login: reset `failed_login_count` to 0, clear `locked_until`,
    /// and set `last_login_at`.
    pub async fn record_successful_login(
        pool: &PgPool,
        id: DbId,
        at: Timestamp,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE users SET
                failed_login_count = 0,
                locked_until = NULL,
                last_login_at = $2
             WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Replace the stored password hash. Returns `true` if the row was updated.
    pub async fn update_password(
        pool: &PgPool,
        id: DbId,
        password_hash: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Soft-delete a user: set `deleted_at` and deactivate.
    ///
    /// Returns `true` if the row was updated (i.e. was not already deleted).
    pub async fn soft_delete(pool: &PgPool, id: DbId, at: Timestamp) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET deleted_at = $2, is_active = false
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

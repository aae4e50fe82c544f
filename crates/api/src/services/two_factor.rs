//! Second factors: authenticator-app (TOTP) secrets and one-time backup codes.
//!
//! Enrollment is two-phase. [`TwoFactorService::begin_enrollment`] stores a
//! short-lived temp secret; the first valid code passed to
//! [`TwoFactorService::confirm_enrollment`] promotes it to the user's active
//! secret and issues a fresh set of backup codes.

use std::sync::Arc;

use chrono::{Duration, Utc};
use ess_core::backup_codes::{generate_backup_codes, hash_backup_code, BACKUP_CODE_VALIDITY_DAYS};
use ess_core::totp::{self, ENROLLMENT_TTL_MINS};
use ess_core::types::{DbId, Timestamp};
use ess_db::models::totp::{CreateTempTotpSecret, UserTotpSecret};
use ess_db::store::{BackupCodeStore, TotpStore};

/// Issuer label shown by authenticator apps.
pub const TOTP_ISSUER: &str = "ESS Portal";

#[derive(Debug, thiserror::Error)]
pub enum TwoFactorError {
    #[error("Two-factor authentication is already enabled")]
    AlreadyEnabled,

    #[error("Two-factor authentication is not enabled")]
    NotEnabled,

    #[error("No pending enrollment")]
    NoPendingEnrollment,

    #[error("Invalid verification code")]
    InvalidCode,

    #[error(transparent)]
    Store(#[from] sqlx::Error),
}

/// A started enrollment. The secret is shown once.
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub secret: String,
    pub otpauth_uri: String,
    pub expires_at: Timestamp,
}

/// Which factor satisfied [`TwoFactorService::verify_second_factor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecondFactor {
    Totp,
    BackupCode,
}

pub struct TwoFactorService {
    codes: Arc<dyn BackupCodeStore>,
    secrets: Arc<dyn TotpStore>,
}

impl TwoFactorService {
    pub fn new<S: BackupCodeStore + TotpStore>(store: Arc<S>) -> Self {
        Self {
            codes: store.clone(),
            secrets: store,
        }
    }

    // -- authenticator app --------------------------------------------------

    /// Start enrolling an authenticator app. Refused while one is active.
    pub async fn begin_enrollment(
        &self,
        user_id: DbId,
        account: &str,
    ) -> Result<Enrollment, TwoFactorError> {
        let now = Utc::now();
        if self.secrets.find_active_totp_secret(user_id, now).await?.is_some() {
            return Err(TwoFactorError::AlreadyEnabled);
        }

        let secret = totp::generate_secret();
        let temp = self
            .secrets
            .create_temp_totp_secret(&CreateTempTotpSecret {
                user_id,
                secret: secret.clone(),
                expires_at: now + Duration::minutes(ENROLLMENT_TTL_MINS),
            })
            .await?;
        tracing::info!(user_id, expires_at = %temp.expires_at, "TOTP enrollment started");

        Ok(Enrollment {
            otpauth_uri: totp::provisioning_uri(TOTP_ISSUER, account, &secret),
            secret,
            expires_at: temp.expires_at,
        })
    }

    /// Finish enrollment with a code from the app. Returns the new backup codes.
    pub async fn confirm_enrollment(
        &self,
        user_id: DbId,
        code: &str,
    ) -> Result<Vec<String>, TwoFactorError> {
        let now = Utc::now();
        let temp = self
            .secrets
            .find_pending_temp_totp_secret(user_id, now)
            .await?
            .ok_or(TwoFactorError::NoPendingEnrollment)?;

        let key = totp::base32_decode(&temp.secret).ok_or(TwoFactorError::NoPendingEnrollment)?;
        let Some(step) = totp::verify_code(&key, code, now.timestamp()) else {
            tracing::info!(user_id, "TOTP enrollment code rejected");
            return Err(TwoFactorError::InvalidCode);
        };

        let active = self
            .secrets
            .activate_totp_secret(temp.id, now)
            .await?
            .ok_or(TwoFactorError::NoPendingEnrollment)?;
        // The confirming code may not be replayed at login.
        self.secrets.record_totp_step(active.id, step).await?;

        let codes = self.regenerate(user_id).await?;
        tracing::info!(user_id, "TOTP enabled");
        Ok(codes)
    }

    /// Turn two-factor off. Requires a current code or a backup code.
    pub async fn disable(&self, user_id: DbId, code: &str) -> Result<(), TwoFactorError> {
        if !self.is_enabled(user_id).await? {
            return Err(TwoFactorError::NotEnabled);
        }
        if self.verify_second_factor(user_id, code).await?.is_none() {
            return Err(TwoFactorError::InvalidCode);
        }

        let now = Utc::now();
        self.secrets.deactivate_totp_secrets(user_id, now).await?;
        self.codes.deactivate_backup_codes(user_id).await?;
        tracing::info!(user_id, "TOTP disabled");
        Ok(())
    }

    pub async fn is_enabled(&self, user_id: DbId) -> Result<bool, sqlx::Error> {
        Ok(self.active_secret(user_id).await?.is_some())
    }

    async fn active_secret(&self, user_id: DbId) -> Result<Option<UserTotpSecret>, sqlx::Error> {
        self.secrets.find_active_totp_secret(user_id, Utc::now()).await
    }

    /// Check an authenticator code. A code whose time step was already
    /// accepted is refused.
    pub async fn verify_totp(&self, user_id: DbId, code: &str) -> Result<bool, sqlx::Error> {
        let Some(secret) = self.active_secret(user_id).await? else {
            return Ok(false);
        };
        let Some(key) = totp::base32_decode(&secret.secret) else {
            tracing::error!(user_id, secret_id = secret.id, "Stored TOTP secret is not base32");
            return Ok(false);
        };
        let Some(step) = totp::verify_code(&key, code, Utc::now().timestamp()) else {
            tracing::info!(user_id, "TOTP code rejected");
            return Ok(false);
        };
        let fresh = self.secrets.record_totp_step(secret.id, step).await?;
        if !fresh {
            tracing::warn!(user_id, step, "TOTP code replayed");
        }
        Ok(fresh)
    }

    /// Accept either an authenticator code or a backup code.
    pub async fn verify_second_factor(
        &self,
        user_id: DbId,
        code: &str,
    ) -> Result<Option<SecondFactor>, sqlx::Error> {
        if self.verify_totp(user_id, code).await? {
            return Ok(Some(SecondFactor::Totp));
        }
        if self.verify(user_id, code).await? {
            return Ok(Some(SecondFactor::BackupCode));
        }
        Ok(None)
    }

    pub async fn purge_temp_secrets(&self, now: Timestamp) -> Result<u64, sqlx::Error> {
        self.secrets.purge_temp_totp_secrets(now).await
    }

    // -- backup codes -------------------------------------------------------

    /// Replace the user's backup codes with a fresh set and return the
    /// plaintext codes. They are not retrievable afterwards.
    pub async fn regenerate(&self, user_id: DbId) -> Result<Vec<String>, sqlx::Error> {
        let codes = generate_backup_codes();
        let hashes: Vec<String> = codes.iter().map(|c| hash_backup_code(c)).collect();
        let expires_at = Utc::now() + Duration::days(BACKUP_CODE_VALIDITY_DAYS);
        self.codes
            .replace_backup_codes(user_id, &hashes, Some(expires_at))
            .await?;
        tracing::info!(user_id, count = codes.len(), "Backup codes regenerated");
        Ok(codes)
    }

    /// Consume `code` if it is one of the user's redeemable codes.
    pub async fn verify(&self, user_id: DbId, code: &str) -> Result<bool, sqlx::Error> {
        let consumed = self
            .codes
            .consume_backup_code(user_id, &hash_backup_code(code), Utc::now())
            .await?;
        if !consumed {
            tracing::info!(user_id, "Backup code rejected");
        }
        Ok(consumed)
    }

    pub async fn remaining(&self, user_id: DbId) -> Result<i64, sqlx::Error> {
        self.codes
            .count_redeemable_backup_codes(user_id, Utc::now())
            .await
    }

    pub async fn purge_backup_codes(&self, before: Timestamp) -> Result<u64, sqlx::Error> {
        self.codes.purge_backup_codes(before).await
    }
}

//! Periodic session, token and IP housekeeping.
//!
//! Each tick ends sessions past their expiry, then deletes refresh tokens and
//! ended sessions older than [`RECORD_RETENTION_DAYS`], expired IP blocks, IP
//! security events older than the configured event retention, expired or
//! finished TOTP enrollments, and dead backup codes. A failing step is logged
//! and the remaining steps still run.

use std::time::Duration;

use chrono::Utc;
use ess_core::types::Timestamp;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

/// Age after which revoked, used or expired refresh tokens and ended
/// sessions are deleted.
pub const RECORD_RETENTION_DAYS: i64 = 30;

/// Row counts affected by one sweep. A failed step counts as zero.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions_expired: u64,
    pub sessions_purged: u64,
    pub tokens_purged: u64,
    pub blocks_purged: u64,
    pub events_purged: u64,
    pub temp_totp_purged: u64,
    pub backup_codes_purged: u64,
}

fn logged(step: &'static str, result: Result<u64, sqlx::Error>) -> u64 {
    match result {
        Ok(n) => {
            if n > 0 {
                tracing::info!(step, rows = n, "Maintenance: step completed");
            }
            n
        }
        Err(e) => {
            tracing::error!(step, error = %e, "Maintenance: step failed");
            0
        }
    }
}

/// Run every housekeeping step once as of `now`.
pub async fn sweep(state: &AppState, now: Timestamp) -> SweepReport {
    let record_cutoff = now - chrono::Duration::days(RECORD_RETENTION_DAYS);
    let event_cutoff =
        now - chrono::Duration::days(state.config.ip_security.event_retention_days);

    SweepReport {
        sessions_expired: logged(
            "expire_sessions",
            state.sessions.cleanup_expired_sessions(now).await,
        ),
        tokens_purged: logged(
            "purge_refresh_tokens",
            state.tokens.purge(record_cutoff).await,
        ),
        sessions_purged: logged(
            "purge_ended_sessions",
            state.sessions.purge_ended(record_cutoff).await,
        ),
        blocks_purged: logged(
            "purge_expired_blocks",
            state.ip_security.purge_expired_blocks(now).await,
        ),
        events_purged: logged(
            "purge_ip_events",
            state.ip_security.purge_events(event_cutoff).await,
        ),
        temp_totp_purged: logged(
            "purge_temp_totp_secrets",
            state.two_factor.purge_temp_secrets(now).await,
        ),
        backup_codes_purged: logged(
            "purge_backup_codes",
            state.two_factor.purge_backup_codes(record_cutoff).await,
        ),
    }
}

/// Run the maintenance loop every `interval` until `cancel` is triggered.
pub async fn run(state: AppState, interval: Duration, cancel: CancellationToken) {
    tracing::info!(
        interval_secs = interval.as_secs(),
        retention_days = RECORD_RETENTION_DAYS,
        event_retention_days = state.config.ip_security.event_retention_days,
        "Maintenance job started"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Maintenance job stopping");
                break;
            }
            _ = ticker.tick() => {
                let report = sweep(&state, Utc::now()).await;
                tracing::debug!(?report, "Maintenance: sweep finished");
            }
        }
    }
}

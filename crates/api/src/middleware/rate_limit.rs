//! Fixed-window rate limiting partitioned by client IP.
//!
//! Each [`RatePolicy`] has `permits` per `window`. A request over the limit
//! waits for the next window while fewer than `queue` requests are already
//! waiting; otherwise it is rejected with 429 and `Retry-After`. A woken
//! waiter competes for the new window's permits like any other request and
//! keeps its queue slot until it gets one.

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use ess_core::brute_force::IpEventType;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::client_ip::{resolve_client_ip, UNKNOWN_IP};
use super::has_prefix;
use crate::config::{RateLimitConfig, RateLimitRule};
use crate::error::AppError;
use crate::state::AppState;

/// Windows tracked before stale ones are swept.
const MAX_TRACKED_WINDOWS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RatePolicy {
    Login,
    Auth,
    Api,
    PasswordReset,
    TwoFactor,
    FileUpload,
    RefreshToken,
}

impl RatePolicy {
    pub fn name(self) -> &'static str {
        match self {
            Self::Login => "LoginPolicy",
            Self::Auth => "AuthPolicy",
            Self::Api => "ApiPolicy",
            Self::PasswordReset => "PasswordResetPolicy",
            Self::TwoFactor => "TwoFactorPolicy",
            Self::FileUpload => "FileUploadPolicy",
            Self::RefreshToken => "RefreshTokenPolicy",
        }
    }

    fn rule(self, config: &RateLimitConfig) -> RateLimitRule {
        match self {
            Self::Login => config.login,
            Self::Auth => config.auth,
            Self::Api => config.api,
            Self::PasswordReset => config.password_reset,
            Self::TwoFactor => config.two_factor,
            Self::FileUpload => config.file_upload,
            Self::RefreshToken => config.refresh_token,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Granted,
    Rejected { retry_after: Duration },
}

#[derive(Debug)]
struct Window {
    started: Instant,
    used: u32,
    queued: u32,
}

impl Window {
    fn roll(&mut self, now: Instant, length: Duration) {
        if now >= self.started + length {
            self.started = now;
            self.used = 0;
        }
    }
}

enum Decision {
    Granted,
    WaitUntil(Instant),
    Rejected(Duration),
}

/// A held queue position. Dropping it gives the position back, so a waiter
/// whose request is cancelled does not shrink the queue for good.
struct QueueSlot<'a> {
    limiter: &'a RateLimiter,
    key: (RatePolicy, String),
    held: bool,
}

impl QueueSlot<'_> {
    /// Give the position back while the caller already holds the lock.
    fn release(&mut self, window: &mut Window) {
        if self.held {
            window.queued = window.queued.saturating_sub(1);
            self.held = false;
        }
    }
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        if self.held {
            if let Some(window) = self.limiter.windows.lock().get_mut(&self.key) {
                window.queued = window.queued.saturating_sub(1);
            }
        }
    }
}

pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<(RatePolicy, String), Window>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn rule(&self, policy: RatePolicy) -> RateLimitRule {
        policy.rule(&self.config)
    }

    /// Take a permit for `key` under `policy`, waiting for the next window
    /// when a queue slot is free.
    pub async fn acquire(&self, policy: RatePolicy, key: &str) -> Admission {
        let rule = self.rule(policy);
        let map_key = (policy, key.to_string());
        let mut slot: Option<QueueSlot<'_>> = None;

        loop {
            let decision = {
                let now = Instant::now();
                let mut windows = self.windows.lock();
                if windows.len() > MAX_TRACKED_WINDOWS {
                    let config = &self.config;
                    windows.retain(|(p, _), w| {
                        w.queued > 0 || now < w.started + p.rule(config).window
                    });
                }
                let window = windows.entry(map_key.clone()).or_insert_with(|| Window {
                    started: now,
                    used: 0,
                    queued: 0,
                });
                window.roll(now, rule.window);

                let reset_at = window.started + rule.window;
                if window.used < rule.permits {
                    window.used += 1;
                    if let Some(slot) = slot.as_mut() {
                        slot.release(window);
                    }
                    Decision::Granted
                } else if slot.is_some() {
                    Decision::WaitUntil(reset_at)
                } else if window.queued < rule.queue {
                    window.queued += 1;
                    slot = Some(QueueSlot {
                        limiter: self,
                        key: map_key.clone(),
                        held: true,
                    });
                    Decision::WaitUntil(reset_at)
                } else {
                    Decision::Rejected(reset_at - now)
                }
            };

            match decision {
                Decision::Granted => return Admission::Granted,
                Decision::Rejected(retry_after) => return Admission::Rejected { retry_after },
                Decision::WaitUntil(at) => tokio::time::sleep_until(at).await,
            }
        }
    }

    #[cfg(test)]
    fn queued(&self, policy: RatePolicy, key: &str) -> u32 {
        self.windows
            .lock()
            .get(&(policy, key.to_string()))
            .map_or(0, |w| w.queued)
    }
}

fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

async fn admit(state: &AppState, policy: RatePolicy, req: Request, next: Next) -> Response {
    let ip = resolve_client_ip(req.headers(), req.extensions(), &state.config.trusted_proxies);
    match state.rate_limiter.acquire(policy, &ip).await {
        Admission::Granted => next.run(req).await,
        Admission::Rejected { retry_after } => {
            tracing::info!(ip = %ip, policy = policy.name(), "Rate limit exceeded");
            if ip != UNKNOWN_IP {
                if let Err(e) = state
                    .ip_security
                    .record_event(
                        &ip,
                        IpEventType::RateLimited,
                        None,
                        Some(policy.name().to_string()),
                    )
                    .await
                {
                    tracing::warn!(error = %e, "Failed to record rate limit event");
                }
            }
            AppError::TooManyRequests {
                retry_after_secs: retry_after_secs(retry_after),
            }
            .into_response()
        }
    }
}

/// Route-level limiter; the policy travels with the state.
pub async fn limit(
    State((state, policy)): State<(AppState, RatePolicy)>,
    req: Request,
    next: Next,
) -> Response {
    admit(&state, policy, req, next).await
}

/// Global [`RatePolicy::Api`] limiter for everything except `/health`.
pub async fn limit_api(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if has_prefix(req.uri().path(), &["/health"]) {
        return next.run(req).await;
    }
    admit(&state, RatePolicy::Api, req, next).await
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn limiter(permits: u32, window_secs: u64, queue: u32) -> RateLimiter {
        let rule = RateLimitRule::new(permits, window_secs, queue);
        RateLimiter::new(RateLimitConfig {
            auth: rule,
            ..RateLimitConfig::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_once_permits_and_queue_are_exhausted() {
        let limiter = limiter(2, 60, 0);
        assert_eq!(limiter.acquire(RatePolicy::Auth, "a").await, Admission::Granted);
        assert_eq!(limiter.acquire(RatePolicy::Auth, "a").await, Admission::Granted);

        let retry = assert_matches!(
            limiter.acquire(RatePolicy::Auth, "a").await,
            Admission::Rejected { retry_after } => retry_after
        );
        assert!(retry <= Duration::from_secs(60));
        assert!(retry > Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn new_window_restores_permits() {
        let limiter = limiter(1, 60, 0);
        assert_eq!(limiter.acquire(RatePolicy::Auth, "a").await, Admission::Granted);
        assert_matches!(
            limiter.acquire(RatePolicy::Auth, "a").await,
            Admission::Rejected { .. }
        );

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(limiter.acquire(RatePolicy::Auth, "a").await, Admission::Granted);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_request_waits_for_next_window() {
        let limiter = limiter(1, 60, 1);
        let start = Instant::now();
        assert_eq!(limiter.acquire(RatePolicy::Auth, "a").await, Admission::Granted);

        let (queued, overflow) = tokio::join!(
            limiter.acquire(RatePolicy::Auth, "a"),
            limiter.acquire(RatePolicy::Auth, "a"),
        );
        assert_eq!(queued, Admission::Granted);
        assert_matches!(overflow, Admission::Rejected { .. });
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_waiter_gives_its_queue_slot_back() {
        let limiter = limiter(1, 60, 1);
        assert_eq!(limiter.acquire(RatePolicy::Auth, "a").await, Admission::Granted);

        let waited = tokio::time::timeout(
            Duration::from_secs(30),
            limiter.acquire(RatePolicy::Auth, "a"),
        )
        .await;
        assert!(waited.is_err());
        assert_eq!(limiter.queued(RatePolicy::Auth, "a"), 0);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(limiter.acquire(RatePolicy::Auth, "a").await, Admission::Granted);
        // Window is full again; the freed slot lets this one queue.
        assert_eq!(limiter.acquire(RatePolicy::Auth, "a").await, Admission::Granted);
    }

    #[tokio::test(start_paused = true)]
    async fn woken_waiter_cannot_overdraw_the_window() {
        let limiter = limiter(1, 60, 1);
        let start = Instant::now();
        assert_eq!(limiter.acquire(RatePolicy::Auth, "a").await, Admission::Granted);

        let mut waiter = std::pin::pin!(limiter.acquire(RatePolicy::Auth, "a"));
        assert!(tokio::time::timeout(Duration::ZERO, waiter.as_mut()).await.is_err());
        assert_eq!(limiter.queued(RatePolicy::Auth, "a"), 1);

        // A fresh request takes the new window's only permit first.
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(limiter.acquire(RatePolicy::Auth, "a").await, Admission::Granted);

        assert_eq!(waiter.await, Admission::Granted);
        assert!(start.elapsed() >= Duration::from_secs(120));
        assert_eq!(limiter.queued(RatePolicy::Auth, "a"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn partitions_are_independent() {
        let limiter = limiter(1, 60, 0);
        assert_eq!(limiter.acquire(RatePolicy::Auth, "a").await, Admission::Granted);
        assert_eq!(limiter.acquire(RatePolicy::Auth, "b").await, Admission::Granted);
        assert_eq!(limiter.acquire(RatePolicy::Login, "a").await, Admission::Granted);
    }

    #[test]
    fn file_upload_policy_is_configured() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let rule = limiter.rule(RatePolicy::FileUpload);
        assert_eq!(rule.permits, 10);
        assert_eq!(rule.queue, 2);
    }

    #[test]
    fn retry_after_rounds_up_to_whole_seconds() {
        assert_eq!(retry_after_secs(Duration::from_millis(1500)), 2);
        assert_eq!(retry_after_secs(Duration::from_secs(30)), 30);
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
    }
}

//! Brute-force detection over the IP security event log.

use chrono::Duration;

use crate::types::Timestamp;

/// Kinds of rows in `ip_security_events`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpEventType {
    FailedLogin,
    SuccessfulLogin,
    BlockedRequest,
    AutoBlocked,
    TokenReuse,
    RateLimited,
}

impl IpEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FailedLogin => "failed_login",
            Self::SuccessfulLogin => "successful_login",
            Self::BlockedRequest => "blocked_request",
            Self::AutoBlocked => "auto_blocked",
            Self::TokenReuse => "token_reuse",
            Self::RateLimited => "rate_limited",
        }
    }
}

/// Thresholds for automatic IP blocking.
#[derive(Debug, Clone, Copy)]
pub struct BruteForcePolicy {
    /// Failed attempts inside the window that trigger a block.
    pub threshold: u32,
    /// Look-back window for counting failures.
    pub window: Duration,
    /// How long an automatic block lasts.
    pub block_duration: Duration,
}

impl Default for BruteForcePolicy {
    fn default() -> Self {
        Self {
            threshold: 3,
            window: Duration::minutes(15),
            block_duration: Duration::minutes(60),
        }
    }
}

impl BruteForcePolicy {
    /// Oldest event timestamp still counted at `now`.
    pub fn window_start(&self, now: Timestamp) -> Timestamp {
        now - self.window
    }

    /// Whether `failures` recent failed attempts warrant a block.
    pub fn should_block(&self, failures: i64) -> bool {
        failures >= i64::from(self.threshold)
    }

    /// End of an automatic block starting at `now`.
    pub fn block_until(&self, now: Timestamp) -> Timestamp {
        now + self.block_duration
    }
}

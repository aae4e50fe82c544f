//! Session lifetime and concurrency rules.
//!
//! Every expiry computed here is strictly after the session's `created_at`,
//! which is what the `ck_user_sessions_expiry` constraint requires.

use std::fmt;
use std::str::FromStr;

use chrono::Duration;

use crate::types::Timestamp;

/// What to do when a user signs in while already at the session limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLimitPolicy {
    /// End the oldest active session(s) to make room for the new one.
    EvictOldest,
    /// Refuse the new sign-in.
    Reject,
}

impl FromStr for SessionLimitPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "evict_oldest" | "evict-oldest" | "evict" => Ok(Self::EvictOldest),
            "reject" => Ok(Self::Reject),
            other => Err(format!(
                "Unknown session limit policy '{other}' (expected 'evict_oldest' or 'reject')"
            )),
        }
    }
}

/// Idle and absolute session lifetimes.
#[derive(Debug, Clone, Copy)]
pub struct SessionTimeouts {
    /// Lifetime granted by each sign-in or (with sliding expiration) each valid request.
    pub idle: Duration,
    /// Hard cap measured from `created_at`; sliding never extends past it.
    pub absolute: Duration,
    /// Whether a valid check pushes `expires_at` forward.
    pub sliding: bool,
}

impl SessionTimeouts {
    /// Expiry for a session created at `created_at`.
    pub fn initial_expiry(&self, created_at: Timestamp) -> Timestamp {
        created_at + self.idle.min(self.absolute)
    }

    /// Expiry after a valid access at `now`.
    ///
    /// Without sliding expiration the current expiry is kept.
    pub fn slide_expiry(
        &self,
        created_at: Timestamp,
        current_expiry: Timestamp,
        now: Timestamp,
    ) -> Timestamp {
        if !self.sliding {
            return current_expiry;
        }
        let cap = created_at + self.absolute;
        (now + self.idle).min(cap)
    }
}

/// How many existing sessions must end before a new one may start.
///
/// `max_concurrent` is at least 1 (enforced by configuration).
pub fn sessions_to_evict(active_count: usize, max_concurrent: usize) -> usize {
    if active_count >= max_concurrent {
        active_count + 1 - max_concurrent
    } else {
        0
    }
}

/// Why a session stopped being active. Persisted in `user_sessions.end_reason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEndReason {
    Logout,
    LogoutAll,
    Expired,
    Evicted,
    TokenReuse,
    Revoked,
    UserDeleted,
    PasswordChanged,
}

impl SessionEndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Logout => "logout",
            Self::LogoutAll => "logout_all",
            Self::Expired => "expired",
            Self::Evicted => "evicted",
            Self::TokenReuse => "token_reuse",
            Self::Revoked => "revoked",
            Self::UserDeleted => "user_deleted",
            Self::PasswordChanged => "password_changed",
        }
    }
}

impl fmt::Display for SessionEndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn timeouts(sliding: bool) -> SessionTimeouts {
        SessionTimeouts {
            idle: Duration::minutes(30),
            absolute: Duration::hours(8),
            sliding,
        }
    }

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn initial_expiry_uses_idle_timeout() {
        let expiry = timeouts(true).initial_expiry(t0());
        assert_eq!(expiry, t0() + Duration::minutes(30));
        assert!(expiry > t0());
    }

    #[test]
    fn initial_expiry_never_exceeds_absolute_cap() {
        let t = SessionTimeouts {
            idle: Duration::hours(10),
            absolute: Duration::hours(2),
            sliding: true,
        };
        assert_eq!(t.initial_expiry(t0()), t0() + Duration::hours(2));
    }

    #[test]
    fn sliding_extends_from_now() {
        let t = timeouts(true);
        let now = t0() + Duration::minutes(20);
        let expiry = t.slide_expiry(t0(), t.initial_expiry(t0()), now);
        assert_eq!(expiry, now + Duration::minutes(30));
    }

    #[test]
    fn sliding_is_capped_by_absolute_lifetime() {
        let t = timeouts(true);
        let now = t0() + Duration::hours(7) + Duration::minutes(50);
        let expiry = t.slide_expiry(t0(), now, now);
        assert_eq!(expiry, t0() + Duration::hours(8));
    }

    #[test]
    fn without_sliding_expiry_is_kept() {
        let t = timeouts(false);
        let current = t.initial_expiry(t0());
        let expiry = t.slide_expiry(t0(), current, t0() + Duration::minutes(10));
        assert_eq!(expiry, current);
    }

    #[test]
    fn eviction_count_at_and_over_limit() {
        assert_eq!(sessions_to_evict(0, 1), 0);
        assert_eq!(sessions_to_evict(1, 1), 1);
        assert_eq!(sessions_to_evict(2, 3), 0);
        assert_eq!(sessions_to_evict(3, 3), 1);
        assert_eq!(sessions_to_evict(5, 3), 3);
    }

    #[test]
    fn policy_parses_aliases() {
        assert_eq!(
            "evict_oldest".parse::<SessionLimitPolicy>().unwrap(),
            SessionLimitPolicy::EvictOldest
        );
        assert_eq!(
            "Reject".parse::<SessionLimitPolicy>().unwrap(),
            SessionLimitPolicy::Reject
        );
        assert!("drop".parse::<SessionLimitPolicy>().is_err());
    }

    #[test]
    fn end_reason_strings() {
        assert_eq!(SessionEndReason::TokenReuse.as_str(), "token_reuse");
        assert_eq!(SessionEndReason::Evicted.to_string(), "evicted");
    }
}

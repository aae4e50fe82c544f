//! Server-side session lifecycle: creation under a concurrency limit,
//! validity checks with sliding expiration, ending, and cleanup.

use std::sync::Arc;

use chrono::Utc;
use ess_core::hashing::device_fingerprint;
use ess_core::session_policy::{
    sessions_to_evict, SessionEndReason, SessionLimitPolicy, SessionTimeouts,
};
use ess_core::types::{DbId, SessionId, Timestamp};
use ess_db::models::session::{CreateSession, UserSession};
use ess_db::store::SessionStore;
use uuid::Uuid;

use crate::config::SessionConfig;

/// What the server knows about the client opening a session.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub accept_language: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Maximum of {max} concurrent sessions reached")]
    LimitReached { max: usize },

    #[error(transparent)]
    Store(#[from] sqlx::Error),
}

/// A new session and the sessions that were ended to make room for it.
#[derive(Debug, Clone)]
pub struct CreatedSession {
    pub session: UserSession,
    pub evicted: Vec<SessionId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    NotFound,
    UserMismatch,
    Inactive,
    Expired,
}

impl InvalidReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::UserMismatch => "user_mismatch",
            Self::Inactive => "inactive",
            Self::Expired => "expired",
        }
    }
}

/// Outcome of [`SessionService::is_session_valid`].
#[derive(Debug, Clone)]
pub enum SessionCheck {
    /// The session as it stands after this access was recorded.
    Valid(UserSession),
    Invalid(InvalidReason),
}

pub struct SessionService {
    store: Arc<dyn SessionStore>,
    timeouts: SessionTimeouts,
    max_concurrent: usize,
    limit_policy: SessionLimitPolicy,
}

impl SessionService {
    pub fn new(store: Arc<dyn SessionStore>, config: &SessionConfig) -> Self {
        Self {
            store,
            timeouts: config.timeouts(),
            max_concurrent: config.max_concurrent.max(1),
            limit_policy: config.limit_policy,
        }
    }

    /// Open a session for `user_id`, applying the concurrent-session limit.
    pub async fn create_session(
        &self,
        user_id: DbId,
        client: &ClientInfo,
    ) -> Result<CreatedSession, SessionError> {
        self.create_session_at(user_id, client, Utc::now()).await
    }

    async fn create_session_at(
        &self,
        user_id: DbId,
        client: &ClientInfo,
        now: Timestamp,
    ) -> Result<CreatedSession, SessionError> {
        let active = self.store.list_active_sessions(user_id, now).await?;
        let excess = sessions_to_evict(active.len(), self.max_concurrent);

        let mut evicted = Vec::with_capacity(excess);
        if excess > 0 {
            if self.limit_policy == SessionLimitPolicy::Reject {
                tracing::info!(user_id, active = active.len(), "Session limit reached, rejecting");
                return Err(SessionError::LimitReached {
                    max: self.max_concurrent,
                });
            }
            // `active` is ordered oldest first.
            for old in active.iter().take(excess) {
                if self
                    .store
                    .end_session(old.id, SessionEndReason::Evicted.as_str(), now)
                    .await?
                {
                    evicted.push(old.id);
                }
            }
            tracing::info!(user_id, evicted = evicted.len(), "Evicted oldest sessions");
        }

        let input = CreateSession {
            id: Uuid::new_v4(),
            user_id,
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
            device_fingerprint: device_fingerprint(
                client.user_agent.as_deref(),
                client.accept_language.as_deref(),
            ),
            created_at: now,
            expires_at: self.timeouts.initial_expiry(now),
        };
        let session = self.store.create_session(&input).await?;
        tracing::debug!(user_id, session_id = %session.id, "Session created");

        Ok(CreatedSession { session, evicted })
    }

    /// Check that `session_id` belongs to `user_id` and is still live, and
    /// record the access.
    ///
    /// A session found past its expiry is ended with reason `expired`.
    pub async fn is_session_valid(
        &self,
        session_id: SessionId,
        user_id: DbId,
    ) -> Result<SessionCheck, sqlx::Error> {
        self.is_session_valid_at(session_id, user_id, Utc::now()).await
    }

    async fn is_session_valid_at(
        &self,
        session_id: SessionId,
        user_id: DbId,
        now: Timestamp,
    ) -> Result<SessionCheck, sqlx::Error> {
        let Some(mut session) = self.store.find_session(session_id).await? else {
            return Ok(SessionCheck::Invalid(InvalidReason::NotFound));
        };
        if session.user_id != user_id {
            tracing::warn!(user_id, session_id = %session_id, "Session presented by another user");
            return Ok(SessionCheck::Invalid(InvalidReason::UserMismatch));
        }
        if !session.is_active {
            return Ok(SessionCheck::Invalid(InvalidReason::Inactive));
        }
        if session.expires_at <= now {
            self.store
                .end_session(session_id, SessionEndReason::Expired.as_str(), now)
                .await?;
            return Ok(SessionCheck::Invalid(InvalidReason::Expired));
        }

        let expires_at = self
            .timeouts
            .slide_expiry(session.created_at, session.expires_at, now);
        self.store.touch_session(session_id, now, expires_at).await?;
        session.last_accessed_at = now;
        session.expires_at = expires_at;

        Ok(SessionCheck::Valid(session))
    }

    pub async fn find(&self, session_id: SessionId) -> Result<Option<UserSession>, sqlx::Error> {
        self.store.find_session(session_id).await
    }

    /// End one session. Returns `false` if it was already ended.
    pub async fn end_session(
        &self,
        session_id: SessionId,
        reason: SessionEndReason,
    ) -> Result<bool, sqlx::Error> {
        let ended = self
            .store
            .end_session(session_id, reason.as_str(), Utc::now())
            .await?;
        if ended {
            tracing::info!(session_id = %session_id, %reason, "Session ended");
        }
        Ok(ended)
    }

    /// End every active session of `user_id`, optionally sparing one.
    pub async fn end_all_user_sessions(
        &self,
        user_id: DbId,
        except: Option<SessionId>,
        reason: SessionEndReason,
    ) -> Result<u64, sqlx::Error> {
        let ended = self
            .store
            .end_user_sessions(user_id, except, reason.as_str(), Utc::now())
            .await?;
        tracing::info!(user_id, ended, %reason, "Ended user sessions");
        Ok(ended)
    }

    /// Live sessions of `user_id`, oldest first.
    pub async fn active_sessions(&self, user_id: DbId) -> Result<Vec<UserSession>, sqlx::Error> {
        self.store.list_active_sessions(user_id, Utc::now()).await
    }

    /// Mark every active session past its expiry as ended.
    pub async fn cleanup_expired_sessions(&self, now: Timestamp) -> Result<u64, sqlx::Error> {
        self.store.expire_sessions(now).await
    }

    /// Lock or unlock the screen of a session.
    pub async fn set_locked(&self, session_id: SessionId, locked: bool) -> Result<bool, sqlx::Error> {
        let locked_at = locked.then(Utc::now);
        self.store.set_session_lock(session_id, locked_at).await
    }

    /// Remove sessions that ended before `before`.
    pub async fn purge_ended(&self, before: Timestamp) -> Result<u64, sqlx::Error> {
        self.store.purge_ended_sessions(before).await
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Duration;
    use ess_db::store::MemoryStore;

    use super::*;

    fn config(max: usize, policy: SessionLimitPolicy) -> SessionConfig {
        SessionConfig {
            max_concurrent: max,
            limit_policy: policy,
            ..SessionConfig::default()
        }
    }

    fn service(max: usize, policy: SessionLimitPolicy) -> (Arc<MemoryStore>, SessionService) {
        let store = Arc::new(MemoryStore::new());
        let svc = SessionService::new(store.clone(), &config(max, policy));
        (store, svc)
    }

    fn client(ua: &str) -> ClientInfo {
        ClientInfo {
            ip_address: Some("10.1.1.1".into()),
            user_agent: Some(ua.into()),
            accept_language: Some("en-US".into()),
        }
    }

    #[tokio::test]
    async fn new_session_respects_timestamp_invariants() {
        let (_, svc) = service(3, SessionLimitPolicy::EvictOldest);
        let created = svc.create_session(7, &client("A")).await.unwrap();
        let s = created.session;

        assert!(s.expires_at > s.created_at);
        assert!(s.last_accessed_at >= s.created_at);
        assert_eq!(s.expires_at - s.created_at, Duration::minutes(30));
        assert!(s.is_active);
        assert_eq!(s.device_fingerprint.len(), 64);
        assert!(created.evicted.is_empty());
    }

    #[tokio::test]
    async fn at_limit_exactly_one_oldest_session_is_evicted() {
        let (_, svc) = service(3, SessionLimitPolicy::EvictOldest);
        let t0 = Utc::now();
        let mut ids = Vec::new();
        for i in 0..3 {
            let created = svc
                .create_session_at(1, &client("ua"), t0 + Duration::seconds(i))
                .await
                .unwrap();
            ids.push(created.session.id);
        }

        let created = svc
            .create_session_at(1, &client("ua"), t0 + Duration::seconds(10))
            .await
            .unwrap();
        assert_eq!(created.evicted, vec![ids[0]]);

        let evicted = svc.find(ids[0]).await.unwrap().unwrap();
        assert!(!evicted.is_active);
        assert_eq!(evicted.end_reason.as_deref(), Some("evicted"));

        let active = svc.active_sessions(1).await.unwrap();
        assert_eq!(active.len(), 3);
        assert!(active.iter().all(|s| s.id != ids[0]));
    }

    #[tokio::test]
    async fn device_a_invalid_after_device_b_logs_in_with_limit_one() {
        let (_, svc) = service(1, SessionLimitPolicy::EvictOldest);
        let a = svc.create_session(5, &client("device-a")).await.unwrap().session;
        assert_matches!(
            svc.is_session_valid(a.id, 5).await.unwrap(),
            SessionCheck::Valid(_)
        );

        let b = svc.create_session(5, &client("device-b")).await.unwrap();
        assert_eq!(b.evicted, vec![a.id]);

        assert_matches!(
            svc.is_session_valid(a.id, 5).await.unwrap(),
            SessionCheck::Invalid(InvalidReason::Inactive)
        );
        assert_matches!(
            svc.is_session_valid(b.session.id, 5).await.unwrap(),
            SessionCheck::Valid(_)
        );
    }

    #[tokio::test]
    async fn reject_policy_refuses_new_session_at_limit() {
        let (_, svc) = service(1, SessionLimitPolicy::Reject);
        svc.create_session(2, &client("A")).await.unwrap();

        let err = svc.create_session(2, &client("B")).await.unwrap_err();
        assert_matches!(err, SessionError::LimitReached { max: 1 });
        assert_eq!(svc.active_sessions(2).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn limit_is_per_user() {
        let (_, svc) = service(1, SessionLimitPolicy::EvictOldest);
        let a = svc.create_session(1, &client("A")).await.unwrap();
        let b = svc.create_session(2, &client("B")).await.unwrap();

        assert!(a.evicted.is_empty());
        assert!(b.evicted.is_empty());
    }

    #[tokio::test]
    async fn unknown_and_foreign_sessions_are_invalid() {
        let (_, svc) = service(3, SessionLimitPolicy::EvictOldest);
        let s = svc.create_session(1, &client("A")).await.unwrap().session;

        assert_matches!(
            svc.is_session_valid(Uuid::new_v4(), 1).await.unwrap(),
            SessionCheck::Invalid(InvalidReason::NotFound)
        );
        assert_matches!(
            svc.is_session_valid(s.id, 2).await.unwrap(),
            SessionCheck::Invalid(InvalidReason::UserMismatch)
        );
    }

    #[tokio::test]
    async fn expired_session_is_ended_on_check() {
        let (_, svc) = service(3, SessionLimitPolicy::EvictOldest);
        let t0 = Utc::now() - Duration::hours(2);
        let s = svc
            .create_session_at(1, &client("A"), t0)
            .await
            .unwrap()
            .session;

        assert_matches!(
            svc.is_session_valid(s.id, 1).await.unwrap(),
            SessionCheck::Invalid(InvalidReason::Expired)
        );
        let stored = svc.find(s.id).await.unwrap().unwrap();
        assert!(!stored.is_active);
        assert_eq!(stored.end_reason.as_deref(), Some("expired"));
    }

    #[tokio::test]
    async fn valid_check_slides_expiry() {
        let (_, svc) = service(3, SessionLimitPolicy::EvictOldest);
        let t0 = Utc::now();
        let s = svc
            .create_session_at(1, &client("A"), t0)
            .await
            .unwrap()
            .session;

        let later = t0 + Duration::minutes(20);
        let checked = assert_matches!(
            svc.is_session_valid_at(s.id, 1, later).await.unwrap(),
            SessionCheck::Valid(s) => s
        );
        assert_eq!(checked.last_accessed_at, later);
        assert_eq!(checked.expires_at, later + Duration::minutes(30));

        let stored = svc.find(s.id).await.unwrap().unwrap();
        assert_eq!(stored.expires_at, checked.expires_at);
    }

    #[tokio::test]
    async fn without_sliding_only_last_access_moves() {
        let store = Arc::new(MemoryStore::new());
        let svc = SessionService::new(
            store,
            &SessionConfig {
                sliding_expiration: false,
                ..SessionConfig::default()
            },
        );
        let t0 = Utc::now();
        let s = svc
            .create_session_at(1, &client("A"), t0)
            .await
            .unwrap()
            .session;

        let later = t0 + Duration::minutes(10);
        let checked = assert_matches!(
            svc.is_session_valid_at(s.id, 1, later).await.unwrap(),
            SessionCheck::Valid(s) => s
        );
        assert_eq!(checked.expires_at, s.expires_at);
        assert_eq!(checked.last_accessed_at, later);
    }

    #[tokio::test]
    async fn end_all_spares_the_current_session() {
        let (_, svc) = service(5, SessionLimitPolicy::EvictOldest);
        let keep = svc.create_session(1, &client("A")).await.unwrap().session;
        svc.create_session(1, &client("B")).await.unwrap();
        svc.create_session(1, &client("C")).await.unwrap();

        let ended = svc
            .end_all_user_sessions(1, Some(keep.id), SessionEndReason::LogoutAll)
            .await
            .unwrap();
        assert_eq!(ended, 2);

        let active = svc.active_sessions(1).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, keep.id);
    }

    #[tokio::test]
    async fn cleanup_ends_only_expired_sessions() {
        let (_, svc) = service(5, SessionLimitPolicy::EvictOldest);
        let now = Utc::now();
        let old = svc
            .create_session_at(1, &client("A"), now - Duration::hours(1))
            .await
            .unwrap()
            .session;
        let fresh = svc.create_session_at(1, &client("B"), now).await.unwrap().session;

        assert_eq!(svc.cleanup_expired_sessions(now).await.unwrap(), 1);
        assert!(!svc.find(old.id).await.unwrap().unwrap().is_active);
        assert!(svc.find(fresh.id).await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn lock_and_unlock() {
        let (_, svc) = service(3, SessionLimitPolicy::EvictOldest);
        let s = svc.create_session(1, &client("A")).await.unwrap().session;

        assert!(svc.set_locked(s.id, true).await.unwrap());
        assert!(svc.find(s.id).await.unwrap().unwrap().is_locked());
        assert!(svc.set_locked(s.id, false).await.unwrap());
        assert!(!svc.find(s.id).await.unwrap().unwrap().is_locked());
    }
}

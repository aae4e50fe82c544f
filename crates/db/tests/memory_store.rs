use chrono::{Duration, Utc};
use ess_db::models::ip_security::{CreateBlockedIp, CreateIpSecurityEvent};
use ess_db::models::refresh_token::{CreateRefreshToken, Revocation};
use ess_db::models::session::CreateSession;
use ess_db::models::totp::CreateTempTotpSecret;
use ess_db::models::user::CreateUser;
use ess_db::store::{
    BackupCodeStore, IpSecurityStore, MemoryStore, RefreshTokenStore, SessionStore, TotpStore,
    UserStore,
};
use uuid::Uuid;

fn new_user(username: &str) -> CreateUser {
    CreateUser {
        username: username.to_string(),
        email: format!("{username}@example.com"),
        employee_no: None,
        password_hash: "hash".to_string(),
        role: "employee".to_string(),
        manager_id: None,
    }
}

fn new_session(user_id: i64, offset_secs: i64) -> CreateSession {
    let created_at = Utc::now() + Duration::seconds(offset_secs);
    CreateSession {
        id: Uuid::new_v4(),
        user_id,
        ip_address: Some("10.0.0.1".to_string()),
        user_agent: Some("test".to_string()),
        device_fingerprint: "fp".to_string(),
        created_at,
        expires_at: created_at + Duration::minutes(30),
    }
}

fn revocation(reason: &str) -> Revocation {
    Revocation {
        reason: reason.to_string(),
        revoked_by_ip: None,
        revoked_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_username_is_a_unique_violation() {
    let store = MemoryStore::new();
    store.create_user(&new_user("alice")).await.unwrap();

    let err = store.create_user(&new_user("alice")).await.unwrap_err();
    match err {
        sqlx::Error::Database(db) => {
            assert_eq!(db.code().as_deref(), Some("23505"));
            assert_eq!(db.constraint(), Some("uq_users_username"));
        }
        other => panic!("expected database error, got {other:?}"),
    }
}

#[tokio::test]
async fn login_lookup_is_case_insensitive_and_skips_deleted() {
    let store = MemoryStore::new();
    let user = store.create_user(&new_user("Bob")).await.unwrap();

    let found = store.find_user_by_login("BOB@EXAMPLE.COM").await.unwrap();
    assert_eq!(found.map(|u| u.id), Some(user.id));

    assert!(store.soft_delete_user(user.id, Utc::now()).await.unwrap());
    assert!(store.find_user_by_login("bob").await.unwrap().is_none());
    assert!(!store.soft_delete_user(user.id, Utc::now()).await.unwrap());
}

#[tokio::test]
async fn successful_login_resets_failure_counter() {
    let store = MemoryStore::new();
    let user = store.create_user(&new_user("carol")).await.unwrap();

    assert_eq!(store.increment_failed_login(user.id).await.unwrap(), 1);
    assert_eq!(store.increment_failed_login(user.id).await.unwrap(), 2);
    store
        .lock_account(user.id, Utc::now() + Duration::minutes(15))
        .await
        .unwrap();

    store.record_successful_login(user.id, Utc::now()).await.unwrap();
    let user = store.find_user_by_id(user.id).await.unwrap().unwrap();
    assert_eq!(user.failed_login_count, 0);
    assert!(user.locked_until.is_none());
    assert!(user.last_login_at.is_some());
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn active_sessions_are_listed_oldest_first() {
    let store = MemoryStore::new();
    let newer = store.create_session(&new_session(1, 10)).await.unwrap();
    let older = store.create_session(&new_session(1, 0)).await.unwrap();
    store.create_session(&new_session(2, 0)).await.unwrap();

    let sessions = store.list_active_sessions(1, Utc::now()).await.unwrap();
    let ids: Vec<_> = sessions.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![older.id, newer.id]);
}

#[tokio::test]
async fn session_expiry_must_follow_creation() {
    let store = MemoryStore::new();
    let mut input = new_session(1, 0);
    input.expires_at = input.created_at;

    let err = store.create_session(&input).await.unwrap_err();
    match err {
        sqlx::Error::Database(db) => assert_eq!(db.constraint(), Some("ck_user_sessions_expiry")),
        other => panic!("expected database error, got {other:?}"),
    }
}

#[tokio::test]
async fn ending_a_session_twice_reports_false() {
    let store = MemoryStore::new();
    let session = store.create_session(&new_session(1, 0)).await.unwrap();

    assert!(store.end_session(session.id, "logout", Utc::now()).await.unwrap());
    assert!(!store.end_session(session.id, "logout", Utc::now()).await.unwrap());

    let ended = store.find_session(session.id).await.unwrap().unwrap();
    assert!(!ended.is_active);
    assert_eq!(ended.end_reason.as_deref(), Some("logout"));
    assert!(ended.ended_at.is_some());
}

#[tokio::test]
async fn end_user_sessions_spares_the_excepted_one() {
    let store = MemoryStore::new();
    let keep = store.create_session(&new_session(1, 0)).await.unwrap();
    store.create_session(&new_session(1, 1)).await.unwrap();
    store.create_session(&new_session(1, 2)).await.unwrap();

    let ended = store
        .end_user_sessions(1, Some(keep.id), "password_changed", Utc::now())
        .await
        .unwrap();
    assert_eq!(ended, 2);

    let remaining = store.list_active_sessions(1, Utc::now()).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, keep.id);
}

#[tokio::test]
async fn expire_sessions_ends_only_due_sessions() {
    let store = MemoryStore::new();
    let due = store.create_session(&new_session(1, -3600)).await.unwrap();
    let live = store.create_session(&new_session(1, 0)).await.unwrap();

    assert_eq!(store.expire_sessions(Utc::now()).await.unwrap(), 1);

    let due = store.find_session(due.id).await.unwrap().unwrap();
    assert_eq!(due.end_reason.as_deref(), Some("expired"));
    assert!(store.find_session(live.id).await.unwrap().unwrap().is_active);
}

#[tokio::test]
async fn purging_sessions_detaches_their_refresh_tokens() {
    let store = MemoryStore::new();
    let session = store.create_session(&new_session(1, 0)).await.unwrap();
    let token = store
        .create_refresh_token(&CreateRefreshToken {
            token_hash: "h1".to_string(),
            user_id: 1,
            session_id: Some(session.id),
            family_id: Uuid::new_v4(),
            expires_at: Utc::now() + Duration::days(7),
            created_by_ip: None,
        })
        .await
        .unwrap();

    let ended_at = Utc::now() - Duration::days(40);
    store.end_session(session.id, "logout", ended_at).await.unwrap();
    let purged = store
        .purge_ended_sessions(Utc::now() - Duration::days(30))
        .await
        .unwrap();
    assert_eq!(purged, 1);

    let token = store.find_refresh_token_by_hash(&token.token_hash).await.unwrap().unwrap();
    assert!(token.session_id.is_none());
}

// ---------------------------------------------------------------------------
// Refresh tokens
// ---------------------------------------------------------------------------

#[tokio::test]
async fn mark_used_succeeds_once() {
    let store = MemoryStore::new();
    let token = store
        .create_refresh_token(&CreateRefreshToken {
            token_hash: "once".to_string(),
            user_id: 1,
            session_id: None,
            family_id: Uuid::new_v4(),
            expires_at: Utc::now() + Duration::days(7),
            created_by_ip: None,
        })
        .await
        .unwrap();

    assert!(store.mark_refresh_token_used(token.id, Utc::now()).await.unwrap());
    assert!(!store.mark_refresh_token_used(token.id, Utc::now()).await.unwrap());
}

#[tokio::test]
async fn revoking_a_family_leaves_other_families_alone() {
    let store = MemoryStore::new();
    let family = Uuid::new_v4();
    let other = Uuid::new_v4();
    for (hash, family_id) in [("a", family), ("b", family), ("c", other)] {
        store
            .create_refresh_token(&CreateRefreshToken {
                token_hash: hash.to_string(),
                user_id: 1,
                session_id: None,
                family_id,
                expires_at: Utc::now() + Duration::days(7),
                created_by_ip: None,
            })
            .await
            .unwrap();
    }

    let revoked = store
        .revoke_refresh_token_family(family, &revocation("reuse_detected"))
        .await
        .unwrap();
    assert_eq!(revoked, 2);

    let members = store.list_refresh_token_family(family).await.unwrap();
    assert!(members
        .iter()
        .all(|t| t.revoked_reason.as_deref() == Some("reuse_detected")));
    let untouched = store.find_refresh_token_by_hash("c").await.unwrap().unwrap();
    assert!(untouched.revoked_at.is_none());
}

// ---------------------------------------------------------------------------
// Backup codes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn backup_codes_are_single_use_and_replaceable() {
    let store = MemoryStore::new();
    let now = Utc::now();
    let hashes: Vec<String> = ["h1", "h2", "h3"].iter().map(|s| s.to_string()).collect();
    assert_eq!(store.replace_backup_codes(7, &hashes, None).await.unwrap(), 3);

    assert!(store.consume_backup_code(7, "h2", now).await.unwrap());
    assert!(!store.consume_backup_code(7, "h2", now).await.unwrap());
    assert!(!store.consume_backup_code(8, "h1", now).await.unwrap());
    assert_eq!(store.count_redeemable_backup_codes(7, now).await.unwrap(), 2);

    store
        .replace_backup_codes(7, &["h9".to_string()], None)
        .await
        .unwrap();
    assert_eq!(store.count_redeemable_backup_codes(7, now).await.unwrap(), 1);
    // The replaced set is deactivated, not redeemable.
    assert!(!store.consume_backup_code(7, "h1", now).await.unwrap());
}

#[tokio::test]
async fn backup_codes_stop_redeeming_after_expiry() {
    let store = MemoryStore::new();
    let now = Utc::now();
    let expires_at = now + Duration::days(1);
    store
        .replace_backup_codes(7, &["h1".to_string(), "h2".to_string()], Some(expires_at))
        .await
        .unwrap();

    let later = expires_at + Duration::seconds(1);
    assert_eq!(store.count_redeemable_backup_codes(7, later).await.unwrap(), 0);
    assert!(!store.consume_backup_code(7, "h1", later).await.unwrap());
    assert!(store.consume_backup_code(7, "h1", now).await.unwrap());
}

#[tokio::test]
async fn backup_code_expiry_must_be_in_the_future() {
    let store = MemoryStore::new();
    let err = store
        .replace_backup_codes(7, &["h1".to_string()], Some(Utc::now() - Duration::days(1)))
        .await
        .unwrap_err();
    match err {
        sqlx::Error::Database(db) => {
            assert_eq!(db.constraint(), Some("ck_user_backup_codes_expiry"))
        }
        other => panic!("expected a check violation, got {other:?}"),
    }
}

#[tokio::test]
async fn backup_code_purge_removes_dead_rows_only() {
    let store = MemoryStore::new();
    let now = Utc::now();
    store
        .replace_backup_codes(7, &["old".to_string()], None)
        .await
        .unwrap();
    store
        .replace_backup_codes(7, &["a".to_string(), "b".to_string()], None)
        .await
        .unwrap();
    store.consume_backup_code(7, "a", now).await.unwrap();

    let purged = store
        .purge_backup_codes(now + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(purged, 2);
    assert_eq!(store.count_redeemable_backup_codes(7, now).await.unwrap(), 1);

    assert_eq!(store.deactivate_backup_codes(7).await.unwrap(), 1);
    assert_eq!(store.count_redeemable_backup_codes(7, now).await.unwrap(), 0);
}

// ---------------------------------------------------------------------------
// Authenticator secrets
// ---------------------------------------------------------------------------

fn new_temp_secret(user_id: i64, secret: &str) -> CreateTempTotpSecret {
    CreateTempTotpSecret {
        user_id,
        secret: secret.to_string(),
        expires_at: Utc::now() + Duration::minutes(10),
    }
}

#[tokio::test]
async fn new_enrollment_supersedes_pending_one() {
    let store = MemoryStore::new();
    let now = Utc::now();
    let first = store
        .create_temp_totp_secret(&new_temp_secret(7, "FIRST"))
        .await
        .unwrap();
    let second = store
        .create_temp_totp_secret(&new_temp_secret(7, "SECOND"))
        .await
        .unwrap();

    let pending = store
        .find_pending_temp_totp_secret(7, now)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pending.id, second.id);
    assert!(store.activate_totp_secret(first.id, now).await.unwrap().is_none());
}

#[tokio::test]
async fn activation_consumes_temp_and_replaces_active_secret() {
    let store = MemoryStore::new();
    let now = Utc::now();

    let temp = store
        .create_temp_totp_secret(&new_temp_secret(7, "OLD"))
        .await
        .unwrap();
    let old = store.activate_totp_secret(temp.id, now).await.unwrap().unwrap();
    assert!(store.activate_totp_secret(temp.id, now).await.unwrap().is_none());

    let temp = store
        .create_temp_totp_secret(&new_temp_secret(7, "NEW"))
        .await
        .unwrap();
    let new = store.activate_totp_secret(temp.id, now).await.unwrap().unwrap();
    assert_ne!(old.id, new.id);

    let active = store.find_active_totp_secret(7, now).await.unwrap().unwrap();
    assert_eq!(active.secret, "NEW");
    assert!(store
        .find_pending_temp_totp_secret(7, now)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn expired_enrollment_cannot_be_activated() {
    let store = MemoryStore::new();
    let temp = store
        .create_temp_totp_secret(&new_temp_secret(7, "SECRET"))
        .await
        .unwrap();
    let later = temp.expires_at + Duration::seconds(1);
    assert!(store.activate_totp_secret(temp.id, later).await.unwrap().is_none());
    assert!(store
        .find_pending_temp_totp_secret(7, later)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn totp_steps_only_move_forward() {
    let store = MemoryStore::new();
    let now = Utc::now();
    let temp = store
        .create_temp_totp_secret(&new_temp_secret(7, "SECRET"))
        .await
        .unwrap();
    let secret = store.activate_totp_secret(temp.id, now).await.unwrap().unwrap();

    assert!(store.record_totp_step(secret.id, 100).await.unwrap());
    assert!(!store.record_totp_step(secret.id, 100).await.unwrap());
    assert!(!store.record_totp_step(secret.id, 99).await.unwrap());
    assert!(store.record_totp_step(secret.id, 101).await.unwrap());
}

#[tokio::test]
async fn deactivation_clears_secret_and_pending_enrollment() {
    let store = MemoryStore::new();
    let now = Utc::now();
    let temp = store
        .create_temp_totp_secret(&new_temp_secret(7, "SECRET"))
        .await
        .unwrap();
    store.activate_totp_secret(temp.id, now).await.unwrap();
    store
        .create_temp_totp_secret(&new_temp_secret(7, "PENDING"))
        .await
        .unwrap();

    assert_eq!(store.deactivate_totp_secrets(7, now).await.unwrap(), 2);
    assert!(store.find_active_totp_secret(7, now).await.unwrap().is_none());
    assert!(store
        .find_pending_temp_totp_secret(7, now)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn temp_secret_purge_keeps_pending_enrollments() {
    let store = MemoryStore::new();
    let now = Utc::now();
    let used = store
        .create_temp_totp_secret(&new_temp_secret(7, "USED"))
        .await
        .unwrap();
    store.activate_totp_secret(used.id, now).await.unwrap();
    store
        .create_temp_totp_secret(&new_temp_secret(8, "PENDING"))
        .await
        .unwrap();
    store
        .create_temp_totp_secret(&new_temp_secret(9, "STALE"))
        .await
        .unwrap();

    assert_eq!(store.purge_temp_totp_secrets(now).await.unwrap(), 1);
    assert!(store
        .find_pending_temp_totp_secret(8, now)
        .await
        .unwrap()
        .is_some());

    let later = now + Duration::minutes(11);
    assert_eq!(store.purge_temp_totp_secrets(later).await.unwrap(), 2);
}

// ---------------------------------------------------------------------------
// IP security
// ---------------------------------------------------------------------------

#[tokio::test]
async fn expired_blocks_are_not_in_force() {
    let store = MemoryStore::new();
    store
        .upsert_block(&CreateBlockedIp {
            ip_address: "192.0.2.1".to_string(),
            reason: "manual".to_string(),
            expires_at: Some(Utc::now() + Duration::minutes(5)),
            blocked_by: None,
        })
        .await
        .unwrap();

    assert!(store.find_active_block("192.0.2.1", Utc::now()).await.unwrap().is_some());
    let later = Utc::now() + Duration::minutes(10);
    assert!(store.find_active_block("192.0.2.1", later).await.unwrap().is_none());
    assert_eq!(store.purge_expired_blocks(later).await.unwrap(), 1);
}

#[tokio::test]
async fn ip_events_are_counted_within_the_window() {
    let store = MemoryStore::new();
    let now = Utc::now();
    for minutes_ago in [1, 5, 30] {
        store
            .record_ip_event(&CreateIpSecurityEvent {
                ip_address: "198.51.100.7".to_string(),
                event_type: "failed_login".to_string(),
                user_id: None,
                detail: None,
                occurred_at: now - Duration::minutes(minutes_ago),
            })
            .await
            .unwrap();
    }

    let since = now - Duration::minutes(15);
    let count = store
        .count_ip_events("198.51.100.7", "failed_login", since)
        .await
        .unwrap();
    assert_eq!(count, 2);
    assert_eq!(store.purge_ip_events(since).await.unwrap(), 1);
}

#[tokio::test]
async fn whitelist_add_is_idempotent() {
    let store = MemoryStore::new();
    let first = store.add_whitelist("203.0.113.9", Some("office")).await.unwrap();
    let second = store.add_whitelist("203.0.113.9", Some("hq")).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.description.as_deref(), Some("hq"));
    assert!(store.is_whitelisted("203.0.113.9").await.unwrap());
    assert!(store.remove_whitelist("203.0.113.9").await.unwrap());
    assert!(!store.is_whitelisted("203.0.113.9").await.unwrap());
}

//! HTTP-level integration tests for the `/auth` endpoints.
//!
//! Tests cover login, lockout, token refresh and reuse detection, logout,
//! password change, concurrent-session limits, and backup codes.

mod common;

use axum::body::Body;
use axum::http::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use axum::http::{Request, StatusCode};
use chrono::Utc;
use common::{
    access_token, body_json, build_test_app, build_test_app_with, create_test_user, get,
    get_auth, login, post_auth, post_json, post_json_auth, send, test_config, TEST_PASSWORD,
};
use ess_api::auth::jwt::generate_access_token;
use ess_api::error::PROBLEM_JSON;
use ess_core::session_policy::SessionLimitPolicy;
use serde_json::json;

// ---------------------------------------------------------------------------
// Login
// ---------------------------------------------------------------------------

#[tokio::test]
async fn login_returns_tokens_session_and_user() {
    let (app, state) = build_test_app();
    let user = create_test_user(&state, "alice", "employee").await;

    let json = login(&app, "alice", TEST_PASSWORD).await;

    assert!(json["accessToken"].is_string());
    assert!(json["refreshToken"].is_string());
    assert_eq!(json["expiresIn"], 900);
    assert!(json["accessTokenExpiresAt"].is_string());
    assert!(json["sessionId"].is_string());
    assert_eq!(json["user"]["id"], user.id);
    assert_eq!(json["user"]["username"], "alice");
    assert_eq!(json["user"]["role"], "employee");
    assert!(json["user"].get("passwordHash").is_none());
}

#[tokio::test]
async fn login_sets_http_only_strict_cookie() {
    let (app, state) = build_test_app();
    create_test_user(&state, "alice", "employee").await;

    let response = post_json(
        &app,
        "/api/v1/auth/login",
        json!({ "login": "alice", "password": TEST_PASSWORD }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response.headers()[SET_COOKIE].to_str().unwrap().to_string();
    assert!(cookie.starts_with("auth_token="));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Strict"));
}

#[tokio::test]
async fn login_accepts_email_case_insensitively() {
    let (app, state) = build_test_app();
    create_test_user(&state, "alice", "employee").await;

    let json = login(&app, "ALICE@example.com", TEST_PASSWORD).await;
    assert_eq!(json["user"]["username"], "alice");
}

#[tokio::test]
async fn wrong_password_is_401_problem() {
    let (app, state) = build_test_app();
    create_test_user(&state, "alice", "employee").await;

    let response = post_json(
        &app,
        "/api/v1/auth/login",
        json!({ "login": "alice", "password": "not-the-password-1" }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()[CONTENT_TYPE], PROBLEM_JSON);
    let json = body_json(response).await;
    assert_eq!(json["code"], "UNAUTHORIZED");
    assert_eq!(json["status"], 401);
}

#[tokio::test]
async fn unknown_login_is_401() {
    let (app, _state) = build_test_app();

    let response = post_json(
        &app,
        "/api/v1/auth/login",
        json!({ "login": "ghost", "password": TEST_PASSWORD }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn empty_fields_are_422_with_field_errors() {
    let (app, _state) = build_test_app();

    let response = post_json(
        &app,
        "/api/v1/auth/login",
        json!({ "login": "", "password": "" }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = body_json(response).await;
    assert_eq!(json["code"], "VALIDATION_ERROR");
    assert_eq!(json["errors"]["login"][0], "Login is required");
    assert!(json["errors"]["password"].is_array());
}

#[tokio::test]
async fn deleted_user_cannot_log_in() {
    let (app, state) = build_test_app();
    let user = create_test_user(&state, "alice", "employee").await;
    state.users.soft_delete_user(user.id, Utc::now()).await.unwrap();

    let response = post_json(
        &app,
        "/api/v1/auth/login",
        json!({ "login": "alice", "password": TEST_PASSWORD }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn five_failures_lock_the_account() {
    let (app, state) = build_test_app();
    create_test_user(&state, "alice", "employee").await;

    for _ in 0..5 {
        let response = post_json(
            &app,
            "/api/v1/auth/login",
            json!({ "login": "alice", "password": "wrong-password-99" }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = post_json(
        &app,
        "/api/v1/auth/login",
        json!({ "login": "alice", "password": TEST_PASSWORD }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

// ---------------------------------------------------------------------------
// Token transport
// ---------------------------------------------------------------------------

#[tokio::test]
async fn me_accepts_bearer_token() {
    let (app, state) = build_test_app();
    create_test_user(&state, "alice", "employee").await;
    let token = access_token(&login(&app, "alice", TEST_PASSWORD).await);

    let response = get_auth(&app, "/api/v1/auth/me", &token).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["username"], "alice");
}

#[tokio::test]
async fn me_accepts_auth_cookie() {
    let (app, state) = build_test_app();
    create_test_user(&state, "alice", "employee").await;
    let token = access_token(&login(&app, "alice", TEST_PASSWORD).await);

    let request = Request::builder()
        .uri("/api/v1/auth/me")
        .header(COOKIE, format!("theme=dark; auth_token={token}"))
        .body(Body::empty())
        .unwrap();
    let response = send(&app, request).await;

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn me_without_token_is_401() {
    let (app, _state) = build_test_app();

    let response = get(&app, "/api/v1/auth/me").await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn expired_access_token_reports_expiry() {
    let (app, state) = build_test_app();
    create_test_user(&state, "alice", "employee").await;
    let json = login(&app, "alice", TEST_PASSWORD).await;
    let session_id = json["sessionId"].as_str().unwrap().parse().unwrap();

    let mut jwt = state.config.jwt.clone();
    jwt.access_token_expiry_mins = -5;
    let expired = generate_access_token(json["user"]["id"].as_i64().unwrap(), "employee", session_id, &jwt)
        .unwrap();

    let response = get_auth(&app, "/api/v1/auth/me", &expired.token).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["code"], "TOKEN_EXPIRED");
    assert!(json["expiredAt"].is_string());
    assert!(json["serverTime"].is_string());
}

// ---------------------------------------------------------------------------
// Refresh
// ---------------------------------------------------------------------------

#[tokio::test]
async fn refresh_rotates_the_token() {
    let (app, state) = build_test_app();
    create_test_user(&state, "alice", "employee").await;
    let first = login(&app, "alice", TEST_PASSWORD).await;
    let refresh = first["refreshToken"].as_str().unwrap();

    let response = post_json(
        &app,
        "/api/v1/auth/refresh-token",
        json!({ "refreshToken": refresh }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let second = body_json(response).await;
    assert_ne!(second["refreshToken"], first["refreshToken"]);
    assert_eq!(second["sessionId"], first["sessionId"]);

    let me = get_auth(&app, "/api/v1/auth/me", &access_token(&second)).await;
    assert_eq!(me.status(), StatusCode::OK);
}

#[tokio::test]
async fn reused_refresh_token_revokes_family_and_ends_session() {
    let (app, state) = build_test_app();
    create_test_user(&state, "alice", "employee").await;
    let first = login(&app, "alice", TEST_PASSWORD).await;
    let original = first["refreshToken"].as_str().unwrap().to_string();

    let response = post_json(
        &app,
        "/api/v1/auth/refresh-token",
        json!({ "refreshToken": original }),
    )
    .await;
    let successor = body_json(response).await["refreshToken"]
        .as_str()
        .unwrap()
        .to_string();

    // Replaying the already used token.
    let replay = post_json(
        &app,
        "/api/v1/auth/refresh-token",
        json!({ "refreshToken": original }),
    )
    .await;
    assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);

    // The successor was revoked with the family.
    let response = post_json(
        &app,
        "/api/v1/auth/refresh-token",
        json!({ "refreshToken": successor }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // The bound session was ended.
    let me = get_auth(&app, "/api/v1/auth/me", &access_token(&first)).await;
    assert_eq!(me.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn garbage_refresh_token_is_401() {
    let (app, _state) = build_test_app();

    let response = post_json(
        &app,
        "/api/v1/auth/refresh-token",
        json!({ "refreshToken": "not-a-token" }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// ---------------------------------------------------------------------------
// Logout
// ---------------------------------------------------------------------------

#[tokio::test]
async fn logout_ends_session_and_revokes_refresh_token() {
    let (app, state) = build_test_app();
    create_test_user(&state, "alice", "employee").await;
    let json = login(&app, "alice", TEST_PASSWORD).await;
    let token = access_token(&json);

    let response = post_auth(&app, "/api/v1/auth/logout", &token).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let cleared = response.headers()[SET_COOKIE].to_str().unwrap().to_string();
    assert!(cleared.starts_with("auth_token="));
    assert!(cleared.contains("Max-Age=0"));

    let me = get_auth(&app, "/api/v1/auth/me", &token).await;
    assert_eq!(me.status(), StatusCode::UNAUTHORIZED);

    let refresh = post_json(
        &app,
        "/api/v1/auth/refresh-token",
        json!({ "refreshToken": json["refreshToken"] }),
    )
    .await;
    assert_eq!(refresh.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_all_ends_every_device() {
    let (app, state) = build_test_app();
    create_test_user(&state, "alice", "employee").await;
    let laptop = access_token(&login(&app, "alice", TEST_PASSWORD).await);
    let phone = access_token(&login(&app, "alice", TEST_PASSWORD).await);

    let response = post_auth(&app, "/api/v1/auth/logout-all", &laptop).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    for token in [&laptop, &phone] {
        let me = get_auth(&app, "/api/v1/auth/me", token).await;
        assert_eq!(me.status(), StatusCode::UNAUTHORIZED);
    }
}

// ---------------------------------------------------------------------------
// Concurrent sessions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn device_a_is_signed_out_when_device_b_logs_in_with_limit_one() {
    let mut config = test_config();
    config.session.max_concurrent = 1;
    let (app, state) = build_test_app_with(config);
    create_test_user(&state, "alice", "employee").await;

    let device_a = login(&app, "alice", TEST_PASSWORD).await;
    let device_b = login(&app, "alice", TEST_PASSWORD).await;

    let a = get_auth(&app, "/api/v1/auth/me", &access_token(&device_a)).await;
    assert_eq!(a.status(), StatusCode::UNAUTHORIZED);
    let b = get_auth(&app, "/api/v1/auth/me", &access_token(&device_b)).await;
    assert_eq!(b.status(), StatusCode::OK);

    // Device A's refresh token died with its session.
    let refresh = post_json(
        &app,
        "/api/v1/auth/refresh-token",
        json!({ "refreshToken": device_a["refreshToken"] }),
    )
    .await;
    assert_eq!(refresh.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn reject_policy_refuses_login_at_the_limit() {
    let mut config = test_config();
    config.session.max_concurrent = 1;
    config.session.limit_policy = SessionLimitPolicy::Reject;
    let (app, state) = build_test_app_with(config);
    create_test_user(&state, "alice", "employee").await;

    let first = login(&app, "alice", TEST_PASSWORD).await;
    let response = post_json(
        &app,
        "/api/v1/auth/login",
        json!({ "login": "alice", "password": TEST_PASSWORD }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let me = get_auth(&app, "/api/v1/auth/me", &access_token(&first)).await;
    assert_eq!(me.status(), StatusCode::OK);
}

// ---------------------------------------------------------------------------
// Password change
// ---------------------------------------------------------------------------

#[tokio::test]
async fn change_password_signs_out_other_sessions() {
    let (app, state) = build_test_app();
    create_test_user(&state, "alice", "employee").await;
    let current = access_token(&login(&app, "alice", TEST_PASSWORD).await);
    let other = access_token(&login(&app, "alice", TEST_PASSWORD).await);

    let response = post_json_auth(
        &app,
        "/api/v1/auth/change-password",
        &current,
        json!({ "currentPassword": TEST_PASSWORD, "newPassword": "brand-new-secret-7" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    assert_eq!(
        get_auth(&app, "/api/v1/auth/me", &current).await.status(),
        StatusCode::OK
    );
    assert_eq!(
        get_auth(&app, "/api/v1/auth/me", &other).await.status(),
        StatusCode::UNAUTHORIZED
    );
    login(&app, "alice", "brand-new-secret-7").await;
}

#[tokio::test]
async fn change_password_checks_current_and_strength() {
    let (app, state) = build_test_app();
    create_test_user(&state, "alice", "employee").await;
    let token = access_token(&login(&app, "alice", TEST_PASSWORD).await);

    let wrong = post_json_auth(
        &app,
        "/api/v1/auth/change-password",
        &token,
        json!({ "currentPassword": "nope-nope-nope-1", "newPassword": "brand-new-secret-7" }),
    )
    .await;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let weak = post_json_auth(
        &app,
        "/api/v1/auth/change-password",
        &token,
        json!({ "currentPassword": TEST_PASSWORD, "newPassword": "short1" }),
    )
    .await;
    assert_eq!(weak.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(weak).await["code"], "VALIDATION_ERROR");
}

// ---------------------------------------------------------------------------
// Backup codes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn backup_codes_are_single_use() {
    let (app, state) = build_test_app();
    create_test_user(&state, "alice", "employee").await;
    let token = access_token(&login(&app, "alice", TEST_PASSWORD).await);

    let response = post_auth(&app, "/api/v1/auth/backup-codes", &token).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let codes = body_json(response).await["data"]["codes"]
        .as_array()
        .unwrap()
        .clone();
    assert_eq!(codes.len(), 10);

    let verify = post_json_auth(
        &app,
        "/api/v1/auth/backup-codes/verify",
        &token,
        json!({ "code": codes[0] }),
    )
    .await;
    assert_eq!(verify.status(), StatusCode::OK);
    let json = body_json(verify).await;
    assert_eq!(json["data"]["verified"], true);
    assert_eq!(json["data"]["remaining"], 9);

    let replay = post_json_auth(
        &app,
        "/api/v1/auth/backup-codes/verify",
        &token,
        json!({ "code": codes[0] }),
    )
    .await;
    assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);

    let status = get_auth(&app, "/api/v1/auth/backup-codes", &token).await;
    assert_eq!(body_json(status).await["data"]["remaining"], 9);
}

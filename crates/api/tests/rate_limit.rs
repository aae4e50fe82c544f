//! Rate limiting through the full middleware stack.

mod common;

use axum::http::header::RETRY_AFTER;
use axum::http::StatusCode;
use common::{body_json, build_test_app_with, create_test_user, get, post_json, test_config};
use ess_api::config::RateLimitRule;
use serde_json::json;

#[tokio::test]
async fn login_policy_rejects_with_retry_after() {
    let mut config = test_config();
    config.rate_limits.login = RateLimitRule::new(2, 60, 0);
    let (app, state) = build_test_app_with(config);
    create_test_user(&state, "alice", "employee").await;

    let attempt = json!({ "login": "alice", "password": "wrong-password-1" });
    for _ in 0..2 {
        let response = post_json(&app, "/api/v1/auth/login", attempt.clone()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = post_json(&app, "/api/v1/auth/login", attempt).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response.headers()[RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));
    assert_eq!(body_json(response).await["code"], "RATE_LIMITED");
}

#[tokio::test]
async fn api_policy_skips_health() {
    let mut config = test_config();
    config.rate_limits.api = RateLimitRule::new(1, 60, 0);
    let (app, _state) = build_test_app_with(config);

    for _ in 0..3 {
        assert_eq!(get(&app, "/health").await.status(), StatusCode::OK);
    }

    assert_eq!(
        get(&app, "/api/v1/auth/me").await.status(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        get(&app, "/api/v1/auth/me").await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

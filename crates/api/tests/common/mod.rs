#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use ess_api::auth::jwt::JwtConfig;
use ess_api::auth::password::hash_password;
use ess_api::config::{
    EncryptionConfig, IpSecurityConfig, RateLimitConfig, ServerConfig, SessionConfig,
};
use ess_api::router::build_app_router;
use ess_api::state::AppState;
use ess_db::models::user::{CreateUser, User};
use ess_db::store::MemoryStore;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

/// Password given to every user made by [`create_test_user`].
pub const TEST_PASSWORD: &str = "correct-horse-42";

pub const TEST_JWT_SECRET: &str = "integration-test-secret-that-is-long-enough";

/// Build a test `ServerConfig` with safe defaults.
///
/// Payload encryption is off and the cookie is not `Secure` so plain HTTP
/// requests round-trip.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        maintenance_interval_secs: 300,
        cookie_secure: false,
        trusted_proxies: Vec::new(),
        jwt: JwtConfig {
            secret: TEST_JWT_SECRET.to_string(),
            issuer: "ess-portal".to_string(),
            audience: "ess-portal-clients".to_string(),
            access_token_expiry_mins: 15,
            refresh_token_expiry_days: 7,
        },
        session: SessionConfig::default(),
        encryption: EncryptionConfig::disabled(),
        ip_security: IpSecurityConfig::default(),
        rate_limits: RateLimitConfig::default(),
    }
}

/// Build the full application router over a fresh in-memory store.
///
/// Uses the same [`build_app_router`] as `main.rs`, so every test runs the
/// production middleware stack. The state is returned for direct setup.
pub fn build_test_app() -> (Router, AppState) {
    build_test_app_with(test_config())
}

pub fn build_test_app_with(config: ServerConfig) -> (Router, AppState) {
    let state = AppState::new(Arc::new(MemoryStore::new()), config);
    (build_app_router(state.clone()), state)
}

/// Insert a user with [`TEST_PASSWORD`] directly through the store.
pub async fn create_test_user(state: &AppState, username: &str, role: &str) -> User {
    let password_hash = hash_password(TEST_PASSWORD).expect("hashing should succeed");
    state
        .users
        .create_user(&CreateUser {
            username: username.to_string(),
            email: format!("{username}@example.com"),
            employee_no: None,
            password_hash,
            role: role.to_string(),
            manager_id: None,
        })
        .await
        .expect("user creation should succeed")
}

/// Log in through the API and return the response body. Asserts 200.
pub async fn login(app: &Router, login: &str, password: &str) -> Value {
    let body = serde_json::json!({ "login": login, "password": password });
    let response = post_json(app, "/api/v1/auth/login", body).await;
    assert_eq!(response.status(), StatusCode::OK, "login should succeed");
    body_json(response).await
}

/// The `accessToken` of a login or refresh response.
pub fn access_token(json: &Value) -> String {
    json["accessToken"]
        .as_str()
        .expect("response must carry accessToken")
        .to_string()
}

pub async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.expect("router is infallible")
}

pub async fn get(app: &Router, uri: &str) -> Response {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(app, request).await
}

pub async fn get_auth(app: &Router, uri: &str, token: &str) -> Response {
    let request = Request::builder()
        .uri(uri)
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn post_json(app: &Router, uri: &str, body: Value) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

pub async fn post_json_auth(app: &Router, uri: &str, token: &str, body: Value) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

pub async fn post_auth(app: &Router, uri: &str, token: &str) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn delete_auth(app: &Router, uri: &str, token: &str) -> Response {
    let request = Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).expect("body should be JSON")
}

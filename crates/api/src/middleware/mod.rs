//! Request pipeline middleware and authentication extractors.
//!
//! - [`client_ip`] -- Resolves the caller's address.
//! - [`ip_filter`] -- Rejects blocked addresses.
//! - [`rate_limit`] -- Fixed-window limits per policy and IP.
//! - [`payload_encryption`] -- JWE request/response bodies.
//! - [`session_validation`] -- Binds the access token to a live server session.
//! - [`screen_lock`] -- Holds back requests from screen-locked sessions.
//! - [`auth::AuthUser`] -- Extracts the authenticated user.
//! - [`rbac::RequireAdmin`] -- Requires the `admin` role.

pub mod auth;
pub mod client_ip;
pub mod ip_filter;
pub mod payload_encryption;
pub mod rate_limit;
pub mod rbac;
pub mod screen_lock;
pub mod session_validation;

use axum::http::header::ACCEPT;
use axum::http::HeaderMap;

/// API callers get JSON errors; browsers get redirects.
pub fn is_api_request(path: &str, headers: &HeaderMap) -> bool {
    path.starts_with("/api/")
        || headers
            .get(ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|accept| accept.contains("application/json"))
}

/// `true` when `path` is `prefix` itself or lies below it, matching whole
/// segments only: `/health` covers `/health/db` but not `/healthz`.
pub(crate) fn under_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.is_empty(),
        None => false,
    }
}

pub(crate) fn has_prefix(path: &str, prefixes: &[&str]) -> bool {
    prefixes.iter().any(|prefix| under_prefix(path, prefix))
}

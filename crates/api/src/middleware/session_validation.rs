//! Binds every authenticated request to a live server-side session.
//!
//! A request whose access token names a session that is gone, ended, expired
//! or owned by someone else is signed out: the `auth_token` cookie is cleared,
//! the session's refresh tokens are revoked, and the caller gets 401 (API) or
//! a redirect to the login page (browser). Requests without a usable token
//! pass through and are left to the extractors.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use ess_core::error::CoreError;
use ess_db::models::session::UserSession;
use tower_cookies::Cookies;

use super::client_ip::{resolve_client_ip, ClientIp};
use super::{has_prefix, is_api_request};
use crate::auth::jwt::validate_token;
use crate::auth::token_source::{clear_auth_cookie, extract_token};
use crate::error::AppError;
use crate::services::session::SessionCheck;
use crate::state::AppState;

/// Path prefixes that are never checked.
pub const SKIP_PATHS: &[&str] = &[
    "/api/v1/auth/login",
    "/api/v1/auth/refresh-token",
    "/health",
    "/static",
    "/favicon.ico",
    "/docs",
];

pub const LOGIN_PAGE: &str = "/login";

/// Revocation reason for tokens of a session rejected here.
const SESSION_INVALID: &str = "session_invalid";

/// The validated session, inserted into request extensions.
#[derive(Debug, Clone)]
pub struct ActiveSession(pub UserSession);

pub async fn validate_session(
    State(state): State<AppState>,
    cookies: Cookies,
    mut req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    if has_prefix(&path, SKIP_PATHS) {
        return next.run(req).await;
    }
    let Some((token, _)) = extract_token(req.headers()) else {
        return next.run(req).await;
    };
    let Ok(claims) = validate_token(&token, &state.config.jwt) else {
        return next.run(req).await;
    };

    match state.sessions.is_session_valid(claims.sid, claims.sub).await {
        Ok(SessionCheck::Valid(session)) => {
            req.extensions_mut().insert(ActiveSession(session));
            next.run(req).await
        }
        Ok(SessionCheck::Invalid(reason)) => {
            tracing::info!(
                user_id = claims.sub,
                session_id = %claims.sid,
                reason = reason.as_str(),
                "Rejecting request for invalid session"
            );
            clear_auth_cookie(&cookies);
            let ip = ClientIp(resolve_client_ip(
                req.headers(),
                req.extensions(),
                &state.config.trusted_proxies,
            ));
            if let Err(e) = state
                .tokens
                .revoke_for_session(claims.sid, SESSION_INVALID, ip.known())
                .await
            {
                tracing::warn!(error = %e, session_id = %claims.sid, "Failed to revoke refresh tokens");
            }

            if is_api_request(&path, req.headers()) {
                AppError::Core(CoreError::Unauthorized(
                    "Session is no longer valid".into(),
                ))
                .into_response()
            } else {
                Redirect::to(LOGIN_PAGE).into_response()
            }
        }
        Err(e) => AppError::Database(e).into_response(),
    }
}

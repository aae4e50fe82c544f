//! Holds back requests from sessions whose screen is locked.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};

use super::session_validation::ActiveSession;
use super::{has_prefix, is_api_request};
use crate::error::AppError;

/// Reachable while locked.
pub const UNLOCKED_PATHS: &[&str] = &[
    "/api/v1/screen-lock",
    "/api/v1/auth/logout",
    "/api/v1/auth/logout-all",
    "/health",
    "/static",
];

pub const LOCK_SCREEN_PAGE: &str = "/lock-screen";

pub async fn enforce_screen_lock(req: Request, next: Next) -> Response {
    let locked = req
        .extensions()
        .get::<ActiveSession>()
        .is_some_and(|ActiveSession(session)| session.is_locked());
    let path = req.uri().path();
    if !locked || has_prefix(path, UNLOCKED_PATHS) {
        return next.run(req).await;
    }

    if is_api_request(path, req.headers()) {
        AppError::Locked("Session is locked. Unlock the screen to continue.".into())
            .into_response()
    } else {
        Redirect::to(LOCK_SCREEN_PAGE).into_response()
    }
}

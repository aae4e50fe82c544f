//! Route definitions for the `/screen-lock` resource.

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;

use crate::handlers::screen_lock;
use crate::middleware::rate_limit::{self, RatePolicy};
use crate::state::AppState;

/// Routes mounted at `/screen-lock`.
///
/// ```text
/// POST /lock     -> lock
/// POST /unlock   -> unlock (AuthPolicy)
/// GET  /status   -> status
/// ```
pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/lock", post(screen_lock::lock))
        .route(
            "/unlock",
            post(screen_lock::unlock).route_layer(from_fn_with_state(
                (state.clone(), RatePolicy::Auth),
                rate_limit::limit,
            )),
        )
        .route("/status", get(screen_lock::status))
}

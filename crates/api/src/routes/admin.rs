//! Route definitions for the `/admin` resource.

use axum::routing::{delete, get, post};
use axum::Router;

use crate::handlers::admin;
use crate::state::AppState;

/// Routes mounted at `/admin`.
///
/// All routes require the `admin` role (enforced by handler extractors).
///
/// ```text
/// GET    /users                 -> list_users
/// POST   /users                 -> create_user
/// DELETE /users/{id}            -> delete_user
/// GET    /users/{id}/sessions   -> user_sessions
/// DELETE /users/{id}/sessions   -> end_user_sessions
/// GET    /ip/blocks             -> list_blocks
/// POST   /ip/blocks             -> block_ip
/// DELETE /ip/blocks/{ip}        -> unblock_ip
/// POST   /ip/whitelist          -> whitelist_ip
/// DELETE /ip/whitelist/{ip}     -> remove_whitelist
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users", get(admin::list_users).post(admin::create_user))
        .route("/users/{id}", delete(admin::delete_user))
        .route(
            "/users/{id}/sessions",
            get(admin::user_sessions).delete(admin::end_user_sessions),
        )
        .route("/ip/blocks", get(admin::list_blocks).post(admin::block_ip))
        .route("/ip/blocks/{ip}", delete(admin::unblock_ip))
        .route("/ip/whitelist", post(admin::whitelist_ip))
        .route("/ip/whitelist/{ip}", delete(admin::remove_whitelist))
}

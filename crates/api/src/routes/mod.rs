pub mod admin;
pub mod auth;
pub mod health;
pub mod screen_lock;
pub mod sessions;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /auth/login                          login (public, LoginPolicy)
/// /auth/refresh-token                  rotate refresh token (public, RefreshTokenPolicy)
/// /auth/logout                         end current session
/// /auth/logout-all                     end every session of the caller
/// /auth/me                             current user profile
/// /auth/change-password                change password (PasswordResetPolicy)
/// /auth/totp                           authenticator status
/// /auth/totp/enroll                    start enrollment
/// /auth/totp/confirm                   activate with a code (TwoFactorPolicy)
/// /auth/totp/disable                   turn off with a code (TwoFactorPolicy)
/// /auth/backup-codes                   remaining count, regenerate
/// /auth/backup-codes/verify            consume a code (TwoFactorPolicy)
///
/// /sessions                            caller's active sessions
/// /sessions/{id}                       end one of them
///
/// /screen-lock/lock                    lock current session
/// /screen-lock/unlock                  unlock with password (AuthPolicy)
/// /screen-lock/status                  lock state
///
/// /admin/users                         list, create (admin only)
/// /admin/users/{id}                    soft delete
/// /admin/users/{id}/sessions           list, end all
/// /admin/ip/blocks                     list, block
/// /admin/ip/blocks/{ip}                unblock
/// /admin/ip/whitelist                  add
/// /admin/ip/whitelist/{ip}             remove
/// ```
///
/// Route-level rate limits capture `state`; the global `ApiPolicy` limit is
/// applied in [`build_app_router`](crate::router::build_app_router).
pub fn api_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .nest("/auth", auth::router(state))
        .nest("/sessions", sessions::router())
        .nest("/screen-lock", screen_lock::router(state))
        .nest("/admin", admin::router())
}

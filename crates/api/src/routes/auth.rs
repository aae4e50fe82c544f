//! Route definitions for the `/auth` resource.

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{auth, two_factor};
use crate::middleware::rate_limit::{self, RatePolicy};
use crate::state::AppState;

/// Routes mounted at `/auth`.
///
/// ```text
/// POST /login                -> login (LoginPolicy)
/// POST /refresh-token        -> refresh_token (RefreshTokenPolicy)
/// POST /logout               -> logout
/// POST /logout-all           -> logout_all
/// GET  /me                   -> me
/// POST /change-password      -> change_password (PasswordResetPolicy)
/// GET  /totp                 -> two_factor::totp_status
/// POST /totp/enroll          -> two_factor::enroll
/// POST /totp/confirm         -> two_factor::confirm (TwoFactorPolicy)
/// POST /totp/disable         -> two_factor::disable (TwoFactorPolicy)
/// GET  /backup-codes         -> two_factor::status
/// POST /backup-codes         -> two_factor::regenerate
/// POST /backup-codes/verify  -> two_factor::verify (TwoFactorPolicy)
/// ```
pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/login",
            post(auth::login).route_layer(from_fn_with_state(
                (state.clone(), RatePolicy::Login),
                rate_limit::limit,
            )),
        )
        .route(
            "/refresh-token",
            post(auth::refresh_token).route_layer(from_fn_with_state(
                (state.clone(), RatePolicy::RefreshToken),
                rate_limit::limit,
            )),
        )
        .route("/logout", post(auth::logout))
        .route("/logout-all", post(auth::logout_all))
        .route("/me", get(auth::me))
        .route(
            "/change-password",
            post(auth::change_password).route_layer(from_fn_with_state(
                (state.clone(), RatePolicy::PasswordReset),
                rate_limit::limit,
            )),
        )
        .route("/totp", get(two_factor::totp_status))
        .route("/totp/enroll", post(two_factor::enroll))
        .route(
            "/totp/confirm",
            post(two_factor::confirm).route_layer(from_fn_with_state(
                (state.clone(), RatePolicy::TwoFactor),
                rate_limit::limit,
            )),
        )
        .route(
            "/totp/disable",
            post(two_factor::disable).route_layer(from_fn_with_state(
                (state.clone(), RatePolicy::TwoFactor),
                rate_limit::limit,
            )),
        )
        .route(
            "/backup-codes",
            get(two_factor::status).post(two_factor::regenerate),
        )
        .route(
            "/backup-codes/verify",
            post(two_factor::verify).route_layer(from_fn_with_state(
                (state.clone(), RatePolicy::TwoFactor),
                rate_limit::limit,
            )),
        )
}

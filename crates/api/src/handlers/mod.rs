//! Request handlers.
//!
//! Each submodule provides the async handler functions for one resource.
//! Handlers delegate to the services on [`AppState`](crate::state::AppState)
//! and map errors via [`AppError`](crate::error::AppError).

pub mod admin;
pub mod auth;
pub mod screen_lock;
pub mod sessions;
pub mod two_factor;

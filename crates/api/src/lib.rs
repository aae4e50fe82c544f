//! ESS auth gateway library.
//!
//! Exposes config, state, error handling, services, middleware and routes so
//! integration tests and the binary entrypoint build the same application.

pub mod auth;
pub mod background;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod router;
pub mod routes;
pub mod services;
pub mod state;

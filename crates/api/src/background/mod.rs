//! Jobs that run beside the HTTP server for the lifetime of the process.
//!
//! [`maintenance::run`] is spawned from `main` and stops when its
//! [`CancellationToken`] is cancelled during shutdown.
//!
//! [`CancellationToken`]: tokio_util::sync::CancellationToken

pub mod maintenance;

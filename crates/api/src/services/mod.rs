//! Domain services used by handlers and middleware.
//!
//! Each service holds only the store trait it needs, so tests can run them
//! over [`ess_db::store::MemoryStore`].

pub mod ip_security;
pub mod session;
pub mod token;
pub mod two_factor;

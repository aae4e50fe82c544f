//! Domain logic shared by the persistence and HTTP layers.
//!
//! Nothing in this crate performs I/O; every function is deterministic given
//! its inputs (plus the OS random source for key and token generation).

pub mod backup_codes;
pub mod brute_force;
pub mod error;
pub mod hashing;
pub mod payload_crypto;
pub mod roles;
pub mod session_policy;
pub mod totp;
pub mod types;

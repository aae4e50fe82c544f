//! Authentication primitives.
//!
//! - [`password`] -- Argon2id password hashing and verification.
//! - [`jwt`] -- JWT access-token generation and validation.
//! - [`token_source`] -- Locating the access token on a request (cookie or header).

pub mod jwt;
pub mod password;
pub mod token_source;

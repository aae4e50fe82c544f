//! Shared SHA-256 hex digest utility.
//!
//! Used for refresh-token hashes, backup-code hashes and device fingerprints.

use sha2::{Digest, Sha256};

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Fingerprint a client from its user agent and preferred languages.
///
/// The IP address is left out on purpose: mobile clients roam between
/// networks without becoming a different device.
pub fn device_fingerprint(user_agent: Option<&str>, accept_language: Option<&str>) -> String {
    let material = format!(
        "{}|{}",
        user_agent.unwrap_or_default(),
        accept_language.unwrap_or_default()
    );
    sha256_hex(material.as_bytes())
}

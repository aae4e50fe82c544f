//! Time-based one-time passwords (RFC 6238) for authenticator apps.
//!
//! Six-digit codes over 30-second steps, computed with HMAC-SHA-256. Secrets
//! are exchanged as unpadded RFC 4648 base32.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const TOTP_DIGITS: u32 = 6;
pub const TOTP_STEP_SECS: i64 = 30;

/// Steps either side of the current one that still verify (clock drift).
pub const TOTP_SKEW_STEPS: i64 = 1;

/// Minutes an unconfirmed enrollment secret stays usable.
pub const ENROLLMENT_TTL_MINS: i64 = 10;

const SECRET_BYTES: usize = 20;
const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// A fresh 160-bit secret, base32 encoded.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    base32_encode(&bytes)
}

pub fn base32_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(5) * 8);
    let mut buffer: u32 = 0;
    let mut bits = 0;
    for &byte in data {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(char::from(BASE32_ALPHABET[((buffer >> bits) & 0x1f) as usize]));
        }
    }
    if bits > 0 {
        out.push(char::from(
            BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize],
        ));
    }
    out
}

/// Case-insensitive; whitespace and `=` padding are ignored. `None` on any
/// character outside the alphabet.
pub fn base32_decode(input: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits = 0;
    for c in input.chars().filter(|c| !c.is_whitespace() && *c != '=') {
        let c = c.to_ascii_uppercase();
        let value = BASE32_ALPHABET.iter().position(|&a| char::from(a) == c)? as u32;
        buffer = (buffer << 5) | value;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
        }
    }
    Some(out)
}

/// Time step containing `unix_secs`.
pub fn step_at(unix_secs: i64) -> i64 {
    unix_secs.div_euclid(TOTP_STEP_SECS)
}

/// The code for one time step (RFC 4226 dynamic truncation).
pub fn code_at(key: &[u8], step: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(&(step as u64).to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = usize::from(digest[digest.len() - 1] & 0x0f);
    let binary = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);
    format!(
        "{:0width$}",
        binary % 10u32.pow(TOTP_DIGITS),
        width = TOTP_DIGITS as usize
    )
}

/// Check `code` against the steps around `unix_secs`.
///
/// Returns the matching step so the caller can refuse to accept it twice.
pub fn verify_code(key: &[u8], code: &str, unix_secs: i64) -> Option<i64> {
    let code: String = code.chars().filter(|c| !c.is_whitespace()).collect();
    if code.len() != TOTP_DIGITS as usize || !code.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let current = step_at(unix_secs);
    (current - TOTP_SKEW_STEPS..=current + TOTP_SKEW_STEPS)
        .find(|&step| constant_time_eq(code_at(key, step).as_bytes(), code.as_bytes()))
}

/// `otpauth://` URI for QR enrollment.
pub fn provisioning_uri(issuer: &str, account: &str, secret: &str) -> String {
    let issuer = percent_encode(issuer);
    format!(
        "otpauth://totp/{issuer}:{account}?secret={secret}&issuer={issuer}\
         &algorithm=SHA256&digits={TOTP_DIGITS}&period={TOTP_STEP_SECS}",
        account = percent_encode(account),
    )
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~' | b'@') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// RFC 6238 appendix B seed for HMAC-SHA-256.
    const RFC_SEED: &[u8] = b"12345678901234567890123456789012";

    #[test]
    fn matches_rfc_6238_sha256_vectors() {
        // Appendix B lists 8-digit codes; six digits are their last six.
        assert_eq!(code_at(RFC_SEED, step_at(59)), "119246");
        assert_eq!(code_at(RFC_SEED, step_at(1_111_111_109)), "084774");
        assert_eq!(code_at(RFC_SEED, step_at(1_234_567_890)), "819424");
        assert_eq!(code_at(RFC_SEED, step_at(20_000_000_000)), "737706");
    }

    #[test]
    fn base32_matches_rfc_4648_vectors() {
        assert_eq!(base32_encode(b"f"), "MY");
        assert_eq!(base32_encode(b"fo"), "MZXQ");
        assert_eq!(base32_encode(b"foo"), "MZXW6");
        assert_eq!(base32_encode(b"foobar"), "MZXW6YTBOI");
        assert_eq!(base32_decode("mzxw6ytboi======").unwrap(), b"foobar");
        assert_eq!(base32_decode("MZXW 6YTB OI").unwrap(), b"foobar");
        assert_eq!(base32_decode("MZXW1"), None);
    }

    #[test]
    fn generated_secret_decodes_to_160_bits() {
        let secret = generate_secret();
        assert_eq!(secret.len(), 32);
        assert_eq!(base32_decode(&secret).unwrap().len(), SECRET_BYTES);
        assert_ne!(secret, generate_secret());
    }

    #[test]
    fn verify_accepts_adjacent_steps_only() {
        let now = 1_700_000_000;
        let step = step_at(now);
        assert_eq!(verify_code(RFC_SEED, &code_at(RFC_SEED, step), now), Some(step));
        assert_eq!(
            verify_code(RFC_SEED, &code_at(RFC_SEED, step - 1), now),
            Some(step - 1)
        );
        assert_eq!(verify_code(RFC_SEED, &code_at(RFC_SEED, step + 3), now), None);
    }

    #[test]
    fn verify_rejects_malformed_codes() {
        let now = 1_700_000_000;
        assert_eq!(verify_code(RFC_SEED, "12345", now), None);
        assert_eq!(verify_code(RFC_SEED, "abcdef", now), None);
        assert_eq!(verify_code(RFC_SEED, "", now), None);
    }

    #[test]
    fn provisioning_uri_escapes_labels() {
        let uri = provisioning_uri("ESS Portal", "alice@example.com", "ABC");
        assert_eq!(
            uri,
            "otpauth://totp/ESS%20Portal:alice@example.com?secret=ABC&issuer=ESS%20Portal\
             &algorithm=SHA256&digits=6&period=30"
        );
    }
}

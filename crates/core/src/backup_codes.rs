//! One-time two-factor backup codes.
//!
//! Codes are shown to the user once as `XXXXX-XXXXX`; only the SHA-256 of the
//! normalised form is stored.

use rand::Rng;

use crate::hashing::sha256_hex;

/// Number of codes issued per generation.
pub const BACKUP_CODE_COUNT: usize = 10;

/// Days a generated set stays usable.
pub const BACKUP_CODE_VALIDITY_DAYS: i64 = 365;

/// Characters per half of a code.
const HALF_LEN: usize = 5;

/// Alphabet without look-alike characters (no 0/O, 1/I/L).
const ALPHABET: &[u8] = b"23456789ABCDEFGHJKMNPQRSTUVWXYZ";

/// Generate [`BACKUP_CODE_COUNT`] fresh codes.
pub fn generate_backup_codes() -> Vec<String> {
    let mut rng = rand::rng();
    (0..BACKUP_CODE_COUNT)
        .map(|_| {
            let mut code = String::with_capacity(HALF_LEN * 2 + 1);
            for i in 0..HALF_LEN * 2 {
                if i == HALF_LEN {
                    code.push('-');
                }
                let idx = rng.random_range(0..ALPHABET.len());
                code.push(char::from(ALPHABET[idx]));
            }
            code
        })
        .collect()
}

/// Uppercase and strip separators and whitespace, so `abcde fghjk` and
/// `ABCDE-FGHJK` hash the same.
pub fn normalize_backup_code(code: &str) -> String {
    code.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Hash a code for storage or lookup.
pub fn hash_backup_code(code: &str) -> String {
    sha256_hex(normalize_backup_code(code).as_bytes())
}

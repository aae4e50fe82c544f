//! JWE payload envelopes (`alg = A256KW`, `enc = A256GCM`).
//!
//! A fresh 256-bit content-encryption key (CEK) is generated per message,
//! wrapped with the shared key-encryption key (RFC 3394 AES key wrap) and used
//! for AES-256-GCM over the payload. The base64url protected header is the
//! additional authenticated data, as RFC 7516 requires.
//!
//! [`PayloadCipher::decrypt`] accepts three shapes:
//!
//! - compact serialization: `header.encrypted_key.iv.ciphertext.tag`
//!   (optionally wrapped in a JSON string literal);
//! - flattened JSON serialization (`protected`, `encrypted_key`, `iv`,
//!   `ciphertext`, `tag`, optional `aad`);
//! - standard or URL-safe base64 of the flattened JSON.
//!
//! [`PayloadCipher::encrypt`] always produces compact serialization.

use std::borrow::Cow;
use std::fmt;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use aes_kw::KekAes256;
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Length of the shared key-encryption key in bytes.
pub const KEY_LEN: usize = 32;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;
/// AES key wrap adds one 64-bit integrity block.
const WRAPPED_KEY_LEN: usize = KEY_LEN + 8;

const ALG_A256KW: &str = "A256KW";
const ENC_A256GCM: &str = "A256GCM";

/// Members whose joint presence marks a JSON document as a JWE.
const JSON_JWE_MARKERS: [&str; 3] = ["ciphertext", "protected", "encrypted_key"];

#[derive(Debug, thiserror::Error)]
pub enum PayloadCryptoError {
    #[error("Encryption key must be {KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("Encryption key is not valid base64")]
    InvalidKeyEncoding,

    #[error("Payload is empty")]
    Empty,

    #[error("Malformed JWE: {0}")]
    Malformed(&'static str),

    #[error("Unsupported JWE algorithms: alg={alg}, enc={enc}")]
    UnsupportedAlgorithm { alg: String, enc: String },

    #[error("Content key unwrap failed")]
    KeyUnwrap,

    #[error("Encryption failed")]
    Encrypt,

    #[error("Decryption failed")]
    Decrypt,

    #[error("Decrypted payload is not valid UTF-8")]
    NotUtf8,
}

pub type PayloadCryptoResult<T> = Result<T, PayloadCryptoError>;

#[derive(Debug, Serialize, Deserialize)]
struct ProtectedHeader {
    alg: String,
    enc: String,
}

#[derive(Debug, Deserialize)]
struct FlattenedJwe {
    protected: String,
    encrypted_key: String,
    iv: String,
    ciphertext: String,
    tag: String,
    #[serde(default)]
    aad: Option<String>,
}

/// Decoded JWE members, independent of the serialization they came from.
struct JweParts {
    protected_b64: String,
    aad_b64: Option<String>,
    encrypted_key: Vec<u8>,
    iv: Vec<u8>,
    ciphertext: Vec<u8>,
    tag: Vec<u8>,
}

/// Symmetric JWE encrypter/decrypter bound to one key-encryption key.
#[derive(Clone)]
pub struct PayloadCipher {
    kek: [u8; KEY_LEN],
}

impl fmt::Debug for PayloadCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadCipher").finish_non_exhaustive()
    }
}

impl PayloadCipher {
    pub fn new(kek: [u8; KEY_LEN]) -> Self {
        Self { kek }
    }

    /// Build from raw key bytes, which must be exactly [`KEY_LEN`] long.
    pub fn from_slice(key: &[u8]) -> PayloadCryptoResult<Self> {
        let kek: [u8; KEY_LEN] = key
            .try_into()
            .map_err(|_| PayloadCryptoError::InvalidKeyLength(key.len()))?;
        Ok(Self::new(kek))
    }

    /// Build from a base64 (standard or URL-safe) encoded key.
    pub fn from_base64(encoded: &str) -> PayloadCryptoResult<Self> {
        let encoded = encoded.trim();
        let bytes = STANDARD
            .decode(encoded)
            .or_else(|_| URL_SAFE.decode(encoded))
            .or_else(|_| URL_SAFE_NO_PAD.decode(encoded))
            .map_err(|_| PayloadCryptoError::InvalidKeyEncoding)?;
        Self::from_slice(&bytes)
    }

    /// Generate a random key-encryption key.
    pub fn generate_key() -> [u8; KEY_LEN] {
        let mut key = [0u8; KEY_LEN];
        rand::rng().fill_bytes(&mut key);
        key
    }

    /// Encrypt `plaintext` into a compact JWE.
    pub fn encrypt(&self, plaintext: &str) -> PayloadCryptoResult<String> {
        if plaintext.is_empty() {
            return Err(PayloadCryptoError::Empty);
        }

        let header = ProtectedHeader {
            alg: ALG_A256KW.to_string(),
            enc: ENC_A256GCM.to_string(),
        };
        let header_json =
            serde_json::to_vec(&header).map_err(|_| PayloadCryptoError::Encrypt)?;
        let protected_b64 = URL_SAFE_NO_PAD.encode(header_json);

        let mut rng = rand::rng();
        let mut cek = [0u8; KEY_LEN];
        rng.fill_bytes(&mut cek);
        let mut iv = [0u8; IV_LEN];
        rng.fill_bytes(&mut iv);

        let mut wrapped = [0u8; WRAPPED_KEY_LEN];
        KekAes256::from(self.kek)
            .wrap(&cek, &mut wrapped)
            .map_err(|_| PayloadCryptoError::Encrypt)?;

        let cipher = Aes256Gcm::new_from_slice(&cek).map_err(|_| PayloadCryptoError::Encrypt)?;
        let mut sealed = cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: protected_b64.as_bytes(),
                },
            )
            .map_err(|_| PayloadCryptoError::Encrypt)?;
        let tag = sealed.split_off(sealed.len() - TAG_LEN);

        Ok(format!(
            "{}.{}.{}.{}.{}",
            protected_b64,
            URL_SAFE_NO_PAD.encode(wrapped),
            URL_SAFE_NO_PAD.encode(iv),
            URL_SAFE_NO_PAD.encode(&sealed),
            URL_SAFE_NO_PAD.encode(&tag),
        ))
    }

    /// Decrypt any supported JWE shape back into the UTF-8 plaintext.
    pub fn decrypt(&self, payload: &str) -> PayloadCryptoResult<String> {
        let parts = parse_jwe(payload)?;

        let header_json = URL_SAFE_NO_PAD
            .decode(&parts.protected_b64)
            .map_err(|_| PayloadCryptoError::Malformed("protected header is not base64url"))?;
        let header: ProtectedHeader = serde_json::from_slice(&header_json)
            .map_err(|_| PayloadCryptoError::Malformed("protected header is not JSON"))?;
        if header.alg != ALG_A256KW || header.enc != ENC_A256GCM {
            return Err(PayloadCryptoError::UnsupportedAlgorithm {
                alg: header.alg,
                enc: header.enc,
            });
        }

        if parts.encrypted_key.len() != WRAPPED_KEY_LEN {
            return Err(PayloadCryptoError::Malformed("encrypted key has wrong length"));
        }
        if parts.iv.len() != IV_LEN {
            return Err(PayloadCryptoError::Malformed("iv has wrong length"));
        }
        if parts.tag.len() != TAG_LEN {
            return Err(PayloadCryptoError::Malformed("tag has wrong length"));
        }

        let mut cek = [0u8; KEY_LEN];
        KekAes256::from(self.kek)
            .unwrap(&parts.encrypted_key, &mut cek)
            .map_err(|_| PayloadCryptoError::KeyUnwrap)?;

        let aad = match &parts.aad_b64 {
            Some(extra) => format!("{}.{}", parts.protected_b64, extra),
            None => parts.protected_b64.clone(),
        };

        let mut sealed = parts.ciphertext;
        sealed.extend_from_slice(&parts.tag);

        let cipher = Aes256Gcm::new_from_slice(&cek).map_err(|_| PayloadCryptoError::Decrypt)?;
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&parts.iv),
                Payload {
                    msg: &sealed,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| PayloadCryptoError::Decrypt)?;

        String::from_utf8(plaintext).map_err(|_| PayloadCryptoError::NotUtf8)
    }
}

/// Heuristic check for a JWE payload.
///
/// True for compact serialization (`eyJ` prefix, exactly five segments) and
/// for JSON documents, raw or base64-encoded, carrying `ciphertext`,
/// `protected` and `encrypted_key`. False for everything else, including
/// plain JSON and blank input.
pub fn is_encrypted(payload: &str) -> bool {
    let candidate = unquote(payload.trim());
    let candidate = candidate.trim();
    if candidate.is_empty() {
        return false;
    }
    if looks_compact(candidate) {
        return true;
    }
    json_jwe_document(candidate)
        .and_then(|doc| serde_json::from_slice::<serde_json::Value>(&doc).ok())
        .and_then(|value| {
            value
                .as_object()
                .map(|obj| JSON_JWE_MARKERS.iter().all(|key| obj.contains_key(*key)))
        })
        .unwrap_or(false)
}

fn looks_compact(s: &str) -> bool {
    s.starts_with("eyJ") && s.split('.').count() == 5
}

/// Strip one level of JSON string quoting, e.g. `"\"eyJ...\""`.
fn unquote(s: &str) -> Cow<'_, str> {
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        if let Ok(inner) = serde_json::from_str::<String>(s) {
            return Cow::Owned(inner);
        }
    }
    Cow::Borrowed(s)
}

/// Raw JSON bytes of a JSON-shaped JWE, decoding base64 when needed.
fn json_jwe_document(s: &str) -> Option<Vec<u8>> {
    if s.starts_with('{') {
        return Some(s.as_bytes().to_vec());
    }
    let decoded = STANDARD
        .decode(s)
        .or_else(|_| URL_SAFE.decode(s))
        .or_else(|_| URL_SAFE_NO_PAD.decode(s))
        .ok()?;
    decoded.first().filter(|b| **b == b'{')?;
    Some(decoded)
}

fn decode_segment(segment: &str, what: &'static str) -> PayloadCryptoResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|_| PayloadCryptoError::Malformed(what))
}

fn parse_jwe(payload: &str) -> PayloadCryptoResult<JweParts> {
    let candidate = unquote(payload.trim());
    let candidate = candidate.trim();
    if candidate.is_empty() {
        return Err(PayloadCryptoError::Empty);
    }

    if looks_compact(candidate) {
        let segments: Vec<&str> = candidate.split('.').collect();
        return Ok(JweParts {
            protected_b64: segments[0].to_string(),
            aad_b64: None,
            encrypted_key: decode_segment(segments[1], "encrypted key is not base64url")?,
            iv: decode_segment(segments[2], "iv is not base64url")?,
            ciphertext: decode_segment(segments[3], "ciphertext is not base64url")?,
            tag: decode_segment(segments[4], "tag is not base64url")?,
        });
    }

    let document = json_jwe_document(candidate)
        .ok_or(PayloadCryptoError::Malformed("unrecognised serialization"))?;
    let flat: FlattenedJwe = serde_json::from_slice(&document)
        .map_err(|_| PayloadCryptoError::Malformed("JSON serialization is missing members"))?;

    Ok(JweParts {
        encrypted_key: decode_segment(&flat.encrypted_key, "encrypted key is not base64url")?,
        iv: decode_segment(&flat.iv, "iv is not base64url")?,
        ciphertext: decode_segment(&flat.ciphertext, "ciphertext is not base64url")?,
        tag: decode_segment(&flat.tag, "tag is not base64url")?,
        protected_b64: flat.protected,
        aad_b64: flat.aad,
    })
}

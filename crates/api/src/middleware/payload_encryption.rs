//! Transparent JWE payload encryption.
//!
//! Encrypted request bodies are decrypted before the handler sees them, and
//! successful JSON responses are sent back as compact JWE. Disabled when no
//! key is configured; excluded path prefixes pass through untouched.

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use ess_core::payload_crypto::{is_encrypted, PayloadCipher};

use super::under_prefix;
use crate::error::AppError;
use crate::state::AppState;

/// Media type of an encrypted response body.
pub const APPLICATION_JOSE: &str = "application/jose";

/// Largest request body the middleware will buffer.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

fn is_excluded(path: &str, excluded: &[String]) -> bool {
    excluded.iter().any(|prefix| under_prefix(path, prefix))
}

fn is_json(content_type: Option<&HeaderValue>) -> bool {
    content_type
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"))
}

pub async fn payload_encryption(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(cipher) = state.cipher.clone() else {
        return next.run(req).await;
    };
    if is_excluded(req.uri().path(), &state.config.encryption.excluded_paths) {
        return next.run(req).await;
    }

    let req = match decrypt_request(&cipher, req).await {
        Ok(req) => req,
        Err(e) => return e.into_response(),
    };
    let response = next.run(req).await;
    encrypt_response(&cipher, response).await
}

async fn decrypt_request(cipher: &PayloadCipher, req: Request) -> Result<Request, AppError> {
    let (mut parts, body) = req.into_parts();
    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read request body: {e}")))?;

    let text = std::str::from_utf8(&bytes).unwrap_or_default();
    if bytes.is_empty() || !is_encrypted(text) {
        return Ok(Request::from_parts(parts, Body::from(bytes)));
    }

    let plaintext = cipher.decrypt(text).map_err(|e| {
        tracing::warn!(error = %e, path = %parts.uri.path(), "Payload decryption failed");
        AppError::BadRequest("Encrypted payload could not be decrypted".into())
    })?;

    parts
        .headers
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    parts.headers.remove(CONTENT_LENGTH);
    Ok(Request::from_parts(parts, Body::from(plaintext)))
}

async fn encrypt_response(cipher: &PayloadCipher, response: Response) -> Response {
    if !response.status().is_success() || !is_json(response.headers().get(CONTENT_TYPE)) {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return AppError::InternalError(format!("Failed to buffer response body: {e}"))
                .into_response()
        }
    };

    let encrypted = std::str::from_utf8(&bytes)
        .map_err(|e| e.to_string())
        .and_then(|text| cipher.encrypt(text).map_err(|e| e.to_string()));
    match encrypted {
        Ok(jwe) => {
            parts
                .headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JOSE));
            parts.headers.remove(CONTENT_LENGTH);
            Response::from_parts(parts, Body::from(jwe))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Response encryption failed, sending plaintext");
            Response::from_parts(parts, Body::from(bytes))
        }
    }
}

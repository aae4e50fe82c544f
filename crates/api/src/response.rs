//! Shared response envelope types for API handlers.
//!
//! Collection and resource responses use a `{ "data": ... }` envelope. The
//! auth token responses are the exception and are returned bare.

use serde::Serialize;

/// Standard `{ "data": T }` response envelope.
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

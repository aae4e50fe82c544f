//! Rejects requests from blocked IP addresses.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use ess_core::brute_force::IpEventType;
use ess_core::error::CoreError;

use super::client_ip::{resolve_client_ip, UNKNOWN_IP};
use crate::error::AppError;
use crate::services::ip_security::IpCheck;
use crate::state::AppState;

pub async fn ip_filter(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let ip = resolve_client_ip(req.headers(), req.extensions(), &state.config.trusted_proxies);
    if ip == UNKNOWN_IP {
        return next.run(req).await;
    }

    match state.ip_security.check(&ip).await {
        Ok(IpCheck::Allowed) => next.run(req).await,
        Ok(IpCheck::Blocked(block)) => {
            tracing::info!(ip = %ip, reason = %block.reason, "Request from blocked IP rejected");
            let detail = Some(req.uri().path().to_string());
            if let Err(e) = state
                .ip_security
                .record_event(&ip, IpEventType::BlockedRequest, None, detail)
                .await
            {
                tracing::warn!(error = %e, "Failed to record blocked request");
            }
            AppError::Core(CoreError::Forbidden(
                "Access from this IP address is blocked".into(),
            ))
            .into_response()
        }
        Err(e) => AppError::Database(e).into_response(),
    }
}

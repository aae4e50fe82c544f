//! Client address resolution.
//!
//! The socket address from [`ConnectInfo`] is the client unless it is one of
//! the configured trusted proxies. Only then are `X-Forwarded-For` (walked
//! from the right, skipping further trusted proxies) and `X-Real-IP`
//! consulted. Addresses are canonicalised, so `::ffff:192.0.2.1` and
//! `192.0.2.1:443` both key as `192.0.2.1`. Requests without a socket address
//! are keyed as `"unknown"`.

use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::{Extensions, HeaderMap};

use crate::state::AppState;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

pub const UNKNOWN_IP: &str = "unknown";

pub fn resolve_client_ip(
    headers: &HeaderMap,
    extensions: &Extensions,
    trusted_proxies: &[IpAddr],
) -> String {
    let Some(peer) = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_canonical())
    else {
        return UNKNOWN_IP.to_string();
    };
    if !trusted_proxies.contains(&peer) {
        return peer.to_string();
    }

    forwarded_client(headers, trusted_proxies)
        .or_else(|| real_ip(headers))
        .unwrap_or(peer)
        .to_string()
}

/// Accepts a bare address or `address:port`.
pub fn parse_ip(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim();
    raw.parse::<IpAddr>()
        .or_else(|_| raw.parse::<SocketAddr>().map(|addr| addr.ip()))
        .ok()
        .map(|ip| ip.to_canonical())
}

/// Rightmost hop that is not a trusted proxy. `None` when the header is
/// missing, holds a malformed hop, or lists only trusted proxies.
fn forwarded_client(headers: &HeaderMap, trusted_proxies: &[IpAddr]) -> Option<IpAddr> {
    let values: Vec<&str> = headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .map(|v| v.to_str().ok())
        .collect::<Option<_>>()?;

    for hop in values.iter().rev().flat_map(|v| v.rsplit(',')) {
        let ip = parse_ip(hop)?;
        if !trusted_proxies.contains(&ip) {
            return Some(ip);
        }
    }
    None
}

fn real_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get(X_REAL_IP)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_ip)
}

/// The caller's IP address as a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl ClientIp {
    /// `None` when the address could not be determined.
    pub fn known(&self) -> Option<&str> {
        (self.0 != UNKNOWN_IP).then_some(self.0.as_str())
    }
}

impl FromRequestParts<AppState> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(ClientIp(resolve_client_ip(
            &parts.headers,
            &parts.extensions,
            &state.config.trusted_proxies,
        )))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    const PROXY: [u8; 4] = [10, 0, 0, 1];

    fn peer(ip: [u8; 4]) -> Extensions {
        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo(SocketAddr::from((ip, 5000))));
        extensions
    }

    fn trusted() -> Vec<IpAddr> {
        vec![IpAddr::from(PROXY)]
    }

    fn forwarded(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn untrusted_peer_cannot_spoof_forwarded_headers() {
        let mut headers = forwarded("192.0.2.50");
        headers.insert(X_REAL_IP, HeaderValue::from_static("192.0.2.51"));

        let ip = resolve_client_ip(&headers, &peer([198, 51, 100, 9]), &trusted());
        assert_eq!(ip, "198.51.100.9");
    }

    #[test]
    fn headers_ignored_without_trusted_proxies() {
        let ip = resolve_client_ip(&forwarded("192.0.2.50"), &peer(PROXY), &[]);
        assert_eq!(ip, "10.0.0.1");
    }

    #[test]
    fn trusted_proxy_forwards_rightmost_untrusted_hop() {
        let mut trusted = trusted();
        trusted.push(IpAddr::from([10, 0, 0, 2]));
        // The left entry is whatever the client claimed.
        let headers = forwarded("1.1.1.1, 203.0.113.5, 10.0.0.2");

        let ip = resolve_client_ip(&headers, &peer(PROXY), &trusted);
        assert_eq!(ip, "203.0.113.5");
    }

    #[test]
    fn trusted_proxy_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert(X_REAL_IP, HeaderValue::from_static("198.51.100.7"));

        assert_eq!(
            resolve_client_ip(&headers, &peer(PROXY), &trusted()),
            "198.51.100.7"
        );
    }

    #[test]
    fn malformed_forwarded_hop_falls_back_to_peer() {
        let ip = resolve_client_ip(&forwarded("not-an-ip"), &peer(PROXY), &trusted());
        assert_eq!(ip, "10.0.0.1");
    }

    #[test]
    fn addresses_are_canonicalised() {
        assert_eq!(parse_ip(" 192.0.2.1:443 "), Some(IpAddr::from([192, 0, 2, 1])));
        assert_eq!(parse_ip("::ffff:192.0.2.1"), Some(IpAddr::from([192, 0, 2, 1])));
        assert_eq!(
            parse_ip("[2001:db8::1]:8080").map(|ip| ip.to_string()),
            Some("2001:db8::1".to_string())
        );
        assert_eq!(parse_ip("192.0.2"), None);

        let ip = resolve_client_ip(
            &forwarded("::ffff:203.0.113.5"),
            &peer(PROXY),
            &trusted(),
        );
        assert_eq!(ip, "203.0.113.5");
    }

    #[test]
    fn unknown_without_socket_address() {
        let ip = ClientIp(resolve_client_ip(
            &forwarded("192.0.2.50"),
            &Extensions::new(),
            &trusted(),
        ));
        assert_eq!(ip.0, UNKNOWN_IP);
        assert_eq!(ip.known(), None);
    }
}

//! Locating the access token on an incoming request.
//!
//! Browser clients carry the token in the HttpOnly `auth_token` cookie; API
//! clients send `Authorization: Bearer <token>`. The cookie wins when both are
//! present.

use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::HeaderMap;
use tower_cookies::cookie::time::Duration as CookieDuration;
use tower_cookies::cookie::SameSite;
use tower_cookies::{Cookie, Cookies};

/// Name of the cookie holding the access token.
pub const AUTH_COOKIE: &str = "auth_token";

/// Where a token was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenOrigin {
    Cookie,
    BearerHeader,
}

/// Extract the access token from the `auth_token` cookie, falling back to the
/// `Authorization: Bearer` header.
pub fn extract_token(headers: &HeaderMap) -> Option<(String, TokenOrigin)> {
    cookie_token(headers)
        .map(|t| (t, TokenOrigin::Cookie))
        .or_else(|| bearer_token(headers).map(|t| (t, TokenOrigin::BearerHeader)))
}

fn cookie_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| Cookie::split_parse(raw.to_string()))
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == AUTH_COOKIE && !cookie.value().is_empty())
        .map(|cookie| cookie.value().to_string())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Set the `auth_token` cookie (HttpOnly, SameSite=Strict).
pub fn set_auth_cookie(cookies: &Cookies, token: &str, max_age_secs: i64, secure: bool) {
    let cookie = Cookie::build((AUTH_COOKIE, token.to_string()))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .max_age(CookieDuration::seconds(max_age_secs))
        .build();
    cookies.add(cookie);
}

/// Expire the `auth_token` cookie on the client.
pub fn clear_auth_cookie(cookies: &Cookies) {
    let cookie = Cookie::build((AUTH_COOKIE, ""))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .max_age(CookieDuration::ZERO)
        .build();
    cookies.add(cookie);
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(pairs: &[(axum::http::HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn cookie_takes_precedence_over_header() {
        let map = headers(&[
            (COOKIE, "theme=dark; auth_token=from-cookie"),
            (AUTHORIZATION, "Bearer from-header"),
        ]);
        assert_eq!(
            extract_token(&map),
            Some(("from-cookie".to_string(), TokenOrigin::Cookie))
        );
    }

    #[test]
    fn header_used_when_cookie_missing() {
        let map = headers(&[(COOKIE, "theme=dark"), (AUTHORIZATION, "Bearer abc.def.ghi")]);
        assert_eq!(
            extract_token(&map),
            Some(("abc.def.ghi".to_string(), TokenOrigin::BearerHeader))
        );
    }

    #[test]
    fn empty_cookie_falls_back_to_header() {
        let map = headers(&[(COOKIE, "auth_token="), (AUTHORIZATION, "Bearer tok")]);
        assert_eq!(
            extract_token(&map),
            Some(("tok".to_string(), TokenOrigin::BearerHeader))
        );
    }

    #[test]
    fn non_bearer_scheme_is_ignored() {
        let map = headers(&[(AUTHORIZATION, "Basic dXNlcjpwYXNz")]);
        assert_eq!(extract_token(&map), None);
    }

    #[test]
    fn cookie_found_in_second_cookie_header() {
        let map = headers(&[(COOKIE, "a=1"), (COOKIE, "auth_token=second")]);
        assert_eq!(
            extract_token(&map),
            Some(("second".to_string(), TokenOrigin::Cookie))
        );
    }
}

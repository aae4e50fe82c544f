use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use ess_core::brute_force::BruteForcePolicy;
use ess_core::payload_crypto::PayloadCipher;
use ess_core::session_policy::{SessionLimitPolicy, SessionTimeouts};

use crate::auth::jwt::JwtConfig;

/// Read `key` from the environment, falling back to `default`.
///
/// # Panics
///
/// Panics if the variable is set but does not parse as `T`, so that
/// misconfiguration fails at startup.
fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|e| panic!("{key} has an invalid value '{raw}': {e}")),
        Err(_) => default,
    }
}

fn env_list(key: &str, default: &str) -> Vec<String> {
    std::env::var(key)
        .unwrap_or_else(|_| default.into())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse a comma-separated list of addresses.
///
/// # Panics
///
/// Panics on an entry that is not an IP address.
fn env_ip_list(key: &str) -> Vec<IpAddr> {
    env_list(key, "")
        .into_iter()
        .map(|raw| {
            raw.parse::<IpAddr>()
                .map(|ip| ip.to_canonical())
                .unwrap_or_else(|e| panic!("{key} has an invalid address '{raw}': {e}"))
        })
        .collect()
}

/// Server configuration loaded from environment variables.
///
/// All fields except the JWT secret have defaults suitable for local
/// development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Time allowed for background tasks to stop after shutdown starts (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Interval of the maintenance sweep in seconds (default: `300`).
    pub maintenance_interval_secs: u64,
    /// Whether the `auth_token` cookie carries the `Secure` attribute (default: `true`).
    pub cookie_secure: bool,
    /// Reverse proxies whose `X-Forwarded-For` / `X-Real-IP` headers are
    /// honoured (default: none, so only the socket address counts).
    pub trusted_proxies: Vec<IpAddr>,
    pub jwt: JwtConfig,
    pub session: SessionConfig,
    pub encryption: EncryptionConfig,
    pub ip_security: IpSecurityConfig,
    pub rate_limits: RateLimitConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                 |
    /// |-----------------------------|-------------------------|
    /// | `HOST`                      | `0.0.0.0`               |
    /// | `PORT`                      | `3000`                  |
    /// | `CORS_ORIGINS`              | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`      | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS`     | `30`                    |
    /// | `MAINTENANCE_INTERVAL_SECS` | `300`                   |
    /// | `COOKIE_SECURE`             | `true`                  |
    /// | `TRUSTED_PROXIES`           | (empty)                 |
    pub fn from_env() -> Self {
        Self {
            host: env_or("HOST", "0.0.0.0".to_string()),
            port: env_or("PORT", 3000),
            cors_origins: env_list("CORS_ORIGINS", "http://localhost:5173"),
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", 30),
            shutdown_timeout_secs: env_or("SHUTDOWN_TIMEOUT_SECS", 30),
            maintenance_interval_secs: env_or("MAINTENANCE_INTERVAL_SECS", 300),
            cookie_secure: env_or("COOKIE_SECURE", true),
            trusted_proxies: env_ip_list("TRUSTED_PROXIES"),
            jwt: JwtConfig::from_env(),
            session: SessionConfig::from_env(),
            encryption: EncryptionConfig::from_env(),
            ip_security: IpSecurityConfig::from_env(),
            rate_limits: RateLimitConfig::from_env(),
        }
    }
}

/// Concurrent-session and expiry settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Active sessions allowed per user (at least 1).
    pub max_concurrent: usize,
    pub limit_policy: SessionLimitPolicy,
    pub idle_timeout_mins: i64,
    pub absolute_timeout_hours: i64,
    pub sliding_expiration: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            limit_policy: SessionLimitPolicy::EvictOldest,
            idle_timeout_mins: 30,
            absolute_timeout_hours: 12,
            sliding_expiration: true,
        }
    }
}

impl SessionConfig {
    /// | Env Var                          | Default        |
    /// |----------------------------------|----------------|
    /// | `SESSION_MAX_CONCURRENT`         | `3`            |
    /// | `SESSION_LIMIT_POLICY`           | `evict_oldest` |
    /// | `SESSION_IDLE_TIMEOUT_MINS`      | `30`           |
    /// | `SESSION_ABSOLUTE_TIMEOUT_HOURS` | `12`           |
    /// | `SESSION_SLIDING_EXPIRATION`     | `true`         |
    ///
    /// # Panics
    ///
    /// Panics if any value is malformed or a limit/timeout is not positive.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let config = Self {
            max_concurrent: env_or("SESSION_MAX_CONCURRENT", defaults.max_concurrent),
            limit_policy: env_or("SESSION_LIMIT_POLICY", defaults.limit_policy),
            idle_timeout_mins: env_or("SESSION_IDLE_TIMEOUT_MINS", defaults.idle_timeout_mins),
            absolute_timeout_hours: env_or(
                "SESSION_ABSOLUTE_TIMEOUT_HOURS",
                defaults.absolute_timeout_hours,
            ),
            sliding_expiration: env_or(
                "SESSION_SLIDING_EXPIRATION",
                defaults.sliding_expiration,
            ),
        };
        assert!(config.max_concurrent >= 1, "SESSION_MAX_CONCURRENT must be at least 1");
        assert!(config.idle_timeout_mins > 0, "SESSION_IDLE_TIMEOUT_MINS must be positive");
        assert!(
            config.absolute_timeout_hours > 0,
            "SESSION_ABSOLUTE_TIMEOUT_HOURS must be positive"
        );
        config
    }

    pub fn timeouts(&self) -> SessionTimeouts {
        SessionTimeouts {
            idle: chrono::Duration::minutes(self.idle_timeout_mins),
            absolute: chrono::Duration::hours(self.absolute_timeout_hours),
            sliding: self.sliding_expiration,
        }
    }
}

/// Paths the payload encryption middleware leaves untouched by default.
pub const DEFAULT_ENCRYPTION_EXCLUDED_PATHS: &str = "/health,/docs,/api/v1/auth/login";

/// Request/response payload encryption settings.
#[derive(Debug, Clone)]
pub struct EncryptionConfig {
    /// `None` disables the middleware.
    pub cipher: Option<PayloadCipher>,
    /// Path prefixes that are never decrypted or encrypted.
    pub excluded_paths: Vec<String>,
}

impl EncryptionConfig {
    /// | Env Var                             | Default                            |
    /// |-------------------------------------|------------------------------------|
    /// | `PAYLOAD_ENCRYPTION_KEY`            | unset (disabled); base64, 32 bytes |
    /// | `PAYLOAD_ENCRYPTION_EXCLUDED_PATHS` | `/health,/docs,/api/v1/auth/login` |
    ///
    /// # Panics
    ///
    /// Panics if the key is set but is not 32 bytes of valid base64.
    pub fn from_env() -> Self {
        let cipher = std::env::var("PAYLOAD_ENCRYPTION_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(|k| {
                PayloadCipher::from_base64(&k)
                    .unwrap_or_else(|e| panic!("PAYLOAD_ENCRYPTION_KEY is invalid: {e}"))
            });
        Self {
            cipher,
            excluded_paths: env_list(
                "PAYLOAD_ENCRYPTION_EXCLUDED_PATHS",
                DEFAULT_ENCRYPTION_EXCLUDED_PATHS,
            ),
        }
    }

    pub fn disabled() -> Self {
        Self {
            cipher: None,
            excluded_paths: DEFAULT_ENCRYPTION_EXCLUDED_PATHS
                .split(',')
                .map(str::to_string)
                .collect(),
        }
    }
}

/// Brute-force detection and IP event retention.
#[derive(Debug, Clone)]
pub struct IpSecurityConfig {
    pub brute_force_threshold: u32,
    pub brute_force_window_mins: i64,
    pub block_duration_mins: i64,
    pub event_retention_days: i64,
}

impl Default for IpSecurityConfig {
    fn default() -> Self {
        Self {
            brute_force_threshold: 3,
            brute_force_window_mins: 15,
            block_duration_mins: 60,
            event_retention_days: 90,
        }
    }
}

impl IpSecurityConfig {
    /// | Env Var                      | Default |
    /// |------------------------------|---------|
    /// | `IP_BRUTE_FORCE_THRESHOLD`   | `3`     |
    /// | `IP_BRUTE_FORCE_WINDOW_MINS` | `15`    |
    /// | `IP_BLOCK_DURATION_MINS`     | `60`    |
    /// | `IP_EVENT_RETENTION_DAYS`    | `90`    |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            brute_force_threshold: env_or(
                "IP_BRUTE_FORCE_THRESHOLD",
                defaults.brute_force_threshold,
            ),
            brute_force_window_mins: env_or(
                "IP_BRUTE_FORCE_WINDOW_MINS",
                defaults.brute_force_window_mins,
            ),
            block_duration_mins: env_or("IP_BLOCK_DURATION_MINS", defaults.block_duration_mins),
            event_retention_days: env_or(
                "IP_EVENT_RETENTION_DAYS",
                defaults.event_retention_days,
            ),
        }
    }

    pub fn policy(&self) -> BruteForcePolicy {
        BruteForcePolicy {
            threshold: self.brute_force_threshold,
            window: chrono::Duration::minutes(self.brute_force_window_mins),
            block_duration: chrono::Duration::minutes(self.block_duration_mins),
        }
    }
}

/// One fixed-window limit: `permits` per `window`, with up to `queue`
/// requests waiting for the next window before rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub permits: u32,
    pub window: Duration,
    pub queue: u32,
}

impl RateLimitRule {
    pub const fn new(permits: u32, window_secs: u64, queue: u32) -> Self {
        Self {
            permits,
            window: Duration::from_secs(window_secs),
            queue,
        }
    }

    /// Reads `RATE_LIMIT_<NAME>_PERMITS`, `_WINDOW_SECS` and `_QUEUE`.
    fn from_env(name: &str, default: Self) -> Self {
        Self {
            permits: env_or(&format!("RATE_LIMIT_{name}_PERMITS"), default.permits),
            window: Duration::from_secs(env_or(
                &format!("RATE_LIMIT_{name}_WINDOW_SECS"),
                default.window.as_secs(),
            )),
            queue: env_or(&format!("RATE_LIMIT_{name}_QUEUE"), default.queue),
        }
    }
}

/// Per-policy rate limits, all partitioned by client IP.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub login: RateLimitRule,
    pub auth: RateLimitRule,
    pub api: RateLimitRule,
    pub password_reset: RateLimitRule,
    pub two_factor: RateLimitRule,
    pub file_upload: RateLimitRule,
    pub refresh_token: RateLimitRule,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            login: RateLimitRule::new(10, 300, 0),
            auth: RateLimitRule::new(5, 60, 2),
            api: RateLimitRule::new(100, 60, 10),
            password_reset: RateLimitRule::new(3, 900, 0),
            two_factor: RateLimitRule::new(5, 300, 0),
            file_upload: RateLimitRule::new(10, 60, 2),
            refresh_token: RateLimitRule::new(20, 60, 2),
        }
    }
}

impl RateLimitConfig {
    /// Policy names for the env vars: `LOGIN`, `AUTH`, `API`,
    /// `PASSWORD_RESET`, `TWO_FACTOR`, `FILE_UPLOAD`, `REFRESH_TOKEN`.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            login: RateLimitRule::from_env("LOGIN", d.login),
            auth: RateLimitRule::from_env("AUTH", d.auth),
            api: RateLimitRule::from_env("API", d.api),
            password_reset: RateLimitRule::from_env("PASSWORD_RESET", d.password_reset),
            two_factor: RateLimitRule::from_env("TWO_FACTOR", d.two_factor),
            file_upload: RateLimitRule::from_env("FILE_UPLOAD", d.file_upload),
            refresh_token: RateLimitRule::from_env("REFRESH_TOKEN", d.refresh_token),
        }
    }
}

use std::sync::Arc;

use ess_core::payload_crypto::PayloadCipher;
use ess_db::store::{Store, UserStore};

use crate::config::ServerConfig;
use crate::middleware::rate_limit::RateLimiter;
use crate::services::ip_security::IpSecurityService;
use crate::services::session::SessionService;
use crate::services::token::TokenService;
use crate::services::two_factor::TwoFactorService;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Whole store, used for the health check.
    pub store: Arc<dyn Store>,
    pub users: Arc<dyn UserStore>,
    pub sessions: Arc<SessionService>,
    pub tokens: Arc<TokenService>,
    pub ip_security: Arc<IpSecurityService>,
    pub two_factor: Arc<TwoFactorService>,
    pub rate_limiter: Arc<RateLimiter>,
    /// `None` when payload encryption is disabled.
    pub cipher: Option<Arc<PayloadCipher>>,
}

impl AppState {
    /// Wire every service to `store`.
    pub fn new<S: Store>(store: Arc<S>, config: ServerConfig) -> Self {
        let sessions = SessionService::new(store.clone(), &config.session);
        let tokens = TokenService::new(store.clone(), config.jwt.clone());
        let ip_security = IpSecurityService::new(store.clone(), config.ip_security.policy());
        let two_factor = TwoFactorService::new(store.clone());
        let rate_limiter = RateLimiter::new(config.rate_limits.clone());
        let cipher = config.encryption.cipher.clone().map(Arc::new);

        Self {
            users: store.clone(),
            store,
            sessions: Arc::new(sessions),
            tokens: Arc::new(tokens),
            ip_security: Arc::new(ip_security),
            two_factor: Arc::new(two_factor),
            rate_limiter: Arc::new(rate_limiter),
            cipher,
            config: Arc::new(config),
        }
    }
}

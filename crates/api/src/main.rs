use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ess_api::background::maintenance;
use ess_api::config::ServerConfig;
use ess_api::router::build_app_router;
use ess_api::state::AppState;
use ess_db::store::{MemoryStore, PgStore};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ess_api=debug,ess_db=info,tower_http=debug".into());
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = %config.port,
        max_sessions = config.session.max_concurrent,
        payload_encryption = config.encryption.cipher.is_some(),
        "Loaded server configuration"
    );

    // --- Store ---
    let state = match std::env::var("DATABASE_URL") {
        Ok(database_url) => {
            let pool = ess_db::create_pool(&database_url)
                .await
                .expect("Failed to connect to database");
            tracing::info!("Database connection pool created");

            ess_db::health_check(&pool)
                .await
                .expect("Database health check failed");
            tracing::info!("Database health check passed");

            ess_db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");
            tracing::info!("Database migrations applied");

            AppState::new(Arc::new(PgStore::new(pool)), config.clone())
        }
        Err(_) => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store (data is lost on exit)");
            AppState::new(Arc::new(MemoryStore::new()), config.clone())
        }
    };

    // --- Maintenance ---
    let maintenance_cancel = CancellationToken::new();
    let maintenance_handle = tokio::spawn(maintenance::run(
        state.clone(),
        Duration::from_secs(config.maintenance_interval_secs),
        maintenance_cancel.clone(),
    ));

    // --- Router ---
    let app = build_app_router(state);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    maintenance_cancel.cancel();
    let shutdown_timeout = Duration::from_secs(config.shutdown_timeout_secs);
    if tokio::time::timeout(shutdown_timeout, maintenance_handle)
        .await
        .is_err()
    {
        tracing::warn!("Maintenance job did not stop in time");
    } else {
        tracing::info!("Maintenance job stopped");
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

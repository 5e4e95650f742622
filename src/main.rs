//! Replay API server.
//!
//! Serves the replay endpoints and, when a table connection string is
//! configured, runs the expiry sweeper in the same process.

use replay_api::{
    build_router,
    config::Config,
    expiry::Sweeper,
    handlers::AppState,
    store::MemoryReplayStore,
    table::AzureTableStore,
    ReplayStore,
};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Initialize structured logging
    init_tracing();

    // Load configuration
    let config = Config::from_env();
    log_startup_info(&config);

    // Initialize core components
    let store: Arc<dyn ReplayStore> = match config.max_replays {
        Some(limit) => Arc::new(MemoryReplayStore::with_capacity_limit(limit)),
        None => Arc::new(MemoryReplayStore::new()),
    };
    let state = AppState::new(&config, store);

    // Start background workers
    start_sweeper(&config);

    // Build and serve the application
    let app = build_router(state);
    serve(app, &config).await;
}

/// Initialize tracing with environment-based log levels.
fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("replay_api=debug,tower_http=info")),
        )
        .init();
}

/// Log startup configuration (no secrets).
fn log_startup_info(config: &Config) {
    info!(
        bind_addr = %config.bind_addr,
        port = config.port,
        storage = "memory",
        max_body_size = config.max_body_size,
        request_timeout_ms = u64::try_from(config.request_timeout.as_millis()).unwrap_or(u64::MAX),
        sweeper_enabled = config.sweeper.is_some(),
        "Starting replay API"
    );

    if !config.api_key_configured() {
        warn!("APIKEY is not set; all /replay requests will be rejected");
    }
    if config.expose_error_details {
        warn!("Error responses forward raw storage error text (EXPOSE_ERROR_DETAILS=true)");
    }
}

/// Spawn the in-process sweeper when table storage is configured.
fn start_sweeper(config: &Config) {
    let Some(sweeper_config) = &config.sweeper else {
        return;
    };

    match AzureTableStore::from_connection_string(
        &sweeper_config.connection_string,
        &sweeper_config.table_name,
    ) {
        Ok(table) => {
            let sweeper = Arc::new(Sweeper::new(Arc::new(table), sweeper_config.interval));
            sweeper.start();
        }
        Err(e) => warn!(error = %e, "Expiry sweeper disabled"),
    }
}

/// Bind to address and serve the application.
async fn serve(app: axum::Router, config: &Config) {
    let bind_addr = format!("{}:{}", config.bind_addr, config.port);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    info!(addr = %bind_addr, "Server listening");

    axum::serve(listener, app).await.expect("Server error");
}

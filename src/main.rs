use std::net::SocketAddr;
use std::process::ExitCode;

use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use request_dedup::metrics::try_init_metrics;
use request_dedup::{AppState, Config, DedupGuard, build_router, utils};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging (LOG_FORMAT=json for structured output)
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_ids(true);
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(
        "Starting request deduplication service v{}",
        env!("CARGO_PKG_VERSION")
    );

    match run().await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

/// Run the application, returning an exit code on error.
async fn run() -> Result<(), exitcode::ExitCode> {
    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {e}");
        exitcode::CONFIG
    })?;
    info!(
        host = %config.host,
        port = %config.port,
        backend = %config.backend,
        header = %config.header_name,
        pass_on_missing = config.pass_on_missing,
        "Configuration loaded"
    );

    let settings = config.dedup_settings().map_err(|e| {
        error!("Configuration error: {e}");
        exitcode::CONFIG
    })?;
    let env = config.store_environment().map_err(|e| {
        error!("Configuration error: {e}");
        exitcode::CONFIG
    })?;

    // Initialize token store
    let store = config.build_store();
    info!(backend = store.backend(), "Initializing token store...");
    store.init(&env).await.map_err(|e| {
        error!(backend = store.backend(), "Failed to initialize token store: {e}");
        exitcode::UNAVAILABLE
    })?;
    info!(backend = store.backend(), "Token store ready");

    if let Some(metrics_addr) = config.metrics_addr() {
        try_init_metrics(metrics_addr);
    }

    // Build application state and router
    let guard = DedupGuard::new(store, settings);
    let state = AppState::new(guard, config.clone());
    let app = build_router(state.clone());

    // Start server
    let addr: SocketAddr = config.server_addr().parse().map_err(|e| {
        error!("Invalid server address: {e}");
        exitcode::CONFIG
    })?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!("Server listening on http://{addr}");
    info!("API endpoints:");
    info!("  GET  /health        - Health check");
    info!("  GET  /ready         - Readiness check");
    info!("  POST /submissions   - Guarded submission (requires {})", config.header_name);

    // Peer addresses scope tokens per client, so serve with connect info
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let reason = utils::shutdown_signal().await;
        warn!(%reason, "Received shutdown signal, initiating graceful shutdown...");
    })
    .await
    .map_err(|e| {
        error!("Server error: {e}");
        exitcode::SOFTWARE
    })?;

    // Pending releases finish before the store is destroyed
    info!("HTTP server stopped, shutting down background tasks...");
    state.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}

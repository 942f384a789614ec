use imgcache::{config::ProxyConfig, router, AppState};
use std::net::SocketAddr;

/// imgcache standalone server entry point.
///
/// Initializes tracing, loads and validates configuration, opens the cache
/// and serves until Ctrl-C.
///
/// # Configuration
/// See [`ProxyConfig::from_env`] for the full variable list. The most common:
/// - `SERVER_PORT` / `PORT`: HTTP listen port (default: 3000)
/// - `CACHE_DIR`: transformed-image cache location (default: ./diskcache)
/// - `RUST_LOG`: Logging verbosity (default: "imgcache=debug,tower_http=debug")
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with environment-based filtering
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "imgcache=debug,tower_http=debug".into()),
        )
        .init();

    tracing::info!("Starting imgcache server");

    let cfg = ProxyConfig::from_env()?;
    let port = cfg.port;
    let state = AppState::from_config(cfg).await?;
    let app = router(state);

    // Bind to 0.0.0.0 for external access (required for containerized deployment)
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Server listening on {}", addr);

    // Peer addresses feed the optional per-IP rate limiter
    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

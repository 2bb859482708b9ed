//! keystash server
//!
//! Parses flags, opens the chosen storage backend and serves the HTTP API
//! until Ctrl+C or SIGTERM, then flushes storage before exiting.

use anyhow::Context;
use clap::Parser;
use keystash::{http, storage, Config};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // RUST_LOG wins over --log-level when set
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("invalid log filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(version = keystash::VERSION, "Starting keystash");

    let storage = storage::open(
        config.provider,
        &config.basedir,
        &config.storage_options(),
    )
    .with_context(|| format!("failed to open storage in {}", config.basedir.display()))?;

    let listener = TcpListener::bind(&config.listener)
        .await
        .with_context(|| format!("failed to bind {}", config.listener))?;

    let served = http::serve(listener, storage.clone(), shutdown_signal()).await;

    // Flush even if the server failed
    storage.flush().await;
    info!("Server stopped");

    served.context("HTTP server failed")
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received, stopping server...");
}

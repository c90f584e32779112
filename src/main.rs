//! rest-server - REST backend for deduplicating backup clients
//!
//! Serves a content-addressable repository over HTTP: clients upload
//! immutable objects (data, index, keys, snapshots), the one-time repository
//! config, and lock objects. The server stores them atomically on the local
//! filesystem and never interprets their contents.

mod auth;
mod config;
mod errors;
mod metrics;
mod routes;
mod server;
mod storage;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Cli, Config};
use crate::server::Server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli).context("failed to load configuration")?;

    // Initialize tracing with JSON output for structured logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(?config, "Configuration loaded");

    if let Err(e) = run(config).await {
        error!("Fatal error: {:#}", e);
        return Err(e);
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn run(config: Config) -> anyhow::Result<()> {
    if config.metrics.enabled {
        metrics::init_metrics()
            .map_err(|e| anyhow::anyhow!("failed to register metrics: {}", e))?;
        info!("Metrics enabled at /metrics");
    }

    let storage = storage::create_backend(&config).await.with_context(|| {
        format!(
            "failed to open repository at {}",
            config.repository.path.display()
        )
    })?;

    let credentials = auth::load_credentials(&config)?;

    let server = Server::new(config, storage, credentials);

    // Handle graceful shutdown
    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal");
    };

    server.start(shutdown_signal).await
}

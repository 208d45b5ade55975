//! pkgi Daemon - Package install controller
//!
//! The daemon provides:
//! - Reconciliation of InstallRequests against the package catalog
//! - Garbage collection of dependents whose owner is gone
//! - Prometheus metrics and a health endpoint

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod bootstrap;
mod config;
mod error;
mod server;

use config::DaemonConfig;
use error::{DaemonError, DaemonResult};
use server::Server;

/// pkgi Daemon CLI
#[derive(Parser)]
#[command(name = "pkgid")]
#[command(about = "pkgi Daemon - Package install controller", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "PKGI_CONFIG")]
    config: Option<String>,

    /// Metrics listen address
    #[arg(long, env = "PKGI_METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Number of reconciliation workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// JSON manifest of objects to create at startup
    #[arg(short, long)]
    bootstrap: Option<PathBuf>,

    /// Log level
    #[arg(long, env = "PKGI_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "PKGI_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config =
        DaemonConfig::load(cli.config.as_deref()).map_err(|e| DaemonError::Config(e.to_string()))?;

    // Override with CLI args
    if let Some(addr) = &cli.metrics_addr {
        config.metrics.listen_addr = addr
            .parse()
            .map_err(|e| DaemonError::Config(format!("Invalid metrics address: {}", e)))?;
    }
    if let Some(workers) = cli.workers {
        config.controller.workers = workers;
    }
    if let Some(path) = cli.bootstrap {
        config.bootstrap = Some(path);
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        workers = config.controller.workers,
        global_namespace = %config.catalog.global_namespace,
        metrics = config.metrics.enabled,
        "Starting pkgi daemon"
    );

    let server = Server::new(config).await?;
    server.run().await
}

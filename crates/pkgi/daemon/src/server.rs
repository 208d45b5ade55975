//! Server setup and lifecycle management

use crate::bootstrap::Manifest;
use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use pkgi_controller::{export, Controller, ControllerMetrics};
use pkgi_store::{ClusterStore, GarbageCollector};
use prometheus::Registry;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// pkgi daemon: controller, garbage collector and metrics endpoint
pub struct Server {
    config: DaemonConfig,
    cluster: ClusterStore,
    registry: Registry,
    metrics: Arc<ControllerMetrics>,
}

impl Server {
    /// Create a server and apply the bootstrap manifest, if any
    pub async fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let cluster = ClusterStore::new();
        if let Some(path) = &config.bootstrap {
            Manifest::read(path).await?.apply(&cluster).await?;
        }

        let registry = Registry::new();
        let metrics = Arc::new(ControllerMetrics::new(&registry)?);

        Ok(Self {
            config,
            cluster,
            registry,
            metrics,
        })
    }

    /// Run until Ctrl+C or SIGTERM
    pub async fn run(self) -> DaemonResult<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let controller = Controller::new(
            self.cluster.installs().clone(),
            self.cluster.packages().clone(),
            self.cluster.deployments().clone(),
            &self.config.settings(),
            self.metrics.clone(),
        );
        let controller_handle = tokio::spawn(controller.run(shutdown_rx.clone()));

        let gc = GarbageCollector::new(
            self.cluster.installs().clone(),
            self.cluster.deployments().clone(),
        )
        .with_sweep_interval(self.config.gc.sweep_interval());
        let gc_shutdown = shutdown_rx.clone();
        let gc_handle = tokio::spawn(async move { gc.run(gc_shutdown).await });

        if self.config.metrics.enabled {
            let addr = self.config.metrics.listen_addr;
            let listener = TcpListener::bind(addr).await?;
            tracing::info!(addr = %addr, "Metrics endpoint listening");

            axum::serve(listener, router(self.registry.clone()))
                .with_graceful_shutdown(shutdown_signal())
                .await
                .map_err(|e| DaemonError::Server(e.to_string()))?;
        } else {
            shutdown_signal().await;
        }

        tracing::info!("pkgi daemon shutting down");
        // Receivers may already be gone if both tasks exited early
        let _ = shutdown_tx.send(true);

        controller_handle
            .await
            .map_err(|e| DaemonError::Server(format!("controller task failed: {}", e)))?;
        gc_handle
            .await
            .map_err(|e| DaemonError::Server(format!("garbage collector task failed: {}", e)))?;

        tracing::info!("pkgi daemon stopped");
        Ok(())
    }
}

/// Router serving `/metrics` and `/healthz`
pub fn router(registry: Registry) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz))
        .with_state(registry)
}

async fn metrics_handler(State(registry): State<Registry>) -> Response {
    match export(&registry) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}

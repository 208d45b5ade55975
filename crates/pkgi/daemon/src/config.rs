//! Configuration for pkgi-daemon

use pkgi_controller::{CatalogConfig, CompatibilityConfig, ControllerConfig, Settings};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Main daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Reconciliation workers, resync and retry behavior
    #[serde(default)]
    pub controller: ControllerConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Running versions checked against package constraints
    #[serde(default)]
    pub compatibility: CompatibilityConfig,

    /// Garbage collection configuration
    #[serde(default)]
    pub gc: GcConfig,

    /// Metrics endpoint configuration
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// JSON manifest of objects to create at startup
    #[serde(default)]
    pub bootstrap: Option<PathBuf>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            catalog: CatalogConfig::default(),
            compatibility: CompatibilityConfig {
                kubernetes_version: None,
                controller_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            },
            gc: GcConfig::default(),
            metrics: MetricsConfig::default(),
            bootstrap: None,
            logging: LoggingConfig::default(),
        }
    }
}

/// Garbage collection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcConfig {
    /// Interval between orphan sweeps in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl GcConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Metrics endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Serve `/metrics` and `/healthz`
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Listen address
    #[serde(default = "default_metrics_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: default_metrics_addr(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_metrics_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9102))
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        // Add file configuration if provided
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // Add environment variables, e.g. PKGI_CONTROLLER__WORKERS
        builder = builder.add_source(
            config::Environment::with_prefix("PKGI")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// The slice of configuration the reconciler needs
    pub fn settings(&self) -> Settings {
        Settings {
            controller: self.controller.clone(),
            catalog: self.catalog.clone(),
            compatibility: self.compatibility.clone(),
        }
    }
}

//! Controller configuration
//!
//! These sections are embedded in the daemon configuration file. Durations
//! are stored as plain numbers so they layer cleanly through file and
//! environment sources.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Worker pool, resync and retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Concurrent reconciliation workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Resync interval for requests without `spec.sync_period`
    #[serde(default = "default_sync_period")]
    pub default_sync_period_secs: u64,

    /// Optimistic-concurrency retries per write
    #[serde(default = "default_max_sync_retries")]
    pub max_sync_retries: u32,

    /// Deadline for a single pass
    #[serde(default = "default_pass_timeout")]
    pub pass_timeout_secs: u64,

    /// First failure backoff; doubles per consecutive failure
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            default_sync_period_secs: default_sync_period(),
            max_sync_retries: default_max_sync_retries(),
            pass_timeout_secs: default_pass_timeout(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_secs: default_backoff_max(),
        }
    }
}

impl ControllerConfig {
    pub fn default_sync_period(&self) -> Duration {
        Duration::from_secs(self.default_sync_period_secs)
    }

    pub fn pass_timeout(&self) -> Duration {
        Duration::from_secs(self.pass_timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }
}

/// Catalog visibility
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Namespace whose PackageVersions every namespace can see
    #[serde(default = "default_global_namespace")]
    pub global_namespace: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            global_namespace: default_global_namespace(),
        }
    }
}

/// Running versions checked against package compatibility constraints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompatibilityConfig {
    /// Cluster version; compatibility is not checked when unset
    #[serde(default)]
    pub kubernetes_version: Option<String>,

    #[serde(default)]
    pub controller_version: Option<String>,
}

/// Everything a reconciler needs to know about its environment
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub controller: ControllerConfig,
    pub catalog: CatalogConfig,
    pub compatibility: CompatibilityConfig,
}

// Default value helpers
fn default_workers() -> usize {
    4
}

fn default_sync_period() -> u64 {
    600
}

fn default_max_sync_retries() -> u32 {
    5
}

fn default_pass_timeout() -> u64 {
    30
}

fn default_backoff_base() -> u64 {
    500
}

fn default_backoff_max() -> u64 {
    300
}

fn default_global_namespace() -> String {
    "pkgi-global".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.workers, 4);
        assert_eq!(config.default_sync_period(), Duration::from_secs(600));
        assert_eq!(config.backoff_base(), Duration::from_millis(500));
        assert_eq!(config.max_sync_retries, 5);
    }

    #[test]
    fn test_partial_section_fills_defaults() {
        let config: ControllerConfig =
            serde_json::from_value(serde_json::json!({"workers": 8})).unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.pass_timeout_secs, 30);

        let catalog: CatalogConfig = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(catalog.global_namespace, "pkgi-global");
    }
}

//! Startup manifest loading
//!
//! The daemon keeps its objects in memory, so a manifest is the way to seed
//! the catalog and the first install requests. Catalog entries are created
//! before install requests; objects that already exist are skipped.

use crate::error::{DaemonError, DaemonResult};
use pkgi_store::{ClusterStore, Store};
use pkgi_types::{InstallRequest, PackageVersion, Resource};
use serde::Deserialize;
use std::path::Path;

/// Objects to create at startup
#[derive(Debug, Default, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub package_versions: Vec<PackageVersion>,

    #[serde(default)]
    pub install_requests: Vec<InstallRequest>,
}

/// Counts of what a manifest application did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    pub created: usize,
    pub skipped: usize,
}

impl Manifest {
    pub fn from_json(json: &str) -> DaemonResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| DaemonError::Bootstrap(format!("invalid manifest: {}", e)))
    }

    pub async fn read(path: &Path) -> DaemonResult<Self> {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| DaemonError::Bootstrap(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    /// Create every object in `cluster`
    pub async fn apply(self, cluster: &ClusterStore) -> DaemonResult<Applied> {
        let mut applied = Applied::default();
        for package in self.package_versions {
            create(cluster.packages().as_ref(), package, &mut applied).await?;
        }
        for install in self.install_requests {
            create(cluster.installs().as_ref(), install, &mut applied).await?;
        }
        tracing::info!(
            created = applied.created,
            skipped = applied.skipped,
            "Applied bootstrap manifest"
        );
        Ok(applied)
    }
}

async fn create<R: Resource>(
    store: &dyn Store<R>,
    mut object: R,
    applied: &mut Applied,
) -> DaemonResult<()> {
    // Store-assigned fields are not taken from the manifest
    object.meta_mut().resource_version.clear();

    match store.create(object).await {
        Ok(created) => {
            tracing::debug!(kind = R::KIND, key = %created.key(), "Created bootstrap object");
            applied.created += 1;
            Ok(())
        }
        Err(e) if e.is_already_exists() => {
            tracing::warn!(kind = R::KIND, error = %e, "Bootstrap object exists, skipping");
            applied.skipped += 1;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

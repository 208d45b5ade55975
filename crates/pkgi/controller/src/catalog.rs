//! Catalog view over PackageVersions
//!
//! An InstallRequest in namespace N sees the PackageVersions in N plus those
//! in the global packaging namespace. When both define the same version
//! string for a ref, the entry in N wins.

use crate::config::{CatalogConfig, CompatibilityConfig};
use pkgi_resolver::satisfies;
use pkgi_store::{Store, StoreResult};
use pkgi_types::{PackageVersion, VersionSelection};
use std::collections::HashSet;
use std::sync::Arc;

/// PackageVersions visible to a namespace
#[derive(Clone)]
pub struct Catalog {
    packages: Arc<dyn Store<PackageVersion>>,
    global_namespace: String,
}

impl Catalog {
    pub fn new(packages: Arc<dyn Store<PackageVersion>>, config: &CatalogConfig) -> Self {
        Self {
            packages,
            global_namespace: config.global_namespace.clone(),
        }
    }

    pub fn global_namespace(&self) -> &str {
        &self.global_namespace
    }

    /// Whether entries in `package_namespace` are visible from `namespace`
    pub fn is_visible(&self, package_namespace: &str, namespace: &str) -> bool {
        package_namespace == namespace || package_namespace == self.global_namespace
    }

    /// Versions of `ref_name` visible from `namespace`, local entries first
    pub async fn versions(
        &self,
        namespace: &str,
        ref_name: &str,
    ) -> StoreResult<Vec<PackageVersion>> {
        let mut visible: Vec<PackageVersion> = self
            .packages
            .list(Some(namespace))
            .await?
            .into_iter()
            .filter(|pv| pv.spec.ref_name == ref_name)
            .collect();

        if namespace != self.global_namespace {
            let local: HashSet<String> = visible.iter().map(|pv| pv.spec.version.clone()).collect();
            let global = self
                .packages
                .list(Some(&self.global_namespace))
                .await?
                .into_iter()
                .filter(|pv| pv.spec.ref_name == ref_name && !local.contains(&pv.spec.version));
            visible.extend(global);
        }

        Ok(visible)
    }
}

/// Running versions that package compatibility constraints are checked against
#[derive(Debug, Clone, Default)]
pub struct Compatibility {
    kubernetes_version: Option<String>,
    controller_version: Option<String>,
}

impl Compatibility {
    pub fn new(config: &CompatibilityConfig) -> Self {
        Self {
            kubernetes_version: config.kubernetes_version.clone(),
            controller_version: config.controller_version.clone(),
        }
    }

    /// Whether `package` can be installed here
    ///
    /// A constraint is only checked when the matching running version is
    /// known. A malformed constraint makes the package ineligible.
    pub fn admits(&self, package: &PackageVersion) -> bool {
        check(
            package,
            "kubernetes",
            package.spec.kubernetes_version_selection.as_ref(),
            self.kubernetes_version.as_deref(),
        ) && check(
            package,
            "controller",
            package.spec.controller_version_selection.as_ref(),
            self.controller_version.as_deref(),
        )
    }
}

fn check(
    package: &PackageVersion,
    what: &str,
    selection: Option<&VersionSelection>,
    running: Option<&str>,
) -> bool {
    let (Some(selection), Some(running)) = (selection, running) else {
        return true;
    };
    match satisfies(&selection.constraints, running) {
        Ok(true) => true,
        Ok(false) => {
            tracing::debug!(
                package = %package.meta.key(),
                what,
                running,
                constraints = %selection.constraints,
                "Package version is incompatible"
            );
            false
        }
        Err(e) => {
            tracing::warn!(
                package = %package.meta.key(),
                what,
                error = %e,
                "Ignoring package version with unusable compatibility constraint"
            );
            false
        }
    }
}

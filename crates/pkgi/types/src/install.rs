//! InstallRequest - user intent to install a package
//!
//! The spec is written by users; the status block is written only by the
//! controller.

use crate::condition::{self, Condition, ConditionType};
use crate::meta::{impl_resource, ObjectMeta};
use crate::serde_helpers::optional_duration_secs;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Declaration that a package should be installed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallRequest {
    pub meta: ObjectMeta,

    pub spec: InstallRequestSpec,

    #[serde(default)]
    pub status: ReconciliationStatus,
}

impl_resource!(
    InstallRequest,
    InstallRequestSpec,
    ReconciliationStatus,
    "InstallRequest"
);

impl InstallRequest {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        ref_name: impl Into<String>,
        constraints: impl Into<String>,
    ) -> Self {
        Self {
            meta: ObjectMeta::new(namespace, name),
            spec: InstallRequestSpec {
                service_account_name: String::new(),
                package_ref: PackageRef {
                    ref_name: ref_name.into(),
                    version_selection: VersionSelection::new(constraints),
                },
                values: None,
                sync_period: None,
                paused: false,
                canceled: false,
            },
            status: ReconciliationStatus::default(),
        }
    }

    pub fn with_values(mut self, values: serde_json::Value) -> Self {
        self.spec.values = Some(values);
        self
    }

    pub fn with_service_account(mut self, name: impl Into<String>) -> Self {
        self.spec.service_account_name = name.into();
        self
    }

    pub fn with_sync_period(mut self, period: Duration) -> Self {
        self.spec.sync_period = Some(period);
        self
    }

    /// The spec has changes the controller has not processed yet
    pub fn needs_recheck(&self) -> bool {
        self.status.observed_generation != self.meta.generation
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallRequestSpec {
    /// Identity the deployment engine applies manifests with
    #[serde(default)]
    pub service_account_name: String,

    pub package_ref: PackageRef,

    /// Configuration overlay handed to the package templates
    #[serde(default)]
    pub values: Option<serde_json::Value>,

    /// Resync interval; the controller default applies when unset
    #[serde(default, with = "optional_duration_secs")]
    pub sync_period: Option<Duration>,

    /// Suspend reconciliation without deleting anything
    #[serde(default)]
    pub paused: bool,

    /// Ask the deployment engine to stop acting on the dependent
    #[serde(default)]
    pub canceled: bool,
}

/// Package reference and version selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageRef {
    /// Name shared by all versions of the package
    pub ref_name: String,

    #[serde(default)]
    pub version_selection: VersionSelection,
}

/// Version constraint expression plus prerelease policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSelection {
    /// Range expression; empty means "latest"
    #[serde(default)]
    pub constraints: String,

    /// Opt implicit latest selection into prereleases
    #[serde(default)]
    pub prereleases: Option<PrereleasePolicy>,
}

impl VersionSelection {
    pub fn new(constraints: impl Into<String>) -> Self {
        Self {
            constraints: constraints.into(),
            prereleases: None,
        }
    }
}

/// Restricts which prerelease versions are eligible
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrereleasePolicy {
    /// Prerelease identifiers to accept (e.g. `rc`); empty accepts any
    #[serde(default)]
    pub identifiers: Vec<String>,
}

/// Controller-written status of an InstallRequest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationStatus {
    /// Version chosen by the last successful resolution
    #[serde(default)]
    pub resolved_version: Option<String>,

    /// Exactly one condition is present once the first pass has completed
    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default)]
    pub friendly_description: String,

    /// Full error text of the last failure
    #[serde(default)]
    pub useful_error_message: Option<String>,

    /// Generation of the spec this status describes
    #[serde(default)]
    pub observed_generation: i64,

    /// Version the last pass tried to install, set even when it failed
    #[serde(default)]
    pub last_attempted_version: Option<String>,
}

impl ReconciliationStatus {
    pub fn condition(&self) -> Option<&Condition> {
        self.conditions.first()
    }

    pub fn is_succeeded(&self) -> bool {
        condition::find(&self.conditions, ConditionType::ReconcileSucceeded).is_some()
    }

    pub fn is_failed(&self) -> bool {
        condition::find(&self.conditions, ConditionType::ReconcileFailed).is_some()
    }
}

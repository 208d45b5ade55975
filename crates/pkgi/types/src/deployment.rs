//! DependentDeployment - the controller-managed resource given to the
//! deployment engine
//!
//! The spec is derived from an InstallRequest and its resolved
//! PackageVersion. The status is written by the external engine and is only
//! echoed back by the controller.

use crate::condition::{self, Condition, ConditionType};
use crate::meta::{impl_resource, ObjectMeta};
use crate::package::DeploymentTemplate;
use crate::serde_helpers::optional_duration_secs;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Derived deployment owned by an InstallRequest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependentDeployment {
    pub meta: ObjectMeta,

    pub spec: DeploymentSpec,

    #[serde(default)]
    pub status: DeploymentStatus,
}

impl_resource!(
    DependentDeployment,
    DeploymentSpec,
    DeploymentStatus,
    "DependentDeployment"
);

/// Package name and version a deployment was derived from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageCoordinates {
    pub ref_name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    #[serde(default)]
    pub service_account_name: String,

    #[serde(default, with = "optional_duration_secs")]
    pub sync_period: Option<Duration>,

    #[serde(default)]
    pub paused: bool,

    #[serde(default)]
    pub canceled: bool,

    pub package: PackageCoordinates,

    /// Verbatim copy of the resolved version's template
    pub template: DeploymentTemplate,

    /// User overlay, kept apart from the template
    #[serde(default)]
    pub values: Option<serde_json::Value>,
}

/// Status reported by the deployment engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentStatus {
    #[serde(default)]
    pub observed_generation: i64,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default)]
    pub friendly_description: String,

    #[serde(default)]
    pub useful_error_message: Option<String>,
}

/// Coarse engine progress for a deployment at a given generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineSignal {
    /// The engine has not reported anything yet
    Silent,
    /// The engine is working on (or has not caught up with) the spec
    Progressing,
    Succeeded,
    Failed { message: String },
}

impl DependentDeployment {
    /// Interpret the engine's status relative to the current generation
    pub fn engine_signal(&self) -> EngineSignal {
        let status = &self.status;
        if status.conditions.is_empty() {
            return EngineSignal::Silent;
        }
        if status.observed_generation < self.meta.generation {
            return EngineSignal::Progressing;
        }
        if let Some(failed) = condition::find(&status.conditions, ConditionType::ReconcileFailed) {
            let message = status
                .useful_error_message
                .clone()
                .unwrap_or_else(|| failed.message.clone());
            return EngineSignal::Failed { message };
        }
        if condition::find(&status.conditions, ConditionType::ReconcileSucceeded).is_some() {
            return EngineSignal::Succeeded;
        }
        EngineSignal::Progressing
    }
}

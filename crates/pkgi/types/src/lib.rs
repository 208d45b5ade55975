//! pkgi Types - Resource model for the package install controller
//!
//! Every record the controller reads or writes is a namespaced, versioned
//! object carrying [`ObjectMeta`]. Three kinds take part in reconciliation:
//!
//! - **InstallRequest**: user intent to have a package installed under a
//!   version constraint
//! - **PackageVersion**: an immutable catalog entry for one version of a
//!   package
//! - **DependentDeployment**: the controller-owned resource handed to the
//!   deployment engine
//!
//! Status blocks are kept in separate fields so that spec and status can be
//! written independently.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod condition;
pub mod deployment;
pub mod install;
pub mod meta;
pub mod package;
mod serde_helpers;

// Re-export main types
pub use condition::{Condition, ConditionStatus, ConditionType};
pub use deployment::{
    DependentDeployment, DeploymentSpec, DeploymentStatus, EngineSignal, PackageCoordinates,
};
pub use install::{
    InstallRequest, InstallRequestSpec, PackageRef, PrereleasePolicy, ReconciliationStatus,
    VersionSelection,
};
pub use meta::{ObjectKey, ObjectMeta, OwnerReference, Resource};
pub use package::{
    DeployStep, DeploymentTemplate, FetchStep, PackageVersion, PackageVersionSpec, TemplateStep,
    ValuesSchema,
};

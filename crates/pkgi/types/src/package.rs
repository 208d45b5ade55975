//! PackageVersion - immutable catalog entries
//!
//! A PackageVersion describes one installable version of a package: the
//! deployment template the engine runs and the schema user values must meet.
//! The catalog pipeline creates them; the controller only reads them.

use crate::install::VersionSelection;
use crate::meta::{ObjectMeta, Resource};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One installable version of a package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageVersion {
    pub meta: ObjectMeta,

    pub spec: PackageVersionSpec,
}

impl Resource for PackageVersion {
    type Spec = PackageVersionSpec;
    type Status = ();

    const KIND: &'static str = "PackageVersion";

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }

    fn spec(&self) -> &PackageVersionSpec {
        &self.spec
    }

    fn status(&self) -> &() {
        &()
    }

    fn set_status(&mut self, _status: ()) {}
}

impl PackageVersion {
    /// Create a catalog entry named `<ref_name>.<version>`
    pub fn new(
        namespace: impl Into<String>,
        ref_name: impl Into<String>,
        version: impl Into<String>,
        template: DeploymentTemplate,
    ) -> Self {
        let ref_name = ref_name.into();
        let version = version.into();
        Self {
            meta: ObjectMeta::new(namespace, format!("{}.{}", ref_name, version)),
            spec: PackageVersionSpec {
                ref_name,
                version,
                template,
                values_schema: None,
                licenses: Vec::new(),
                release_notes: String::new(),
                released_at: None,
                kubernetes_version_selection: None,
                controller_version_selection: None,
            },
        }
    }

    pub fn with_values_schema(mut self, schema: serde_json::Value) -> Self {
        self.spec.values_schema = Some(ValuesSchema { open_api_v3: schema });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageVersionSpec {
    /// Package reference this version belongs to
    pub ref_name: String,

    /// Semantic version string
    pub version: String,

    pub template: DeploymentTemplate,

    #[serde(default)]
    pub values_schema: Option<ValuesSchema>,

    #[serde(default)]
    pub licenses: Vec<String>,

    #[serde(default)]
    pub release_notes: String,

    #[serde(default)]
    pub released_at: Option<chrono::DateTime<chrono::Utc>>,

    /// Cluster versions this package can be installed on
    #[serde(default)]
    pub kubernetes_version_selection: Option<VersionSelection>,

    /// Controller versions that can install this package
    #[serde(default)]
    pub controller_version_selection: Option<VersionSelection>,
}

/// OpenAPI v3 schema for user-supplied values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuesSchema {
    pub open_api_v3: serde_json::Value,
}

/// Fetch, template and deploy steps interpreted by the deployment engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentTemplate {
    #[serde(default)]
    pub fetch: Vec<FetchStep>,

    #[serde(default)]
    pub template: Vec<TemplateStep>,

    #[serde(default)]
    pub deploy: Vec<DeployStep>,
}

/// Where package contents come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStep {
    /// OCI bundle reference
    ImgpkgBundle { image: String },
    /// Plain OCI image
    Image { url: String },
    /// HTTP archive
    Http {
        url: String,
        #[serde(default)]
        sha256: Option<String>,
    },
    /// Git repository at a ref
    Git {
        url: String,
        #[serde(rename = "ref")]
        git_ref: String,
        #[serde(default)]
        sub_path: Option<String>,
    },
    /// Files embedded in the template
    Inline { paths: BTreeMap<String, String> },
}

/// How fetched contents are rendered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateStep {
    Ytt {
        #[serde(default)]
        paths: Vec<String>,
    },
    HelmTemplate {
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        name: Option<String>,
    },
    Kbld {
        #[serde(default)]
        paths: Vec<String>,
    },
}

/// How rendered manifests are applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployStep {
    Kapp {
        #[serde(default)]
        raw_options: Vec<String>,
    },
}

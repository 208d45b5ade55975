//! Object identity and metadata shared by every resource kind
//!
//! Objects are addressed by namespace + name. The store assigns the `uid`,
//! `generation` and `resource_version` fields; callers treat them as
//! read-only.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Namespace + name pair identifying an object of a given kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Reference from a derived object back to the object that created it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    /// Kind of the owner (e.g. `InstallRequest`)
    pub kind: String,

    /// Name of the owner; owners always live in the dependent's namespace
    pub name: String,

    /// UID of the owner, guards against a recreated owner with the same name
    pub uid: Uuid,

    /// Marks the managing controller; at most one reference sets this
    #[serde(default)]
    pub controller: bool,

    /// Owner deletion waits for this dependent to be collected
    #[serde(default)]
    pub block_owner_deletion: bool,
}

impl OwnerReference {
    /// Build a controller reference pointing at `owner`
    pub fn controller_of<R: Resource>(owner: &R) -> Self {
        Self {
            kind: R::KIND.to_string(),
            name: owner.meta().name.clone(),
            uid: owner.meta().uid,
            controller: true,
            block_owner_deletion: true,
        }
    }
}

/// Standard object metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub namespace: String,

    pub name: String,

    /// Assigned by the store on create
    #[serde(default = "Uuid::nil")]
    pub uid: Uuid,

    /// Incremented by the store each time the spec changes
    #[serde(default)]
    pub generation: i64,

    /// Opaque optimistic-concurrency token, replaced on every write
    #[serde(default)]
    pub resource_version: String,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,

    #[serde(default)]
    pub creation_timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

impl ObjectMeta {
    /// Metadata for an object that has not been persisted yet
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            uid: Uuid::nil(),
            generation: 0,
            resource_version: String::new(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            owner_references: Vec::new(),
            creation_timestamp: None,
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }

    /// The controller owner reference, if any
    pub fn controller_ref(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|r| r.controller)
    }

    /// Whether `owner` is the managing controller of this object
    pub fn is_controlled_by(&self, kind: &str, uid: Uuid) -> bool {
        self.controller_ref()
            .is_some_and(|r| r.kind == kind && r.uid == uid)
    }
}

/// A persisted resource kind with separately writable spec and status
pub trait Resource: Clone + fmt::Debug + Send + Sync + 'static {
    type Spec: Clone + PartialEq + fmt::Debug + Send + Sync;
    type Status: Clone + PartialEq + Default + fmt::Debug + Send + Sync;

    /// Kind name used in owner references and logs
    const KIND: &'static str;

    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;
    fn spec(&self) -> &Self::Spec;
    fn status(&self) -> &Self::Status;
    fn set_status(&mut self, status: Self::Status);

    fn key(&self) -> ObjectKey {
        self.meta().key()
    }
}

/// Implements [`Resource`] for a `{ meta, spec, status }` struct
macro_rules! impl_resource {
    ($ty:ty, $spec:ty, $status:ty, $kind:literal) => {
        impl $crate::meta::Resource for $ty {
            type Spec = $spec;
            type Status = $status;

            const KIND: &'static str = $kind;

            fn meta(&self) -> &$crate::meta::ObjectMeta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut $crate::meta::ObjectMeta {
                &mut self.meta
            }

            fn spec(&self) -> &$spec {
                &self.spec
            }

            fn status(&self) -> &$status {
                &self.status
            }

            fn set_status(&mut self, status: $status) {
                self.status = status;
            }
        }
    };
}

pub(crate) use impl_resource;

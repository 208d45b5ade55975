//! Store trait definitions

use crate::error::StoreResult;
use async_trait::async_trait;
use pkgi_types::{ObjectKey, Resource};
use tokio::sync::broadcast;

/// Change notification for a single object
#[derive(Debug, Clone)]
pub enum WatchEvent<R> {
    /// Created or updated; carries the stored object
    Applied(R),
    /// Removed; carries the last stored state
    Deleted(R),
}

impl<R: Resource> WatchEvent<R> {
    pub fn object(&self) -> &R {
        match self {
            WatchEvent::Applied(obj) | WatchEvent::Deleted(obj) => obj,
        }
    }
}

/// Access to one resource kind
///
/// Writes are atomic. `update` and `update_status` only succeed when the
/// object's `resource_version` matches the stored one.
#[async_trait]
pub trait Store<R: Resource>: Send + Sync {
    /// Get an object by key
    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<R>>;

    /// List objects, optionally restricted to one namespace
    async fn list(&self, namespace: Option<&str>) -> StoreResult<Vec<R>>;

    /// Persist a new object; the store assigns uid, generation and resource version
    async fn create(&self, object: R) -> StoreResult<R>;

    /// Replace metadata and spec; status is left as stored
    async fn update(&self, object: R) -> StoreResult<R>;

    /// Replace status only; spec and metadata are left as stored
    async fn update_status(&self, object: R) -> StoreResult<R>;

    /// Remove an object, returning its last state
    async fn delete(&self, key: &ObjectKey) -> StoreResult<Option<R>>;

    /// Subscribe to changes made after this call
    fn watch(&self) -> broadcast::Receiver<WatchEvent<R>>;
}

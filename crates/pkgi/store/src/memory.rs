//! In-memory store implementation

use crate::error::{StoreError, StoreResult};
use crate::traits::{Store, WatchEvent};
use async_trait::async_trait;
use pkgi_types::{
    DependentDeployment, InstallRequest, ObjectKey, ObjectMeta, PackageVersion, Resource,
};
use std::collections::BTreeMap;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

/// Buffered watch events per subscriber before it lags
const WATCH_CAPACITY: usize = 1024;

/// In-memory store for one resource kind
#[derive(Debug)]
pub struct InMemoryStore<R: Resource> {
    objects: RwLock<BTreeMap<ObjectKey, R>>,
    events: broadcast::Sender<WatchEvent<R>>,
    revision: Arc<AtomicU64>,
    available: Arc<AtomicBool>,
}

impl<R: Resource> Default for InMemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Resource> InMemoryStore<R> {
    /// Create a standalone store with its own revision counter
    pub fn new() -> Self {
        Self::with_shared(Arc::new(AtomicU64::new(0)), Arc::new(AtomicBool::new(true)))
    }

    fn with_shared(revision: Arc<AtomicU64>, available: Arc<AtomicBool>) -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            objects: RwLock::new(BTreeMap::new()),
            events,
            revision,
            available,
        }
    }

    /// Number of writes made through any store sharing this counter
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    fn next_version(&self) -> String {
        (self.revision.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!("{} store is offline", R::KIND)))
        }
    }

    fn notify(&self, event: WatchEvent<R>) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }

    fn not_found(key: &ObjectKey) -> StoreError {
        StoreError::NotFound {
            kind: R::KIND,
            key: key.clone(),
        }
    }

    fn check_version(
        key: &ObjectKey,
        incoming: &ObjectMeta,
        stored: &ObjectMeta,
    ) -> StoreResult<()> {
        if incoming.resource_version == stored.resource_version {
            Ok(())
        } else {
            Err(StoreError::Conflict {
                kind: R::KIND,
                key: key.clone(),
                expected: incoming.resource_version.clone(),
                current: stored.resource_version.clone(),
            })
        }
    }
}

fn validate(meta: &ObjectMeta) -> StoreResult<()> {
    if meta.namespace.is_empty() || meta.name.is_empty() {
        return Err(StoreError::Invalid("namespace and name are required".into()));
    }
    if !meta.resource_version.is_empty() {
        return Err(StoreError::Invalid(format!(
            "{} must not carry a resource version on create",
            meta.key()
        )));
    }
    Ok(())
}

/// Metadata fields writable through `update`
fn writable_meta_eq(a: &ObjectMeta, b: &ObjectMeta) -> bool {
    a.labels == b.labels
        && a.annotations == b.annotations
        && a.owner_references == b.owner_references
}

#[async_trait]
impl<R: Resource> Store<R> for InMemoryStore<R> {
    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<R>> {
        self.check_available()?;
        let objects = self.objects.read().await;
        Ok(objects.get(key).cloned())
    }

    async fn list(&self, namespace: Option<&str>) -> StoreResult<Vec<R>> {
        self.check_available()?;
        let objects = self.objects.read().await;
        Ok(objects
            .values()
            .filter(|o| namespace.map_or(true, |ns| o.meta().namespace == ns))
            .cloned()
            .collect())
    }

    async fn create(&self, mut object: R) -> StoreResult<R> {
        self.check_available()?;
        validate(object.meta())?;

        let key = object.key();
        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists { kind: R::KIND, key });
        }

        let meta = object.meta_mut();
        if meta.uid.is_nil() {
            meta.uid = Uuid::new_v4();
        }
        meta.generation = 1;
        meta.resource_version = self.next_version();
        meta.creation_timestamp = Some(chrono::Utc::now());

        objects.insert(key.clone(), object.clone());
        self.notify(WatchEvent::Applied(object.clone()));
        tracing::trace!(kind = R::KIND, key = %key, "Created object");
        Ok(object)
    }

    async fn update(&self, mut object: R) -> StoreResult<R> {
        self.check_available()?;

        let key = object.key();
        let mut objects = self.objects.write().await;
        let current = objects.get(&key).cloned().ok_or_else(|| Self::not_found(&key))?;
        Self::check_version(&key, object.meta(), current.meta())?;

        let spec_changed = object.spec() != current.spec();
        if !spec_changed && writable_meta_eq(object.meta(), current.meta()) {
            return Ok(current);
        }

        object.set_status(current.status().clone());
        let meta = object.meta_mut();
        meta.uid = current.meta().uid;
        meta.creation_timestamp = current.meta().creation_timestamp;
        meta.generation = current.meta().generation + i64::from(spec_changed);
        meta.resource_version = self.next_version();

        objects.insert(key.clone(), object.clone());
        self.notify(WatchEvent::Applied(object.clone()));
        tracing::trace!(kind = R::KIND, key = %key, spec_changed, "Updated object");
        Ok(object)
    }

    async fn update_status(&self, object: R) -> StoreResult<R> {
        self.check_available()?;

        let key = object.key();
        let mut objects = self.objects.write().await;
        let mut current = objects.get(&key).cloned().ok_or_else(|| Self::not_found(&key))?;
        Self::check_version(&key, object.meta(), current.meta())?;

        if object.status() == current.status() {
            return Ok(current);
        }

        current.set_status(object.status().clone());
        current.meta_mut().resource_version = self.next_version();

        objects.insert(key.clone(), current.clone());
        self.notify(WatchEvent::Applied(current.clone()));
        tracing::trace!(kind = R::KIND, key = %key, "Updated status");
        Ok(current)
    }

    async fn delete(&self, key: &ObjectKey) -> StoreResult<Option<R>> {
        self.check_available()?;

        let mut objects = self.objects.write().await;
        let removed = objects.remove(key);
        if let Some(object) = &removed {
            self.next_version();
            self.notify(WatchEvent::Deleted(object.clone()));
            tracing::trace!(kind = R::KIND, key = %key, "Deleted object");
        }
        Ok(removed)
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent<R>> {
        self.events.subscribe()
    }
}

/// In-memory stores for every kind the controller touches
///
/// All three share one revision counter, so `revision()` moves on any write
/// anywhere in the cluster.
#[derive(Debug, Clone)]
pub struct ClusterStore {
    installs: Arc<InMemoryStore<InstallRequest>>,
    packages: Arc<InMemoryStore<PackageVersion>>,
    deployments: Arc<InMemoryStore<DependentDeployment>>,
    revision: Arc<AtomicU64>,
    available: Arc<AtomicBool>,
}

impl Default for ClusterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterStore {
    pub fn new() -> Self {
        let revision = Arc::new(AtomicU64::new(0));
        let available = Arc::new(AtomicBool::new(true));
        Self {
            installs: Arc::new(InMemoryStore::with_shared(revision.clone(), available.clone())),
            packages: Arc::new(InMemoryStore::with_shared(revision.clone(), available.clone())),
            deployments: Arc::new(InMemoryStore::with_shared(revision.clone(), available.clone())),
            revision,
            available,
        }
    }

    pub fn installs(&self) -> &Arc<InMemoryStore<InstallRequest>> {
        &self.installs
    }

    pub fn packages(&self) -> &Arc<InMemoryStore<PackageVersion>> {
        &self.packages
    }

    pub fn deployments(&self) -> &Arc<InMemoryStore<DependentDeployment>> {
        &self.deployments
    }

    /// Total number of writes across all kinds
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Simulate an outage: every call fails with `Unavailable` until restored
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        tracing::debug!(available, "Store availability changed");
    }
}

//! End-to-end reconciliation scenarios against the in-memory cluster store

use async_trait::async_trait;
use pkgi_controller::{
    Action, CatalogConfig, CompatibilityConfig, Controller, ControllerConfig, ControllerMetrics,
    Reconciler, Settings,
};
use pkgi_store::{ClusterStore, GarbageCollector, InMemoryStore, Store, StoreResult, WatchEvent};
use pkgi_types::{
    DependentDeployment, DeploymentTemplate, InstallRequest, ObjectKey, PackageVersion, Resource,
    VersionSelection,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

fn settings() -> Settings {
    Settings {
        controller: ControllerConfig {
            max_sync_retries: 2,
            ..Default::default()
        },
        catalog: CatalogConfig {
            global_namespace: "pkgi-global".into(),
        },
        compatibility: CompatibilityConfig {
            kubernetes_version: Some("1.28.3".into()),
            controller_version: None,
        },
    }
}

fn reconciler_with(
    cluster: &ClusterStore,
    deployments: Arc<dyn Store<DependentDeployment>>,
) -> Reconciler {
    Reconciler::new(
        cluster.installs().clone(),
        cluster.packages().clone(),
        deployments,
        &settings(),
        Arc::new(ControllerMetrics::unregistered().unwrap()),
    )
}

fn reconciler(cluster: &ClusterStore) -> Reconciler {
    reconciler_with(cluster, cluster.deployments().clone())
}

async fn publish(cluster: &ClusterStore, namespace: &str, version: &str) -> PackageVersion {
    let template = DeploymentTemplate::default();
    let pv = PackageVersion::new(namespace, "nginx.pkg.dev", version, template);
    cluster.packages().create(pv).await.unwrap()
}

async fn submit(cluster: &ClusterStore, constraints: &str) -> InstallRequest {
    let install = InstallRequest::new("default", "nginx", "nginx.pkg.dev", constraints)
        .with_service_account("nginx-sa");
    cluster.installs().create(install).await.unwrap()
}

async fn stored_install(cluster: &ClusterStore, key: &ObjectKey) -> InstallRequest {
    cluster.installs().get(key).await.unwrap().unwrap()
}

async fn stored_dependent(cluster: &ClusterStore, key: &ObjectKey) -> Option<DependentDeployment> {
    cluster.deployments().get(key).await.unwrap()
}

/// Poll until the dependent at `key` is at `version`
async fn wait_for_dependent(
    cluster: &ClusterStore,
    key: &ObjectKey,
    version: &str,
) -> DependentDeployment {
    for _ in 0..300 {
        if let Some(dependent) = stored_dependent(cluster, key).await {
            if dependent.spec.package.version == version {
                return dependent;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("dependent {} never reached version {}", key, version);
}

#[tokio::test]
async fn range_selects_highest_match_and_reports_success() {
    let cluster = ClusterStore::new();
    for version in ["1.0.0", "1.1.0", "2.0.0"] {
        publish(&cluster, "default", version).await;
    }
    let install = submit(&cluster, "1.x").await;

    reconciler(&cluster).reconcile(&install.key()).await.unwrap();

    let dependent = stored_dependent(&cluster, &install.key()).await.unwrap();
    assert_eq!(dependent.spec.package.version, "1.1.0");
    assert_eq!(dependent.spec.service_account_name, "nginx-sa");

    let status = stored_install(&cluster, &install.key()).await.status;
    assert!(status.is_succeeded());
    assert_eq!(status.resolved_version.as_deref(), Some("1.1.0"));
    assert_eq!(status.friendly_description, "Reconcile succeeded");
}

#[tokio::test]
async fn new_catalog_version_upgrades_dependent_in_place() {
    let cluster = ClusterStore::new();
    publish(&cluster, "default", "1.1.0").await;
    let install = submit(&cluster, "1.x").await;
    let reconciler = reconciler(&cluster);

    reconciler.reconcile(&install.key()).await.unwrap();
    let before = stored_dependent(&cluster, &install.key()).await.unwrap();

    publish(&cluster, "default", "1.2.0").await;
    reconciler.reconcile(&install.key()).await.unwrap();

    let after = stored_dependent(&cluster, &install.key()).await.unwrap();
    assert_eq!(after.meta.uid, before.meta.uid);
    assert_eq!(after.meta.generation, before.meta.generation + 1);
    assert_eq!(after.spec.package.version, "1.2.0");
    assert_eq!(
        stored_install(&cluster, &install.key()).await.status.resolved_version.as_deref(),
        Some("1.2.0")
    );
}

#[tokio::test]
async fn catalog_event_upgrades_dependent_through_running_controller() {
    let cluster = ClusterStore::new();
    publish(&cluster, "default", "1.1.0").await;
    let install = submit(&cluster, "1.x").await;

    let controller = Controller::new(
        cluster.installs().clone(),
        cluster.packages().clone(),
        cluster.deployments().clone(),
        &settings(),
        Arc::new(ControllerMetrics::unregistered().unwrap()),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(controller.run(shutdown_rx));

    let before = wait_for_dependent(&cluster, &install.key(), "1.1.0").await;
    publish(&cluster, "default", "1.2.0").await;
    let after = wait_for_dependent(&cluster, &install.key(), "1.2.0").await;

    assert_eq!(after.meta.uid, before.meta.uid);
    assert_eq!(after.meta.generation, before.meta.generation + 1);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn converged_request_is_not_rewritten() {
    let cluster = ClusterStore::new();
    publish(&cluster, "default", "1.0.0").await;
    let install = submit(&cluster, "").await;
    let reconciler = reconciler(&cluster);

    reconciler.reconcile(&install.key()).await.unwrap();
    let revision = cluster.revision();
    for _ in 0..3 {
        reconciler.reconcile(&install.key()).await.unwrap();
    }
    assert_eq!(cluster.revision(), revision);
}

#[tokio::test]
async fn spec_change_is_observed_with_new_generation() {
    let cluster = ClusterStore::new();
    publish(&cluster, "default", "1.0.0").await;
    publish(&cluster, "default", "2.0.0").await;
    let install = submit(&cluster, "1.x").await;
    let reconciler = reconciler(&cluster);
    reconciler.reconcile(&install.key()).await.unwrap();

    let mut changed = stored_install(&cluster, &install.key()).await;
    changed.spec.package_ref.version_selection = VersionSelection::new(">=2.0.0");
    let changed = cluster.installs().update(changed).await.unwrap();
    assert!(changed.needs_recheck());

    reconciler.reconcile(&install.key()).await.unwrap();
    let current = stored_install(&cluster, &install.key()).await;
    assert!(!current.needs_recheck());
    assert_eq!(current.status.observed_generation, 2);
    assert_eq!(current.status.resolved_version.as_deref(), Some("2.0.0"));
}

#[tokio::test]
async fn global_catalog_is_visible_and_local_entries_shadow_it() {
    let cluster = ClusterStore::new();
    publish(&cluster, "pkgi-global", "1.0.0").await;
    publish(&cluster, "pkgi-global", "1.3.0").await;
    let template = DeploymentTemplate::default();
    let local = PackageVersion::new("default", "nginx.pkg.dev", "1.3.0", template)
        .with_values_schema(serde_json::json!({"type": "object"}));
    cluster.packages().create(local).await.unwrap();
    publish(&cluster, "other", "1.9.0").await;

    let install = submit(&cluster, "1.x").await;
    reconciler(&cluster).reconcile(&install.key()).await.unwrap();

    let dependent = stored_dependent(&cluster, &install.key()).await.unwrap();
    assert_eq!(dependent.spec.package.version, "1.3.0");
    assert!(stored_install(&cluster, &install.key()).await.status.is_succeeded());
}

#[tokio::test]
async fn incompatible_versions_are_skipped() {
    let cluster = ClusterStore::new();
    publish(&cluster, "default", "1.0.0").await;
    let template = DeploymentTemplate::default();
    let mut needs_new_cluster = PackageVersion::new("default", "nginx.pkg.dev", "1.1.0", template);
    needs_new_cluster.spec.kubernetes_version_selection = Some(VersionSelection::new(">=1.30.0"));
    cluster.packages().create(needs_new_cluster).await.unwrap();

    let install = submit(&cluster, "").await;
    reconciler(&cluster).reconcile(&install.key()).await.unwrap();

    let dependent = stored_dependent(&cluster, &install.key()).await.unwrap();
    assert_eq!(dependent.spec.package.version, "1.0.0");
}

#[tokio::test]
async fn deleting_request_collects_dependent() {
    let cluster = ClusterStore::new();
    publish(&cluster, "default", "1.0.0").await;
    let install = submit(&cluster, "").await;
    let reconciler = reconciler(&cluster);
    reconciler.reconcile(&install.key()).await.unwrap();
    assert!(stored_dependent(&cluster, &install.key()).await.is_some());

    let mut events = cluster.installs().watch();
    cluster.installs().delete(&install.key()).await.unwrap();
    let WatchEvent::Deleted(owner) = events.recv().await.unwrap() else {
        panic!("expected a deletion event");
    };

    let gc = GarbageCollector::new(cluster.installs().clone(), cluster.deployments().clone());
    assert_eq!(gc.collect_dependents_of(&owner).await.unwrap(), 1);
    assert!(stored_dependent(&cluster, &install.key()).await.is_none());

    assert_eq!(reconciler.reconcile(&install.key()).await.unwrap(), Action::Done);
    assert!(stored_dependent(&cluster, &install.key()).await.is_none());
}

/// What the other writer does right before a raced update
#[derive(Clone, Copy)]
enum Rival {
    Bump,
    Delete,
}

/// Dependent store that lets another writer touch the object right before
/// each of the next `races` updates
struct RacingStore {
    inner: Arc<InMemoryStore<DependentDeployment>>,
    rival: Rival,
    races: AtomicU32,
}

impl RacingStore {
    fn new(inner: Arc<InMemoryStore<DependentDeployment>>, rival: Rival) -> Self {
        Self {
            inner,
            rival,
            races: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Store<DependentDeployment> for RacingStore {
    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<DependentDeployment>> {
        self.inner.get(key).await
    }

    async fn list(&self, namespace: Option<&str>) -> StoreResult<Vec<DependentDeployment>> {
        self.inner.list(namespace).await
    }

    async fn create(&self, object: DependentDeployment) -> StoreResult<DependentDeployment> {
        self.inner.create(object).await
    }

    async fn update(&self, object: DependentDeployment) -> StoreResult<DependentDeployment> {
        let remaining = self.races.load(Ordering::SeqCst);
        if remaining > 0 {
            self.races.store(remaining - 1, Ordering::SeqCst);
            match self.rival {
                Rival::Bump => {
                    let mut rival = self.inner.get(&object.key()).await?.unwrap();
                    rival.meta.annotations.insert("rival".into(), remaining.to_string());
                    self.inner.update(rival).await?;
                }
                Rival::Delete => {
                    self.inner.delete(&object.key()).await?;
                }
            }
        }
        self.inner.update(object).await
    }

    async fn update_status(&self, object: DependentDeployment) -> StoreResult<DependentDeployment> {
        self.inner.update_status(object).await
    }

    async fn delete(&self, key: &ObjectKey) -> StoreResult<Option<DependentDeployment>> {
        self.inner.delete(key).await
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent<DependentDeployment>> {
        self.inner.watch()
    }
}

#[tokio::test]
async fn lost_update_race_is_retried() {
    let cluster = ClusterStore::new();
    publish(&cluster, "default", "1.0.0").await;
    let install = submit(&cluster, "").await;
    let racing = Arc::new(RacingStore::new(cluster.deployments().clone(), Rival::Bump));
    let reconciler = reconciler_with(&cluster, racing.clone());
    reconciler.reconcile(&install.key()).await.unwrap();

    publish(&cluster, "default", "1.1.0").await;
    racing.races.store(2, Ordering::SeqCst);
    let action = reconciler.reconcile(&install.key()).await.unwrap();
    assert!(matches!(action, Action::Resync(_)));

    let dependent = stored_dependent(&cluster, &install.key()).await.unwrap();
    assert_eq!(dependent.spec.package.version, "1.1.0");
    assert_eq!(dependent.meta.annotations.get("rival").map(String::as_str), Some("1"));
    assert!(stored_install(&cluster, &install.key()).await.status.is_succeeded());
}

#[tokio::test]
async fn persistent_conflicts_back_off_with_failure() {
    let cluster = ClusterStore::new();
    publish(&cluster, "default", "1.0.0").await;
    let install = submit(&cluster, "").await;
    let racing = Arc::new(RacingStore::new(cluster.deployments().clone(), Rival::Bump));
    let reconciler = reconciler_with(&cluster, racing.clone());
    reconciler.reconcile(&install.key()).await.unwrap();

    publish(&cluster, "default", "1.1.0").await;
    racing.races.store(100, Ordering::SeqCst);
    assert_eq!(reconciler.reconcile(&install.key()).await.unwrap(), Action::Backoff);

    let status = stored_install(&cluster, &install.key()).await.status;
    assert!(status.is_failed());
    assert!(status.useful_error_message.unwrap().contains("3 conflicting attempts"));
    assert_eq!(
        stored_dependent(&cluster, &install.key()).await.unwrap().spec.package.version,
        "1.0.0"
    );
}

#[tokio::test]
async fn dependent_deleted_mid_update_is_recreated() {
    let cluster = ClusterStore::new();
    publish(&cluster, "default", "1.0.0").await;
    let install = submit(&cluster, "").await;
    let racing = Arc::new(RacingStore::new(cluster.deployments().clone(), Rival::Delete));
    let reconciler = reconciler_with(&cluster, racing.clone());
    reconciler.reconcile(&install.key()).await.unwrap();
    let original = stored_dependent(&cluster, &install.key()).await.unwrap();

    publish(&cluster, "default", "1.1.0").await;
    racing.races.store(1, Ordering::SeqCst);
    let action = reconciler.reconcile(&install.key()).await.unwrap();
    assert!(matches!(action, Action::Resync(_)));

    let recreated = stored_dependent(&cluster, &install.key()).await.unwrap();
    assert_ne!(recreated.meta.uid, original.meta.uid);
    assert_eq!(recreated.spec.package.version, "1.1.0");
    assert!(recreated.meta.is_controlled_by(InstallRequest::KIND, install.meta.uid));
    assert!(stored_install(&cluster, &install.key()).await.status.is_succeeded());
}

#[tokio::test]
async fn paused_request_is_left_alone_until_resumed() {
    let cluster = ClusterStore::new();
    publish(&cluster, "default", "1.0.0").await;
    let mut paused = InstallRequest::new("default", "nginx", "nginx.pkg.dev", "");
    paused.spec.paused = true;
    let install = cluster.installs().create(paused).await.unwrap();
    let reconciler = reconciler(&cluster);

    reconciler.reconcile(&install.key()).await.unwrap();
    assert!(stored_dependent(&cluster, &install.key()).await.is_none());
    assert_eq!(
        stored_install(&cluster, &install.key()).await.status.friendly_description,
        "Paused"
    );

    let mut resumed = stored_install(&cluster, &install.key()).await;
    resumed.spec.paused = false;
    cluster.installs().update(resumed).await.unwrap();
    reconciler.reconcile(&install.key()).await.unwrap();
    assert!(stored_dependent(&cluster, &install.key()).await.is_some());
}

#[tokio::test]
async fn unavailable_store_leaves_everything_untouched() {
    let cluster = ClusterStore::new();
    publish(&cluster, "default", "1.0.0").await;
    let install = submit(&cluster, "").await;
    let revision = cluster.revision();

    cluster.set_available(false);
    assert!(reconciler(&cluster).reconcile(&install.key()).await.is_err());
    cluster.set_available(true);

    assert_eq!(cluster.revision(), revision);
    assert!(stored_dependent(&cluster, &install.key()).await.is_none());
}

//! Event routing
//!
//! Changes to any of the three watched kinds become reconcile requests for
//! InstallRequest keys. Routing is a pure function of the event and, for
//! catalog changes, the InstallRequests that could be affected.

use crate::queue::WorkQueue;
use pkgi_store::{Store, StoreResult, WatchEvent};
use pkgi_types::{
    DependentDeployment, InstallRequest, ObjectKey, OwnerReference, PackageVersion, Resource,
};
use std::sync::Arc;
use tokio::sync::{broadcast, broadcast::error::RecvError, watch};

/// A change the controller reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    InstallRequestChanged(ObjectKey),
    CatalogChanged { namespace: String, ref_name: String },
    DependentChanged { namespace: String, controller: Option<OwnerReference> },
}

impl Event {
    pub fn from_install(event: &WatchEvent<InstallRequest>) -> Self {
        Event::InstallRequestChanged(event.object().key())
    }

    pub fn from_package(event: &WatchEvent<PackageVersion>) -> Self {
        let pv = event.object();
        Event::CatalogChanged {
            namespace: pv.meta.namespace.clone(),
            ref_name: pv.spec.ref_name.clone(),
        }
    }

    pub fn from_dependent(event: &WatchEvent<DependentDeployment>) -> Self {
        let meta = &event.object().meta;
        Event::DependentChanged {
            namespace: meta.namespace.clone(),
            controller: meta.controller_ref().cloned(),
        }
    }
}

/// Maps events to the InstallRequest keys they affect
#[derive(Debug, Clone)]
pub struct EventRouter {
    global_namespace: String,
}

impl EventRouter {
    pub fn new(global_namespace: impl Into<String>) -> Self {
        Self {
            global_namespace: global_namespace.into(),
        }
    }

    /// Namespace to list InstallRequests from for a catalog change in `namespace`
    ///
    /// `None` means every namespace.
    pub fn catalog_scope<'a>(&self, namespace: &'a str) -> Option<&'a str> {
        if namespace == self.global_namespace {
            None
        } else {
            Some(namespace)
        }
    }

    /// Keys to reconcile for `event`
    ///
    /// `installs` is only consulted for catalog changes and should hold the
    /// requests in [`catalog_scope`](Self::catalog_scope).
    pub fn route(&self, event: &Event, installs: &[InstallRequest]) -> Vec<ObjectKey> {
        match event {
            Event::InstallRequestChanged(key) => vec![key.clone()],
            Event::CatalogChanged { namespace, ref_name } => {
                let scope = self.catalog_scope(namespace);
                installs
                    .iter()
                    .filter(|i| &i.spec.package_ref.ref_name == ref_name)
                    .filter(|i| scope.map_or(true, |ns| i.meta.namespace == ns))
                    .map(|i| i.key())
                    .collect()
            }
            Event::DependentChanged { namespace, controller } => controller
                .iter()
                .filter(|owner| owner.kind == InstallRequest::KIND)
                .map(|owner| ObjectKey::new(namespace.clone(), owner.name.clone()))
                .collect(),
        }
    }
}

/// Feeds store watch streams into the work queue
#[derive(Clone)]
pub struct EventPump {
    router: EventRouter,
    installs: Arc<dyn Store<InstallRequest>>,
    queue: Arc<WorkQueue>,
}

impl EventPump {
    pub fn new(
        router: EventRouter,
        installs: Arc<dyn Store<InstallRequest>>,
        queue: Arc<WorkQueue>,
    ) -> Self {
        Self {
            router,
            installs,
            queue,
        }
    }

    /// Route one event into the queue
    pub async fn dispatch(&self, event: &Event) -> StoreResult<usize> {
        let installs = match event {
            Event::CatalogChanged { namespace, .. } => {
                self.installs.list(self.router.catalog_scope(namespace)).await?
            }
            _ => Vec::new(),
        };

        let keys = self.router.route(event, &installs);
        let count = keys.len();
        for key in keys {
            self.queue.add(key).await;
        }
        Ok(count)
    }

    /// Queue every InstallRequest
    pub async fn relist(&self) -> StoreResult<usize> {
        let installs = self.installs.list(None).await?;
        let count = installs.len();
        for install in installs {
            self.queue.add(install.key()).await;
        }
        tracing::debug!(count, "Queued all install requests");
        Ok(count)
    }

    /// Pump events until shutdown or until every stream closes
    pub async fn run(
        self,
        mut install_events: broadcast::Receiver<WatchEvent<InstallRequest>>,
        mut package_events: broadcast::Receiver<WatchEvent<PackageVersion>>,
        mut dependent_events: broadcast::Receiver<WatchEvent<DependentDeployment>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let event = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                received = install_events.recv() => received.map(|e| Event::from_install(&e)),
                received = package_events.recv() => received.map(|e| Event::from_package(&e)),
                received = dependent_events.recv() => received.map(|e| Event::from_dependent(&e)),
            };

            let result = match event {
                Ok(event) => self.dispatch(&event).await,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Watch stream lagged; relisting");
                    self.relist().await
                }
                Err(RecvError::Closed) => {
                    tracing::info!("Watch stream closed");
                    break;
                }
            };
            if let Err(e) = result {
                tracing::warn!(error = %e, "Failed to route event");
            }
        }
    }
}

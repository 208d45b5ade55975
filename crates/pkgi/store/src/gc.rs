//! Owner-reference garbage collection
//!
//! Deleting an owner eventually deletes every dependent whose controller
//! reference names it. Collection is asynchronous: dependents are removed
//! after the owner's deletion event is observed, or by the periodic orphan
//! sweep if that event was missed.

use crate::error::StoreResult;
use crate::traits::{Store, WatchEvent};
use pkgi_types::Resource;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast::error::RecvError, watch};
use uuid::Uuid;

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Cascading deletion of `D` objects controlled by `O` objects
pub struct GarbageCollector<O: Resource, D: Resource> {
    owners: Arc<dyn Store<O>>,
    dependents: Arc<dyn Store<D>>,
    sweep_interval: Duration,
}

impl<O: Resource, D: Resource> GarbageCollector<O, D> {
    pub fn new(owners: Arc<dyn Store<O>>, dependents: Arc<dyn Store<D>>) -> Self {
        Self {
            owners,
            dependents,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Delete every dependent whose controller owner no longer exists
    pub async fn collect_orphans(&self) -> StoreResult<usize> {
        let live: HashSet<(String, Uuid)> = self
            .owners
            .list(None)
            .await?
            .iter()
            .map(|o| (o.meta().namespace.clone(), o.meta().uid))
            .collect();

        let mut collected = 0;
        for dependent in self.dependents.list(None).await? {
            let Some(owner) = dependent.meta().controller_ref() else {
                continue;
            };
            if owner.kind != O::KIND
                || live.contains(&(dependent.meta().namespace.clone(), owner.uid))
            {
                continue;
            }
            if self.dependents.delete(&dependent.key()).await?.is_some() {
                tracing::info!(
                    kind = D::KIND,
                    key = %dependent.key(),
                    owner = %owner.name,
                    "Collected orphaned dependent"
                );
                collected += 1;
            }
        }
        Ok(collected)
    }

    /// Delete the dependents controlled by a deleted owner
    pub async fn collect_dependents_of(&self, owner: &O) -> StoreResult<usize> {
        let meta = owner.meta();
        let mut collected = 0;
        for dependent in self.dependents.list(Some(&meta.namespace)).await? {
            if !dependent.meta().is_controlled_by(O::KIND, meta.uid) {
                continue;
            }
            if self.dependents.delete(&dependent.key()).await?.is_some() {
                tracing::info!(
                    kind = D::KIND,
                    key = %dependent.key(),
                    owner = %meta.key(),
                    "Collected dependent of deleted owner"
                );
                collected += 1;
            }
        }
        Ok(collected)
    }

    /// Run until `shutdown` flips to true or its sender is dropped
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut events = self.owners.watch();
        let mut sweep = tokio::time::interval(self.sweep_interval);

        tracing::info!(owner = O::KIND, dependent = D::KIND, "Garbage collector started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = sweep.tick() => {
                    if let Err(e) = self.collect_orphans().await {
                        tracing::warn!(error = %e, "Orphan sweep failed");
                    }
                }
                event = events.recv() => match event {
                    Ok(WatchEvent::Deleted(owner)) => {
                        if let Err(e) = self.collect_dependents_of(&owner).await {
                            tracing::warn!(
                                owner = %owner.key(),
                                error = %e,
                                "Cascading delete failed"
                            );
                        }
                    }
                    Ok(WatchEvent::Applied(_)) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Garbage collector lagged; sweeping");
                        if let Err(e) = self.collect_orphans().await {
                            tracing::warn!(error = %e, "Orphan sweep failed");
                        }
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        tracing::info!(owner = O::KIND, "Garbage collector stopped");
    }
}

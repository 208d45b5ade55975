//! Dependent resource synchronization
//!
//! Keeps the DependentDeployment for an InstallRequest equal to the derived
//! spec. The dependent shares its owner's namespace and name and is updated
//! in place; it is never deleted and recreated.

use crate::error::SyncError;
use pkgi_store::{Store, StoreError};
use pkgi_types::{
    DependentDeployment, DeploymentSpec, InstallRequest, ObjectKey, ObjectMeta, OwnerReference,
    Resource,
};
use std::future::Future;
use std::sync::Arc;

/// What a sync did to the dependent
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Created(DependentDeployment),
    Updated(DependentDeployment),
    /// The stored spec already matched; nothing was written
    Unchanged(DependentDeployment),
}

impl SyncOutcome {
    pub fn deployment(&self) -> &DependentDeployment {
        match self {
            SyncOutcome::Created(d) | SyncOutcome::Updated(d) | SyncOutcome::Unchanged(d) => d,
        }
    }

    /// Label for the write, if one happened
    pub fn write(&self) -> Option<&'static str> {
        match self {
            SyncOutcome::Created(_) => Some("create"),
            SyncOutcome::Updated(_) => Some("update"),
            SyncOutcome::Unchanged(_) => None,
        }
    }
}

/// Get-or-create-then-update for DependentDeployments
#[derive(Clone)]
pub struct Synchronizer {
    deployments: Arc<dyn Store<DependentDeployment>>,
    max_retries: u32,
}

impl Synchronizer {
    pub fn new(deployments: Arc<dyn Store<DependentDeployment>>, max_retries: u32) -> Self {
        Self {
            deployments,
            max_retries,
        }
    }

    /// Converge the dependent of `owner` onto `desired`
    ///
    /// Writes that lose an optimistic-concurrency race restart from a fresh
    /// read, up to the retry bound. A delete between the read and the
    /// update counts as a lost race.
    pub async fn sync(
        &self,
        owner: &InstallRequest,
        desired: &DeploymentSpec,
    ) -> Result<SyncOutcome, SyncError> {
        self.retrying(owner.key(), || self.try_sync(owner, desired)).await
    }

    /// Mark the dependent of `owner` paused, leaving the rest of its spec
    ///
    /// Returns `None` when there is no dependent to pause.
    pub async fn pause(&self, owner: &InstallRequest) -> Result<Option<SyncOutcome>, SyncError> {
        self.retrying(owner.key(), || self.try_pause(owner)).await
    }

    async fn retrying<T, F, Fut>(&self, key: ObjectKey, mut write: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let attempts = self.max_retries + 1;

        for attempt in 1..=attempts {
            match write().await {
                Err(SyncError::Store(e)) if lost_race(&e) => {
                    tracing::debug!(
                        key = %key,
                        attempt,
                        error = %e,
                        "Dependent write lost a race, retrying"
                    );
                }
                result => return result,
            }
        }

        tracing::warn!(key = %key, attempts, "Giving up on conflicting dependent writes");
        Err(SyncError::Conflict { key, attempts })
    }

    async fn try_sync(
        &self,
        owner: &InstallRequest,
        desired: &DeploymentSpec,
    ) -> Result<SyncOutcome, SyncError> {
        let key = owner.key();

        let Some(mut existing) = self.owned(owner).await? else {
            let created = self.deployments.create(new_dependent(owner, desired)).await?;
            tracing::info!(
                key = %key,
                version = %desired.package.version,
                "Created dependent deployment"
            );
            return Ok(SyncOutcome::Created(created));
        };

        if existing.spec == *desired {
            return Ok(SyncOutcome::Unchanged(existing));
        }

        let from = existing.spec.package.version.clone();
        existing.spec = desired.clone();
        let updated = self.deployments.update(existing).await?;
        tracing::info!(
            key = %key,
            from = %from,
            to = %desired.package.version,
            generation = updated.meta.generation,
            "Updated dependent deployment"
        );
        Ok(SyncOutcome::Updated(updated))
    }

    async fn try_pause(&self, owner: &InstallRequest) -> Result<Option<SyncOutcome>, SyncError> {
        let Some(mut existing) = self.owned(owner).await? else {
            return Ok(None);
        };
        if existing.spec.paused {
            return Ok(Some(SyncOutcome::Unchanged(existing)));
        }

        existing.spec.paused = true;
        let updated = self.deployments.update(existing).await?;
        tracing::info!(key = %owner.key(), "Paused dependent deployment");
        Ok(Some(SyncOutcome::Updated(updated)))
    }

    /// The dependent of `owner`, if any, refusing one controlled by another object
    async fn owned(
        &self,
        owner: &InstallRequest,
    ) -> Result<Option<DependentDeployment>, SyncError> {
        let key = owner.key();
        let Some(existing) = self.deployments.get(&key).await? else {
            return Ok(None);
        };

        if !existing.meta.is_controlled_by(InstallRequest::KIND, owner.meta.uid) {
            let controller = existing
                .meta
                .controller_ref()
                .map(|r| format!("{} {} ({})", r.kind, r.name, r.uid))
                .unwrap_or_else(|| "none".to_string());
            return Err(SyncError::NotOwned { key, controller });
        }
        Ok(Some(existing))
    }
}

fn lost_race(err: &StoreError) -> bool {
    err.is_conflict() || err.is_already_exists() || err.is_not_found()
}

fn new_dependent(owner: &InstallRequest, desired: &DeploymentSpec) -> DependentDeployment {
    let mut meta = ObjectMeta::new(owner.meta.namespace.clone(), owner.meta.name.clone());
    meta.owner_references.push(OwnerReference::controller_of(owner));
    DependentDeployment {
        meta,
        spec: desired.clone(),
        status: Default::default(),
    }
}

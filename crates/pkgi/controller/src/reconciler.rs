//! Reconcile pass for a single InstallRequest
//!
//! A pass runs fetch, resolve, derive, sync and report in that order. Any
//! step that fails is reported on the request's status and the pass
//! returns the requeue decision. Only store failures escape as errors; in
//! that case status is left alone and the queue backs off.

use crate::catalog::{Catalog, Compatibility};
use crate::config::Settings;
use crate::deriver;
use crate::error::{ReconcileError, Result, SyncError};
use crate::metrics::{ControllerMetrics, PassOutcome};
use crate::status::{Outcome, StatusReporter};
use crate::sync::{SyncOutcome, Synchronizer};
use pkgi_resolver::{resolve, Resolution};
use pkgi_store::{Store, StoreError};
use pkgi_types::{DependentDeployment, EngineSignal, InstallRequest, ObjectKey, PackageVersion};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::instrument;

/// What to do with a key after its pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Reconcile again after the resync period
    Resync(Duration),
    /// Retry after the key's next backoff step
    Backoff,
    /// Nothing left to do
    Done,
}

/// Drives InstallRequests toward their desired state
pub struct Reconciler {
    installs: Arc<dyn Store<InstallRequest>>,
    catalog: Catalog,
    compatibility: Compatibility,
    synchronizer: Synchronizer,
    reporter: StatusReporter,
    metrics: Arc<ControllerMetrics>,
    default_sync_period: Duration,
}

impl Reconciler {
    pub fn new(
        installs: Arc<dyn Store<InstallRequest>>,
        packages: Arc<dyn Store<PackageVersion>>,
        deployments: Arc<dyn Store<DependentDeployment>>,
        settings: &Settings,
        metrics: Arc<ControllerMetrics>,
    ) -> Self {
        let retries = settings.controller.max_sync_retries;
        Self {
            catalog: Catalog::new(packages, &settings.catalog),
            compatibility: Compatibility::new(&settings.compatibility),
            synchronizer: Synchronizer::new(deployments, retries),
            reporter: StatusReporter::new(installs.clone(), retries),
            installs,
            metrics,
            default_sync_period: settings.controller.default_sync_period(),
        }
    }

    /// Run one pass for `key`
    #[instrument(skip(self, key), fields(install = %key))]
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        let started = Instant::now();
        let result = self.run_pass(key).await;

        let outcome = match &result {
            Ok((_, outcome)) => *outcome,
            Err(_) => PassOutcome::Error,
        };
        self.metrics
            .record_pass(outcome, started.elapsed().as_secs_f64());

        match result {
            Ok((action, outcome)) => {
                tracing::debug!(outcome = outcome.as_str(), ?action, "Pass finished");
                Ok(action)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Pass aborted");
                Err(e)
            }
        }
    }

    /// Record that the pass for `key` ran past its deadline
    pub async fn report_timeout(&self, key: &ObjectKey, after: Duration) -> Result<()> {
        self.metrics.record_pass(PassOutcome::Error, after.as_secs_f64());
        let Some(install) = self.installs.get(key).await? else {
            return Ok(());
        };
        let message = ReconcileError::Timeout {
            key: key.clone(),
            after,
        }
        .to_string();
        let outcome = Outcome::Failed {
            version: install.status.last_attempted_version.clone(),
            message,
        };
        self.report(&install, &outcome).await
    }

    async fn run_pass(&self, key: &ObjectKey) -> Result<(Action, PassOutcome)> {
        let Some(install) = self.installs.get(key).await? else {
            tracing::debug!("Install request not found");
            return Ok((Action::Done, PassOutcome::Succeeded));
        };
        let resync = Action::Resync(self.sync_period(&install));

        if install.spec.paused {
            self.pause_dependent(&install).await?;
            self.report(&install, &Outcome::Paused).await?;
            return Ok((resync, PassOutcome::Succeeded));
        }

        let package = match self.select_package(&install).await? {
            Ok(package) => package,
            Err(message) => {
                self.report(&install, &Outcome::Failed { version: None, message }).await?;
                return Ok((resync, PassOutcome::Failed));
            }
        };
        let version = package.spec.version.clone();

        let desired = match deriver::derive(&install, &package) {
            Ok(spec) => spec,
            Err(e) => {
                tracing::info!(version = %version, error = %e, "Values rejected");
                let outcome = Outcome::Failed {
                    version: Some(version),
                    message: e.to_string(),
                };
                self.report(&install, &outcome).await?;
                return Ok((resync, PassOutcome::Failed));
            }
        };

        match self.synchronizer.sync(&install, &desired).await {
            Ok(synced) => {
                if let Some(operation) = synced.write() {
                    self.metrics.record_sync_write(operation);
                }
                let signal = synced.deployment().engine_signal();
                let pass_outcome = match signal {
                    EngineSignal::Failed { .. } => PassOutcome::Failed,
                    _ => PassOutcome::Succeeded,
                };
                self.report(&install, &Outcome::Synced { version, signal }).await?;
                Ok((resync, pass_outcome))
            }
            Err(e) if e.is_unavailable() => Err(store_error(e)),
            Err(e) => {
                tracing::warn!(version = %version, error = %e, "Dependent sync failed");
                let pass_outcome = match e {
                    SyncError::Conflict { .. } => PassOutcome::Conflict,
                    _ => PassOutcome::Failed,
                };
                let outcome = Outcome::Failed {
                    version: Some(version),
                    message: e.to_string(),
                };
                self.report(&install, &outcome).await?;
                Ok((Action::Backoff, pass_outcome))
            }
        }
    }

    /// Pick the PackageVersion to install
    ///
    /// The outer result carries store failures; the inner one carries a
    /// reportable resolution failure.
    async fn select_package(
        &self,
        install: &InstallRequest,
    ) -> Result<std::result::Result<PackageVersion, String>> {
        let package_ref = &install.spec.package_ref;
        let candidates: Vec<PackageVersion> = self
            .catalog
            .versions(&install.meta.namespace, &package_ref.ref_name)
            .await?
            .into_iter()
            .filter(|pv| self.compatibility.admits(pv))
            .collect();

        let versions: Vec<&str> = candidates.iter().map(|pv| pv.spec.version.as_str()).collect();
        let selected = match resolve(&package_ref.version_selection, &versions) {
            Ok(Resolution::Selected { version }) => version,
            Ok(Resolution::NoMatch(miss)) => {
                return Ok(Err(format!("{}: {}", package_ref.ref_name, miss)));
            }
            Err(e) => return Ok(Err(format!("invalid version selection: {}", e))),
        };

        tracing::debug!(version = %selected, candidates = versions.len(), "Resolved version");
        let package = candidates
            .into_iter()
            .find(|pv| pv.spec.version == selected)
            .ok_or_else(|| format!("resolved version {} vanished from the catalog", selected));
        Ok(package)
    }

    /// Carry the pause onto an existing dependent
    ///
    /// Only store outages fail the pass; anything else is logged and the
    /// request is still reported as paused.
    async fn pause_dependent(&self, install: &InstallRequest) -> Result<()> {
        match self.synchronizer.pause(install).await {
            Ok(paused) => {
                if let Some(operation) = paused.as_ref().and_then(SyncOutcome::write) {
                    self.metrics.record_sync_write(operation);
                }
                Ok(())
            }
            Err(e) if e.is_unavailable() => Err(store_error(e)),
            Err(e) => {
                tracing::warn!(error = %e, "Could not pause dependent");
                Ok(())
            }
        }
    }

    async fn report(&self, install: &InstallRequest, outcome: &Outcome) -> Result<()> {
        if self.reporter.report(install, outcome).await? {
            self.metrics.record_status_write();
        }
        Ok(())
    }

    /// A zero period counts as unset
    fn sync_period(&self, install: &InstallRequest) -> Duration {
        install
            .spec
            .sync_period
            .filter(|period| !period.is_zero())
            .unwrap_or(self.default_sync_period)
    }
}

fn store_error(err: SyncError) -> ReconcileError {
    match err {
        SyncError::Store(e) => ReconcileError::Store(e),
        other => ReconcileError::Store(StoreError::Unavailable(other.to_string())),
    }
}

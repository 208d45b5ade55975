//! Controller runtime
//!
//! Watches the three resource kinds, routes changes into the work queue and
//! runs a fixed pool of workers that reconcile one key at a time.

use crate::config::Settings;
use crate::metrics::ControllerMetrics;
use crate::queue::WorkQueue;
use crate::reconciler::{Action, Reconciler};
use crate::router::{EventPump, EventRouter};
use pkgi_store::Store;
use pkgi_types::{DependentDeployment, InstallRequest, ObjectKey, PackageVersion};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Reconciles InstallRequests until shut down
pub struct Controller {
    installs: Arc<dyn Store<InstallRequest>>,
    packages: Arc<dyn Store<PackageVersion>>,
    deployments: Arc<dyn Store<DependentDeployment>>,
    reconciler: Arc<Reconciler>,
    queue: Arc<WorkQueue>,
    router: EventRouter,
    metrics: Arc<ControllerMetrics>,
    workers: usize,
    pass_timeout: Duration,
    relist_backoff: (Duration, Duration),
}

impl Controller {
    pub fn new(
        installs: Arc<dyn Store<InstallRequest>>,
        packages: Arc<dyn Store<PackageVersion>>,
        deployments: Arc<dyn Store<DependentDeployment>>,
        settings: &Settings,
        metrics: Arc<ControllerMetrics>,
    ) -> Self {
        let config = &settings.controller;
        let reconciler = Reconciler::new(
            installs.clone(),
            packages.clone(),
            deployments.clone(),
            settings,
            metrics.clone(),
        );
        Self {
            installs,
            packages,
            deployments,
            reconciler: Arc::new(reconciler),
            queue: Arc::new(WorkQueue::new(config.backoff_base(), config.backoff_max())),
            router: EventRouter::new(settings.catalog.global_namespace.clone()),
            metrics,
            workers: config.workers.max(1),
            pass_timeout: config.pass_timeout(),
            relist_backoff: (config.backoff_base(), config.backoff_max()),
        }
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Run until `shutdown` turns true
    ///
    /// Watches are subscribed before the initial listing so no change made
    /// in between is missed. A listing that fails is retried with backoff
    /// while the workers and event pump keep running. In-flight passes
    /// finish before this returns.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let install_events = self.installs.watch();
        let package_events = self.packages.watch();
        let dependent_events = self.deployments.watch();

        let pump = EventPump::new(self.router.clone(), self.installs.clone(), self.queue.clone());
        let pump_handle = tokio::spawn(pump.clone().run(
            install_events,
            package_events,
            dependent_events,
            shutdown.clone(),
        ));

        let workers: Vec<_> = (0..self.workers)
            .map(|id| {
                let worker = Worker {
                    id,
                    reconciler: self.reconciler.clone(),
                    queue: self.queue.clone(),
                    metrics: self.metrics.clone(),
                    pass_timeout: self.pass_timeout,
                };
                tokio::spawn(worker.run())
            })
            .collect();

        let mut shutdown = shutdown;
        if let Some(queued) = self.initial_relist(&pump, &mut shutdown).await {
            tracing::info!(workers = self.workers, queued, "Controller started");
        }

        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }

        tracing::info!("Controller shutting down");
        self.queue.shutdown().await;

        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Worker task failed");
            }
        }
        if let Err(e) = pump_handle.await {
            tracing::error!(error = %e, "Event pump task failed");
        }

        tracing::info!("Controller stopped");
    }

    /// Queue every InstallRequest, retrying until the store answers
    ///
    /// Returns `None` if shutdown was requested first.
    async fn initial_relist(
        &self,
        pump: &EventPump,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<usize> {
        let (base, max) = self.relist_backoff;
        let mut delay = base;
        loop {
            match pump.relist().await {
                Ok(queued) => return Some(queued),
                Err(e) => {
                    tracing::warn!(error = %e, ?delay, "Initial listing failed, retrying");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return None;
                    }
                }
            }
            delay = delay.saturating_mul(2).min(max);
        }
    }
}

struct Worker {
    id: usize,
    reconciler: Arc<Reconciler>,
    queue: Arc<WorkQueue>,
    metrics: Arc<ControllerMetrics>,
    pass_timeout: Duration,
}

impl Worker {
    async fn run(self) {
        tracing::debug!(worker = self.id, "Worker started");
        while let Some(key) = self.queue.get().await {
            self.process(&key).await;
            self.queue.done(&key).await;
            self.metrics.set_queue_depth(self.queue.len().await);
        }
        tracing::debug!(worker = self.id, "Worker stopped");
    }

    async fn process(&self, key: &ObjectKey) {
        let pass = tokio::time::timeout(self.pass_timeout, self.reconciler.reconcile(key)).await;

        match pass {
            Ok(Ok(Action::Resync(period))) => {
                self.queue.forget(key).await;
                self.queue.add_after(key.clone(), period).await;
            }
            Ok(Ok(Action::Done)) => self.queue.forget(key).await,
            Ok(Ok(Action::Backoff)) => {
                let delay = self.queue.add_rate_limited(key.clone()).await;
                tracing::debug!(install = %key, ?delay, "Backing off");
            }
            Ok(Err(e)) => {
                let delay = self.queue.add_rate_limited(key.clone()).await;
                tracing::warn!(install = %key, error = %e, ?delay, "Reconcile failed, backing off");
            }
            Err(_) => {
                tracing::warn!(
                    install = %key,
                    timeout = ?self.pass_timeout,
                    "Reconcile pass timed out"
                );
                if let Err(e) = self.reconciler.report_timeout(key, self.pass_timeout).await {
                    tracing::warn!(install = %key, error = %e, "Failed to report timeout");
                }
                self.queue.add_rate_limited(key.clone()).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;
    use pkgi_store::ClusterStore;
    use pkgi_types::{DeploymentTemplate, Resource};

    async fn seed(cluster: &ClusterStore) -> InstallRequest {
        let template = DeploymentTemplate::default();
        let pv = PackageVersion::new("default", "nginx.pkg.dev", "1.0.0", template);
        cluster.packages().create(pv).await.unwrap();
        cluster
            .installs()
            .create(InstallRequest::new("default", "nginx", "nginx.pkg.dev", "1.x"))
            .await
            .unwrap()
    }

    fn controller(cluster: &ClusterStore, settings: &Settings) -> Controller {
        Controller::new(
            cluster.installs().clone(),
            cluster.packages().clone(),
            cluster.deployments().clone(),
            settings,
            Arc::new(ControllerMetrics::unregistered().unwrap()),
        )
    }

    async fn wait_for_success(cluster: &ClusterStore, key: &ObjectKey) -> bool {
        for _ in 0..200 {
            let current = cluster.installs().get(key).await.unwrap().unwrap();
            if current.status.is_succeeded() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_controller_converges_existing_requests_and_stops() {
        let cluster = ClusterStore::new();
        let install = seed(&cluster).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(controller(&cluster, &Settings::default()).run(shutdown_rx));

        assert!(wait_for_success(&cluster, &install.key()).await);
        assert!(cluster.deployments().get(&install.key()).await.unwrap().is_some());

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_startup_outage_is_retried_until_the_store_returns() {
        let cluster = ClusterStore::new();
        let install = seed(&cluster).await;
        let settings = Settings {
            controller: ControllerConfig {
                backoff_base_ms: 10,
                backoff_max_secs: 1,
                ..Default::default()
            },
            ..Default::default()
        };

        cluster.set_available(false);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(controller(&cluster, &settings).run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_finished());

        cluster.set_available(true);
        assert!(wait_for_success(&cluster, &install.key()).await);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_during_startup_outage() {
        let cluster = ClusterStore::new();
        cluster.set_available(false);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(controller(&cluster, &Settings::default()).run(shutdown_rx));
        tokio::time::sleep(Duration::from_millis(20)).await;

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}

//! Prometheus metrics for the controller

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// How a reconcile pass ended, used as the `outcome` label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Succeeded,
    Failed,
    Conflict,
    Error,
}

impl PassOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassOutcome::Succeeded => "succeeded",
            PassOutcome::Failed => "failed",
            PassOutcome::Conflict => "conflict",
            PassOutcome::Error => "error",
        }
    }
}

/// Metrics for reconcile passes and the writes they make
pub struct ControllerMetrics {
    /// Passes by outcome
    pub passes_total: IntCounterVec,

    /// Pass duration by outcome
    pub pass_duration_seconds: HistogramVec,

    /// Dependent writes by operation (create, update)
    pub sync_writes_total: IntCounterVec,

    /// Status writes
    pub status_writes_total: IntCounter,

    /// Keys waiting in the work queue
    pub queue_depth: IntGauge,
}

impl ControllerMetrics {
    /// Create and register controller metrics
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let passes_total = IntCounterVec::new(
            Opts::new("pkgi_reconcile_passes_total", "Reconcile passes"),
            &["outcome"],
        )?;
        registry.register(Box::new(passes_total.clone()))?;

        let pass_duration_seconds = HistogramVec::new(
            HistogramOpts::new("pkgi_reconcile_pass_duration_seconds", "Reconcile pass duration")
                .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]),
            &["outcome"],
        )?;
        registry.register(Box::new(pass_duration_seconds.clone()))?;

        let sync_writes_total = IntCounterVec::new(
            Opts::new("pkgi_dependent_writes_total", "Dependent deployment writes"),
            &["operation"],
        )?;
        registry.register(Box::new(sync_writes_total.clone()))?;

        let status_writes_total =
            IntCounter::new("pkgi_status_writes_total", "Install request status writes")?;
        registry.register(Box::new(status_writes_total.clone()))?;

        let queue_depth = IntGauge::new("pkgi_work_queue_depth", "Keys waiting in the work queue")?;
        registry.register(Box::new(queue_depth.clone()))?;

        Ok(Self {
            passes_total,
            pass_duration_seconds,
            sync_writes_total,
            status_writes_total,
            queue_depth,
        })
    }

    /// Metrics registered against a throwaway registry
    pub fn unregistered() -> prometheus::Result<Self> {
        Self::new(&Registry::new())
    }

    pub fn record_pass(&self, outcome: PassOutcome, duration_secs: f64) {
        self.passes_total.with_label_values(&[outcome.as_str()]).inc();
        self.pass_duration_seconds
            .with_label_values(&[outcome.as_str()])
            .observe(duration_secs);
    }

    pub fn record_sync_write(&self, operation: &str) {
        self.sync_writes_total.with_label_values(&[operation]).inc();
    }

    pub fn record_status_write(&self) {
        self.status_writes_total.inc();
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(i64::try_from(depth).unwrap_or(i64::MAX));
    }
}

/// Export metrics in Prometheus text format
pub fn export(registry: &Registry) -> prometheus::Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

//! InstallRequest status reporting
//!
//! The status after a pass is a function of the previous status, the
//! generation the pass worked on and the pass outcome. It is written only
//! when it differs from what is stored, so a converged request costs no
//! writes.

use pkgi_store::{Store, StoreError, StoreResult};
use pkgi_types::{
    Condition, ConditionType, EngineSignal, InstallRequest, ReconciliationStatus, Resource,
};
use std::sync::Arc;

/// Longest failure summary kept in the friendly description
const SUMMARY_LIMIT: usize = 80;

/// How a pass ended, as far as status is concerned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Reconciliation is suspended
    Paused,
    /// The dependent matches the resolved version; `signal` is the engine's view of it
    Synced { version: String, signal: EngineSignal },
    /// The pass failed; `version` is set when resolution got that far
    Failed { version: Option<String>, message: String },
}

/// Compute the status a pass should leave behind
pub fn compute(
    previous: &ReconciliationStatus,
    generation: i64,
    outcome: &Outcome,
) -> ReconciliationStatus {
    let mut status = previous.clone();
    status.observed_generation = generation;

    match outcome {
        Outcome::Paused => {
            status.friendly_description = "Paused".to_string();
        }
        Outcome::Synced { version, signal } => {
            status.resolved_version = Some(version.clone());
            status.last_attempted_version = Some(version.clone());
            match signal {
                EngineSignal::Progressing => {
                    set_condition(&mut status, Condition::new(ConditionType::Reconciling));
                    status.friendly_description = "Reconciling".to_string();
                    status.useful_error_message = None;
                }
                EngineSignal::Failed { message } => fail(&mut status, message),
                EngineSignal::Silent | EngineSignal::Succeeded => {
                    set_condition(&mut status, Condition::new(ConditionType::ReconcileSucceeded));
                    status.friendly_description = "Reconcile succeeded".to_string();
                    status.useful_error_message = None;
                }
            }
        }
        Outcome::Failed { version, message } => {
            if let Some(version) = version {
                status.resolved_version = Some(version.clone());
                status.last_attempted_version = Some(version.clone());
            }
            fail(&mut status, message);
        }
    }

    status
}

fn set_condition(status: &mut ReconciliationStatus, condition: Condition) {
    status.conditions = vec![condition];
}

fn fail(status: &mut ReconciliationStatus, message: &str) {
    set_condition(
        status,
        Condition::new(ConditionType::ReconcileFailed).with_message(message),
    );
    status.friendly_description = format!("Reconcile failed: {}", summarize(message));
    status.useful_error_message = Some(message.to_string());
}

fn summarize(message: &str) -> String {
    let first_line = message.lines().next().unwrap_or_default();
    if first_line.chars().count() <= SUMMARY_LIMIT {
        first_line.to_string()
    } else {
        let mut short: String = first_line.chars().take(SUMMARY_LIMIT).collect();
        short.push_str("...");
        short
    }
}

/// Persists computed status with write suppression
#[derive(Clone)]
pub struct StatusReporter {
    installs: Arc<dyn Store<InstallRequest>>,
    max_retries: u32,
}

impl StatusReporter {
    pub fn new(installs: Arc<dyn Store<InstallRequest>>, max_retries: u32) -> Self {
        Self {
            installs,
            max_retries,
        }
    }

    /// Record `outcome` for `install`, returning whether anything was written
    ///
    /// A conflicting write re-reads the request and recomputes from the fresh
    /// status. A request deleted in the meantime is not an error.
    pub async fn report(&self, install: &InstallRequest, outcome: &Outcome) -> StoreResult<bool> {
        let key = install.key();
        let generation = install.meta.generation;
        let mut current = install.clone();
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            let desired = compute(&current.status, generation, outcome);
            if desired == current.status {
                return Ok(false);
            }

            let mut next = current.clone();
            next.set_status(desired);
            match self.installs.update_status(next).await {
                Ok(_) => {
                    tracing::debug!(key = %key, attempt, "Wrote install status");
                    return Ok(true);
                }
                Err(e) if e.is_not_found() => return Ok(false),
                Err(e) if e.is_conflict() => {
                    tracing::debug!(key = %key, attempt, "Status write conflicted, re-reading");
                    last_error = Some(e);
                    match self.installs.get(&key).await? {
                        Some(fresh) => current = fresh,
                        None => return Ok(false),
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            StoreError::Unavailable(format!("status write for {} was not attempted", key))
        }))
    }
}

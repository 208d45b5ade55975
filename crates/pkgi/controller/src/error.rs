//! Error types for pkgi-controller

use crate::schema::Violation;
use pkgi_store::StoreError;
use pkgi_types::ObjectKey;
use std::time::Duration;
use thiserror::Error;

/// User values rejected by a package's values schema
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("values for {ref_name} {version} do not match its schema: {}", join(.violations))]
pub struct ValidationError {
    pub ref_name: String,
    pub version: String,
    pub violations: Vec<Violation>,
}

fn join(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failures while creating or updating a dependent
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// A same-named dependent belongs to another owner
    #[error(
        "{key} exists and is not controlled by this install request (controller: {controller})"
    )]
    NotOwned { key: ObjectKey, controller: String },

    /// Every attempt lost an optimistic-concurrency race
    #[error("gave up writing {key} after {attempts} conflicting attempts")]
    Conflict { key: ObjectKey, attempts: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    /// The backend is unreachable; nothing about the request can be reported
    pub fn is_unavailable(&self) -> bool {
        matches!(self, SyncError::Store(StoreError::Unavailable(_)))
    }
}

/// Errors that end a pass without a status report
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("reconcile pass for {key} exceeded {after:?}")]
    Timeout { key: ObjectKey, after: Duration },
}

/// Result type for reconciler operations
pub type Result<T> = std::result::Result<T, ReconcileError>;

//! Error types for pkgi-store

use pkgi_types::ObjectKey;
use thiserror::Error;

/// Store operation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: ObjectKey },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: &'static str, key: ObjectKey },

    /// The write carried a stale resource version
    #[error(
        "conflict writing {kind} {key}: expected resource version {expected:?}, found {current:?}"
    )]
    Conflict {
        kind: &'static str,
        key: ObjectKey,
        expected: String,
        current: String,
    },

    /// The backend cannot be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid object: {0}")]
    Invalid(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

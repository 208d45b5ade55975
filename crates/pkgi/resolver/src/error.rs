//! Resolver error types

use thiserror::Error;

/// A constraint expression that cannot be evaluated
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstraintError {
    #[error("Invalid version '{version}' in constraint '{constraint}': {reason}")]
    InvalidVersion {
        constraint: String,
        version: String,
        reason: String,
    },

    #[error("Invalid operator '{operator}' in constraint '{constraint}'")]
    InvalidOperator { constraint: String, operator: String },

    #[error("Unsupported constraint '{constraint}': {reason}")]
    Unsupported { constraint: String, reason: String },
}

/// Result type for resolver operations
pub type Result<T> = std::result::Result<T, ConstraintError>;

//! Error types for the resolution engine

use std::sync::Arc;
use thiserror::Error;

/// Resolution engine errors
#[derive(Debug, Error)]
pub enum StratumError {
    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Subject identifier rejected by the subject type's validator
    #[error("Invalid identifier '{identifier}' for subject type '{subject_type}'")]
    InvalidIdentifier {
        subject_type: String,
        identifier: String,
    },

    /// Backing data store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Failure observed through a shared in-flight bake
    #[error("{0}")]
    Shared(Arc<StratumError>),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for resolution operations
pub type Result<T> = std::result::Result<T, StratumError>;

//! Solver errors
//!
//! Every failure surfaced by the solver falls into one of three kinds. Collaborator
//! failures are wrapped, never recovered from.

use thiserror::Error;

/// Errors returned by solver construction and queries
#[derive(Debug, Error)]
pub enum SolverError {
    /// The configuration is missing a required option or could not be read
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// The model could not be fetched or loaded
    #[error("Failed to load model: {0}")]
    ModelLoad(String),
    /// A chat completion request failed
    #[error("Generation failed: {0}")]
    Generation(String),
}

pub type Result<T> = std::result::Result<T, SolverError>;

impl From<crate::storage::StorageError> for SolverError {
    fn from(err: crate::storage::StorageError) -> Self {
        SolverError::ModelLoad(err.to_string())
    }
}

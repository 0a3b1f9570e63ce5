//! Error types for runtime operations.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors surfaced by a container runtime backend.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime API error: {0}")]
    Api(String),

    #[error("event stream error: {0}")]
    Stream(String),

    #[error("container {0} not found")]
    ContainerNotFound(String),

    #[error("service {0} not found")]
    ServiceNotFound(String),

    #[error("container {container} is missing label {label}")]
    MissingLabel { container: String, label: String },

    #[error("service {0} is not in replicated mode")]
    NotReplicated(String),

    #[error("no published port found for service {0}")]
    NoPublishedPort(String),
}

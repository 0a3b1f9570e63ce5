//! Error types for probe operations.

use thiserror::Error;

/// Result type alias for probe operations.
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Errors surfaced by a probe backend.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to load probe object: {0}")]
    Load(String),

    #[error("failed to attach probe: {0}")]
    Attach(String),

    #[error("kernel map update failed: {0}")]
    MapUpdate(String),

    #[error("ring reader error: {0}")]
    Reader(String),
}

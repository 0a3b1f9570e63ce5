//! Error types for monitor sampling.

use thiserror::Error;

/// Result type alias for monitor sampling operations.
pub type MonitorResult<T> = Result<T, MonitorError>;

/// Errors surfaced while reading resource counters.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("counter read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse counter value: {0}")]
    Parse(String),

    #[error("counter {counter} not found for container {container}")]
    MissingCounter { container: String, counter: String },
}

//! Error types for control-plane operations.

use thiserror::Error;

/// Result type alias for control-plane operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors surfaced by the peer client.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("request to peer failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("peer {peer} rejected request with {status}: {body}")]
    Rejected {
        peer: String,
        status: u16,
        body: String,
    },

    #[error("no manager node found among peers")]
    NoManager,
}

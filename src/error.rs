//! Error types for cortex-fabric.

use thiserror::Error;

/// Result type alias using cortex-fabric's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// A single edge that failed during a best-effort edge batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeFailure {
    /// Relation label of the failed edge (e.g. "RELATES_TO_TOPIC")
    pub relation: String,
    /// Source node id
    pub from: String,
    /// Target node id
    pub to: String,
    /// Underlying failure message
    pub message: String,
}

impl std::fmt::Display for EdgeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} -> {}: {}",
            self.relation, self.from, self.to, self.message
        )
    }
}

/// Errors that can occur during fabric operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Required metadata missing; rejected before any network call
    #[error("Validation failed, missing fields: {}", missing.join(", "))]
    Validation { missing: Vec<String> },

    /// Store or embedding service unreachable after bounded retries
    #[error("Network error during {operation} after {attempts} attempt(s): {message}")]
    Network {
        operation: String,
        attempts: u32,
        message: String,
    },

    /// A node was written but some edges failed; nothing is rolled back
    #[error("Partial write for node {node_id}: {} edge(s) failed", failed_edges.len())]
    PartialWrite {
        node_id: String,
        failed_edges: Vec<EdgeFailure>,
    },

    /// Embedding service error
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error from the list of missing field names.
    pub fn validation(missing: Vec<String>) -> Self {
        Self::Validation { missing }
    }

    /// Create a network error for a named operation.
    pub fn network(
        operation: impl Into<String>,
        attempts: u32,
        message: impl Into<String>,
    ) -> Self {
        Self::Network {
            operation: operation.into(),
            attempts,
            message: message.into(),
        }
    }

    /// Create a partial-write error naming the failed edges.
    pub fn partial_write(node_id: impl Into<String>, failed_edges: Vec<EdgeFailure>) -> Self {
        Self::PartialWrite {
            node_id: node_id.into(),
            failed_edges,
        }
    }

    /// Create an embedding error.
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding(message.into())
    }

    /// True when retrying the whole higher-level operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::PartialWrite { .. })
    }
}

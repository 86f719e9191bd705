//! # Propagation Errors
//!
//! One error enum for the whole engine. Each collaborator failure keeps the
//! backend's own message text so the HTTP layer can surface it verbatim.

use thiserror::Error;

/// Failures raised anywhere in the ingestion pipeline.
#[derive(Debug, Error)]
pub enum PropagationError {
    /// The incoming entity failed the minimal schema check.
    #[error("Invalid metadata entity: {0}")]
    InvalidEntity(String),

    #[error("Document store error: {0}")]
    DocumentStore(String),

    #[error("Graph store error: {0}")]
    GraphStore(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, PropagationError>;

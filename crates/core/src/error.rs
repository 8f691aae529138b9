//! Error types for the ContextFabric domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum.

use thiserror::Error;

/// The top-level error type for all ContextFabric operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Errors from the session file store and the vector store adapter.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("I/O error for session {id}: {reason}")]
    Io { id: String, reason: String },

    #[error("Corrupt session file {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("Vector store error: {0}")]
    Vector(String),
}

/// Errors from the LLM gateway client.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Gateway request failed: {message} (status: {status})")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Empty response: {0}")]
    EmptyResponse(String),
}

/// Errors from the two-tier memory service.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// The bounded ingest queue is full; the task was dropped.
    #[error("memory ingest channel full")]
    QueueFull,

    #[error("Model not configured: {0}")]
    ModelNotConfigured(String),

    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

/// Errors from pipeline execution. Only the history loader is fatal;
/// later passes degrade into internal traces instead of returning these.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pass {pass} failed: {reason}")]
    PassFailed { pass: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

//! Crate-wide error type.
//!
//! Turn-level orchestration prefers degrade-and-continue (see
//! [`crate::retriever`] and the generation phases in [`crate::turn`]);
//! ingestion fails loud for data-integrity steps and soft for optimization
//! steps. `RagError` is the fatal surface — anything that reaches the caller
//! as an `Err` was not recoverable inside the pipeline.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// Vector store or catalog operation failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Embedding model call failed during ingestion or retrieval.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// Chat model call failed with no user-safe fallback available.
    #[error("chat completion failed: {0}")]
    Completion(String),

    /// Invalid or missing configuration (settings, descriptor, splitter).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Filesystem error while reading source documents.
    #[error("i/o error: {0}")]
    Io(String),
}

impl From<tokio_rusqlite::Error> for RagError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        RagError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for RagError {
    fn from(err: std::io::Error) -> Self {
        RagError::Io(err.to_string())
    }
}

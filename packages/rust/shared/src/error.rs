//! Error types for MedGraph.
//!
//! Library crates use [`MedGraphError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all MedGraph operations.
#[derive(Debug, thiserror::Error)]
pub enum MedGraphError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// The graph store rejected a node or relation write during ingestion.
    #[error("ingestion write error: {0}")]
    IngestionWrite(String),

    /// LLM output failed the required-shape validation.
    #[error("generation error: {0}")]
    Generation(String),

    /// No canonical entity could be resolved for a mention.
    #[error("alignment error: {0}")]
    Alignment(String),

    /// Query execution or store fault on the serving path.
    #[error("execution error: {0}")]
    Execution(String),

    /// Network/HTTP error talking to the LLM or embedding provider.
    #[error("network error: {0}")]
    Network(String),

    /// An external call exceeded its time bound.
    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: String, secs: u64 },

    /// Data validation error (unknown label, malformed record, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, MedGraphError>;

impl MedGraphError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a timeout error for the named stage.
    pub fn timeout(stage: impl Into<String>, secs: u64) -> Self {
        Self::Timeout {
            stage: stage.into(),
            secs,
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Network(_))
    }
}

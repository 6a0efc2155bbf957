//! Error types for semango-core.
//!
//! Uses a hierarchical error enum so callers can pattern-match on
//! the subsystem that failed. Ingestion-time errors (loader, embedder,
//! index writes) are recoverable per file or per representation; the
//! pipeline logs them and keeps going. Open failures and configuration
//! errors are fatal.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for all semango-core operations.
#[derive(Debug, Error)]
pub enum SemangoError {
    // ---- Fatal at startup ----
    /// Configuration is invalid or missing required fields.
    #[error("configuration error: {details}")]
    Config {
        /// What's wrong with the config.
        details: String,
    },

    /// Configuration contains a field the schema does not know.
    /// Surfaced separately so the CLI shell can map it to exit code 78.
    #[error("configuration contains unknown field: {details}")]
    ConfigUnknownField {
        /// The offending field, as reported by the deserializer.
        details: String,
    },

    // ---- Recoverable (operation failed, system healthy) ----
    /// A single file failed to load. The rest of the index is fine.
    #[error("loader error for {path}: {message}")]
    Loader {
        /// Path to the file that failed to load.
        path: PathBuf,
        /// Human-readable error description.
        message: String,
    },

    /// Embedding failed after retries were exhausted.
    #[error("embedding error: {message}")]
    Embed {
        /// Human-readable error description.
        message: String,
    },

    /// An index write or open failed.
    #[error("index error: {message}")]
    Index {
        /// Human-readable error description.
        message: String,
    },

    /// A vector had the wrong length for the index.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    Dimension {
        /// Dimension the index was opened with.
        expected: usize,
        /// Dimension of the offending vector.
        actual: usize,
    },

    /// Requested document was not found in the index.
    #[error("not found: {entity}")]
    NotFound {
        /// Description of what was not found.
        entity: String,
    },

    /// The operation was cancelled before it completed.
    #[error("cancelled")]
    Cancelled,

    // ---- Wrapped external errors ----
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport error (remote embedding provider, model download).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// SQLite error (tabular loader).
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Generic internal error for unexpected conditions.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SemangoError {
    /// Build a loader error with path context.
    pub fn loader(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Loader {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Build an index error.
    pub fn index(message: impl Into<String>) -> Self {
        Self::Index {
            message: message.into(),
        }
    }

    /// Build an embedding error.
    pub fn embed(message: impl Into<String>) -> Self {
        Self::Embed {
            message: message.into(),
        }
    }
}

/// Convenience type alias for Results in semango-core.
pub type SemangoResult<T> = Result<T, SemangoError>;

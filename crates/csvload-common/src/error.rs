//! Error types for csvload
//!
//! Every failure an ingestion session can hit funnels through [`LoadError`].
//! The variants fall into four families (see [`ErrorKind`]): setup errors,
//! decompression errors, parse errors and internal errors. Cancellation is
//! not an error and has no variant here.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for csvload operations
pub type Result<T> = std::result::Result<T, LoadError>;

/// Coarse classification of a [`LoadError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing file, permission denied, stat failure, bad configuration
    Setup,
    /// Corrupt compressed stream
    Decompression,
    /// Malformed record under strict settings, or an oversized record
    Parse,
    /// Misuse of the API or a crashed worker
    Internal,
}

/// Main error type for csvload
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decompress {}: {message}", .path.display())]
    Decompression { path: PathBuf, message: String },

    #[error("Failed to parse CSV content: {message}")]
    Parse { message: String },

    #[error("Record exceeds {limit} bytes without reaching a record boundary")]
    RecordTooLarge { limit: usize },

    #[error("Chunk size must be positive, got {0}")]
    InvalidChunkSize(usize),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        state: &'static str,
        operation: &'static str,
    },

    #[error("Loader worker terminated unexpectedly: {0}")]
    Worker(String),
}

impl LoadError {
    /// Create a parse error carrying the parser's own message
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an XML error
    pub fn xml(msg: impl Into<String>) -> Self {
        Self::Xml(msg.into())
    }

    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoadError::NotFound(_)
            | LoadError::Io(_)
            | LoadError::InvalidChunkSize(_)
            | LoadError::Config(_) => ErrorKind::Setup,
            LoadError::Decompression { .. } => ErrorKind::Decompression,
            LoadError::Parse { .. }
            | LoadError::RecordTooLarge { .. }
            | LoadError::Serialization(_)
            | LoadError::Xml(_) => ErrorKind::Parse,
            LoadError::InvalidState { .. } | LoadError::Worker(_) => ErrorKind::Internal,
        }
    }

    /// Map an I/O error raised while opening `path`
    pub fn from_open(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            LoadError::NotFound(path.into())
        } else {
            LoadError::Io(err)
        }
    }
}

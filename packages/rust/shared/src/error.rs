//! Error types for the opengov pipeline.
//!
//! Library crates use [`OpenGovError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Per-document failures inside a batch (a malformed payload, a failed
//! analyzer call) are NOT represented here — stages report those as
//! [`crate::types::DocumentError`] entries in their aggregate result and
//! keep going. This enum is for failures that abort an operation.

use std::path::PathBuf;

/// Top-level error type for all opengov operations.
#[derive(Debug, thiserror::Error)]
pub enum OpenGovError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transient network/HTTP error talking to the upstream registry.
    #[error("network error: {0}")]
    Network(String),

    /// Database or storage layer error. Safe to retry the whole batch.
    #[error("storage error: {0}")]
    Storage(String),

    /// A raw payload that cannot be canonicalized (missing or invalid
    /// required field).
    #[error("payload error: {message}")]
    Payload { message: String },

    /// AI analyzer error (transport, timeout, or unusable response).
    /// The document stays eligible for the next enrichment run.
    #[error("analysis error: {0}")]
    Analysis(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad score range, invalid enum value, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, OpenGovError>;

impl OpenGovError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a payload error from any displayable message.
    pub fn payload(msg: impl Into<String>) -> Self {
        Self::Payload {
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

    /// Whether retrying the same batch unchanged can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Storage(_) | Self::Analysis(_))
    }
}

//! Structured error types for the stereo crates.

use thiserror::Error;

/// Unified error type for all stereo operations.
#[derive(Debug, Error)]
pub enum StereoError {
    /// I/O error (file not found, permission denied, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error (malformed key, unknown tag)
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid input (bad arguments, out-of-range values)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Failure reported by the HDF5 storage layer
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid or incomplete write configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// An addressed key was read but never written
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// A write target already exists in the container
    #[error("key already exists: {0}")]
    AlreadyExists(String),

    /// Matrix, position or table dimensions disagree
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A catalogued result key is absent from the result set
    #[error("{0} is not in the result, run the corresponding analysis first")]
    MissingResult(String),

    /// A result is catalogued under a kind that does not match its payload
    #[error("kind mismatch: {0}")]
    KindMismatch(String),
}

/// Convenience alias used throughout the stereo crates.
pub type Result<T> = std::result::Result<T, StereoError>;

//! Error types for freshann.

use thiserror::Error;

/// Errors that can occur during index construction, mutation, search, or merge.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Invalid configuration (missing threshold and budget, zero dimension, ...).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// I/O error (file operations, disk I/O).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Dimension mismatch between the index and a vector or data file.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Format error (bad magic bytes, truncated header, corrupt record).
    #[error("format error: {0}")]
    Format(String),

    /// A label that is already live in the in-memory index.
    #[error("duplicate label: {0}")]
    DuplicateLabel(u32),

    /// A label that is not present where it was expected.
    #[error("label not found: {0}")]
    LabelNotFound(u32),

    /// Disk index build failure.
    #[error("build failed: {0}")]
    Build(String),

    /// Merge failure; the instance may be left partially updated.
    #[error("merge failed: {0}")]
    Merge(String),
}

/// Result type alias for freshann operations.
pub type Result<T> = std::result::Result<T, IndexError>;

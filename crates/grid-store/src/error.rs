//! Error types for the grid store.

use thiserror::Error;

use crate::writer::RejectedWrite;

/// Errors that can occur while writing, reading or maintaining row documents.
#[derive(Error, Debug)]
pub enum GridStoreError {
    /// A wrapped segment names a codec this build does not know.
    #[error("unknown segment envelope format: {0}")]
    UnknownEnvelope(String),

    /// Compressing a row segment failed.
    #[error("compression error: {0}")]
    Compression(String),

    /// Decompressing a row segment failed or produced a malformed payload.
    #[error("decompression error: {0}")]
    Decompression(String),

    /// A grid or stored segment does not have the expected dimensions.
    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    /// The requested point cannot be addressed.
    #[error("invalid location: {0}")]
    InvalidLocation(String),

    /// The persistence layer rejected an operation.
    #[error("storage error: {0}")]
    Storage(String),

    /// Catalog lookup failed.
    #[error("catalog error: {0}")]
    Catalog(String),

    /// Some rows of a write were not persisted. Rows are independent, so the
    /// rows that are not listed here were written.
    #[error("{} of {} rows failed to persist (first error: {first_error})", .failed_rows.len(), .failed_rows.len() + .rows_written)]
    PartialWrite {
        failed_rows: Vec<usize>,
        rows_written: usize,
        first_error: String,
        /// Write keys dropped for wrong dimensions before any row was written.
        rejected: Vec<RejectedWrite>,
    },

    /// A background worker panicked or was cancelled.
    #[error("worker task failed: {0}")]
    TaskFailed(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl GridStoreError {
    /// Create a ShapeMismatch error.
    pub fn shape_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a Storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create an InvalidLocation error.
    pub fn invalid_location(msg: impl Into<String>) -> Self {
        Self::InvalidLocation(msg.into())
    }
}

impl From<sqlx::Error> for GridStoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Result type for grid store operations.
pub type Result<T> = std::result::Result<T, GridStoreError>;

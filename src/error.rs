//! Error types
//!
//! Only structural problems are errors: a broken version sequence, an
//! expression that does not parse, a corrupt persisted state, or I/O.
//! Data-shape mismatches inside individual events are absorbed as no-ops.

use thiserror::Error;

use crate::expr::ExprError;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the store, its event log and its codecs
#[derive(Error, Debug)]
pub enum StoreError {
    /// An event's version does not follow the store's version by exactly one
    #[error("non-contiguous event stream: expected version {expected}, found {found}")]
    NonContiguous { expected: u64, found: u64 },

    #[error("expression error: {0}")]
    Expression(#[from] ExprError),

    /// Serialized store data violates a structural invariant
    #[error("invalid store state: {0}")]
    InvalidState(String),

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("unknown branch '{0}'")]
    BranchNotFound(String),

    #[error("branch '{0}' already exists")]
    BranchExists(String),

    #[error("snapshot corrupted: {0}")]
    SnapshotCorrupted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "arrow")]
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    #[cfg(feature = "arrow")]
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
}

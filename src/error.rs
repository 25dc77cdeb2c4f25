//! Error types returned across the crate's Storage Adapter and Node boundary.

use thiserror::Error;

/// Errors the [`crate::storage::Storage`] contract may return.
///
/// These mirror the storage error taxonomy in `openraft`'s `StorageError`:
/// a request can miss either because it has already been compacted away by a
/// snapshot, or because it asks for something the log doesn't have yet.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The requested index lies at or before the last snapshot; the caller
    /// should fall back to sending a snapshot instead.
    #[error("requested index is compacted away by a snapshot")]
    Compacted,

    /// The requested index is ahead of what storage currently holds.
    #[error("requested index is not yet available")]
    Unavailable,

    /// A snapshot was requested but none is ready yet.
    #[error("snapshot is temporarily unavailable")]
    SnapshotTemporarilyUnavailable,
}

/// Top-level error type for operations that can fail outside of the
/// programming-error/assert class (see spec §7: invariant violations abort
/// rather than returning `Result`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;

//! The Storage Adapter (spec §4.1): a read-only contract the core consumes
//! for log reads, term lookups, snapshot metadata, and durable hard state.
//!
//! The core never calls a write path directly. Durability of anything the
//! driver appends or persists in response to an outgoing message is the
//! driver's responsibility, sequenced before it transmits that message
//! (spec §5, the durability fence).

use crate::error::StorageError;
use crate::types::ConfState;
use crate::types::HardState;
use crate::types::LogEntry;
use crate::types::Snapshot;

/// Read-only storage contract. Implementations back the stable prefix of the
/// log that [`crate::raft_log::RaftLog`] mirrors in its `unstable` suffix.
pub trait Storage {
    /// The hard state and conf state last durably recorded.
    fn initial_state(&self) -> Result<(HardState, ConfState), StorageError>;

    /// Entries in `[lo, hi)`, soft-capped to `max_bytes` worth of payload
    /// (0 meaning unbounded). Returns `Compacted` if `lo` is at or before
    /// the snapshot, `Unavailable` if `hi` is past `last_index() + 1`.
    fn entries(&self, lo: u64, hi: u64, max_bytes: u64) -> Result<Vec<LogEntry>, StorageError>;

    /// The term of the entry at `i`. Must answer for any `i` in
    /// `[first_index() - 1, last_index()]`; the boundary case
    /// `first_index() - 1` returns the snapshot's term.
    fn term(&self, i: u64) -> Result<u64, StorageError>;

    /// Index of the oldest entry still available (i.e. one past the
    /// snapshot's last index).
    fn first_index(&self) -> Result<u64, StorageError>;

    /// Index of the newest entry in stable storage.
    fn last_index(&self) -> Result<u64, StorageError>;

    /// The most recent snapshot, if any.
    fn snapshot(&self) -> Result<Snapshot, StorageError>;
}

/// Maps a `Compacted` storage error to term `0`, matching spec §4.2's error
/// policy: "no matching entry, cannot commit at that index".
pub fn zero_term_on_compacted(res: Result<u64, StorageError>) -> u64 {
    match res {
        Ok(t) => t,
        Err(StorageError::Compacted) => 0,
        Err(e) => panic!("unexpected storage error in term lookup: {:?}", e),
    }
}

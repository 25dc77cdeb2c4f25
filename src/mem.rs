//! An in-memory [`Storage`] implementation for tests, grounded on
//! `memstore`'s `MemStore` but stripped of its `tokio`/async plumbing since
//! the core is synchronous (spec §5). Not shipped for production use: a
//! real deployment brings its own durable storage engine (spec §1,
//! Non-goals).

use std::sync::Mutex;

use crate::error::StorageError;
use crate::types::ConfState;
use crate::types::HardState;
use crate::types::LogEntry;
use crate::types::Snapshot;
use crate::storage::Storage;

struct MemStorageCore {
    hard_state: HardState,
    conf_state: ConfState,
    /// `entries[0]` is a dummy sentinel holding (index, term) of the
    /// compaction point; real entries start at `entries[1]`.
    entries: Vec<LogEntry>,
    snapshot: Snapshot,
}

impl MemStorageCore {
    fn first_index(&self) -> u64 {
        self.entries[0].index + 1
    }

    fn last_index(&self) -> u64 {
        self.entries[0].index + self.entries.len() as u64 - 1
    }
}

/// Thread-compatible, interior-mutable in-memory store. Despite the `Mutex`,
/// the core itself never calls storage concurrently with itself (spec §5);
/// the lock exists only so tests can hand out `Arc<MemStorage>` clones.
pub struct MemStorage {
    core: Mutex<MemStorageCore>,
}

impl MemStorage {
    /// A fresh store at index/term 0 with no configured peers.
    pub fn new() -> Self {
        Self {
            core: Mutex::new(MemStorageCore {
                hard_state: HardState::default(),
                conf_state: ConfState::default(),
                entries: vec![LogEntry::default()],
                snapshot: Snapshot::default(),
            }),
        }
    }

    /// A store pre-populated with a configuration, used by most unit tests.
    pub fn new_with_conf_state(peers: Vec<u64>) -> Self {
        let store = Self::new();
        store.core.lock().unwrap().conf_state = ConfState { peers };
        store
    }

    pub fn set_hard_state(&self, hs: HardState) {
        self.core.lock().unwrap().hard_state = hs;
    }

    /// Test helper: append entries directly into stable storage, bypassing
    /// the log view. Used to seed followers with pre-existing logs.
    pub fn append(&self, entries: &[LogEntry]) {
        if entries.is_empty() {
            return;
        }
        let mut core = self.core.lock().unwrap();
        assert!(
            core.first_index() <= entries[0].index,
            "append overwrites compacted entries"
        );
        assert!(
            entries[0].index <= core.last_index() + 1,
            "append would leave a gap in the log"
        );
        let offset = (entries[0].index - core.entries[0].index) as usize;
        core.entries.truncate(offset);
        core.entries.extend_from_slice(entries);
    }

    pub fn apply_snapshot(&self, snapshot: Snapshot) {
        let mut core = self.core.lock().unwrap();
        let index = snapshot.meta.last_index;
        let term = snapshot.meta.last_term;
        core.entries = vec![LogEntry::new(index, term, Default::default(), vec![])];
        core.conf_state = snapshot.meta.conf_state.clone();
        core.snapshot = snapshot;
    }
}

impl Default for MemStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemStorage {
    fn initial_state(&self) -> Result<(HardState, ConfState), StorageError> {
        let core = self.core.lock().unwrap();
        Ok((core.hard_state, core.conf_state.clone()))
    }

    fn entries(&self, lo: u64, hi: u64, max_bytes: u64) -> Result<Vec<LogEntry>, StorageError> {
        let core = self.core.lock().unwrap();
        if lo < core.first_index() {
            return Err(StorageError::Compacted);
        }
        if hi > core.last_index() + 1 {
            return Err(StorageError::Unavailable);
        }
        let offset = core.entries[0].index;
        let lo_idx = (lo - offset) as usize;
        let hi_idx = (hi - offset) as usize;
        let mut slice = core.entries[lo_idx..hi_idx].to_vec();

        if max_bytes == 0 || slice.is_empty() {
            return Ok(slice);
        }
        let mut size = 0u64;
        let mut cut = slice.len();
        for (i, e) in slice.iter().enumerate() {
            size += e.data.len() as u64;
            if size > max_bytes && i > 0 {
                cut = i;
                break;
            }
        }
        slice.truncate(cut.max(1));
        Ok(slice)
    }

    fn term(&self, i: u64) -> Result<u64, StorageError> {
        let core = self.core.lock().unwrap();
        let offset = core.entries[0].index;
        if i < offset {
            return Err(StorageError::Compacted);
        }
        let idx = (i - offset) as usize;
        if idx >= core.entries.len() {
            return Err(StorageError::Unavailable);
        }
        Ok(core.entries[idx].term)
    }

    fn first_index(&self) -> Result<u64, StorageError> {
        Ok(self.core.lock().unwrap().first_index())
    }

    fn last_index(&self) -> Result<u64, StorageError> {
        Ok(self.core.lock().unwrap().last_index())
    }

    fn snapshot(&self) -> Result<Snapshot, StorageError> {
        let core = self.core.lock().unwrap();
        if core.snapshot.is_empty() {
            return Err(StorageError::SnapshotTemporarilyUnavailable);
        }
        Ok(core.snapshot.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntryKind;

    #[test]
    fn starts_empty() {
        let s = MemStorage::new();
        assert_eq!(s.first_index().unwrap(), 1);
        assert_eq!(s.last_index().unwrap(), 0);
    }

    #[test]
    fn append_and_read_back() {
        let s = MemStorage::new();
        s.append(&[
            LogEntry::new(1, 1, EntryKind::Normal, vec![1]),
            LogEntry::new(2, 1, EntryKind::Normal, vec![2]),
        ]);
        assert_eq!(s.last_index().unwrap(), 2);
        let got = s.entries(1, 3, 0).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[1].index, 2);
    }

    #[test]
    fn term_compacted_below_first_index() {
        let s = MemStorage::new();
        s.append(&[LogEntry::new(5, 2, EntryKind::Normal, vec![])]);
        assert_eq!(s.term(4), Err(StorageError::Compacted));
        assert_eq!(s.term(5).unwrap(), 2);
    }
}

//! The Log View (spec §4.2): an in-memory mirror of the persisted log with
//! an unstable suffix, plus the commit/applied cursors.

use crate::error::StorageError;
use crate::storage::zero_term_on_compacted;
use crate::storage::Storage;
use crate::types::LogEntry;

/// Result of [`RaftLog::maybe_append`]: either the new last index on
/// success, or a conflict. On conflict the caller (the Follower role
/// handler) builds the reject response from `prev_index` and its own
/// `last_index()`, matching the original's `handleAppendEntries`.
pub enum AppendResult {
    Ok { last_new_index: u64 },
    Conflict,
}

pub struct RaftLog<S: Storage> {
    storage: S,
    /// Entries appended by a leader but not yet durably persisted by the
    /// host, or appended by a follower but not yet fsynced.
    unstable: Vec<LogEntry>,
    /// Index of `unstable[0]`; `0` means `unstable` is empty and starts
    /// right after storage's last index.
    unstable_offset: u64,
    /// Boundary `(index, term)` of a snapshot accepted by `restore` but not
    /// yet reflected in `storage` (the host installs it asynchronously,
    /// sequenced by the durability fence in spec §5). Consulted by
    /// `last_index`/`term_of` so the log view reports the post-restore
    /// state immediately, without waiting on the host.
    pending_snapshot: Option<(u64, u64)>,
    commit: u64,
    applied: u64,
}

impl<S: Storage> RaftLog<S> {
    pub fn new(storage: S) -> Self {
        let last_index = storage.last_index().unwrap_or(0);
        RaftLog {
            storage,
            unstable: Vec::new(),
            unstable_offset: last_index + 1,
            pending_snapshot: None,
            commit: 0,
            applied: 0,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn commit(&self) -> u64 {
        self.commit
    }

    pub fn applied(&self) -> u64 {
        self.applied
    }

    pub fn last_index(&self) -> u64 {
        match self.unstable.last() {
            Some(e) => e.index,
            None => {
                let stored = self.storage.last_index().unwrap_or(0);
                match self.pending_snapshot {
                    Some((index, _)) if index > stored => index,
                    _ => stored,
                }
            }
        }
    }

    pub fn last_term(&self) -> u64 {
        self.term_of(self.last_index()).unwrap_or(0)
    }

    /// The term of entry `i`, consulting `unstable` (and, failing that, a
    /// pending unapplied snapshot boundary) first. Returns `Compacted` /
    /// `Unavailable` per the storage contract.
    pub fn term_of(&self, i: u64) -> Result<u64, StorageError> {
        if i == 0 {
            return Ok(0);
        }
        if let Some((index, term)) = self.pending_snapshot {
            if i == index {
                return Ok(term);
            }
        }
        if i >= self.unstable_offset {
            if let Some(e) = self.unstable.iter().find(|e| e.index == i) {
                return Ok(e.term);
            }
            if i > self.last_index() {
                return Err(StorageError::Unavailable);
            }
        }
        self.storage.term(i)
    }

    /// `true` iff entry `i` exists locally with term `t`.
    pub fn match_term(&self, i: u64, t: u64) -> bool {
        matches!(self.term_of(i), Ok(term) if term == t)
    }

    /// Voter safety check (spec glossary, "up-to-date"): candidate's last
    /// log `(term, index)` is at least as up-to-date as this voter's.
    pub fn is_up_to_date(&self, index: u64, term: u64) -> bool {
        let my_term = self.last_term();
        term > my_term || (term == my_term && index >= self.last_index())
    }

    /// Append entries to the unstable suffix. Panics if they are not
    /// contiguous with the current log (a programming error, spec §7).
    pub fn append(&mut self, entries: &[LogEntry]) {
        if entries.is_empty() {
            return;
        }
        let after = entries[0].index;
        assert!(
            after == self.last_index() + 1,
            "append is not contiguous: last_index={}, first new index={}",
            self.last_index(),
            after
        );
        if self.unstable.is_empty() {
            self.unstable_offset = after;
        }
        self.unstable.extend_from_slice(entries);
    }

    /// Truncate the unstable suffix (and, conceptually, any overlapping
    /// stable entries the host has not actually durably committed to yet)
    /// from `from_index` onward, then append `entries`.
    fn truncate_and_append(&mut self, entries: &[LogEntry]) {
        let from_index = entries[0].index;
        if from_index <= self.storage.last_index().unwrap_or(0) && self.unstable.is_empty() {
            // Conflicts purely within the stable prefix: the host owns
            // truncating real storage; the log view just resets its own
            // unstable suffix to start the new tail.
            self.unstable_offset = from_index;
            self.unstable.clear();
            self.unstable.extend_from_slice(entries);
            return;
        }
        if from_index < self.unstable_offset {
            self.unstable_offset = from_index;
            self.unstable.clear();
        } else {
            let keep = (from_index - self.unstable_offset) as usize;
            self.unstable.truncate(keep.min(self.unstable.len()));
        }
        self.unstable.extend_from_slice(entries);
    }

    /// The follower log-matching rule (spec §4.2). Returns the new last
    /// index on success, or a conflict with a hint the leader can use to
    /// retry with a smaller `prev_index` (spec §4.3 `maybe_decr_to`).
    pub fn maybe_append(
        &mut self,
        prev_index: u64,
        prev_log_term: u64,
        commit: u64,
        entries: &[LogEntry],
    ) -> AppendResult {
        if !self.match_term(prev_index, prev_log_term) {
            return AppendResult::Conflict;
        }

        let last_new_index = prev_index + entries.len() as u64;

        if let Some(conflict_idx) = self.find_conflict(entries) {
            if conflict_idx <= self.commit {
                panic!(
                    "entry {} conflicts with an already-committed entry",
                    conflict_idx
                );
            }
            let offset = prev_index + 1;
            self.truncate_and_append(&entries[(conflict_idx - offset) as usize..]);
        }

        self.commit_to(commit.min(last_new_index));
        AppendResult::Ok { last_new_index }
    }

    /// Finds the index of the first entry in `entries` whose term doesn't
    /// match what's already in the log (i.e. the first real conflict), or
    /// `None` if `entries` is already fully present.
    fn find_conflict(&self, entries: &[LogEntry]) -> Option<u64> {
        entries.iter().find(|e| !self.match_term(e.index, e.term)).map(|e| e.index)
    }

    /// Raises commit to `max(commit, min(c, last_index))`; never lowers it.
    pub fn commit_to(&mut self, c: u64) {
        let c = c.min(self.last_index());
        if c > self.commit {
            self.commit = c;
        }
    }

    /// Advances `applied` after the host has drained committed entries to
    /// the application state machine. Never exceeds `commit` (invariant 5).
    pub fn applied_to(&mut self, i: u64) {
        if i == 0 {
            return;
        }
        assert!(
            i <= self.commit && i >= self.applied,
            "applied index {} out of range (applied={}, commit={})",
            i,
            self.applied,
            self.commit
        );
        self.applied = i;
    }

    /// Leader-only: commits entry `n` iff it is newer than the current
    /// commit AND belongs to `term` (the term guard, Raft §5.4.2 / invariant
    /// 4). Returns whether commit advanced.
    pub fn maybe_commit(&mut self, n: u64, term: u64) -> bool {
        if n > self.commit && zero_term_on_compacted(self.term_of(n)) == term {
            self.commit_to(n);
            return true;
        }
        false
    }

    /// Entries in `[lo, hi)`, soft-capped to `max_bytes`.
    pub fn slice(&self, lo: u64, hi: u64, max_bytes: u64) -> Result<Vec<LogEntry>, StorageError> {
        if lo == hi {
            return Ok(Vec::new());
        }
        if lo < self.unstable_offset {
            let stable_hi = hi.min(self.unstable_offset);
            let mut out = self.storage.entries(lo, stable_hi, max_bytes)?;
            if stable_hi < hi {
                out.extend(self.unstable_slice(stable_hi, hi).iter().cloned());
            }
            return Ok(apply_byte_cap(out, max_bytes));
        }
        Ok(apply_byte_cap(self.unstable_slice(lo, hi).to_vec(), max_bytes))
    }

    fn unstable_slice(&self, lo: u64, hi: u64) -> &[LogEntry] {
        if self.unstable.is_empty() || lo >= hi {
            return &[];
        }
        let start = (lo.max(self.unstable_offset) - self.unstable_offset) as usize;
        let end = (hi - self.unstable_offset) as usize;
        &self.unstable[start.min(self.unstable.len())..end.min(self.unstable.len())]
    }

    /// Replaces the log prefix `<= meta.last_index` with a snapshot,
    /// discarding any unstable entries it subsumes. The caller
    /// ([`crate::node::Node`]) is responsible for deciding whether this
    /// snapshot should be accepted at all (spec §4.5 restoreSnapshot).
    pub fn restore(&mut self, last_index: u64, last_term: u64) {
        self.unstable.clear();
        self.unstable_offset = last_index + 1;
        self.pending_snapshot = Some((last_index, last_term));
        self.commit = last_index;
        self.applied = last_index;
    }
}

fn apply_byte_cap(mut entries: Vec<LogEntry>, max_bytes: u64) -> Vec<LogEntry> {
    if max_bytes == 0 || entries.len() <= 1 {
        return entries;
    }
    let mut size = 0u64;
    let mut cut = entries.len();
    for (i, e) in entries.iter().enumerate() {
        size += e.data.len() as u64;
        if size > max_bytes {
            cut = i.max(1);
            break;
        }
    }
    entries.truncate(cut);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MemStorage;
    use crate::types::EntryKind;

    fn entry(index: u64, term: u64) -> LogEntry {
        LogEntry::new(index, term, EntryKind::Normal, vec![])
    }

    #[test]
    fn append_is_contiguous() {
        let mut log = RaftLog::new(MemStorage::new());
        log.append(&[entry(1, 1), entry(2, 1)]);
        assert_eq!(log.last_index(), 2);
        assert_eq!(log.last_term(), 1);
    }

    #[test]
    #[should_panic]
    fn append_rejects_gap() {
        let mut log = RaftLog::new(MemStorage::new());
        log.append(&[entry(2, 1)]);
    }

    #[test]
    fn maybe_append_rejects_on_term_mismatch() {
        let mut log = RaftLog::new(MemStorage::new());
        log.append(&[entry(1, 1), entry(2, 1), entry(3, 1)]);
        // scenario 3 from spec §8: leader thinks prevTerm=2 at index 2.
        match log.maybe_append(2, 2, 3, &[entry(3, 2)]) {
            AppendResult::Conflict => {}
            AppendResult::Ok { .. } => panic!("expected conflict"),
        }
        // log untouched
        assert_eq!(log.last_index(), 3);
        assert_eq!(log.term_of(3).unwrap(), 1);
    }

    #[test]
    fn maybe_append_truncates_on_partial_overlap() {
        let mut log = RaftLog::new(MemStorage::new());
        log.append(&[entry(1, 1), entry(2, 1), entry(3, 1)]);
        match log.maybe_append(1, 1, 2, &[entry(2, 2), entry(3, 2)]) {
            AppendResult::Ok { last_new_index } => assert_eq!(last_new_index, 3),
            AppendResult::Conflict => panic!("expected success"),
        }
        assert_eq!(log.term_of(2).unwrap(), 2);
        assert_eq!(log.term_of(3).unwrap(), 2);
        assert_eq!(log.commit(), 2);
    }

    #[test]
    fn maybe_commit_enforces_term_guard() {
        let mut log = RaftLog::new(MemStorage::new());
        log.append(&[entry(1, 1), entry(2, 1)]);
        assert!(!log.maybe_commit(2, 2), "wrong term must not commit");
        assert!(log.maybe_commit(2, 1));
        assert_eq!(log.commit(), 2);
    }

    #[test]
    fn is_up_to_date() {
        let mut log = RaftLog::new(MemStorage::new());
        log.append(&[entry(1, 2), entry(2, 2)]);
        assert!(log.is_up_to_date(2, 2));
        assert!(log.is_up_to_date(5, 3));
        assert!(!log.is_up_to_date(1, 2));
        assert!(!log.is_up_to_date(2, 1));
    }

    /// `restore` records its boundary as `(last_index, last_term)` at
    /// `unstable_offset - 1`, i.e. the one index `term_of`'s `unstable`
    /// branch never looks at. Before the host catches storage up, both
    /// `term_of(last_index)` and `last_term()` must still answer from that
    /// boundary instead of falling through to (and erroring out of)
    /// storage.
    #[test]
    fn term_of_answers_pending_snapshot_boundary_before_storage_catches_up() {
        let mut log = RaftLog::new(MemStorage::new());
        log.restore(10, 3);
        assert_eq!(log.term_of(10).unwrap(), 3);
        assert_eq!(log.last_term(), 3);
        assert!(log.is_up_to_date(10, 3));
        assert!(!log.is_up_to_date(9, 3));
    }
}

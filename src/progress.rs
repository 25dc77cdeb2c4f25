//! Peer Progress (spec §4.3): per-peer replication bookkeeping - next/match
//! indices, replication mode, the inflight window, and liveness.
//!
//! The state diagram and `is_paused` rule are grounded on the classic
//! Probe/Replicate/Snapshot design also used by tikv/raft-rs and
//! cssivision/libraft's `Progress`.

use std::cmp::max;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressState {
    /// `next` is a guess; at most one in-flight append per heartbeat or
    /// response.
    Probe,
    /// `next` is known-good; pipelining up to `max_inflight` outstanding
    /// appends is allowed.
    Replicate,
    /// Sending a snapshot; all Appends are suppressed until resolved.
    Snapshot,
}

impl Default for ProgressState {
    fn default() -> Self {
        ProgressState::Probe
    }
}

/// A bounded FIFO of the highest index sent per in-flight append, used to
/// implement the Replicate-mode pipeline window.
#[derive(Debug, Clone)]
pub struct Inflights {
    buffer: std::collections::VecDeque<u64>,
    cap: usize,
}

impl Inflights {
    pub fn new(cap: usize) -> Self {
        Inflights { buffer: std::collections::VecDeque::with_capacity(cap), cap }
    }

    pub fn is_full(&self) -> bool {
        self.buffer.len() >= self.cap
    }

    pub fn add(&mut self, index: u64) {
        debug_assert!(!self.is_full(), "cannot add to a full inflight window");
        self.buffer.push_back(index);
    }

    /// Drops every inflight entry `<= to` (they've now been acknowledged).
    pub fn free_to(&mut self, to: u64) {
        while let Some(&front) = self.buffer.front() {
            if front > to {
                break;
            }
            self.buffer.pop_front();
        }
    }

    pub fn free_first_one(&mut self) {
        self.buffer.pop_front();
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

/// Per-peer replication state, held by the leader.
#[derive(Debug, Clone)]
pub struct PeerProgress {
    pub id: u64,
    /// Highest index known replicated. Monotonic non-decreasing while the
    /// peer stays in the configuration (invariant-adjacent; spec §3).
    pub matched: u64,
    /// Next index to send.
    pub next: u64,
    pub state: ProgressState,
    /// Suppresses sends during Probe until a response arrives.
    pub paused: bool,
    /// Set when installing a snapshot; the index it covers.
    pub pending_snapshot: u64,
    /// Set on any inbound message from this peer; cleared each
    /// CheckQuorum sweep.
    pub active: bool,
    pub inflights: Inflights,
}

impl PeerProgress {
    pub fn new(id: u64, next: u64, max_inflight: usize) -> Self {
        PeerProgress {
            id,
            matched: 0,
            next,
            state: ProgressState::Probe,
            paused: false,
            pending_snapshot: 0,
            active: false,
            inflights: Inflights::new(max_inflight),
        }
    }

    fn reset_state(&mut self, state: ProgressState) {
        self.paused = false;
        self.pending_snapshot = 0;
        self.state = state;
        self.inflights.reset();
    }

    pub fn become_probe(&mut self) {
        if self.state == ProgressState::Snapshot {
            let pending = self.pending_snapshot;
            self.reset_state(ProgressState::Probe);
            self.next = max(self.matched + 1, pending + 1);
        } else {
            self.reset_state(ProgressState::Probe);
            self.next = self.matched + 1;
        }
    }

    pub fn become_replicate(&mut self) {
        self.reset_state(ProgressState::Replicate);
        self.next = self.matched + 1;
    }

    pub fn become_snapshot(&mut self, index: u64) {
        self.reset_state(ProgressState::Snapshot);
        self.pending_snapshot = index;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// If `i > matched`, advances `matched` (and `next` to at least `i+1`)
    /// and returns `true`.
    pub fn maybe_update(&mut self, i: u64) -> bool {
        let mut updated = false;
        if self.matched < i {
            self.matched = i;
            updated = true;
            self.resume();
        }
        if self.next < i + 1 {
            self.next = i + 1;
        }
        updated
    }

    /// Used while pipelining in Replicate mode: advances `next` past an
    /// optimistically-sent batch without touching `matched`.
    pub fn optimistic_update(&mut self, i: u64) {
        self.next = i + 1;
    }

    /// Handles an AppResp reject. Returns whether `next` changed.
    pub fn maybe_decr_to(&mut self, rejected: u64, hint: u64) -> bool {
        match self.state {
            ProgressState::Replicate => {
                if rejected <= self.matched {
                    return false;
                }
                self.next = max(self.matched + 1, 1);
                true
            }
            ProgressState::Probe => {
                let new_next = max(rejected.min(hint + 1), 1);
                if self.next == new_next {
                    return false;
                }
                self.next = new_next;
                true
            }
            ProgressState::Snapshot => false,
        }
    }

    /// Whether sending to this peer is currently suppressed.
    pub fn is_paused(&self) -> bool {
        match self.state {
            ProgressState::Probe => self.paused,
            ProgressState::Replicate => self.inflights.is_full(),
            ProgressState::Snapshot => true,
        }
    }

    pub fn snapshot_failure(&mut self) {
        self.pending_snapshot = 0;
    }

    /// Whether an in-flight snapshot has already been overtaken by normal
    /// replication and should be aborted.
    pub fn should_abort_snapshot(&self) -> bool {
        self.state == ProgressState::Snapshot && self.matched >= self.pending_snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_to_replicate_on_accept() {
        let mut pr = PeerProgress::new(2, 1, 4);
        assert_eq!(pr.state, ProgressState::Probe);
        assert!(pr.maybe_update(5));
        pr.become_replicate();
        assert_eq!(pr.state, ProgressState::Replicate);
        assert_eq!(pr.next, 6);
    }

    #[test]
    fn replicate_reject_demotes_to_probe_next_at_match_plus_one() {
        let mut pr = PeerProgress::new(2, 1, 4);
        pr.maybe_update(5);
        pr.become_replicate();
        assert!(pr.maybe_decr_to(6, 0));
        pr.become_probe();
        assert_eq!(pr.next, 6);
    }

    #[test]
    fn inflights_bound_pipeline() {
        let mut ins = Inflights::new(2);
        ins.add(1);
        ins.add(2);
        assert!(ins.is_full());
        ins.free_to(1);
        assert!(!ins.is_full());
    }

    #[test]
    fn snapshot_aborts_once_matched_catches_up() {
        let mut pr = PeerProgress::new(2, 1, 4);
        pr.become_snapshot(10);
        assert!(!pr.should_abort_snapshot());
        pr.maybe_update(10);
        assert!(pr.should_abort_snapshot());
    }
}

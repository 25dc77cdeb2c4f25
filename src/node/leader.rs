//! Leader role behavior (spec §4.4 Leader).

use crate::message::Message;
use crate::message::MessageType;
use crate::progress::ProgressState;
use crate::storage::zero_term_on_compacted;
use crate::storage::Storage;
use crate::types::EntryKind;
use crate::types::LogEntry;
use crate::types::ReadState;

use super::follower::read_index_ctx;
use super::Node;

impl<S: Storage> Node<S> {
    pub(super) fn step_leader(&mut self, msg: Message) {
        match msg.ty {
            MessageType::Beat => {
                self.broadcast_heartbeat();
                return;
            }
            MessageType::CheckQuorum => {
                if !self.check_quorum_active() {
                    tracing::warn!(id = self.id, term = self.term, "lost quorum, stepping down");
                    self.become_follower(self.term, 0);
                }
                self.clear_active();
                return;
            }
            MessageType::Prop => {
                self.handle_propose(msg);
                return;
            }
            MessageType::ReadIndex => {
                self.handle_read_index(msg);
                return;
            }
            _ => {}
        }

        if !self.peers.contains_key(&msg.from) {
            tracing::debug!(id = self.id, from = msg.from, "leader ignoring message from unknown peer");
            return;
        }

        match msg.ty {
            MessageType::AppResp => self.handle_append_response(msg),
            MessageType::HeartbeatResp => self.handle_heartbeat_response(msg),
            MessageType::SnapStatus => self.handle_snapshot_status(msg),
            MessageType::Unreachable => self.handle_unreachable(msg),
            _ => {
                tracing::debug!(id = self.id, ty = ?msg.ty, "leader ignoring message");
            }
        }
    }

    /// MsgProp (spec §4.4 Leader): downgrades a second in-flight ConfChange
    /// to Normal (invariant 7), assigns term/index, appends locally, updates
    /// self progress, and replicates.
    fn handle_propose(&mut self, msg: Message) {
        if !self.peers.contains_key(&self.id) {
            tracing::debug!(id = self.id, "dropping proposal: not a member of the configuration");
            return;
        }
        if msg.entries.is_empty() {
            return;
        }
        let term = self.term;
        let mut next_index = self.log.last_index() + 1;
        let mut entries = Vec::with_capacity(msg.entries.len());
        for mut e in msg.entries {
            if e.kind == EntryKind::ConfChange {
                if self.pending_conf {
                    tracing::warn!(
                        id = self.id,
                        "a configuration change is already pending; downgrading to a normal entry"
                    );
                    e.kind = EntryKind::Normal;
                } else {
                    self.pending_conf = true;
                }
            }
            entries.push(LogEntry::new(next_index, term, e.kind, e.data));
            next_index += 1;
        }
        self.log.append(&entries);
        if let Some(pr) = self.peers.get_mut(&self.id) {
            pr.maybe_update(self.log.last_index());
        }
        // append/maybeUpdate/maybeCommitRaft (original source's
        // `appendEntries`): a single-node cluster can commit a proposal the
        // moment it's appended locally, without waiting on any AppResp.
        self.maybe_commit_raft();
        self.broadcast_append();
    }

    /// MsgReadIndex (spec §4.4 Leader): safe-read protocol. Only serves a
    /// read once the current term has at least one committed entry
    /// (invariant 8), guarding against the stale-leader read anomaly.
    fn handle_read_index(&mut self, msg: Message) {
        if self.quorum() > 1 {
            let committed_term = zero_term_on_compacted(self.log.term_of(self.log.commit()));
            if committed_term != self.term {
                tracing::debug!(
                    id = self.id,
                    term = self.term,
                    "refusing read-index: no entry committed in the current term yet"
                );
                return;
            }
            let ctx = read_index_ctx(&msg);
            if msg.from == 0 || msg.from == self.id {
                self.read_states.push(ReadState { index: self.log.commit(), ctx });
            } else {
                let mut resp = Message::new(MessageType::ReadIndexResp);
                resp.to = msg.from;
                resp.index = self.log.commit();
                resp.entries = msg.entries;
                self.send(resp);
            }
        } else {
            let ctx = read_index_ctx(&msg);
            self.read_states.push(ReadState { index: self.log.commit(), ctx });
        }
    }

    /// MsgAppResp (spec §4.4 Leader): the core of flow control. On reject,
    /// backs off and retries; on accept, advances `match`, drives the
    /// Probe/Replicate/Snapshot transitions, and re-checks commit.
    fn handle_append_response(&mut self, msg: Message) {
        let from = msg.from;
        if let Some(pr) = self.peers.get_mut(&from) {
            pr.active = true;
        }

        if msg.reject {
            let changed = self
                .peers
                .get_mut(&from)
                .map(|pr| pr.maybe_decr_to(msg.index, msg.last_match_index))
                .unwrap_or(false);
            if changed {
                if let Some(pr) = self.peers.get_mut(&from) {
                    if pr.state == ProgressState::Replicate {
                        pr.become_probe();
                    }
                }
            }
            // The original always retries after a reject, regardless of
            // whether `next` actually moved (original source's `stepLeader`).
            self.send_append(from);
            return;
        }

        let can_send_before = self.peers.get(&from).map(|pr| !pr.is_paused()).unwrap_or(false);
        let updated = self.peers.get_mut(&from).map(|pr| pr.maybe_update(msg.index)).unwrap_or(false);
        if !updated {
            return;
        }

        if let Some(pr) = self.peers.get_mut(&from) {
            match pr.state {
                ProgressState::Probe => pr.become_replicate(),
                ProgressState::Replicate => pr.inflights.free_to(msg.index),
                ProgressState::Snapshot => {
                    if pr.should_abort_snapshot() {
                        pr.become_probe();
                    }
                }
            }
        }

        if self.maybe_commit_raft() {
            self.broadcast_append();
        } else if !can_send_before {
            self.send_append(from);
        }
    }

    /// MsgHeartbeatResp (spec §4.4 Leader): resumes a paused Probe peer and
    /// frees one inflight slot to avoid deadlock after a lost AppResp.
    fn handle_heartbeat_response(&mut self, msg: Message) {
        let from = msg.from;
        if let Some(pr) = self.peers.get_mut(&from) {
            pr.active = true;
            pr.resume();
            if pr.state == ProgressState::Replicate && pr.inflights.is_full() {
                pr.inflights.free_first_one();
            }
        }
        let behind = self.peers.get(&from).map(|pr| pr.matched < self.log.last_index()).unwrap_or(false);
        if behind {
            self.send_append(from);
        }
    }

    /// MsgSnapStatus (spec §4.4 Leader): resolves an in-flight snapshot,
    /// always returning the peer to Probe and pausing it so the next
    /// AppResp/tick drives a fresh Append attempt.
    fn handle_snapshot_status(&mut self, msg: Message) {
        let from = msg.from;
        let Some(pr) = self.peers.get_mut(&from) else { return };
        if pr.state != ProgressState::Snapshot {
            return;
        }
        if msg.reject {
            pr.snapshot_failure();
        }
        pr.become_probe();
        pr.pause();
    }

    /// MsgUnreachable (spec §4.4 Leader): demotes a pipelining peer back to
    /// Probe so the next send is a single cautious guess.
    fn handle_unreachable(&mut self, msg: Message) {
        if let Some(pr) = self.peers.get_mut(&msg.from) {
            if pr.state == ProgressState::Replicate {
                pr.become_probe();
            }
        }
    }
}

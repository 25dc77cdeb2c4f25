//! The Node Aggregate (spec §4.5): the outer `step`/`tick` entry points,
//! term-bump policy, outgoing-message queue, read-state queue, commit
//! advancement, and membership transitions.

mod candidate;
mod follower;
mod leader;

use std::collections::BTreeMap;

use rand::Rng;

use crate::config::Config;
use crate::error::Error;
use crate::message::Message;
use crate::message::MessageType;
use crate::progress::PeerProgress;
use crate::progress::ProgressState;
use crate::raft_log::RaftLog;
use crate::storage::Storage;
use crate::types::ConfChange;
use crate::types::ConfChangeType;
use crate::types::ConfState;
use crate::types::EntryKind;
use crate::types::LogEntry;
use crate::types::ReadState;
use crate::types::Role;
use crate::types::Snapshot;

/// A single Raft replica's deterministic core. Owns all mutable state; every
/// operation is driven by the host through [`Node::step`] or [`Node::tick`]
/// and never performs I/O itself (spec §5).
pub struct Node<S: Storage> {
    pub id: u64,
    pub role: Role,
    pub term: u64,
    pub vote: u64,
    pub leader: u64,

    election_elapsed: usize,
    heartbeat_elapsed: usize,
    election_timeout: usize,
    heartbeat_timeout: usize,
    randomized_election_timeout: usize,
    pub check_quorum: bool,
    pub pending_conf: bool,

    peers: BTreeMap<u64, PeerProgress>,
    votes: BTreeMap<u64, bool>,

    max_inflight_msgs: usize,
    max_size_per_msg: u64,

    pub log: RaftLog<S>,

    /// Outgoing messages produced since the last drain, in production order.
    outbox: Vec<Message>,
    /// Read-index tokens ready for the host to consume.
    read_states: Vec<ReadState>,
}

impl<S: Storage> Node<S> {
    /// Constructs a node from its configuration and storage's durable
    /// state. Mirrors `newRaft` in the original source: `ConfState`'s peers
    /// take precedence over `cfg.peers` and the two must not both be given
    /// non-empty (spec §3 supplement).
    pub fn new(cfg: Config, storage: S) -> Result<Self, Error> {
        cfg.validate()?;

        let (hard_state, conf_state) = storage.initial_state()?;
        let peer_ids = if !conf_state.peers.is_empty() {
            assert!(
                cfg.peers.is_empty(),
                "both ConfState and Config supplied peers; only one may"
            );
            conf_state.peers.clone()
        } else {
            cfg.peers.clone()
        };

        let log = RaftLog::new(storage);
        let last_index = log.last_index();

        let mut peers = BTreeMap::new();
        for id in &peer_ids {
            let mut pr = PeerProgress::new(*id, last_index + 1, cfg.max_inflight_msgs);
            if *id == cfg.id {
                pr.matched = last_index;
            }
            peers.insert(*id, pr);
        }

        let mut node = Node {
            id: cfg.id,
            role: Role::Follower,
            term: hard_state.term,
            vote: hard_state.vote,
            leader: 0,
            election_elapsed: 0,
            heartbeat_elapsed: 0,
            election_timeout: cfg.election_tick,
            heartbeat_timeout: cfg.heartbeat_tick,
            randomized_election_timeout: cfg.election_tick,
            check_quorum: cfg.check_quorum,
            pending_conf: false,
            peers,
            votes: BTreeMap::new(),
            max_inflight_msgs: cfg.max_inflight_msgs,
            max_size_per_msg: cfg.max_size_per_msg,
            log,
            outbox: Vec::new(),
            read_states: Vec::new(),
        };
        node.log.commit_to(hard_state.commit);
        node.reset_randomized_timeout();
        Ok(node)
    }

    /// Drains and returns every message queued since the last drain. The
    /// host must persist any new hard state / appended entries produced in
    /// the same `Step`/`Tick` before transmitting these (spec §5).
    pub fn take_messages(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.outbox)
    }

    /// Drains and returns every read-index token produced since the last
    /// drain.
    pub fn take_read_states(&mut self) -> Vec<ReadState> {
        std::mem::take(&mut self.read_states)
    }

    /// The durable hard state the host must persist before transmitting
    /// this step's outgoing messages.
    pub fn hard_state(&self) -> crate::types::HardState {
        crate::types::HardState { term: self.term, vote: self.vote, commit: self.log.commit() }
    }

    pub fn quorum(&self) -> usize {
        self.peers.len() / 2 + 1
    }

    fn is_promotable(&self) -> bool {
        self.peers.contains_key(&self.id)
    }

    fn reset_randomized_timeout(&mut self) {
        let t = self.election_timeout;
        let jitter = rand::thread_rng().gen_range(0..t.max(1));
        self.randomized_election_timeout = t + jitter;
    }

    fn past_election_timeout(&self) -> bool {
        self.election_elapsed >= self.randomized_election_timeout
    }

    /// Queues `msg` for delivery, stamping `from` and `term` per the
    /// original's `sendMsg` centralization (SPEC_FULL §3 supplement).
    fn send(&mut self, mut msg: Message) {
        msg.from = self.id;
        match msg.ty {
            MessageType::Vote | MessageType::VoteResp => {
                assert!(msg.term != 0, "vote messages must carry a term");
            }
            MessageType::Prop | MessageType::ReadIndex => {}
            _ => msg.term = self.term,
        }
        self.outbox.push(msg);
    }

    // ---- role transitions (spec §4.5) ----

    fn reset(&mut self, term: u64) {
        if self.term != term {
            self.term = term;
            self.vote = 0;
        }
        self.leader = 0;
        self.election_elapsed = 0;
        self.heartbeat_elapsed = 0;
        self.reset_randomized_timeout();
        self.votes.clear();

        let last_index = self.log.last_index();
        let self_id = self.id;
        let max_inflight = self.max_inflight_msgs;
        for (id, pr) in self.peers.iter_mut() {
            *pr = PeerProgress::new(*id, last_index + 1, max_inflight);
            if *id == self_id {
                pr.matched = last_index;
            }
        }
    }

    pub(crate) fn become_follower(&mut self, term: u64, leader: u64) {
        self.reset(term);
        self.role = Role::Follower;
        self.leader = leader;
        tracing::info!(id = self.id, term, leader, "became follower");
    }

    pub(crate) fn become_candidate(&mut self) {
        assert!(self.role != Role::Leader, "a leader cannot become a candidate");
        let term = self.term + 1;
        self.reset(term);
        self.role = Role::Candidate;
        self.vote = self.id;
        tracing::info!(id = self.id, term, "became candidate");
    }

    pub(crate) fn become_leader(&mut self) {
        assert!(self.role != Role::Follower, "a follower cannot become a leader directly");
        let term = self.term;
        self.reset(term);
        self.role = Role::Leader;
        self.leader = self.id;
        let entry = LogEntry::new(self.log.last_index() + 1, self.term, EntryKind::Normal, Vec::new());
        self.log.append(std::slice::from_ref(&entry));
        if let Some(pr) = self.peers.get_mut(&self.id) {
            pr.maybe_update(self.log.last_index());
        }
        // Mirrors `appendEntries`' append/maybeUpdate/maybeCommitRaft sequence
        // (original source): a single-node cluster commits its own no-op
        // entry here, since no AppResp will ever arrive to trigger it.
        self.maybe_commit_raft();
        tracing::info!(id = self.id, term, "became leader");
    }

    /// Starts a campaign: becomes candidate, votes for self, and either wins
    /// immediately (single-voter config) or broadcasts RequestVote.
    fn campaign(&mut self) {
        self.become_candidate();
        let term = self.term;
        let granted = self.poll_vote(self.id, true);
        if granted >= self.quorum() {
            self.become_leader();
            self.broadcast_append();
            return;
        }
        let last_index = self.log.last_index();
        let last_term = self.log.last_term();
        let targets: Vec<u64> = self.peers.keys().copied().filter(|id| *id != self.id).collect();
        for to in targets {
            let mut m = Message::new(MessageType::Vote);
            m.to = to;
            m.term = term;
            m.index = last_index;
            m.log_term = last_term;
            self.send(m);
        }
    }

    fn poll_vote(&mut self, from: u64, granted: bool) -> usize {
        self.votes.entry(from).or_insert(granted);
        self.votes.values().filter(|v| **v).count()
    }

    fn reject_votes(&self) -> usize {
        self.votes.values().filter(|v| !**v).count()
    }

    // ---- replication (leader side) ----

    pub(crate) fn broadcast_append(&mut self) {
        let targets: Vec<u64> = self.peers.keys().copied().collect();
        for to in targets {
            if to == self.id {
                continue;
            }
            self.send_append(to);
        }
    }

    pub(crate) fn send_append(&mut self, to: u64) {
        let paused = self.peers.get(&to).map(|pr| pr.is_paused()).unwrap_or(true);
        if paused {
            return;
        }
        let (next, state) = {
            let pr = self.peers.get(&to).unwrap();
            (pr.next, pr.state)
        };

        let term_res = self.log.term_of(next - 1);
        let entries_res = self.log.slice(next, self.log.last_index() + 1, self.max_size_per_msg);

        match (term_res, entries_res) {
            (Ok(prev_log_term), Ok(entries)) => {
                let last_sent = entries.last().map(|e| e.index);
                let mut m = Message::new(MessageType::App);
                m.to = to;
                m.index = next - 1;
                m.log_term = prev_log_term;
                m.commit = self.log.commit();
                m.entries = entries;

                if let Some(last_index) = last_sent {
                    let pr = self.peers.get_mut(&to).unwrap();
                    match state {
                        ProgressState::Replicate => {
                            pr.optimistic_update(last_index);
                            pr.inflights.add(last_index);
                        }
                        ProgressState::Probe => {
                            pr.pause();
                        }
                        ProgressState::Snapshot => unreachable!("snapshot mode never reaches send_append"),
                    }
                }
                self.send(m);
            }
            _ => self.send_snapshot(to),
        }
    }

    fn send_snapshot(&mut self, to: u64) {
        let active = self.peers.get(&to).map(|pr| pr.active).unwrap_or(false);
        if !active {
            return;
        }
        let snapshot = match self.log.storage().snapshot() {
            Ok(s) => s,
            Err(_) => return,
        };
        let index = snapshot.meta.last_index;
        if let Some(pr) = self.peers.get_mut(&to) {
            pr.become_snapshot(index);
        }
        let mut m = Message::new(MessageType::Snap);
        m.to = to;
        m.snapshot = Some(snapshot);
        self.send(m);
    }

    pub(crate) fn send_heartbeat(&mut self, to: u64, ctx: Vec<u8>) {
        let commit = match self.peers.get(&to) {
            Some(pr) => pr.matched.min(self.log.commit()),
            None => return,
        };
        let mut m = Message::new(MessageType::Heartbeat);
        m.to = to;
        m.commit = commit;
        m.context = ctx;
        self.send(m);
    }

    pub(crate) fn broadcast_heartbeat(&mut self) {
        let targets: Vec<u64> = self.peers.keys().copied().collect();
        for to in targets {
            if to == self.id {
                continue;
            }
            self.send_heartbeat(to, Vec::new());
        }
    }

    /// Commit advancement (spec §4.5 `maybeCommitRaft`): the value at
    /// position `quorum - 1` after sorting `match` descending is the
    /// largest index replicated on a majority.
    pub(crate) fn maybe_commit_raft(&mut self) -> bool {
        let mut matches: Vec<u64> = self.peers.values().map(|pr| pr.matched).collect();
        matches.sort_unstable_by(|a, b| b.cmp(a));
        let quorum = self.quorum();
        if quorum == 0 || quorum > matches.len() {
            return false;
        }
        let committed_index = matches[quorum - 1];
        self.log.maybe_commit(committed_index, self.term)
    }

    fn check_quorum_active(&self) -> bool {
        let active = self.peers.values().filter(|pr| pr.active || pr.id == self.id).count();
        active >= self.quorum()
    }

    fn clear_active(&mut self) {
        for pr in self.peers.values_mut() {
            pr.active = false;
        }
    }

    /// Accepts or rejects an incoming snapshot per spec §4.5
    /// `restoreSnapshot`. Returns `true` iff the snapshot was accepted and
    /// peers were rebuilt.
    pub(crate) fn restore_snapshot(&mut self, snapshot: &Snapshot) -> bool {
        let meta = &snapshot.meta;
        if meta.last_index <= self.log.commit() {
            return false;
        }
        if self.log.match_term(meta.last_index, meta.last_term) {
            self.log.commit_to(meta.last_index);
            return false;
        }
        self.log.restore(meta.last_index, meta.last_term);
        self.rebuild_peers_from_conf_state(&meta.conf_state);
        true
    }

    /// Applies a decoded `ConfChange` once the host has advanced `applied`
    /// past the entry that carried it, clearing the `pending_conf` latch
    /// (invariant 7) and adding or removing the target peer. Returns the
    /// resulting `ConfState` for the host to persist.
    ///
    /// A single-server change only: adding an id already present, or
    /// removing one already absent, is a no-op besides clearing the latch.
    /// Removing the last self-id drops this node out of the voting set;
    /// `is_promotable` then refuses to self-campaign, matching `raft-rs`'s
    /// `RawNode::apply_conf_change` behavior for a removed leader.
    pub fn apply_conf_change(&mut self, cc: &ConfChange) -> ConfState {
        self.pending_conf = false;
        match cc.change_type {
            ConfChangeType::AddNode => {
                if !self.peers.contains_key(&cc.node_id) {
                    // `PeerProgress::new` already starts in `Probe` with
                    // `next = last_index + 1`, a fresh guess for a peer we
                    // have no replication history with (spec §4.3).
                    let next = self.log.last_index() + 1;
                    let pr = PeerProgress::new(cc.node_id, next, self.max_inflight_msgs);
                    self.peers.insert(cc.node_id, pr);
                    tracing::info!(id = self.id, added = cc.node_id, "applied conf change: add node");
                }
            }
            ConfChangeType::RemoveNode => {
                if self.peers.remove(&cc.node_id).is_some() {
                    tracing::info!(id = self.id, removed = cc.node_id, "applied conf change: remove node");
                    if self.role == Role::Leader {
                        self.maybe_commit_raft();
                    }
                }
            }
        }
        self.conf_state()
    }

    /// The configuration currently in effect, as a `ConfState` the host can
    /// persist after a membership change (spec §3: `ConfState`, "set of peer
    /// ids currently in the configuration").
    pub fn conf_state(&self) -> ConfState {
        ConfState { peers: self.peers.keys().copied().collect() }
    }

    fn rebuild_peers_from_conf_state(&mut self, cs: &ConfState) {
        self.peers.clear();
        let next = self.log.last_index() + 1;
        for id in &cs.peers {
            let mut pr = PeerProgress::new(*id, next, self.max_inflight_msgs);
            pr.matched = 0;
            if *id == self.id {
                pr.matched = self.log.last_index();
            }
            self.peers.insert(*id, pr);
        }
    }

    // ---- Step / Tick ----

    #[tracing::instrument(level = "trace", skip(self, msg), fields(id = self.id, role = ?self.role))]
    pub fn step(&mut self, msg: Message) {
        if msg.term == 0 {
            // local/synthetic message, no term handling.
        } else if msg.term > self.term {
            if msg.ty == MessageType::Vote {
                let in_lease =
                    self.check_quorum && self.leader != 0 && self.election_elapsed < self.election_timeout;
                if in_lease {
                    tracing::debug!(
                        id = self.id,
                        from = msg.from,
                        "dropping vote request within leader lease"
                    );
                    return;
                }
            }
            let new_leader = match msg.ty {
                MessageType::App | MessageType::Heartbeat | MessageType::Snap => msg.from,
                _ => 0,
            };
            self.become_follower(msg.term, new_leader);
        } else if msg.term < self.term {
            match msg.ty {
                MessageType::App | MessageType::Heartbeat | MessageType::Snap => {
                    let mut resp = Message::new(MessageType::AppResp);
                    resp.to = msg.from;
                    self.send(resp);
                }
                _ => {}
            }
            tracing::debug!(id = self.id, from = msg.from, msg_term = msg.term, "dropping stale-term message");
            return;
        }

        match msg.ty {
            MessageType::Hup => self.handle_hup(),
            MessageType::Vote => self.handle_vote_request(msg),
            _ => match self.role {
                Role::Follower => self.step_follower(msg),
                Role::Candidate => self.step_candidate(msg),
                Role::Leader => self.step_leader(msg),
            },
        }
    }

    fn handle_hup(&mut self) {
        if self.role == Role::Leader {
            tracing::debug!(id = self.id, "ignoring Hup because already leader");
            return;
        }
        let unapplied = self
            .log
            .slice(self.log.applied() + 1, self.log.commit() + 1, 0)
            .unwrap_or_default();
        let pending = unapplied.iter().filter(|e| e.kind == EntryKind::ConfChange).count();
        if pending > 0 {
            tracing::warn!(
                id = self.id,
                term = self.term,
                pending,
                "cannot campaign: pending configuration changes not yet applied"
            );
            return;
        }
        tracing::info!(id = self.id, term = self.term, "starting a new election");
        self.campaign();
    }

    fn handle_vote_request(&mut self, msg: Message) {
        let can_grant = (self.vote == 0 || self.vote == msg.from) && self.log.is_up_to_date(msg.index, msg.log_term);
        let mut resp = Message::new(MessageType::VoteResp);
        resp.to = msg.from;
        resp.term = msg.term;
        if can_grant {
            self.vote = msg.from;
            self.election_elapsed = 0;
            resp.reject = false;
            tracing::info!(id = self.id, candidate = msg.from, term = msg.term, "granted vote");
        } else {
            resp.reject = true;
        }
        self.send(resp);
    }

    pub fn tick(&mut self) {
        match self.role {
            Role::Follower | Role::Candidate => self.tick_election(),
            Role::Leader => self.tick_heartbeat(),
        }
    }

    fn tick_election(&mut self) {
        self.election_elapsed += 1;
        if self.is_promotable() && self.past_election_timeout() {
            self.election_elapsed = 0;
            self.step(Message { ty: MessageType::Hup, to: self.id, ..Default::default() });
        }
    }

    fn tick_heartbeat(&mut self) {
        self.election_elapsed += 1;
        self.heartbeat_elapsed += 1;

        if self.election_elapsed >= self.election_timeout {
            self.election_elapsed = 0;
            if self.check_quorum {
                self.step(Message { ty: MessageType::CheckQuorum, from: self.id, ..Default::default() });
            }
        }
        if self.heartbeat_elapsed >= self.heartbeat_timeout {
            self.heartbeat_elapsed = 0;
            self.step(Message { ty: MessageType::Beat, from: self.id, ..Default::default() });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MemStorage;

    fn leaderish_node(id: u64, peers: Vec<u64>) -> Node<MemStorage> {
        let storage = MemStorage::new_with_conf_state(peers);
        let cfg = Config {
            id,
            peers: vec![],
            election_tick: 10,
            heartbeat_tick: 1,
            max_size_per_msg: 1024 * 1024,
            max_inflight_msgs: 256,
            check_quorum: false,
        };
        Node::new(cfg, storage).unwrap()
    }

    fn log_with_terms(node: &mut Node<MemStorage>, terms: &[u64]) {
        let entries: Vec<LogEntry> = terms
            .iter()
            .enumerate()
            .map(|(i, &term)| LogEntry::new(i as u64 + 1, term, EntryKind::Normal, Vec::new()))
            .collect();
        node.log.append(&entries);
    }

    /// Scenario 4 (spec §8): commit advances to the highest index held by a
    /// majority, gated by the term guard (Raft §5.4.2 / invariant 4).
    #[test]
    fn commit_advance_respects_quorum_and_term_guard() {
        let mut node = leaderish_node(1, vec![1, 2, 3]);
        node.term = 2;
        log_with_terms(&mut node, &[1, 1, 1, 1, 2]);

        for (id, matched) in maplit::btreemap! { 1u64 => 5u64, 2 => 5, 3 => 3 } {
            node.peers.get_mut(&id).unwrap().matched = matched;
        }
        assert!(node.maybe_commit_raft());
        assert_eq!(node.log.commit(), 5);
    }

    #[test]
    fn commit_advance_blocked_when_majority_index_is_a_prior_term() {
        let mut node = leaderish_node(1, vec![1, 2, 3]);
        node.term = 2;
        log_with_terms(&mut node, &[1, 1, 1, 1, 1]);

        for (id, matched) in maplit::btreemap! { 1u64 => 5u64, 2 => 5, 3 => 3 } {
            node.peers.get_mut(&id).unwrap().matched = matched;
        }
        assert!(!node.maybe_commit_raft());
        assert_eq!(node.log.commit(), 0);
    }

    /// A second ConfChange proposed while one is still pending is downgraded
    /// to Normal (invariant 7); applying the first via `apply_conf_change`
    /// clears the latch and lets a later one through unmodified.
    #[test]
    fn pending_conf_latch_downgrades_second_change_until_applied() {
        let mut node = leaderish_node(1, vec![1, 2, 3]);
        node.become_candidate();
        node.become_leader();
        node.take_messages();

        let mut prop = Message::new(MessageType::Prop);
        prop.entries = vec![LogEntry::new(0, 0, EntryKind::ConfChange, vec![4])];
        node.step(prop.clone());
        assert!(node.pending_conf);
        let first_kind = node.log.slice(node.log.last_index(), node.log.last_index() + 1, 0).unwrap()[0].kind;
        assert_eq!(first_kind, EntryKind::ConfChange);

        node.step(prop.clone());
        let second_kind = node.log.slice(node.log.last_index(), node.log.last_index() + 1, 0).unwrap()[0].kind;
        assert_eq!(second_kind, EntryKind::Normal, "second pending change must be downgraded");

        let cc = crate::types::ConfChange { change_type: crate::types::ConfChangeType::AddNode, node_id: 4 };
        let cs = node.apply_conf_change(&cc);
        assert!(!node.pending_conf);
        assert!(cs.peers.contains(&4));
        assert!(node.peers.contains_key(&4));

        node.step(prop);
        assert!(node.pending_conf, "latch should be settable again once cleared");
        let third_kind = node.log.slice(node.log.last_index(), node.log.last_index() + 1, 0).unwrap()[0].kind;
        assert_eq!(third_kind, EntryKind::ConfChange);
    }

    #[test]
    fn apply_conf_change_removes_peer_and_shrinks_quorum() {
        let mut node = leaderish_node(1, vec![1, 2, 3]);
        node.become_candidate();
        node.become_leader();
        assert_eq!(node.quorum(), 2);

        let cc = crate::types::ConfChange { change_type: crate::types::ConfChangeType::RemoveNode, node_id: 3 };
        let cs = node.apply_conf_change(&cc);
        assert!(!cs.peers.contains(&3));
        assert_eq!(node.quorum(), 2, "quorum of {1,2} is still 2");
        assert!(!node.peers.contains_key(&3));
    }

    /// A leader whose commit sits exactly at a just-restored snapshot's
    /// boundary must not panic serving a read-index request: `term_of`
    /// must answer that boundary from `pending_snapshot`, not fall through
    /// to a storage lookup that hasn't caught up yet.
    #[test]
    fn read_index_after_snapshot_restore_does_not_panic() {
        let mut node = leaderish_node(1, vec![1, 2, 3]);
        node.become_candidate();
        node.become_leader();

        let snapshot = Snapshot {
            meta: crate::types::SnapshotMeta {
                last_index: 10,
                last_term: node.term,
                conf_state: ConfState { peers: vec![1, 2, 3] },
            },
            data: vec![],
        };
        assert!(node.restore_snapshot(&snapshot));
        assert_eq!(node.log.commit(), 10);

        let mut req = Message::new(MessageType::ReadIndex);
        req.from = 0;
        req.entries = vec![LogEntry::new(0, 0, EntryKind::Normal, vec![9])];
        node.step(req);

        let states = node.take_read_states();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].index, 10);
        assert_eq!(states[0].ctx, vec![9]);
    }
}

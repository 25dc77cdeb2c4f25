//! Integration tests for the literal scenarios in spec §8.

use raft_core::Config;
use raft_core::ConfState;
use raft_core::EntryKind;
use raft_core::LogEntry;
use raft_core::MemStorage;
use raft_core::Message;
use raft_core::MessageType;
use raft_core::Node;
use raft_core::Role;
use raft_core::Snapshot;
use raft_core::SnapshotMeta;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn cfg(id: u64) -> Config {
    Config {
        id,
        peers: vec![],
        election_tick: 10,
        heartbeat_tick: 1,
        max_size_per_msg: 1024 * 1024,
        max_inflight_msgs: 256,
        check_quorum: false,
    }
}

fn new_node(id: u64, peers: Vec<u64>) -> Node<MemStorage> {
    let storage = MemStorage::new_with_conf_state(peers);
    Node::new(cfg(id), storage).unwrap()
}

/// The randomized election timeout lands in `[T, 2T)`; 2*T ticks always
/// clears it regardless of the jitter actually drawn.
fn tick_until<F: Fn(&Node<MemStorage>) -> bool>(node: &mut Node<MemStorage>, max_ticks: usize, done: F) {
    for _ in 0..max_ticks {
        if done(node) {
            return;
        }
        node.tick();
    }
    assert!(done(node), "condition not reached within {} ticks", max_ticks);
}

/// Scenario 1: single-node election.
#[test]
fn single_node_election() {
    init_tracing();
    let mut node = new_node(1, vec![1]);
    tick_until(&mut node, 20, |n| n.role == Role::Leader);

    assert_eq!(node.role, Role::Leader);
    assert_eq!(node.term, 1);
    assert_eq!(node.log.last_index(), 1);
    assert_eq!(node.log.commit(), 1);

    let entry = node.log.slice(1, 2, 0).unwrap();
    assert_eq!(entry.len(), 1);
    assert_eq!(entry[0].term, 1);
    assert_eq!(entry[0].kind, EntryKind::Normal);
}

/// Scenario 2: three-node normal election. Node 1 campaigns, a single
/// grant from node 2 is enough for quorum (2 of 3) before node 3 replies.
#[test]
fn three_node_election_wins_on_first_grant() {
    let mut node = new_node(1, vec![1, 2, 3]);
    tick_until(&mut node, 20, |n| n.role == Role::Candidate);
    assert_eq!(node.term, 1);

    let outbound = node.take_messages();
    let votes: Vec<_> = outbound.iter().filter(|m| m.ty == MessageType::Vote).collect();
    assert_eq!(votes.len(), 2, "candidate requests a vote from each other peer");

    let mut grant = Message::new(MessageType::VoteResp);
    grant.from = 2;
    grant.to = 1;
    grant.term = 1;
    grant.reject = false;
    node.step(grant);

    assert_eq!(node.role, Role::Leader);
    assert_eq!(node.term, 1);
    assert_eq!(node.log.last_index(), 1);

    let entry = node.log.slice(1, 2, 0).unwrap();
    assert_eq!(entry[0].term, 1);
    assert_eq!(entry[0].kind, EntryKind::Normal);

    let broadcast = node.take_messages();
    let appends: Vec<_> = broadcast.iter().filter(|m| m.ty == MessageType::App).collect();
    assert_eq!(appends.len(), 2, "new leader replicates the no-op entry to both followers");
}

/// Scenario 3: log conflict. The follower already has [(1,1),(2,1),(3,1)];
/// an App claiming prevIndex=2/prevTerm=2 conflicts and must be rejected
/// without truncating anything.
#[test]
fn log_conflict_is_rejected_without_truncation() {
    let mut node = new_node(2, vec![1, 2]);
    node.log.append(&[
        LogEntry::new(1, 1, EntryKind::Normal, vec![]),
        LogEntry::new(2, 1, EntryKind::Normal, vec![]),
        LogEntry::new(3, 1, EntryKind::Normal, vec![]),
    ]);

    let mut app = Message::new(MessageType::App);
    app.from = 1;
    app.to = 2;
    app.term = 1;
    app.index = 2;
    app.log_term = 2;
    app.entries = vec![LogEntry::new(3, 2, EntryKind::Normal, vec![])];
    node.step(app);

    let resp = node.take_messages();
    assert_eq!(resp.len(), 1);
    assert_eq!(resp[0].ty, MessageType::AppResp);
    assert!(resp[0].reject);
    assert_eq!(resp[0].index, 2);
    assert_eq!(resp[0].last_match_index, 3);

    assert_eq!(node.log.last_index(), 3);
    assert_eq!(node.log.term_of(3).unwrap(), 1, "log must be untouched on conflict");
}

/// Scenario 5: lease prevents disruption. A leader with `check_quorum` set
/// and a recent election-elapsed reset refuses a higher-term vote request.
#[test]
fn lease_prevents_disruption() {
    let storage = MemStorage::new_with_conf_state(vec![1]);
    let mut leader_cfg = cfg(1);
    leader_cfg.check_quorum = true;
    let mut node = Node::new(leader_cfg, storage).unwrap();
    tick_until(&mut node, 20, |n| n.role == Role::Leader);
    let term_before = node.term;
    node.take_messages();

    // A few heartbeat ticks, comfortably inside the lease window.
    node.tick();
    node.tick();
    node.tick();

    let mut vote = Message::new(MessageType::Vote);
    vote.from = 4;
    vote.to = 1;
    vote.term = term_before + 1;
    vote.index = 0;
    vote.log_term = 0;
    node.step(vote);

    assert_eq!(node.role, Role::Leader, "leader must not step down within its lease");
    assert_eq!(node.term, term_before, "term must not advance for a dropped vote");
    let resp = node.take_messages();
    assert!(resp.iter().all(|m| m.ty != MessageType::VoteResp), "the vote must be dropped, not answered");
}

/// Scenario 6: snapshot restore. A follower at commit=4 accepts a snapshot
/// ahead of its commit point and rejects a second, stale one.
#[test]
fn snapshot_restore_then_rejects_stale_snapshot() {
    let mut node = new_node(2, vec![1, 2]);
    node.log.append(&[
        LogEntry::new(1, 1, EntryKind::Normal, vec![]),
        LogEntry::new(2, 1, EntryKind::Normal, vec![]),
        LogEntry::new(3, 1, EntryKind::Normal, vec![]),
        LogEntry::new(4, 1, EntryKind::Normal, vec![]),
    ]);
    node.log.commit_to(4);

    let snapshot = Snapshot {
        meta: SnapshotMeta { last_index: 10, last_term: 3, conf_state: ConfState { peers: vec![1, 2, 3, 4] } },
        data: vec![],
    };
    let mut snap_msg = Message::new(MessageType::Snap);
    snap_msg.from = 1;
    snap_msg.to = 2;
    snap_msg.term = 1;
    snap_msg.snapshot = Some(snapshot);
    node.step(snap_msg);

    assert_eq!(node.log.commit(), 10);
    assert_eq!(node.log.last_index(), 10);
    let resp = node.take_messages();
    assert_eq!(resp.len(), 1);
    assert_eq!(resp[0].ty, MessageType::AppResp);
    assert_eq!(resp[0].index, 10);

    let stale = Snapshot {
        meta: SnapshotMeta { last_index: 8, last_term: 3, conf_state: ConfState { peers: vec![1, 2, 3, 4] } },
        data: vec![],
    };
    let mut stale_msg = Message::new(MessageType::Snap);
    stale_msg.from = 1;
    stale_msg.to = 2;
    stale_msg.term = 1;
    stale_msg.snapshot = Some(stale);
    node.step(stale_msg);

    assert_eq!(node.log.commit(), 10, "a snapshot at or below commit must not regress state");
    let resp = node.take_messages();
    assert_eq!(resp.len(), 1);
    assert_eq!(resp[0].ty, MessageType::AppResp);
    assert_eq!(resp[0].index, 10);
}

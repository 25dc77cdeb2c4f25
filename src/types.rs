//! Core data types shared across the log view, peer progress, and node
//! aggregate (spec §3).

#[cfg(feature = "serde")]
use serde::Deserialize;
#[cfg(feature = "serde")]
use serde::Serialize;

/// A single replicated log entry.
///
/// `index` is 1-based and monotonic; `term` is the term of the leader that
/// first appended it. Entries are immutable once `index <= commit`
/// (invariant 4).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LogEntry {
    pub index: u64,
    pub term: u64,
    pub kind: EntryKind,
    pub data: Vec<u8>,
}

impl LogEntry {
    pub fn new(index: u64, term: u64, kind: EntryKind, data: Vec<u8>) -> Self {
        Self { index, term, kind, data }
    }
}

/// Distinguishes ordinary application entries from membership-change
/// entries, which are serialized one-at-a-time through `pending_conf`
/// (invariant 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EntryKind {
    #[default]
    Normal,
    ConfChange,
}

/// The two single-server membership operations the core supports (spec §1
/// Non-goals: joint consensus, i.e. atomic multi-peer changes, is explicitly
/// excluded).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConfChangeType {
    AddNode,
    RemoveNode,
}

/// The decoded contents of a `ConfChange` entry's opaque payload. The core
/// never parses `LogEntry::data` itself (spec §3: "opaque payload bytes");
/// the host decodes the entry once it is applied and hands the result to
/// [`crate::node::Node::apply_conf_change`], mirroring how `raft-rs`-family
/// crates decode `eraftpb::ConfChange` out of an applied entry before
/// calling `RawNode::apply_conf_change`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConfChange {
    pub change_type: ConfChangeType,
    pub node_id: u64,
}

/// Durable state that must be persisted before any dependent outgoing
/// message is transmitted (spec §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HardState {
    pub term: u64,
    /// 0 means "no vote cast this term".
    pub vote: u64,
    pub commit: u64,
}

/// The set of peer ids currently in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConfState {
    pub peers: Vec<u64>,
}

/// Metadata describing what a snapshot covers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SnapshotMeta {
    pub last_index: u64,
    pub last_term: u64,
    pub conf_state: ConfState,
}

/// A full snapshot: metadata plus opaque application data. The core never
/// interprets `data`; it only compares `meta` against the log view.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Snapshot {
    pub meta: SnapshotMeta,
    pub data: Vec<u8>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.meta.last_index == 0
    }
}

/// A linearizable read token: `index` is the commit index the read was
/// linearized against, `ctx` is the opaque client-supplied token echoed
/// back unchanged (invariant 8).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ReadState {
    pub index: u64,
    pub ctx: Vec<u8>,
}

/// The three roles a [`crate::node::Node`] can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

impl Default for Role {
    fn default() -> Self {
        Role::Follower
    }
}

//! Wire messages exchanged between nodes, plus the handful of
//! locally-dispatched synthetic types used to drive tick-derived behavior
//! through the same `Step` path (spec §6).

use crate::types::LogEntry;
use crate::types::Snapshot;

#[cfg(feature = "serde")]
use serde::Deserialize;
#[cfg(feature = "serde")]
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MessageType {
    /// Local: tells this node to start a campaign.
    Hup,
    /// Local: tells a leader to broadcast a heartbeat round.
    Beat,
    /// Local: tells a leader to run its CheckQuorum sweep.
    CheckQuorum,
    /// Client proposal carrying entries to append.
    Prop,
    /// Leader -> follower: AppendEntries.
    App,
    /// Follower -> leader: AppendEntries response.
    AppResp,
    /// Candidate -> peer: RequestVote.
    Vote,
    /// Peer -> candidate: RequestVote response.
    VoteResp,
    /// Leader -> follower: heartbeat.
    Heartbeat,
    /// Follower -> leader: heartbeat response.
    HeartbeatResp,
    /// Leader -> follower: install snapshot.
    Snap,
    /// Local: report of the outcome of sending a snapshot.
    SnapStatus,
    /// Local: report that a peer could not be reached.
    Unreachable,
    /// Client/forwarded read-index request.
    ReadIndex,
    /// Leader -> requester: read-index response.
    ReadIndexResp,
}

/// A single message. Only the fields relevant to `ty` are populated; see the
/// field-usage table in spec §6.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Message {
    pub ty: MessageType,
    pub from: u64,
    pub to: u64,
    pub term: u64,
    /// App: prevIndex. AppResp: lastIndex or rejected index. Vote: lastIndex.
    /// ReadIndexResp: commit index at linearization.
    pub index: u64,
    /// App: prevLogTerm. Vote: lastTerm.
    pub log_term: u64,
    pub entries: Vec<LogEntry>,
    /// App: leader's commit index. Heartbeat: leader's commit index.
    pub commit: u64,
    pub reject: bool,
    /// AppResp reject hint: the rejecting follower's own last index.
    pub last_match_index: u64,
    /// Heartbeat/HeartbeatResp: opaque echo token. ReadIndex: client ctx.
    pub context: Vec<u8>,
    pub snapshot: Option<Snapshot>,
}

impl Default for MessageType {
    fn default() -> Self {
        MessageType::Hup
    }
}

impl Message {
    pub fn new(ty: MessageType) -> Self {
        Message { ty, ..Default::default() }
    }
}

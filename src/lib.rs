//! An I/O-free Raft consensus core: the per-replica state machine that turns
//! `step(msg)` calls and `tick()` calls into role transitions, an outbox of
//! outgoing messages, mutations to an in-memory log view, and linearizable
//! read-index tokens.
//!
//! This crate deliberately does not perform I/O. It never opens a socket,
//! never writes to disk, and never spawns a thread. A host process drives a
//! [`Node`] by feeding it [`Message`]s as they arrive over the network and
//! calling [`Node::tick`] on a fixed cadence, then drains [`Node::take_messages`]
//! and [`Node::take_read_states`] after each call and is responsible for
//! transporting the former and acting on the latter. The host also owns
//! durable storage: everything the core needs to read back is reached
//! through the [`Storage`] trait, and everything the core produces that must
//! outlive a crash (new [`HardState`] fields, newly appended entries) must be
//! persisted by the host *before* the outgoing messages produced in the same
//! call are transmitted; this is the Raft safety linearization point.
//!
//! Out of scope: wire encoding, transport, cluster bootstrap, client session
//! handling, snapshot chunking, and joint-consensus reconfiguration (only
//! single-server membership changes, serialized by a pending-conf latch, are
//! supported).
//!
//! ```ignore
//! // `MemStorage` lives behind the `test-support` feature; real hosts
//! // supply their own `Storage` impl backed by a durable engine.
//! use raft_core::{Config, MemStorage, Node};
//!
//! let storage = MemStorage::new_with_conf_state(vec![1]);
//! let cfg = Config {
//!     id: 1,
//!     peers: vec![],
//!     election_tick: 10,
//!     heartbeat_tick: 1,
//!     max_size_per_msg: 1024 * 1024,
//!     max_inflight_msgs: 256,
//!     check_quorum: false,
//! };
//! let mut node = Node::new(cfg, storage).unwrap();
//! for _ in 0..11 {
//!     node.tick();
//! }
//! assert_eq!(node.role, raft_core::Role::Leader);
//! ```

mod config;
mod error;
mod message;
#[cfg(any(test, feature = "test-support"))]
mod mem;
mod node;
mod progress;
mod raft_log;
mod storage;
mod types;

pub use config::Config;
pub use error::Error;
pub use error::Result;
pub use error::StorageError;
#[cfg(any(test, feature = "test-support"))]
pub use mem::MemStorage;
pub use message::Message;
pub use message::MessageType;
pub use node::Node;
pub use progress::Inflights;
pub use progress::PeerProgress;
pub use progress::ProgressState;
pub use raft_log::AppendResult;
pub use raft_log::RaftLog;
pub use storage::Storage;
pub use types::ConfChange;
pub use types::ConfChangeType;
pub use types::ConfState;
pub use types::EntryKind;
pub use types::HardState;
pub use types::LogEntry;
pub use types::ReadState;
pub use types::Role;
pub use types::Snapshot;
pub use types::SnapshotMeta;

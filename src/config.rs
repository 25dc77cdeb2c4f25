//! Node configuration, validated once at construction.

use crate::error::Error;

/// Configuration required to construct a [`crate::node::Node`].
///
/// Field set matches spec §6. `check_quorum` enables the CheckQuorum lease
/// mechanism (spec §4.4 Leader/tickHeartbeat, §4.5 Step prologue).
#[derive(Debug, Clone)]
pub struct Config {
    /// This node's id. Must be nonzero.
    pub id: u64,

    /// Initial peer ids, used only if storage's `ConfState` is empty.
    pub peers: Vec<u64>,

    /// Number of `tick()` calls before a follower starts an election.
    /// The node randomizes its effective timeout in `[election_tick, 2 *
    /// election_tick)` on every term reset.
    pub election_tick: usize,

    /// Number of `tick()` calls between leader heartbeats.
    pub heartbeat_tick: usize,

    /// Soft cap, in bytes, on the entries carried by a single AppendEntries.
    pub max_size_per_msg: u64,

    /// Max number of in-flight (unacknowledged) AppendEntries per peer while
    /// in Replicate mode.
    pub max_inflight_msgs: usize,

    /// Enables the CheckQuorum lease: a recently-contacted leader refuses to
    /// step down or grant out-of-band votes during its lease window.
    pub check_quorum: bool,
}

impl Config {
    pub fn validate(&self) -> Result<(), Error> {
        if self.id == 0 {
            return Err(Error::InvalidConfig("node id must be nonzero".into()));
        }
        if self.election_tick == 0 {
            return Err(Error::InvalidConfig("election_tick must be > 0".into()));
        }
        if self.heartbeat_tick == 0 {
            return Err(Error::InvalidConfig("heartbeat_tick must be > 0".into()));
        }
        if self.heartbeat_tick >= self.election_tick {
            return Err(Error::InvalidConfig(
                "heartbeat_tick must be smaller than election_tick".into(),
            ));
        }
        if self.max_inflight_msgs == 0 {
            return Err(Error::InvalidConfig("max_inflight_msgs must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Config {
        Config {
            id: 1,
            peers: vec![1],
            election_tick: 10,
            heartbeat_tick: 1,
            max_size_per_msg: 1024 * 1024,
            max_inflight_msgs: 256,
            check_quorum: false,
        }
    }

    #[test]
    fn rejects_zero_id() {
        let mut cfg = base();
        cfg.id = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_heartbeat_ge_election() {
        let mut cfg = base();
        cfg.heartbeat_tick = 10;
        cfg.election_tick = 10;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn accepts_sane_config() {
        assert!(base().validate().is_ok());
    }
}

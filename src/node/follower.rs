//! Follower role behavior (spec §4.4 Follower).

use crate::message::Message;
use crate::message::MessageType;
use crate::raft_log::AppendResult;
use crate::storage::Storage;
use crate::types::ReadState;

use super::Node;

impl<S: Storage> Node<S> {
    pub(super) fn step_follower(&mut self, msg: Message) {
        match msg.ty {
            MessageType::Prop => {
                if self.leader == 0 {
                    tracing::debug!(id = self.id, "no leader, dropping proposal");
                    return;
                }
                let mut msg = msg;
                msg.to = self.leader;
                self.send(msg);
            }
            MessageType::App => {
                self.election_elapsed = 0;
                self.leader = msg.from;
                self.handle_append_entries(msg);
            }
            MessageType::Heartbeat => {
                self.election_elapsed = 0;
                self.leader = msg.from;
                self.handle_heartbeat(msg);
            }
            MessageType::Snap => {
                self.election_elapsed = 0;
                self.leader = msg.from;
                self.handle_snapshot(msg);
            }
            MessageType::ReadIndex => {
                if self.leader == 0 {
                    tracing::debug!(id = self.id, "no leader, dropping read-index request");
                    return;
                }
                let mut msg = msg;
                msg.to = self.leader;
                self.send(msg);
            }
            MessageType::ReadIndexResp => {
                self.read_states.push(ReadState { index: msg.index, ctx: read_index_ctx(&msg) });
            }
            _ => {
                tracing::debug!(id = self.id, ty = ?msg.ty, "follower ignoring message");
            }
        }
    }

    pub(super) fn handle_append_entries(&mut self, msg: Message) {
        if msg.index < self.log.commit() {
            let mut resp = Message::new(MessageType::AppResp);
            resp.to = msg.from;
            resp.index = self.log.commit();
            self.send(resp);
            return;
        }
        match self.log.maybe_append(msg.index, msg.log_term, msg.commit, &msg.entries) {
            AppendResult::Ok { last_new_index } => {
                let mut resp = Message::new(MessageType::AppResp);
                resp.to = msg.from;
                resp.index = last_new_index;
                self.send(resp);
            }
            AppendResult::Conflict => {
                let mut resp = Message::new(MessageType::AppResp);
                resp.to = msg.from;
                resp.index = msg.index;
                resp.reject = true;
                resp.last_match_index = self.log.last_index();
                self.send(resp);
            }
        }
    }

    pub(super) fn handle_heartbeat(&mut self, msg: Message) {
        self.log.commit_to(msg.commit);
        let mut resp = Message::new(MessageType::HeartbeatResp);
        resp.to = msg.from;
        resp.context = msg.context;
        self.send(resp);
    }

    pub(super) fn handle_snapshot(&mut self, msg: Message) {
        let snapshot = match msg.snapshot {
            Some(s) => s,
            None => return,
        };
        if self.restore_snapshot(&snapshot) {
            let mut resp = Message::new(MessageType::AppResp);
            resp.to = msg.from;
            resp.index = self.log.last_index();
            self.send(resp);
        } else {
            let mut resp = Message::new(MessageType::AppResp);
            resp.to = msg.from;
            resp.index = self.log.commit();
            self.send(resp);
        }
    }
}

pub(super) fn read_index_ctx(msg: &Message) -> Vec<u8> {
    msg.entries.first().map(|e| e.data.clone()).unwrap_or_default()
}

//! Candidate role behavior (spec §4.4 Candidate).

use crate::message::Message;
use crate::message::MessageType;
use crate::storage::Storage;

use super::Node;

impl<S: Storage> Node<S> {
    pub(super) fn step_candidate(&mut self, msg: Message) {
        match msg.ty {
            MessageType::Prop => {
                tracing::debug!(id = self.id, term = self.term, "no leader at this term; dropping proposal");
            }
            MessageType::App => {
                self.become_follower(self.term, msg.from);
                self.handle_append_entries(msg);
            }
            MessageType::Heartbeat => {
                self.become_follower(self.term, msg.from);
                self.handle_heartbeat(msg);
            }
            MessageType::Snap => {
                self.become_follower(self.term, msg.from);
                self.handle_snapshot(msg);
            }
            MessageType::VoteResp => {
                let granted = self.poll_vote(msg.from, !msg.reject);
                let quorum = self.quorum();
                if granted >= quorum {
                    self.become_leader();
                    self.broadcast_append();
                } else if self.reject_votes() >= quorum {
                    self.become_follower(self.term, 0);
                }
            }
            _ => {
                tracing::debug!(id = self.id, ty = ?msg.ty, "candidate ignoring message");
            }
        }
    }
}

//! Topic state machine for publish/subscribe fan-out.
//!
//! A subscription is a retained commit: the `Listen` commit stays open in
//! the subscriber map exactly as long as the subscription is valid, which
//! pins the log entry that created it. Publishing walks subscribers in
//! session-id order and hands the message to the session fan-out;
//! subscribers whose session left the open states are dropped on the way
//! and their commit closed.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::manager::commit::Commit;
use crate::manager::machine::{MachineContext, ResourceStateMachine};
use crate::protocol::{decode_payload, encode_payload};
use crate::types::SessionId;

/// Event topic used for message delivery to subscribers.
pub const MESSAGE_TOPIC: &str = "message";

/// Operations on a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TopicRequest {
    /// Subscribe the submitting session.
    Listen,
    /// Unsubscribe the submitting session.
    Unlisten,
    /// Deliver a message to every subscriber.
    Publish { message: Bytes },
}

/// Responses from topic operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TopicResponse {
    Done,
}

/// The topic state machine.
#[derive(Default)]
pub struct TopicState {
    listeners: BTreeMap<SessionId, Commit<Bytes>>,
}

impl TopicState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl ResourceStateMachine for TopicState {
    fn apply(
        &mut self,
        commit: Commit<Bytes>,
        ctx: &mut MachineContext<'_>,
    ) -> Result<Bytes, ErrorCode> {
        let Ok(request) = decode_payload::<TopicRequest>(commit.operation()) else {
            commit.close();
            return Err(ErrorCode::InvalidArgument);
        };

        match request {
            TopicRequest::Listen => {
                let session = commit.session();
                if self.listeners.contains_key(&session) {
                    // Duplicate subscription is a no-op.
                    commit.close();
                } else {
                    self.listeners.insert(session, commit);
                }
            }

            TopicRequest::Unlisten => {
                if let Some(listener) = self.listeners.remove(&commit.session()) {
                    listener.close();
                }
                commit.close();
            }

            TopicRequest::Publish { message } => {
                let mut dead = Vec::new();
                for (&session, _) in self.listeners.iter() {
                    let open = ctx
                        .session_state(session)
                        .is_some_and(|state| state.is_open());
                    if open {
                        ctx.publish(session, MESSAGE_TOPIC, message.clone());
                    } else {
                        dead.push(session);
                    }
                }
                for session in dead {
                    if let Some(listener) = self.listeners.remove(&session) {
                        listener.close();
                    }
                }
                commit.close();
            }
        }

        encode_payload(&TopicResponse::Done).map_err(|_| ErrorCode::Internal)
    }

    fn session_closed(&mut self, session: SessionId, _ctx: &mut MachineContext<'_>) {
        if let Some(listener) = self.listeners.remove(&session) {
            listener.close();
        }
    }

    fn delete(&mut self, _ctx: &mut MachineContext<'_>) {
        for (_, listener) in std::mem::take(&mut self.listeners) {
            listener.close();
        }
    }

    fn snapshot(&self) -> Vec<u8> {
        let listeners: Vec<(u64, u64)> = self
            .listeners
            .iter()
            .map(|(session, commit)| (session.value(), commit.index().value()))
            .collect();
        bincode::serialize(&listeners).expect("topic snapshot must serialize")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::commit::CommitLedger;
    use crate::manager::machine::TimerQueue;
    use crate::manager::session::{EventEnvelope, SessionRegistry};
    use crate::protocol::CompactionMode;
    use crate::types::{LogIndex, ResourceId};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct Fixture {
        state: TopicState,
        sessions: SessionRegistry,
        timers: TimerQueue,
        ledger: Arc<CommitLedger>,
        index: u64,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                state: TopicState::new(),
                sessions: SessionRegistry::new(),
                timers: TimerQueue::new(),
                ledger: CommitLedger::new(),
                index: 0,
            }
        }

        fn connect(&mut self, session: u64) -> mpsc::UnboundedReceiver<EventEnvelope> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.sessions
                .register(SessionId::new(session), 0)
                .attach(tx);
            rx
        }

        fn apply(&mut self, session: u64, request: TopicRequest) {
            self.index += 1;
            let commit = Commit::new(
                LogIndex::new(self.index),
                SessionId::new(session),
                self.index * 10,
                CompactionMode::Quorum,
                encode_payload(&request).unwrap(),
                &self.ledger,
            );
            let mut ctx =
                MachineContext::new(ResourceId::new(1), &mut self.sessions, &mut self.timers);
            self.state.apply(commit, &mut ctx).unwrap();
        }
    }

    fn msg(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn test_listen_retains_commit() {
        let mut fx = Fixture::new();
        fx.connect(1);
        fx.apply(1, TopicRequest::Listen);

        assert_eq!(fx.state.listener_count(), 1);
        assert_eq!(fx.ledger.open_commits(), 1);
    }

    #[test]
    fn test_duplicate_listen_is_noop() {
        let mut fx = Fixture::new();
        fx.connect(1);
        fx.apply(1, TopicRequest::Listen);
        fx.apply(1, TopicRequest::Listen);

        assert_eq!(fx.state.listener_count(), 1);
        // The duplicate's commit closed immediately.
        assert_eq!(fx.ledger.open_commits(), 1);
    }

    #[test]
    fn test_publish_reaches_every_open_subscriber() {
        let mut fx = Fixture::new();
        let mut rx1 = fx.connect(1);
        let mut rx2 = fx.connect(2);
        fx.apply(1, TopicRequest::Listen);
        fx.apply(2, TopicRequest::Listen);

        fx.apply(3, TopicRequest::Publish { message: msg("hello") });

        assert_eq!(rx1.try_recv().unwrap().payload, msg("hello"));
        assert_eq!(rx2.try_recv().unwrap().payload, msg("hello"));
        // The publish commit itself closed.
        assert_eq!(fx.ledger.open_commits(), 2);
    }

    #[test]
    fn test_publish_prunes_dead_subscribers() {
        let mut fx = Fixture::new();
        fx.connect(1);
        fx.connect(2);
        fx.apply(1, TopicRequest::Listen);
        fx.apply(2, TopicRequest::Listen);

        fx.sessions.get_mut(SessionId::new(2)).unwrap().expire();
        fx.apply(3, TopicRequest::Publish { message: msg("m") });

        assert_eq!(fx.state.listener_count(), 1);
        assert_eq!(fx.ledger.open_commits(), 1);
    }

    #[test]
    fn test_unlisten_closes_subscription() {
        let mut fx = Fixture::new();
        fx.connect(1);
        fx.apply(1, TopicRequest::Listen);
        fx.apply(1, TopicRequest::Unlisten);

        assert_eq!(fx.state.listener_count(), 0);
        assert_eq!(fx.ledger.open_commits(), 0);
    }

    #[test]
    fn test_session_close_removes_subscription() {
        let mut fx = Fixture::new();
        fx.connect(1);
        fx.apply(1, TopicRequest::Listen);

        let mut ctx =
            MachineContext::new(ResourceId::new(1), &mut fx.sessions, &mut fx.timers);
        fx.state.session_closed(SessionId::new(1), &mut ctx);

        assert_eq!(fx.state.listener_count(), 0);
        assert_eq!(fx.ledger.open_commits(), 0);
    }

    #[test]
    fn test_delete_closes_all_subscriptions() {
        let mut fx = Fixture::new();
        fx.connect(1);
        fx.connect(2);
        fx.apply(1, TopicRequest::Listen);
        fx.apply(2, TopicRequest::Listen);

        let mut ctx =
            MachineContext::new(ResourceId::new(1), &mut fx.sessions, &mut fx.timers);
        fx.state.delete(&mut ctx);

        assert_eq!(fx.state.listener_count(), 0);
        assert_eq!(fx.ledger.open_commits(), 0);
    }
}

//! Server-side sessions and event fan-out.
//!
//! Each connected client holds one session. State machines publish
//! server-initiated events to sessions from inside `apply`; the session
//! assigns a monotonic per-session sequence, queues the event, and pushes
//! it down the live connection when one is attached.
//!
//! # Delivery guarantees
//!
//! - Events reach each client session in sequence order, at-least-once.
//! - The client acknowledges the highest contiguous sequence it has
//!   processed; everything above the ack is redelivered when the client
//!   reconnects to the same session.
//! - When a session expires, queued events are dropped and redelivery
//!   stops.

use std::collections::{BTreeMap, VecDeque};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::constants::MAX_UNACKED_EVENTS_PER_SESSION;
use crate::types::{EventSequence, SessionId};

/// Lifecycle states of a server-side session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The session is connected and healthy.
    Open,
    /// The cluster has lost contact, e.g. during a leader change; the
    /// session may still recover.
    Unstable,
    /// Keep-alives lapsed beyond the timeout; resource memberships have
    /// been released.
    Expired,
    /// The client closed the session explicitly.
    Closed,
}

impl SessionState {
    /// Whether the session can still receive events.
    pub fn is_open(self) -> bool {
        matches!(self, SessionState::Open | SessionState::Unstable)
    }
}

/// One server-initiated event on a session's outgoing stream.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    pub sequence: EventSequence,
    pub topic: String,
    pub payload: Bytes,
}

/// Server-side state for one client session.
#[derive(Debug)]
pub struct ServerSession {
    id: SessionId,
    state: SessionState,
    last_sequence: u64,
    ack_sequence: u64,
    pending: VecDeque<EventEnvelope>,
    sink: Option<mpsc::UnboundedSender<EventEnvelope>>,
    last_keep_alive: u64,
}

impl ServerSession {
    fn new(id: SessionId, now: u64) -> Self {
        Self {
            id,
            state: SessionState::Open,
            last_sequence: 0,
            ack_sequence: 0,
            pending: VecDeque::new(),
            sink: None,
            last_keep_alive: now,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Timestamp of the last keep-alive, in ms.
    pub fn last_keep_alive(&self) -> u64 {
        self.last_keep_alive
    }

    /// Events queued and not yet acknowledged.
    pub fn unacknowledged(&self) -> usize {
        self.pending.len()
    }

    /// Queue an event for delivery and push it down the live connection.
    ///
    /// Returns the assigned sequence, or `None` when the session can no
    /// longer receive events.
    pub fn publish(&mut self, topic: &str, payload: Bytes) -> Option<EventSequence> {
        if !self.state.is_open() {
            return None;
        }
        if self.pending.len() >= MAX_UNACKED_EVENTS_PER_SESSION {
            tracing::warn!(session = %self.id, "session event queue overflow, expiring");
            self.expire();
            return None;
        }

        self.last_sequence += 1;
        let event = EventEnvelope {
            sequence: EventSequence::new(self.last_sequence),
            topic: topic.to_string(),
            payload,
        };
        self.pending.push_back(event.clone());

        if let Some(sink) = &self.sink {
            if sink.send(event).is_err() {
                // Connection gone; keep queueing for redelivery on
                // reconnect.
                self.sink = None;
            }
        }
        Some(EventSequence::new(self.last_sequence))
    }

    /// Record the client's highest-contiguous acknowledgement.
    pub fn acknowledge(&mut self, sequence: EventSequence) {
        if sequence.value() <= self.ack_sequence {
            return;
        }
        self.ack_sequence = sequence.value().min(self.last_sequence);
        while let Some(front) = self.pending.front() {
            if front.sequence.value() <= self.ack_sequence {
                self.pending.pop_front();
            } else {
                break;
            }
        }
    }

    /// Attach a live connection, redelivering everything unacknowledged.
    pub fn attach(&mut self, sink: mpsc::UnboundedSender<EventEnvelope>) {
        for event in &self.pending {
            if sink.send(event.clone()).is_err() {
                return;
            }
        }
        self.sink = Some(sink);
        if self.state == SessionState::Unstable {
            self.state = SessionState::Open;
        }
    }

    /// Record a keep-alive from the client.
    pub fn keep_alive(&mut self, now: u64) {
        self.last_keep_alive = now;
        if self.state == SessionState::Unstable {
            self.state = SessionState::Open;
        }
    }

    /// Mark the session unstable (leader change in progress).
    pub fn suspend(&mut self) {
        if self.state == SessionState::Open {
            self.state = SessionState::Unstable;
        }
    }

    /// Expire the session, dropping queued events.
    pub fn expire(&mut self) {
        self.state = SessionState::Expired;
        self.pending.clear();
        self.sink = None;
    }

    /// Close the session explicitly.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
        self.pending.clear();
        self.sink = None;
    }
}

/// All server-side sessions, keyed by id.
///
/// A `BTreeMap` keeps sweeps and snapshots in deterministic id order.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<SessionId, ServerSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session created by the consensus layer.
    pub fn register(&mut self, id: SessionId, now: u64) -> &mut ServerSession {
        self.sessions
            .entry(id)
            .or_insert_with(|| ServerSession::new(id, now))
    }

    pub fn get(&self, id: SessionId) -> Option<&ServerSession> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut ServerSession> {
        self.sessions.get_mut(&id)
    }

    /// Current state of a session, if it is known.
    pub fn state(&self, id: SessionId) -> Option<SessionState> {
        self.sessions.get(&id).map(ServerSession::state)
    }

    /// Publish an event to a session.
    ///
    /// Returns the assigned sequence, or `None` when the session is gone
    /// or can no longer receive events.
    pub fn publish(&mut self, id: SessionId, topic: &str, payload: Bytes) -> Option<EventSequence> {
        self.sessions.get_mut(&id)?.publish(topic, payload)
    }

    /// Sessions whose keep-alives lapsed before `deadline`.
    pub fn lapsed_before(&self, deadline: u64) -> Vec<SessionId> {
        self.sessions
            .values()
            .filter(|s| s.state().is_open() && s.last_keep_alive() < deadline)
            .map(ServerSession::id)
            .collect()
    }

    /// Number of registered sessions, in any state.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

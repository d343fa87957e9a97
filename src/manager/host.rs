//! The state-machine host.
//!
//! One host runs per replica. It owns the resource manager, the session
//! registry, and the timer queue, and applies committed entries strictly
//! in log order on one logical thread. Timer callbacks are serialized
//! against entry application: before an entry applies, every timer due at
//! or before the entry's timestamp fires in deterministic order, so a
//! replica replaying the same log fires the same timers at the same
//! points.
//!
//! Session lifecycle (open, expire, close) is decided by the consensus
//! layer and driven into the host explicitly; the host never expires a
//! session on its own.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::ErrorCode;
use crate::manager::commit::CommitLedger;
use crate::manager::session::{EventEnvelope, SessionRegistry, SessionState};
use crate::manager::machine::TimerQueue;
use crate::manager::state::{ManagerOperation, ManagerResponse, ResourceManager};
use crate::registry::TypeRegistry;
use crate::types::{EventSequence, LogIndex, SessionId};

/// One committed log entry as handed to the host.
#[derive(Debug, Clone)]
pub struct CommittedEntry {
    pub index: LogIndex,
    pub session: SessionId,
    pub timestamp: u64,
    pub operation: ManagerOperation,
}

/// Hosts the manager and all per-resource machines for one replica.
pub struct StateMachineHost {
    manager: ResourceManager,
    sessions: SessionRegistry,
    timers: TimerQueue,
    ledger: Arc<CommitLedger>,
    last_applied: LogIndex,
}

impl StateMachineHost {
    pub fn new(types: TypeRegistry) -> Self {
        Self {
            manager: ResourceManager::new(types),
            sessions: SessionRegistry::new(),
            timers: TimerQueue::new(),
            ledger: CommitLedger::new(),
            last_applied: LogIndex::new(0),
        }
    }

    /// Apply one committed entry.
    pub fn apply(&mut self, entry: CommittedEntry) -> Result<ManagerResponse, ErrorCode> {
        debug_assert!(entry.index > self.last_applied, "entries must apply in order");
        self.fire_timers_up_to(entry.timestamp);
        self.last_applied = entry.index;

        if let Some(session) = self.sessions.get_mut(entry.session) {
            session.keep_alive(entry.timestamp);
        }

        self.manager.apply(
            entry.index,
            entry.session,
            entry.timestamp,
            entry.operation,
            &self.ledger,
            &mut self.sessions,
            &mut self.timers,
        )
    }

    /// Advance time without applying an entry, firing due timers.
    pub fn tick(&mut self, now: u64) {
        self.fire_timers_up_to(now);
    }

    fn fire_timers_up_to(&mut self, now: u64) {
        while let Some((timer, resource)) = self.timers.pop_due(now) {
            tracing::trace!(%timer, %resource, "firing timer");
            self.manager
                .fire_timer(timer, resource, &mut self.sessions, &mut self.timers);
        }
    }

    // =========================================================================
    // Session lifecycle, driven by the consensus layer
    // =========================================================================

    /// A client session registered.
    pub fn open_session(&mut self, session: SessionId, now: u64) {
        self.sessions.register(session, now);
    }

    /// A session's keep-alives lapsed; release its state everywhere.
    pub fn expire_session(&mut self, session: SessionId) {
        if let Some(state) = self.sessions.state(session) {
            if state == SessionState::Expired {
                return;
            }
        }
        tracing::info!(%session, "session expired");
        if let Some(s) = self.sessions.get_mut(session) {
            s.expire();
        }
        self.manager
            .session_expired(session, &mut self.sessions, &mut self.timers);
    }

    /// A client closed its session explicitly.
    pub fn close_session(&mut self, session: SessionId) {
        if let Some(s) = self.sessions.get_mut(session) {
            s.close();
        }
        self.manager
            .session_closed(session, &mut self.sessions, &mut self.timers);
    }

    /// Mark every open session unstable during a leader change.
    pub fn suspend_sessions(&mut self) {
        let ids: Vec<SessionId> = self.sessions.lapsed_before(u64::MAX);
        for id in ids {
            if let Some(s) = self.sessions.get_mut(id) {
                s.suspend();
            }
        }
    }

    /// Attach a live event connection to a session, redelivering anything
    /// unacknowledged.
    pub fn attach_session(
        &mut self,
        session: SessionId,
        sink: mpsc::UnboundedSender<EventEnvelope>,
    ) {
        if let Some(s) = self.sessions.get_mut(session) {
            s.attach(sink);
        }
    }

    /// Record a client's highest-contiguous event acknowledgement.
    pub fn acknowledge(&mut self, session: SessionId, sequence: EventSequence) {
        if let Some(s) = self.sessions.get_mut(session) {
            s.acknowledge(sequence);
        }
    }

    /// Record a keep-alive.
    pub fn keep_alive(&mut self, session: SessionId, now: u64) {
        if let Some(s) = self.sessions.get_mut(session) {
            s.keep_alive(now);
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn session_state(&self, session: SessionId) -> Option<SessionState> {
        self.sessions.state(session)
    }

    pub fn ledger(&self) -> &Arc<CommitLedger> {
        &self.ledger
    }

    pub fn last_applied(&self) -> LogIndex {
        self.last_applied
    }

    pub fn manager(&self) -> &ResourceManager {
        &self.manager
    }

    /// Serialized logical state for replay-equality checks.
    pub fn snapshot(&self) -> Vec<u8> {
        self.manager.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ResourceType, TypeDescriptor, TypeRegistry};
    use crate::types::TypeId;

    fn host() -> StateMachineHost {
        let mut types = TypeRegistry::new();
        types
            .register(TypeDescriptor {
                resource_type: ResourceType::new(1, "null"),
                new_machine: || Box::new(crate::manager::machine::tests::NullMachine),
                codecs: &[],
            })
            .unwrap();
        StateMachineHost::new(types)
    }

    fn entry(index: u64, session: u64, op: ManagerOperation) -> CommittedEntry {
        CommittedEntry {
            index: LogIndex::new(index),
            session: SessionId::new(session),
            timestamp: index * 10,
            operation: op,
        }
    }

    #[test]
    fn test_apply_advances_last_applied() {
        let mut host = host();
        host.open_session(SessionId::new(1), 0);
        host.apply(entry(
            1,
            1,
            ManagerOperation::GetResource {
                key: "k".to_string(),
                type_id: TypeId::new(1),
            },
        ))
        .unwrap();
        assert_eq!(host.last_applied(), LogIndex::new(1));
    }

    #[test]
    fn test_expire_session_is_idempotent() {
        let mut host = host();
        host.open_session(SessionId::new(1), 0);
        host.expire_session(SessionId::new(1));
        host.expire_session(SessionId::new(1));
        assert_eq!(
            host.session_state(SessionId::new(1)),
            Some(SessionState::Expired)
        );
    }

    #[test]
    fn test_commit_conservation_through_host() {
        let mut host = host();
        host.open_session(SessionId::new(1), 0);
        for i in 1..=5 {
            host.apply(entry(
                i,
                1,
                ManagerOperation::GetResource {
                    key: format!("k{i}"),
                    type_id: TypeId::new(1),
                },
            ))
            .unwrap();
        }
        assert_eq!(host.ledger().opened(), 5);
        assert_eq!(host.ledger().open_commits(), 0);
        assert_eq!(host.ledger().leaked(), 0);
    }
}

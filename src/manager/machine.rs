//! The per-resource state machine trait and its apply context.
//!
//! Every resource kind ships a deterministic state machine hosted by the
//! resource manager. Machines apply committed operations in log order on a
//! single logical thread and must never block or suspend; the only outside
//! effects available are the ones the [`MachineContext`] exposes: event
//! publication to sessions and timer scheduling.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::config::ResourceConfig;
use crate::error::ErrorCode;
use crate::manager::commit::Commit;
use crate::manager::session::{SessionRegistry, SessionState};
use crate::types::{EventSequence, ResourceId, SessionId, TimerId};

/// Deterministic timer queue shared by every machine the host runs.
///
/// Timers are keyed by `(fire_at, id)` with ids allocated monotonically,
/// giving a total firing order that replays identically from the same log.
#[derive(Debug, Default)]
pub struct TimerQueue {
    next_id: u64,
    by_deadline: BTreeMap<(u64, TimerId), ResourceId>,
    deadlines: BTreeMap<TimerId, u64>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a timer for a resource at an absolute time in ms.
    pub fn schedule(&mut self, resource: ResourceId, fire_at: u64) -> TimerId {
        self.next_id += 1;
        let id = TimerId::new(self.next_id);
        self.by_deadline.insert((fire_at, id), resource);
        self.deadlines.insert(id, fire_at);
        id
    }

    /// Cancel a timer. Cancelling an already-fired timer is a no-op.
    pub fn cancel(&mut self, id: TimerId) {
        if let Some(fire_at) = self.deadlines.remove(&id) {
            self.by_deadline.remove(&(fire_at, id));
        }
    }

    /// Drop every timer belonging to a resource.
    pub fn cancel_resource(&mut self, resource: ResourceId) {
        let stale: Vec<(u64, TimerId)> = self
            .by_deadline
            .iter()
            .filter(|(_, owner)| **owner == resource)
            .map(|(&key, _)| key)
            .collect();
        for (fire_at, id) in stale {
            self.by_deadline.remove(&(fire_at, id));
            self.deadlines.remove(&id);
        }
    }

    /// Pop the earliest timer due at or before `now`.
    pub fn pop_due(&mut self, now: u64) -> Option<(TimerId, ResourceId)> {
        let (&(fire_at, id), &resource) = self.by_deadline.iter().next()?;
        if fire_at > now {
            return None;
        }
        self.by_deadline.remove(&(fire_at, id));
        self.deadlines.remove(&id);
        Some((id, resource))
    }

    /// Number of armed timers.
    pub fn len(&self) -> usize {
        self.by_deadline.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_deadline.is_empty()
    }
}

/// The effects available to a machine while applying a commit or firing a
/// timer.
pub struct MachineContext<'a> {
    resource_id: ResourceId,
    sessions: &'a mut SessionRegistry,
    timers: &'a mut TimerQueue,
}

impl<'a> MachineContext<'a> {
    pub fn new(
        resource_id: ResourceId,
        sessions: &'a mut SessionRegistry,
        timers: &'a mut TimerQueue,
    ) -> Self {
        Self {
            resource_id,
            sessions,
            timers,
        }
    }

    /// The resource being applied to.
    pub fn resource_id(&self) -> ResourceId {
        self.resource_id
    }

    /// Publish an event to a session's outgoing stream.
    pub fn publish(
        &mut self,
        session: SessionId,
        topic: &str,
        payload: Bytes,
    ) -> Option<EventSequence> {
        self.sessions.publish(session, topic, payload)
    }

    /// Current state of a session.
    pub fn session_state(&self, session: SessionId) -> Option<SessionState> {
        self.sessions.state(session)
    }

    /// Schedule a timer for this resource at an absolute time in ms.
    pub fn schedule(&mut self, fire_at: u64) -> TimerId {
        self.timers.schedule(self.resource_id, fire_at)
    }

    /// Cancel a previously scheduled timer.
    pub fn cancel(&mut self, timer: TimerId) {
        self.timers.cancel(timer);
    }
}

/// A deterministic state machine for one resource.
///
/// `apply` receives the raw operation payload; the machine decodes it with
/// its own codec and must close the commit exactly once, either inside
/// `apply` or later from a hook, once the entry's effect is no longer
/// needed.
pub trait ResourceStateMachine: Send {
    /// Apply a committed operation and produce the encoded response.
    fn apply(
        &mut self,
        commit: Commit<Bytes>,
        ctx: &mut MachineContext<'_>,
    ) -> Result<Bytes, ErrorCode>;

    /// A timer scheduled by this machine fired.
    fn fire_timer(&mut self, _timer: TimerId, _ctx: &mut MachineContext<'_>) {}

    /// The replicated configuration changed.
    fn configure(&mut self, _config: &ResourceConfig) {}

    /// A session closed explicitly.
    fn session_closed(&mut self, _session: SessionId, _ctx: &mut MachineContext<'_>) {}

    /// A session expired. Defaults to the close hook.
    fn session_expired(&mut self, session: SessionId, ctx: &mut MachineContext<'_>) {
        self.session_closed(session, ctx);
    }

    /// The resource is being deleted; every retained commit must be
    /// closed here.
    fn delete(&mut self, ctx: &mut MachineContext<'_>);

    /// Serialized logical state, used for replay-equality checks.
    fn snapshot(&self) -> Vec<u8>;
}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// A machine that answers every operation with an empty payload.
    pub struct NullMachine;

    impl ResourceStateMachine for NullMachine {
        fn apply(
            &mut self,
            commit: Commit<Bytes>,
            _ctx: &mut MachineContext<'_>,
        ) -> Result<Bytes, ErrorCode> {
            commit.close();
            Ok(Bytes::new())
        }

        fn delete(&mut self, _ctx: &mut MachineContext<'_>) {}

        fn snapshot(&self) -> Vec<u8> {
            Vec::new()
        }
    }

    #[test]
    fn test_timer_queue_orders_by_deadline_then_id() {
        let mut timers = TimerQueue::new();
        let r = ResourceId::new(1);
        let t_late = timers.schedule(r, 300);
        let t_early = timers.schedule(r, 100);
        let t_same = timers.schedule(r, 100);

        assert_eq!(timers.pop_due(300), Some((t_early, r)));
        assert_eq!(timers.pop_due(300), Some((t_same, r)));
        assert_eq!(timers.pop_due(300), Some((t_late, r)));
        assert_eq!(timers.pop_due(300), None);
    }

    #[test]
    fn test_timer_queue_not_due_yet() {
        let mut timers = TimerQueue::new();
        timers.schedule(ResourceId::new(1), 500);
        assert_eq!(timers.pop_due(499), None);
        assert_eq!(timers.len(), 1);
    }

    #[test]
    fn test_timer_cancel() {
        let mut timers = TimerQueue::new();
        let r = ResourceId::new(1);
        let t = timers.schedule(r, 100);
        timers.cancel(t);
        assert_eq!(timers.pop_due(100), None);
        // Cancelling twice is a no-op.
        timers.cancel(t);
    }

    #[test]
    fn test_timer_cancel_resource() {
        let mut timers = TimerQueue::new();
        let a = ResourceId::new(1);
        let b = ResourceId::new(2);
        timers.schedule(a, 100);
        timers.schedule(b, 100);
        timers.schedule(a, 200);

        timers.cancel_resource(a);
        assert_eq!(timers.len(), 1);
        let (_, owner) = timers.pop_due(100).unwrap();
        assert_eq!(owner, b);
    }

    #[test]
    fn test_context_publish_and_state() {
        let mut sessions = SessionRegistry::new();
        sessions.register(SessionId::new(5), 0);
        let mut timers = TimerQueue::new();
        let mut ctx = MachineContext::new(ResourceId::new(1), &mut sessions, &mut timers);

        assert_eq!(ctx.session_state(SessionId::new(5)), Some(SessionState::Open));
        assert!(ctx
            .publish(SessionId::new(5), "message", Bytes::from_static(b"m"))
            .is_some());
        assert_eq!(ctx.session_state(SessionId::new(6)), None);
    }
}

//! Replicated value state machine.
//!
//! Holds one opaque payload with optional TTL eviction. At most one live
//! owner commit exists at any time: every writing operation first cleans
//! the current commit (closing it and cancelling its timer) and then
//! installs itself as the new owner. The payload is present iff an owner
//! commit is retained.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::manager::commit::Commit;
use crate::manager::machine::{MachineContext, ResourceStateMachine};
use crate::protocol::{decode_payload, encode_payload};
use crate::types::TimerId;

/// Operations on a replicated value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValueRequest {
    /// Read the current payload.
    Get,
    /// Replace the payload, with optional TTL in ms (0 = none).
    Set { value: Bytes, ttl_ms: u64 },
    /// Replace the payload iff the current one equals `expect`.
    ///
    /// Succeeds when both the current payload and `expect` are absent. An
    /// absent `update` clears the value.
    CompareAndSet {
        expect: Option<Bytes>,
        update: Option<Bytes>,
        ttl_ms: u64,
    },
    /// Replace the payload and return the previous one.
    GetAndSet { value: Bytes, ttl_ms: u64 },
}

/// Responses from value operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValueResponse {
    Value(Option<Bytes>),
    Updated(bool),
    Done,
}

/// The value state machine.
#[derive(Default)]
pub struct ValueState {
    value: Option<Bytes>,
    current: Option<Commit<Bytes>>,
    timer: Option<TimerId>,
}

impl ValueState {
    pub fn new() -> Self {
        Self::default()
    }

    fn clean_current(&mut self, ctx: &mut MachineContext<'_>) {
        if let Some(timer) = self.timer.take() {
            ctx.cancel(timer);
        }
        if let Some(current) = self.current.take() {
            current.close();
        }
    }

    fn install(&mut self, commit: Commit<Bytes>, ttl_ms: u64, ctx: &mut MachineContext<'_>) {
        self.timer = (ttl_ms > 0).then(|| ctx.schedule(commit.timestamp() + ttl_ms));
        self.current = Some(commit);
    }

    fn clear(&mut self, ctx: &mut MachineContext<'_>) {
        self.clean_current(ctx);
        self.value = None;
    }
}

impl ResourceStateMachine for ValueState {
    fn apply(
        &mut self,
        commit: Commit<Bytes>,
        ctx: &mut MachineContext<'_>,
    ) -> Result<Bytes, ErrorCode> {
        let Ok(request) = decode_payload::<ValueRequest>(commit.operation()) else {
            commit.close();
            return Err(ErrorCode::InvalidArgument);
        };

        let response = match request {
            ValueRequest::Get => {
                let value = self.current.is_some().then(|| self.value.clone()).flatten();
                commit.close();
                ValueResponse::Value(value)
            }

            ValueRequest::Set { value, ttl_ms } => {
                self.clean_current(ctx);
                self.value = Some(value);
                self.install(commit, ttl_ms, ctx);
                ValueResponse::Done
            }

            ValueRequest::CompareAndSet {
                expect,
                update,
                ttl_ms,
            } => {
                if self.value == expect {
                    match update {
                        Some(update) => {
                            self.clean_current(ctx);
                            self.value = Some(update);
                            self.install(commit, ttl_ms, ctx);
                        }
                        None => {
                            self.clear(ctx);
                            commit.close();
                        }
                    }
                    ValueResponse::Updated(true)
                } else {
                    commit.close();
                    ValueResponse::Updated(false)
                }
            }

            ValueRequest::GetAndSet { value, ttl_ms } => {
                let previous = self.value.take();
                self.clean_current(ctx);
                self.value = Some(value);
                self.install(commit, ttl_ms, ctx);
                ValueResponse::Value(previous)
            }
        };

        encode_payload(&response).map_err(|_| ErrorCode::Internal)
    }

    fn fire_timer(&mut self, timer: TimerId, ctx: &mut MachineContext<'_>) {
        // A stale timer may fire after its write was superseded; only the
        // then-current owner's timer evicts.
        if self.timer != Some(timer) {
            return;
        }
        tracing::debug!(resource = %ctx.resource_id(), "value ttl eviction");
        self.timer = None;
        self.value = None;
        if let Some(current) = self.current.take() {
            current.close();
        }
    }

    fn delete(&mut self, ctx: &mut MachineContext<'_>) {
        self.clear(ctx);
    }

    fn snapshot(&self) -> Vec<u8> {
        let owner = self.current.as_ref().map(|c| c.index().value());
        bincode::serialize(&(&self.value, owner)).expect("value snapshot must serialize")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::commit::CommitLedger;
    use crate::manager::machine::TimerQueue;
    use crate::manager::session::SessionRegistry;
    use crate::protocol::CompactionMode;
    use crate::types::{LogIndex, ResourceId, SessionId};
    use std::sync::Arc;

    struct Fixture {
        state: ValueState,
        sessions: SessionRegistry,
        timers: TimerQueue,
        ledger: Arc<CommitLedger>,
        index: u64,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                state: ValueState::new(),
                sessions: SessionRegistry::new(),
                timers: TimerQueue::new(),
                ledger: CommitLedger::new(),
                index: 0,
            }
        }

        fn apply_at(&mut self, timestamp: u64, request: ValueRequest) -> ValueResponse {
            self.index += 1;
            let commit = Commit::new(
                LogIndex::new(self.index),
                SessionId::new(1),
                timestamp,
                CompactionMode::Quorum,
                encode_payload(&request).unwrap(),
                &self.ledger,
            );
            let mut ctx =
                MachineContext::new(ResourceId::new(1), &mut self.sessions, &mut self.timers);
            let out = self.state.apply(commit, &mut ctx).unwrap();
            decode_payload(&out).unwrap()
        }

        fn apply(&mut self, request: ValueRequest) -> ValueResponse {
            self.apply_at(self.index * 10, request)
        }

        fn fire_due(&mut self, now: u64) {
            while let Some((timer, _)) = self.timers.pop_due(now) {
                let mut ctx =
                    MachineContext::new(ResourceId::new(1), &mut self.sessions, &mut self.timers);
                self.state.fire_timer(timer, &mut ctx);
            }
        }
    }

    fn bytes(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn test_get_empty() {
        let mut fx = Fixture::new();
        assert_eq!(fx.apply(ValueRequest::Get), ValueResponse::Value(None));
        assert_eq!(fx.ledger.open_commits(), 0);
    }

    #[test]
    fn test_set_then_get() {
        let mut fx = Fixture::new();
        fx.apply(ValueRequest::Set {
            value: bytes("v1"),
            ttl_ms: 0,
        });
        assert_eq!(
            fx.apply(ValueRequest::Get),
            ValueResponse::Value(Some(bytes("v1")))
        );
        // The owning set commit stays open.
        assert_eq!(fx.ledger.open_commits(), 1);
    }

    #[test]
    fn test_overwrite_closes_previous_owner() {
        let mut fx = Fixture::new();
        fx.apply(ValueRequest::Set {
            value: bytes("v1"),
            ttl_ms: 0,
        });
        fx.apply(ValueRequest::Set {
            value: bytes("v2"),
            ttl_ms: 0,
        });
        assert_eq!(fx.ledger.open_commits(), 1);
        assert_eq!(
            fx.apply(ValueRequest::Get),
            ValueResponse::Value(Some(bytes("v2")))
        );
    }

    #[test]
    fn test_compare_and_set_success_and_failure() {
        let mut fx = Fixture::new();
        fx.apply(ValueRequest::Set {
            value: bytes("a"),
            ttl_ms: 0,
        });

        let miss = fx.apply(ValueRequest::CompareAndSet {
            expect: Some(bytes("b")),
            update: Some(bytes("c")),
            ttl_ms: 0,
        });
        assert_eq!(miss, ValueResponse::Updated(false));

        let hit = fx.apply(ValueRequest::CompareAndSet {
            expect: Some(bytes("a")),
            update: Some(bytes("c")),
            ttl_ms: 0,
        });
        assert_eq!(hit, ValueResponse::Updated(true));
        assert_eq!(
            fx.apply(ValueRequest::Get),
            ValueResponse::Value(Some(bytes("c")))
        );
    }

    #[test]
    fn test_compare_and_set_none_to_value() {
        let mut fx = Fixture::new();
        let hit = fx.apply(ValueRequest::CompareAndSet {
            expect: None,
            update: Some(bytes("first")),
            ttl_ms: 0,
        });
        assert_eq!(hit, ValueResponse::Updated(true));
    }

    #[test]
    fn test_compare_and_set_clear_keeps_invariant() {
        let mut fx = Fixture::new();
        fx.apply(ValueRequest::Set {
            value: bytes("a"),
            ttl_ms: 0,
        });
        let hit = fx.apply(ValueRequest::CompareAndSet {
            expect: Some(bytes("a")),
            update: None,
            ttl_ms: 0,
        });
        assert_eq!(hit, ValueResponse::Updated(true));
        assert_eq!(fx.apply(ValueRequest::Get), ValueResponse::Value(None));
        // Payload none implies owner none: nothing retained.
        assert_eq!(fx.ledger.open_commits(), 0);
    }

    #[test]
    fn test_get_and_set_returns_previous() {
        let mut fx = Fixture::new();
        let first = fx.apply(ValueRequest::GetAndSet {
            value: bytes("x"),
            ttl_ms: 0,
        });
        assert_eq!(first, ValueResponse::Value(None));

        let second = fx.apply(ValueRequest::GetAndSet {
            value: bytes("y"),
            ttl_ms: 0,
        });
        assert_eq!(second, ValueResponse::Value(Some(bytes("x"))));
    }

    #[test]
    fn test_ttl_eviction_clears_value_and_owner() {
        let mut fx = Fixture::new();
        fx.apply_at(100, ValueRequest::Set {
            value: bytes("42"),
            ttl_ms: 200,
        });

        fx.fire_due(250);
        assert_eq!(
            fx.apply_at(260, ValueRequest::Get),
            ValueResponse::Value(Some(bytes("42")))
        );

        fx.fire_due(300);
        assert_eq!(
            fx.apply_at(310, ValueRequest::Get),
            ValueResponse::Value(None)
        );
        assert_eq!(fx.ledger.open_commits(), 0);
    }

    #[test]
    fn test_overwrite_cancels_stale_timer() {
        let mut fx = Fixture::new();
        fx.apply_at(100, ValueRequest::Set {
            value: bytes("a"),
            ttl_ms: 100,
        });
        fx.apply_at(150, ValueRequest::Set {
            value: bytes("b"),
            ttl_ms: 0,
        });

        // The first write's deadline passes without evicting the second.
        fx.fire_due(500);
        assert_eq!(
            fx.apply_at(510, ValueRequest::Get),
            ValueResponse::Value(Some(bytes("b")))
        );
    }

    #[test]
    fn test_delete_closes_owner() {
        let mut fx = Fixture::new();
        fx.apply(ValueRequest::Set {
            value: bytes("v"),
            ttl_ms: 1000,
        });
        let mut ctx =
            MachineContext::new(ResourceId::new(1), &mut fx.sessions, &mut fx.timers);
        fx.state.delete(&mut ctx);
        assert_eq!(fx.ledger.open_commits(), 0);
    }

    #[test]
    fn test_snapshot_tracks_value() {
        let mut a = Fixture::new();
        let mut b = Fixture::new();
        for fx in [&mut a, &mut b] {
            fx.apply(ValueRequest::Set {
                value: bytes("same"),
                ttl_ms: 0,
            });
        }
        assert_eq!(a.state.snapshot(), b.state.snapshot());

        b.apply(ValueRequest::Set {
            value: bytes("diff"),
            ttl_ms: 0,
        });
        assert_ne!(a.state.snapshot(), b.state.snapshot());
    }
}

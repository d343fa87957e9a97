//! Task queue state machine with at-least-once delivery.
//!
//! Consumers subscribe and receive tasks through `"process"` events, one
//! in flight per consumer. Submitters may wait for processing: a
//! synchronous submit retains its commit in the ack-waiter table until a
//! consumer acknowledges, at which point the `"ack"` event goes back to
//! the submitter and the commit closes.
//!
//! When a consumer's session dies its in-flight task is requeued at the
//! head of the pending queue, keeping best-effort FIFO while guaranteeing
//! at-least-once processing. Ordering may be violated after a consumer
//! failure.

use std::collections::{BTreeMap, VecDeque};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::manager::commit::Commit;
use crate::manager::machine::{MachineContext, ResourceStateMachine};
use crate::protocol::{decode_payload, encode_payload};
use crate::types::SessionId;

/// Event topic carrying a task to a consumer.
pub const PROCESS_TOPIC: &str = "process";

/// Event topic carrying an acknowledgement back to a submitter.
pub const ACK_TOPIC: &str = "ack";

/// Operations on a task queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueueRequest {
    /// Register the submitting session as a consumer.
    Subscribe,
    /// Deregister the submitting session.
    Unsubscribe,
    /// Enqueue a task. `ack` requests an acknowledgement event once a
    /// consumer finishes the task.
    Submit {
        task_id: u64,
        payload: Bytes,
        ack: bool,
    },
    /// Acknowledge the submitting consumer's in-flight task.
    Ack,
}

/// Responses from queue operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueueResponse {
    Done,
    /// The next task assigned to the acknowledging consumer, if any.
    Next(Option<TaskEnvelope>),
}

/// One queued task with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub task_id: u64,
    pub payload: Bytes,
    pub submitter: SessionId,
    pub ack: bool,
}

/// The `"process"` event body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task_id: u64,
    pub payload: Bytes,
}

/// The task queue state machine.
#[derive(Default)]
pub struct TaskQueueState {
    pending: VecDeque<TaskEnvelope>,
    inflight: BTreeMap<SessionId, TaskEnvelope>,
    consumers: Vec<SessionId>,
    ack_waiters: BTreeMap<u64, Commit<Bytes>>,
}

impl TaskQueueState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn inflight_count(&self) -> usize {
        self.inflight.len()
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    fn free_consumer(&self) -> Option<SessionId> {
        self.consumers
            .iter()
            .copied()
            .find(|c| !self.inflight.contains_key(c))
    }

    fn deliver(&mut self, consumer: SessionId, task: TaskEnvelope, ctx: &mut MachineContext<'_>) -> bool {
        let message = TaskMessage {
            task_id: task.task_id,
            payload: task.payload.clone(),
        };
        let body = match encode_payload(&message) {
            Ok(body) => body,
            Err(_) => return false,
        };
        if ctx.publish(consumer, PROCESS_TOPIC, body).is_none() {
            return false;
        }
        self.inflight.insert(consumer, task);
        true
    }

    /// Hand pending tasks to free consumers until one side runs out.
    fn dispatch(&mut self, ctx: &mut MachineContext<'_>) {
        while let Some(consumer) = self.free_consumer() {
            let Some(task) = self.pending.pop_front() else {
                return;
            };
            if !self.deliver(consumer, task.clone(), ctx) {
                // Consumer's session is gone; requeue and drop it.
                self.pending.push_front(task);
                self.remove_consumer(consumer, ctx);
            }
        }
    }

    fn remove_consumer(&mut self, session: SessionId, _ctx: &mut MachineContext<'_>) {
        self.consumers.retain(|c| *c != session);
        if let Some(task) = self.inflight.remove(&session) {
            self.pending.push_front(task);
        }
    }

    fn complete(&mut self, task: &TaskEnvelope, ctx: &mut MachineContext<'_>) {
        if !task.ack {
            return;
        }
        if let Some(waiter) = self.ack_waiters.remove(&task.task_id) {
            if let Ok(body) = encode_payload(&task.task_id) {
                ctx.publish(waiter.session(), ACK_TOPIC, body);
            }
            waiter.close();
        }
    }
}

impl ResourceStateMachine for TaskQueueState {
    fn apply(
        &mut self,
        commit: Commit<Bytes>,
        ctx: &mut MachineContext<'_>,
    ) -> Result<Bytes, ErrorCode> {
        let Ok(request) = decode_payload::<QueueRequest>(commit.operation()) else {
            commit.close();
            return Err(ErrorCode::InvalidArgument);
        };
        let session = commit.session();

        let response = match request {
            QueueRequest::Subscribe => {
                if !self.consumers.contains(&session) {
                    self.consumers.push(session);
                }
                commit.close();
                self.dispatch(ctx);
                QueueResponse::Done
            }

            QueueRequest::Unsubscribe => {
                self.remove_consumer(session, ctx);
                commit.close();
                self.dispatch(ctx);
                QueueResponse::Done
            }

            QueueRequest::Submit {
                task_id,
                payload,
                ack,
            } => {
                let task = TaskEnvelope {
                    task_id,
                    payload,
                    submitter: session,
                    ack,
                };
                if ack {
                    self.ack_waiters.insert(task_id, commit);
                } else {
                    commit.close();
                }
                self.pending.push_back(task);
                self.dispatch(ctx);
                QueueResponse::Done
            }

            QueueRequest::Ack => {
                let finished = self.inflight.remove(&session);
                if let Some(task) = &finished {
                    self.complete(task, ctx);
                }
                commit.close();

                // An active consumer drains the queue through the ack
                // response instead of extra process events.
                let next = if self.consumers.contains(&session) {
                    self.pending.pop_front().inspect(|task| {
                        self.inflight.insert(session, task.clone());
                    })
                } else {
                    None
                };
                QueueResponse::Next(next)
            }
        };

        encode_payload(&response).map_err(|_| ErrorCode::Internal)
    }

    fn session_closed(&mut self, session: SessionId, ctx: &mut MachineContext<'_>) {
        self.remove_consumer(session, ctx);

        // Ack waiters whose submitter is gone can never be delivered.
        let orphaned: Vec<u64> = self
            .ack_waiters
            .iter()
            .filter(|(_, waiter)| waiter.session() == session)
            .map(|(&task_id, _)| task_id)
            .collect();
        for task_id in orphaned {
            if let Some(waiter) = self.ack_waiters.remove(&task_id) {
                waiter.close();
            }
        }

        self.dispatch(ctx);
    }

    fn delete(&mut self, _ctx: &mut MachineContext<'_>) {
        for (_, waiter) in std::mem::take(&mut self.ack_waiters) {
            waiter.close();
        }
        self.pending.clear();
        self.inflight.clear();
        self.consumers.clear();
    }

    fn snapshot(&self) -> Vec<u8> {
        let waiters: Vec<u64> = self.ack_waiters.keys().copied().collect();
        bincode::serialize(&(&self.pending, &self.inflight, &self.consumers, waiters))
            .expect("task queue snapshot must serialize")
    }
}

//! Typed handle for the task queue.
//!
//! Submitters either await acknowledgement from a consumer (synchronous
//! mode, the default) or complete once the task is written and replicated
//! (asynchronous mode). Consumers register a callback and the handle
//! drives the process/ack cycle: the callback runs, the task is
//! acknowledged, and the next assigned task (if any) arrives in the ack
//! response.
//!
//! Consumers should be idempotent: a task whose consumer fails before
//! acknowledging is redelivered to another consumer.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::{broadcast, oneshot};

use crate::client::gateway::ResourceGateway;
use crate::client::session::{RaftSession, State};
use crate::constants::DEFAULT_SUBMIT_TIMEOUT_MS;
use crate::error::{Error, Result};
use crate::protocol::{WriteConsistency, decode_payload, encode_payload};
use crate::resources::queue::{ACK_TOPIC, PROCESS_TOPIC, QueueRequest, QueueResponse, TaskMessage};
use crate::resources::task_queue_descriptor;

/// A distributed task queue carrying tasks of `T`.
pub struct DistributedTaskQueue<T> {
    gateway: Arc<ResourceGateway>,
    mode: WriteConsistency,
    next_task_id: AtomicU64,
    waiters: Arc<DashMap<u64, oneshot::Sender<()>>>,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T> DistributedTaskQueue<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    /// Open the task queue named `key` on the given session.
    pub async fn open(session: Arc<dyn RaftSession>, key: &str) -> Result<Self> {
        let gateway = Arc::new(ResourceGateway::open(session, &task_queue_descriptor(), key).await?);

        let waiters: Arc<DashMap<u64, oneshot::Sender<()>>> = Arc::new(DashMap::new());
        let ack_waiters = Arc::clone(&waiters);
        gateway.on_event(ACK_TOPIC, move |payload| {
            let Ok(task_id) = decode_payload::<u64>(&payload) else {
                tracing::error!("undecodable ack event");
                return;
            };
            if let Some((_, tx)) = ack_waiters.remove(&task_id) {
                let _ = tx.send(());
            }
        });

        Ok(Self {
            gateway,
            mode: WriteConsistency::Atomic,
            next_task_id: AtomicU64::new(0),
            waiters,
            _marker: PhantomData,
        })
    }

    /// Synchronous mode: `submit` completes once a consumer has processed
    /// and acknowledged the task.
    pub fn sync(mut self) -> Self {
        self.mode = WriteConsistency::Atomic;
        self
    }

    /// Asynchronous mode: `submit` completes once the task is written and
    /// replicated; delivery happens later.
    pub fn async_mode(mut self) -> Self {
        self.mode = WriteConsistency::SequentialEvent;
        self
    }

    /// Submit a task under the configured mode.
    pub async fn submit(&self, task: &T) -> Result<()> {
        if self.mode == WriteConsistency::Atomic {
            self.submit_sync(task).await
        } else {
            self.submit_async(task).await
        }
    }

    async fn submit_sync(&self, task: &T) -> Result<()> {
        let task_id = self.next_task_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(task_id, tx);

        let request = QueueRequest::Submit {
            task_id,
            payload: encode_payload(task)?,
            ack: true,
        };
        let submitted: Result<QueueResponse> =
            self.gateway.submit_command_at(&request, self.mode).await;
        if let Err(error) = submitted {
            self.waiters.remove(&task_id);
            return Err(error);
        }

        match tokio::time::timeout(Duration::from_millis(DEFAULT_SUBMIT_TIMEOUT_MS), rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(Error::SessionExpired),
            Err(_) => {
                self.waiters.remove(&task_id);
                Err(Error::Timeout)
            }
        }
    }

    async fn submit_async(&self, task: &T) -> Result<()> {
        let task_id = self.next_task_id.fetch_add(1, Ordering::SeqCst) + 1;
        let request = QueueRequest::Submit {
            task_id,
            payload: encode_payload(task)?,
            ack: false,
        };
        let _: QueueResponse = self.gateway.submit_command_at(&request, self.mode).await?;
        Ok(())
    }

    /// Register a task consumer and subscribe this session.
    ///
    /// Tasks arrive on the session's event thread in assignment order;
    /// once the callback returns, the task is acknowledged and the next
    /// one fetched.
    pub async fn consumer(&self, callback: impl Fn(T) + Send + Sync + 'static) -> Result<()> {
        let callback: Arc<dyn Fn(T) + Send + Sync> = Arc::new(callback);

        let gateway = Arc::clone(&self.gateway);
        let process_callback = Arc::clone(&callback);
        self.gateway.on_event(PROCESS_TOPIC, move |payload| {
            let Ok(message) = decode_payload::<TaskMessage>(&payload) else {
                tracing::error!("undecodable process event");
                return;
            };
            let Ok(task) = decode_payload::<T>(&message.payload) else {
                tracing::error!(task_id = message.task_id, "undecodable task payload");
                return;
            };
            process_callback(task);
            spawn_ack_cycle(Arc::clone(&gateway), Arc::clone(&process_callback));
        });

        let _: QueueResponse = self.gateway.submit_command(&QueueRequest::Subscribe).await?;
        Ok(())
    }

    /// Deregister this session as a consumer.
    pub async fn unsubscribe(&self) -> Result<()> {
        let _: QueueResponse = self
            .gateway
            .submit_command(&QueueRequest::Unsubscribe)
            .await?;
        Ok(())
    }

    /// The current session state.
    pub fn state(&self) -> State {
        self.gateway.state()
    }

    /// Subscribe to session state transitions.
    pub fn on_state_change(&self) -> broadcast::Receiver<State> {
        self.gateway.on_state_change()
    }

    /// Delete the queue cluster-wide.
    pub async fn delete(&self) -> Result<()> {
        self.gateway.delete().await
    }

    /// Close the handle and its session.
    pub async fn close(&self) -> Result<()> {
        self.gateway.close().await
    }
}

/// Acknowledge the finished task and keep draining: each ack response may
/// carry the next task assigned to this consumer.
fn spawn_ack_cycle<T>(gateway: Arc<ResourceGateway>, callback: Arc<dyn Fn(T) + Send + Sync>)
where
    T: DeserializeOwned + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match gateway
                .submit_command::<_, QueueResponse>(&QueueRequest::Ack)
                .await
            {
                Ok(QueueResponse::Next(Some(task))) => {
                    match decode_payload::<T>(&task.payload) {
                        Ok(value) => callback(value),
                        Err(_) => {
                            tracing::error!(task_id = task.task_id, "undecodable task payload");
                            // Still acknowledged on the next loop turn.
                        }
                    }
                }
                Ok(_) => break,
                Err(error) => {
                    tracing::debug!(%error, "ack cycle stopped");
                    break;
                }
            }
        }
    });
}

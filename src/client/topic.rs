//! Typed handle for the topic.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::broadcast;

use crate::client::gateway::ResourceGateway;
use crate::client::session::{RaftSession, State};
use crate::error::Result;
use crate::protocol::{WriteConsistency, decode_payload, encode_payload};
use crate::resources::topic::{MESSAGE_TOPIC, TopicRequest, TopicResponse};
use crate::resources::topic_descriptor;

/// A distributed publish/subscribe topic carrying messages of `T`.
pub struct DistributedTopic<T> {
    gateway: ResourceGateway,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T> DistributedTopic<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    /// Open the topic named `key` on the given session.
    pub async fn open(session: Arc<dyn RaftSession>, key: &str) -> Result<Self> {
        let gateway = ResourceGateway::open(session, &topic_descriptor(), key).await?;
        Ok(Self {
            gateway,
            _marker: PhantomData,
        })
    }

    /// Register the message handler.
    ///
    /// Messages arrive on the session's event thread in publish order.
    /// Register the handler before calling [`listen`](Self::listen) so no
    /// delivery races the subscription.
    pub fn on_message(&self, handler: impl Fn(T) + Send + Sync + 'static) {
        self.gateway.on_event(MESSAGE_TOPIC, move |payload| {
            match decode_payload::<T>(&payload) {
                Ok(message) => handler(message),
                Err(_) => tracing::error!("undecodable topic message"),
            }
        });
    }

    /// Subscribe this session to the topic.
    pub async fn listen(&self) -> Result<()> {
        self.expect_done(self.gateway.submit_command(&TopicRequest::Listen).await?)
    }

    /// Unsubscribe this session.
    pub async fn unlisten(&self) -> Result<()> {
        self.expect_done(self.gateway.submit_command(&TopicRequest::Unlisten).await?)
    }

    /// Publish a message to every subscriber.
    pub async fn publish(&self, message: &T) -> Result<()> {
        let request = TopicRequest::Publish {
            message: encode_payload(message)?,
        };
        self.expect_done(self.gateway.submit_command(&request).await?)
    }

    /// Set the handle-local write consistency.
    pub fn with_write_consistency(mut self, consistency: WriteConsistency) -> Self {
        self.gateway.set_write_consistency(consistency);
        self
    }

    /// The current session state.
    pub fn state(&self) -> State {
        self.gateway.state()
    }

    /// Subscribe to session state transitions.
    pub fn on_state_change(&self) -> broadcast::Receiver<State> {
        self.gateway.on_state_change()
    }

    /// Delete the topic cluster-wide.
    pub async fn delete(&self) -> Result<()> {
        self.gateway.delete().await
    }

    /// Close the handle and its session.
    pub async fn close(&self) -> Result<()> {
        self.gateway.close().await
    }

    fn expect_done(&self, response: TopicResponse) -> Result<()> {
        match response {
            TopicResponse::Done => Ok(()),
        }
    }
}

//! Typed handle for the replicated value.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::broadcast;

use crate::client::gateway::ResourceGateway;
use crate::client::session::{RaftSession, State};
use crate::error::Result;
use crate::protocol::{ReadConsistency, WriteConsistency, decode_payload, encode_payload};
use crate::resources::value::{ValueRequest, ValueResponse};
use crate::resources::value_descriptor;

/// A distributed value holding one `T`, with optional TTL on writes.
pub struct DistributedValue<T> {
    gateway: ResourceGateway,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T> DistributedValue<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Open the value named `key` on the given session.
    pub async fn open(session: Arc<dyn RaftSession>, key: &str) -> Result<Self> {
        let gateway = ResourceGateway::open(session, &value_descriptor(), key).await?;
        Ok(Self {
            gateway,
            _marker: PhantomData,
        })
    }

    /// Read the current value.
    pub async fn get(&self) -> Result<Option<T>> {
        match self.gateway.submit_query(&ValueRequest::Get).await? {
            ValueResponse::Value(Some(bytes)) => Ok(Some(decode_payload(&bytes)?)),
            ValueResponse::Value(None) => Ok(None),
            other => Err(crate::error::Error::Internal(format!(
                "unexpected value response: {other:?}"
            ))),
        }
    }

    /// Replace the value.
    pub async fn set(&self, value: &T) -> Result<()> {
        self.set_with_ttl(value, Duration::ZERO).await
    }

    /// Replace the value, evicting it after `ttl`.
    pub async fn set_with_ttl(&self, value: &T, ttl: Duration) -> Result<()> {
        let request = ValueRequest::Set {
            value: encode_payload(value)?,
            ttl_ms: ttl.as_millis() as u64,
        };
        match self.gateway.submit_command(&request).await? {
            ValueResponse::Done => Ok(()),
            other => Err(crate::error::Error::Internal(format!(
                "unexpected value response: {other:?}"
            ))),
        }
    }

    /// Replace the value iff the current one equals `expect`.
    pub async fn compare_and_set(&self, expect: Option<&T>, update: Option<&T>) -> Result<bool> {
        let request = ValueRequest::CompareAndSet {
            expect: expect.map(encode_payload).transpose()?,
            update: update.map(encode_payload).transpose()?,
            ttl_ms: 0,
        };
        match self.gateway.submit_command(&request).await? {
            ValueResponse::Updated(updated) => Ok(updated),
            other => Err(crate::error::Error::Internal(format!(
                "unexpected value response: {other:?}"
            ))),
        }
    }

    /// Replace the value and return the previous one.
    pub async fn get_and_set(&self, value: &T) -> Result<Option<T>> {
        let request = ValueRequest::GetAndSet {
            value: encode_payload(value)?,
            ttl_ms: 0,
        };
        match self.gateway.submit_command(&request).await? {
            ValueResponse::Value(Some(bytes)) => Ok(Some(decode_payload(&bytes)?)),
            ValueResponse::Value(None) => Ok(None),
            other => Err(crate::error::Error::Internal(format!(
                "unexpected value response: {other:?}"
            ))),
        }
    }

    /// Set the handle-local write consistency.
    pub fn with_write_consistency(mut self, consistency: WriteConsistency) -> Self {
        self.gateway.set_write_consistency(consistency);
        self
    }

    /// Set the handle-local read consistency.
    pub fn with_read_consistency(mut self, consistency: ReadConsistency) -> Self {
        self.gateway.set_read_consistency(consistency);
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

    /// Delete the value cluster-wide.
    pub async fn delete(&self) -> Result<()> {
        self.gateway.delete().await
    }

    /// Close the handle and its session.
    pub async fn close(&self) -> Result<()> {
        self.gateway.close().await
    }
}

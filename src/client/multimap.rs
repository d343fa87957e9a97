//! Typed handle for the replicated multimap.
//!
//! Keys are strings (they double as the deterministic iteration order on
//! the server); values are any serializable `T`.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::broadcast;

use crate::client::gateway::ResourceGateway;
use crate::client::session::{RaftSession, State};
use crate::error::{Error, Result};
use crate::protocol::{ReadConsistency, WriteConsistency, decode_payload, encode_payload};
use crate::resources::multimap::{MultiMapRequest, MultiMapResponse, Order, config_with_order};
use crate::resources::multimap_descriptor;

/// A distributed multimap from string keys to bags of `T`.
pub struct DistributedMultiMap<T> {
    gateway: ResourceGateway,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T> DistributedMultiMap<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Open the multimap named `key` on the given session.
    pub async fn open(session: Arc<dyn RaftSession>, key: &str) -> Result<Self> {
        let gateway = ResourceGateway::open(session, &multimap_descriptor(), key).await?;
        Ok(Self {
            gateway,
            _marker: PhantomData,
        })
    }

    /// Set the replicated value-ordering policy.
    pub async fn configure_order(&self, order: Order) -> Result<()> {
        self.gateway.configure(config_with_order(order)).await
    }

    /// Append a value under a key.
    pub async fn put(&self, key: impl Into<String>, value: &T) -> Result<bool> {
        let request = MultiMapRequest::Put {
            key: key.into(),
            value: encode_payload(value)?,
        };
        self.expect_bool(self.gateway.submit_command(&request).await?)
    }

    /// Append a value unless the bag already contains it.
    pub async fn put_if_absent(&self, key: impl Into<String>, value: &T) -> Result<bool> {
        let request = MultiMapRequest::PutIfAbsent {
            key: key.into(),
            value: encode_payload(value)?,
        };
        self.expect_bool(self.gateway.submit_command(&request).await?)
    }

    /// Remove a key, returning its values.
    pub async fn remove(&self, key: impl Into<String>) -> Result<Vec<T>> {
        let request = MultiMapRequest::RemoveKey { key: key.into() };
        self.expect_values(self.gateway.submit_command(&request).await?)
    }

    /// Remove one occurrence of a value under a key.
    pub async fn remove_entry(&self, key: impl Into<String>, value: &T) -> Result<bool> {
        let request = MultiMapRequest::RemoveEntry {
            key: key.into(),
            value: encode_payload(value)?,
        };
        self.expect_bool(self.gateway.submit_command(&request).await?)
    }

    /// The values under a key, in the configured order.
    pub async fn get(&self, key: impl Into<String>) -> Result<Vec<T>> {
        let request = MultiMapRequest::Get { key: key.into() };
        self.expect_values(self.gateway.submit_query(&request).await?)
    }

    /// All keys, sorted.
    pub async fn keys(&self) -> Result<Vec<String>> {
        match self.gateway.submit_query(&MultiMapRequest::Keys).await? {
            MultiMapResponse::Keys(keys) => Ok(keys),
            other => Err(unexpected(other)),
        }
    }

    /// All values, grouped by sorted key.
    pub async fn values(&self) -> Result<Vec<T>> {
        self.expect_values(self.gateway.submit_query(&MultiMapRequest::Values).await?)
    }

    /// All entries, grouped by sorted key.
    pub async fn entries(&self) -> Result<Vec<(String, T)>> {
        match self.gateway.submit_query(&MultiMapRequest::Entries).await? {
            MultiMapResponse::Entries(entries) => entries
                .into_iter()
                .map(|(k, v)| Ok((k, decode_payload(&v)?)))
                .collect(),
            other => Err(unexpected(other)),
        }
    }

    /// Total number of values.
    pub async fn size(&self) -> Result<u64> {
        match self.gateway.submit_query(&MultiMapRequest::Size).await? {
            MultiMapResponse::Size(size) => Ok(size),
            other => Err(unexpected(other)),
        }
    }

    pub async fn is_empty(&self) -> Result<bool> {
        self.expect_bool(self.gateway.submit_query(&MultiMapRequest::IsEmpty).await?)
    }

    /// Remove every entry.
    pub async fn clear(&self) -> Result<()> {
        match self.gateway.submit_command(&MultiMapRequest::Clear).await? {
            MultiMapResponse::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn contains_key(&self, key: impl Into<String>) -> Result<bool> {
        let request = MultiMapRequest::ContainsKey { key: key.into() };
        self.expect_bool(self.gateway.submit_query(&request).await?)
    }

    pub async fn contains_value(&self, value: &T) -> Result<bool> {
        let request = MultiMapRequest::ContainsValue {
            value: encode_payload(value)?,
        };
        self.expect_bool(self.gateway.submit_query(&request).await?)
    }

    pub async fn contains_entry(&self, key: impl Into<String>, value: &T) -> Result<bool> {
        let request = MultiMapRequest::ContainsEntry {
            key: key.into(),
            value: encode_payload(value)?,
        };
        self.expect_bool(self.gateway.submit_query(&request).await?)
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

    /// Delete the multimap cluster-wide.
    pub async fn delete(&self) -> Result<()> {
        self.gateway.delete().await
    }

    /// Close the handle and its session.
    pub async fn close(&self) -> Result<()> {
        self.gateway.close().await
    }

    fn expect_bool(&self, response: MultiMapResponse) -> Result<bool> {
        match response {
            MultiMapResponse::Bool(value) => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    fn expect_values(&self, response: MultiMapResponse) -> Result<Vec<T>> {
        match response {
            MultiMapResponse::Values(values) => {
                values.iter().map(decode_payload).collect()
            }
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: MultiMapResponse) -> Error {
    Error::Internal(format!("unexpected multimap response: {response:?}"))
}

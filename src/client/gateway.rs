//! The typed resource gateway.
//!
//! A gateway binds one consensus session to one named resource. It wraps
//! inner operations into envelopes at the handle's configured consistency
//! levels, routes server-initiated events to per-topic handlers, and
//! surfaces the session lifecycle as [`State`] transitions.
//!
//! Consistency levels are handle-local: two gateways for the same
//! resource can run at different levels without affecting each other.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use backon::Retryable;
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::{broadcast, mpsc};

use crate::client::retry;
use crate::client::session::{RaftSession, State};
use crate::config::ResourceConfig;
use crate::constants::{
    DEFAULT_SUBMIT_TIMEOUT_MS, TYPE_ID_CONFIGURE, TYPE_ID_DELETE, TYPE_ID_RESOURCE_COMMAND,
    TYPE_ID_RESOURCE_QUERY,
};
use crate::error::{Error, Result};
use crate::manager::session::EventEnvelope;
use crate::manager::state::{ManagerOperation, ManagerResponse};
use crate::protocol::{
    Envelope, ReadConsistency, WriteConsistency, decode_payload, encode_payload,
};
use crate::registry::{self, ResourceType, TypeDescriptor};
use crate::types::ResourceId;

type EventHandler = Box<dyn Fn(Bytes) + Send + Sync>;

/// A typed handle over one consensus session and one resource.
pub struct ResourceGateway {
    session: Arc<dyn RaftSession>,
    resource_type: ResourceType,
    resource_id: ResourceId,
    write_consistency: WriteConsistency,
    read_consistency: ReadConsistency,
    handlers: Arc<DashMap<String, EventHandler>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ResourceGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGateway")
            .field("resource_type", &self.resource_type)
            .field("resource_id", &self.resource_id)
            .field("write_consistency", &self.write_consistency)
            .field("read_consistency", &self.read_consistency)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl ResourceGateway {
    /// Open the gateway: register the type's codec bundle, start event
    /// dispatch, and resolve (or create) the resource id.
    pub async fn open(
        session: Arc<dyn RaftSession>,
        descriptor: &TypeDescriptor,
        key: &str,
    ) -> Result<Self> {
        if key.is_empty() {
            return Err(Error::InvalidArgument("resource key is empty".to_string()));
        }
        let resource_type = descriptor.resource_type;
        if !resource_type.id().is_valid() {
            return Err(Error::InvalidArgument("resource type id is 0".to_string()));
        }

        registry::register_codec(TYPE_ID_RESOURCE_COMMAND, "quorate::protocol::Envelope::Command")?;
        registry::register_codec(TYPE_ID_RESOURCE_QUERY, "quorate::protocol::Envelope::Query")?;
        registry::register_codec(TYPE_ID_CONFIGURE, "quorate::protocol::Envelope::Configure")?;
        registry::register_codec(TYPE_ID_DELETE, "quorate::protocol::Envelope::Delete")?;
        registry::register_codec_bundle(descriptor)?;

        let handlers: Arc<DashMap<String, EventHandler>> = Arc::new(DashMap::new());
        if let Some(events) = session.take_events() {
            spawn_dispatcher(events, Arc::clone(&handlers), Arc::clone(&session));
        }

        let response = session
            .submit(ManagerOperation::GetResource {
                key: key.to_string(),
                type_id: resource_type.id(),
            })
            .await?;
        let resource_id = match response {
            ManagerResponse::Resource(id) => id,
            other => {
                return Err(Error::Internal(format!(
                    "unexpected get-resource response: {other:?}"
                )));
            }
        };

        tracing::debug!(%resource_id, key, r#type = %resource_type, "gateway opened");
        Ok(Self {
            session,
            resource_type,
            resource_id,
            write_consistency: WriteConsistency::default(),
            read_consistency: ReadConsistency::default(),
            handlers,
            closed: AtomicBool::new(false),
        })
    }

    /// Resolve the resource id bound to `key` without creating it.
    pub async fn find(
        session: &dyn RaftSession,
        descriptor: &TypeDescriptor,
        key: &str,
    ) -> Result<Option<ResourceId>> {
        if key.is_empty() {
            return Err(Error::InvalidArgument("resource key is empty".to_string()));
        }
        let response = session
            .submit(ManagerOperation::GetResourceIfExists {
                key: key.to_string(),
                type_id: descriptor.resource_type.id(),
            })
            .await?;
        match response {
            ManagerResponse::MaybeResource(id) => Ok(id),
            other => Err(Error::Internal(format!(
                "unexpected lookup response: {other:?}"
            ))),
        }
    }

    /// The resolved resource id.
    pub fn resource_id(&self) -> ResourceId {
        self.resource_id
    }

    /// The resource type this gateway serves.
    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    /// The current session state, mapped 1:1 from the consensus client.
    pub fn state(&self) -> State {
        self.session.state()
    }

    /// Subscribe to session state transitions.
    pub fn on_state_change(&self) -> broadcast::Receiver<State> {
        self.session.on_state_change()
    }

    /// The configured write consistency.
    pub fn write_consistency(&self) -> WriteConsistency {
        self.write_consistency
    }

    /// The configured read consistency.
    pub fn read_consistency(&self) -> ReadConsistency {
        self.read_consistency
    }

    /// Set the handle-local write consistency.
    pub fn set_write_consistency(&mut self, consistency: WriteConsistency) {
        self.write_consistency = consistency;
    }

    /// Set the handle-local read consistency.
    pub fn set_read_consistency(&mut self, consistency: ReadConsistency) {
        self.read_consistency = consistency;
    }

    /// Builder-style write consistency setter.
    pub fn with_write_consistency(mut self, consistency: WriteConsistency) -> Self {
        self.write_consistency = consistency;
        self
    }

    /// Builder-style read consistency setter.
    pub fn with_read_consistency(mut self, consistency: ReadConsistency) -> Self {
        self.read_consistency = consistency;
        self
    }

    /// Register a handler for a server-initiated event topic.
    pub fn on_event(&self, topic: impl Into<String>, handler: impl Fn(Bytes) + Send + Sync + 'static) {
        self.handlers.insert(topic.into(), Box::new(handler));
    }

    /// Submit a command at the configured write consistency.
    pub async fn submit_command<Req, Resp>(&self, request: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        self.ensure_open()?;
        let envelope = Envelope::Command {
            resource_id: self.resource_id,
            consistency: self.write_consistency,
            payload: encode_payload(request)?,
        };
        let payload = self.submit_envelope(envelope).await?;
        decode_payload(&payload)
    }

    /// Submit a command at an explicit write consistency, leaving the
    /// handle default untouched.
    pub async fn submit_command_at<Req, Resp>(
        &self,
        request: &Req,
        consistency: WriteConsistency,
    ) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        self.ensure_open()?;
        let envelope = Envelope::Command {
            resource_id: self.resource_id,
            consistency,
            payload: encode_payload(request)?,
        };
        let payload = self.submit_envelope(envelope).await?;
        decode_payload(&payload)
    }

    /// Submit a query at the configured read consistency.
    pub async fn submit_query<Req, Resp>(&self, request: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        self.ensure_open()?;
        let envelope = Envelope::Query {
            resource_id: self.resource_id,
            consistency: self.read_consistency,
            payload: encode_payload(request)?,
        };
        let payload = self.submit_envelope(envelope).await?;
        decode_payload(&payload)
    }

    /// Replace the resource's replicated configuration.
    pub async fn configure(&self, config: ResourceConfig) -> Result<()> {
        self.ensure_open()?;
        let envelope = Envelope::Configure {
            resource_id: self.resource_id,
            config,
        };
        self.submit_done(ManagerOperation::Resource(envelope)).await
    }

    /// Delete the resource cluster-wide. Subsequent operations fail.
    pub async fn delete(&self) -> Result<()> {
        self.ensure_open()?;
        let envelope = Envelope::Delete {
            resource_id: self.resource_id,
        };
        let result = self.submit_done(ManagerOperation::Resource(envelope)).await;
        self.closed.store(true, Ordering::SeqCst);
        result
    }

    /// Close the gateway: leave the resource's owner set and close the
    /// underlying session.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self
            .submit_done(ManagerOperation::CloseResource {
                resource_id: self.resource_id,
            })
            .await;
        self.session.close().await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::IllegalState("gateway is closed".to_string()));
        }
        Ok(())
    }

    async fn submit_envelope(&self, envelope: Envelope) -> Result<Bytes> {
        let operation = ManagerOperation::Resource(envelope);
        match self.submit_raw(operation).await? {
            ManagerResponse::Payload(payload) => Ok(payload),
            other => Err(Error::Internal(format!(
                "unexpected resource response: {other:?}"
            ))),
        }
    }

    async fn submit_done(&self, operation: ManagerOperation) -> Result<()> {
        match self.submit_raw(operation).await? {
            ManagerResponse::Done => Ok(()),
            other => Err(Error::Internal(format!(
                "unexpected response: {other:?}"
            ))),
        }
    }

    async fn submit_raw(&self, operation: ManagerOperation) -> Result<ManagerResponse> {
        let session = &self.session;
        let submit = || {
            let operation = operation.clone();
            async move { session.submit(operation).await }
        };
        let attempt = submit.retry(retry::submission_policy()).when(Error::is_retriable);
        match tokio::time::timeout(Duration::from_millis(DEFAULT_SUBMIT_TIMEOUT_MS), attempt).await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        }
    }
}

fn spawn_dispatcher(
    mut events: mpsc::UnboundedReceiver<EventEnvelope>,
    handlers: Arc<DashMap<String, EventHandler>>,
    session: Arc<dyn RaftSession>,
) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Some(handler) = handlers.get(&event.topic) {
                let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    (handler)(event.payload.clone());
                }));
                if outcome.is_err() {
                    tracing::error!(topic = %event.topic, "event handler panicked");
                }
            } else {
                tracing::trace!(topic = %event.topic, "event without handler");
            }
            // Handler failures never hold back acknowledgement.
            session.acknowledge(event.sequence);
        }
    });
}

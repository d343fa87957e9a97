//! The client-facing seam to the consensus engine.
//!
//! The consensus engine is an external collaborator; the client side of
//! this crate consumes it through [`RaftSession`] only. A session submits
//! replicated operations, surfaces its lifecycle as [`State`] transitions,
//! and delivers server-initiated events on one ordered stream.

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::error::Result;
use crate::manager::session::EventEnvelope;
use crate::manager::state::{ManagerOperation, ManagerResponse};
use crate::types::{EventSequence, SessionId};

/// Client-visible session states, mapped 1:1 from the consensus client.
///
/// A command submitted while `Connected` whose completion also lands while
/// `Connected` is linearizable; every weaker outcome happens across a
/// `Suspended` interval and is surfaced through a state transition, never
/// silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// The session is healthy; configured consistency levels hold.
    Connected,
    /// Connectivity to the cluster is lost; in-flight operations may lose
    /// linearizability and the session may expire.
    Suspended,
    /// The session is closed; operations fail.
    Closed,
}

/// One client session on the consensus engine.
#[async_trait]
pub trait RaftSession: Send + Sync {
    /// The server-assigned session id.
    fn session_id(&self) -> SessionId;

    /// The current session state.
    fn state(&self) -> State;

    /// Subscribe to session state transitions.
    fn on_state_change(&self) -> broadcast::Receiver<State>;

    /// Submit a replicated operation and await its response.
    async fn submit(&self, operation: ManagerOperation) -> Result<ManagerResponse>;

    /// Take the session's ordered event stream.
    ///
    /// The stream can be taken once; the gateway that owns the session
    /// drives dispatch from it.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<EventEnvelope>>;

    /// Acknowledge the highest contiguous event sequence processed.
    fn acknowledge(&self, sequence: EventSequence);

    /// Close the session.
    async fn close(&self) -> Result<()>;
}

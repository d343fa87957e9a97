//! # Quorate
//! Distributed coordination primitives replicated over a Raft log.
//!
//! Quorate lets clients share named, replicated, stateful objects
//! ("resources") across a cluster: values, multimaps, topics, and task
//! queues. Ordering and replication come from a Raft consensus engine
//! consumed through a narrow seam; everything above it — the resource
//! manager that multiplexes resources onto one log, the per-resource
//! state machines, session-scoped event fan-out, and the typed client
//! gateways — lives here.
//!
//! # Goals
//! - Deterministic state machines: replaying the same log yields the
//!   same state on every replica
//! - Linearizable operations while a client stays connected, with
//!   explicit state transitions whenever guarantees weaken
//! - Leverage best in class libraries such as [Tokio](https://tokio.rs/)
//!   and [Nom](https://docs.rs/nom/latest/nom/)
//!
//! ## Getting started
//!
//! The embedded [`local`](crate::local) cluster runs everything in one
//! process:
//!
//! ```rust,no_run
//! use quorate::client::DistributedValue;
//! use quorate::local::LocalCluster;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cluster = LocalCluster::new(3);
//!
//!     let session = cluster.connect().await?;
//!     let value = DistributedValue::<String>::open(session, "greeting").await?;
//!
//!     value.set(&"hello world".to_string()).await?;
//!     assert_eq!(value.get().await?, Some("hello world".to_string()));
//!     Ok(())
//! }
//! ```
//!
//! Connecting to a remote cluster goes through bootstrap properties and
//! a transport-provided [`Connector`](crate::client::Connector):
//!
//! ```rust,ignore
//! let properties = ClusterProperties::new().with("cluster.seed", "10.0.0.1:5000,10.0.0.2:5000");
//! let client = QuorateClient::new(&properties, connector)?;
//! let session = client.connect_session().await?;
//! ```

#![forbid(unsafe_code)]

mod encode;
pub mod error;
mod parser;
pub mod protocol;
pub mod types;

pub mod client;
pub mod config;
pub mod constants;
pub mod local;
pub mod manager;
pub mod registry;
pub mod resources;
pub mod telemetry;

pub mod prelude {
    //! Main exports for building against the client surface.
    pub use crate::client::{
        Connector, DistributedMultiMap, DistributedTaskQueue, DistributedTopic, DistributedValue,
        QuorateClient, RaftSession, State,
    };
    pub use crate::config::{Address, ClusterProperties, ResourceConfig};
    pub use crate::error::{Error, ErrorCode, Result};
    pub use crate::local::{LocalCluster, LocalConnector};
    pub use crate::protocol::{ReadConsistency, WriteConsistency};
    pub use crate::types::{ResourceId, SessionId, TypeId};

    pub use bytes;
}

//! Client-side resource gateways.
//!
//! Applications hold typed handles ([`DistributedValue`],
//! [`DistributedMultiMap`], [`DistributedTopic`],
//! [`DistributedTaskQueue`]) over one consensus session each. Handles
//! submit operations wrapped in envelopes at configurable consistency
//! levels and receive server-initiated events on the session's event
//! thread, in order.

pub mod discovery;
pub mod gateway;
pub mod multimap;
pub mod queue;
pub mod retry;
pub mod session;
pub mod topic;
pub mod value;

pub use discovery::{Connector, QuorateClient};
pub use gateway::ResourceGateway;
pub use multimap::DistributedMultiMap;
pub use queue::DistributedTaskQueue;
pub use session::{RaftSession, State};
pub use topic::DistributedTopic;
pub use value::DistributedValue;

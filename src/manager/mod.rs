//! The resource manager and its hosting runtime.
//!
//! This is the layer that multiplexes many logical resources onto one
//! replicated log:
//!
//! - [`commit`]: close-once handles to applied log entries
//! - [`session`]: server-side sessions and the event fan-out protocol
//! - [`machine`]: the per-resource state machine trait and apply context
//! - [`state`]: the manager state machine (naming, routing, ownership)
//! - [`host`]: the single-threaded apply loop with deterministic timers

pub mod commit;
pub mod host;
pub mod machine;
pub mod session;
pub mod state;

pub use commit::{Commit, CommitLedger};
pub use host::{CommittedEntry, StateMachineHost};
pub use machine::{MachineContext, ResourceStateMachine, TimerQueue};
pub use session::{EventEnvelope, ServerSession, SessionRegistry, SessionState};
pub use state::{ManagerOperation, ManagerResponse, ResourceManager, ResourceRecord};

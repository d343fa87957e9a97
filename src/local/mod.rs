//! An embedded in-process cluster.
//!
//! `LocalCluster` runs the state-machine host behind an ordered in-memory
//! log with real session semantics: per-session sequence numbers with
//! duplicate filtering, event fan-out with acknowledged redelivery, and
//! explicit leader-loss simulation. It backs single-process deployments
//! and the integration tests; it is not a consensus implementation.
//!
//! Every applied record is kept in the log, including session lifecycle
//! and clock ticks, so replaying the log on a fresh host reproduces the
//! live host's state byte for byte.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::client::discovery::Connector;
use crate::client::session::{RaftSession, State};
use crate::config::Address;
use crate::error::{Error, ErrorCode, Result};
use crate::manager::host::{CommittedEntry, StateMachineHost};
use crate::manager::session::EventEnvelope;
use crate::manager::state::{ManagerOperation, ManagerResponse};
use crate::resources::default_registry;
use crate::types::{EventSequence, LogIndex, ResourceId, SessionId, TypeId};

/// One record of the in-memory log.
#[derive(Debug, Clone)]
enum LogRecord {
    OpenSession {
        session: SessionId,
        now: u64,
    },
    CloseSession {
        session: SessionId,
    },
    ExpireSession {
        session: SessionId,
    },
    Tick {
        now: u64,
    },
    Entry {
        index: u64,
        session: SessionId,
        timestamp: u64,
        operation: ManagerOperation,
    },
}

/// Per-session submission bookkeeping for duplicate filtering.
#[derive(Debug, Default)]
struct SessionRuntime {
    last_sequence: u64,
    cached: Option<(u64, std::result::Result<ManagerResponse, ErrorCode>)>,
}

struct ClusterCore {
    host: StateMachineHost,
    log: Vec<LogRecord>,
    clock: u64,
    next_session: u64,
    next_index: u64,
    runtimes: BTreeMap<SessionId, SessionRuntime>,
    clients: Vec<Weak<LocalSession>>,
    leader_alive: bool,
}

/// An embedded cluster of `replicas` virtual members sharing one log.
#[derive(Clone)]
pub struct LocalCluster {
    core: Arc<Mutex<ClusterCore>>,
    replicas: usize,
}

impl LocalCluster {
    pub fn new(replicas: usize) -> Self {
        let types = default_registry().expect("built-in registry must load");
        Self {
            core: Arc::new(Mutex::new(ClusterCore {
                host: StateMachineHost::new(types),
                log: Vec::new(),
                clock: 0,
                next_session: 0,
                next_index: 0,
                runtimes: BTreeMap::new(),
                clients: Vec::new(),
                leader_alive: true,
            })),
            replicas,
        }
    }

    /// Number of virtual members.
    pub fn replicas(&self) -> usize {
        self.replicas
    }

    /// Open a new client session.
    pub async fn connect(&self) -> Result<Arc<LocalSession>> {
        let mut core = self.core.lock().expect("cluster lock");
        if !core.leader_alive {
            return Err(Error::Unavailable);
        }
        core.clock += 1;
        core.next_session += 1;
        let id = SessionId::new(core.next_session);
        let now = core.clock;

        core.host.open_session(id, now);
        core.log.push(LogRecord::OpenSession { session: id, now });
        core.runtimes.insert(id, SessionRuntime::default());

        let (tx, rx) = mpsc::unbounded_channel();
        core.host.attach_session(id, tx);

        let (state_tx, _) = broadcast::channel(16);
        let session = Arc::new(LocalSession {
            id,
            cluster: self.clone(),
            state: Mutex::new(State::Connected),
            state_tx,
            events: Mutex::new(Some(rx)),
            next_sequence: AtomicU64::new(0),
            submit_lock: tokio::sync::Mutex::new(()),
        });
        core.clients.push(Arc::downgrade(&session));
        Ok(session)
    }

    /// Advance the cluster clock, firing due timers.
    pub fn advance(&self, ms: u64) {
        let mut core = self.core.lock().expect("cluster lock");
        core.clock += ms;
        let now = core.clock;
        core.log.push(LogRecord::Tick { now });
        core.host.tick(now);
    }

    /// The current cluster clock in ms.
    pub fn now(&self) -> u64 {
        self.core.lock().expect("cluster lock").clock
    }

    /// Expire a session as the consensus layer would on lapsed
    /// keep-alives.
    pub fn expire_session(&self, session: SessionId) {
        let mut core = self.core.lock().expect("cluster lock");
        core.log.push(LogRecord::ExpireSession { session });
        core.host.expire_session(session);
        notify_clients(&mut core, |client| {
            if client.id == session {
                client.set_state(State::Closed);
            }
        });
    }

    /// Simulate losing the leader: submissions stall and every connected
    /// client transitions to `Suspended`.
    pub fn kill_leader(&self) {
        let mut core = self.core.lock().expect("cluster lock");
        core.leader_alive = false;
        tracing::info!("leader killed");
        notify_clients(&mut core, |client| {
            if client.state() == State::Connected {
                client.set_state(State::Suspended);
            }
        });
    }

    /// A new leader takes over: suspended clients recover.
    pub fn recover_leader(&self) {
        let mut core = self.core.lock().expect("cluster lock");
        core.leader_alive = true;
        core.clock += 1;
        tracing::info!("leader recovered");
        notify_clients(&mut core, |client| {
            if client.state() == State::Suspended {
                client.set_state(State::Connected);
            }
        });
    }

    /// Re-attach a live event connection for a session, receiving
    /// everything unacknowledged.
    pub fn reattach_session(&self, session: SessionId) -> mpsc::UnboundedReceiver<EventEnvelope> {
        let mut core = self.core.lock().expect("cluster lock");
        let (tx, rx) = mpsc::unbounded_channel();
        core.host.attach_session(session, tx);
        rx
    }

    /// Commits currently retained by state machines.
    pub fn open_commits(&self) -> u64 {
        self.core.lock().expect("cluster lock").host.ledger().open_commits()
    }

    /// Commits dropped without close (always zero in a correct run).
    pub fn leaked_commits(&self) -> u64 {
        self.core.lock().expect("cluster lock").host.ledger().leaked()
    }

    /// Serialized logical state of the live host.
    pub fn snapshot(&self) -> Vec<u8> {
        self.core.lock().expect("cluster lock").host.snapshot()
    }

    /// Replay the full log on a fresh host and compare its state against
    /// the live host, atomically with respect to new submissions.
    pub fn replay_matches_live(&self) -> bool {
        let core = self.core.lock().expect("cluster lock");
        let live = core.host.snapshot();
        let replayed = Self::replay(&core.log);
        live == replayed
    }

    /// Replay the full log on a fresh host and return its state.
    pub fn replay_snapshot(&self) -> Vec<u8> {
        let core = self.core.lock().expect("cluster lock");
        Self::replay(&core.log)
    }

    fn replay(log: &[LogRecord]) -> Vec<u8> {
        let types = default_registry().expect("built-in registry must load");
        let mut host = StateMachineHost::new(types);
        for record in log {
            match record {
                LogRecord::OpenSession { session, now } => host.open_session(*session, *now),
                LogRecord::CloseSession { session } => host.close_session(*session),
                LogRecord::ExpireSession { session } => host.expire_session(*session),
                LogRecord::Tick { now } => host.tick(*now),
                LogRecord::Entry {
                    index,
                    session,
                    timestamp,
                    operation,
                } => {
                    let _ = host.apply(CommittedEntry {
                        index: LogIndex::new(*index),
                        session: *session,
                        timestamp: *timestamp,
                        operation: operation.clone(),
                    });
                }
            }
        }
        host.snapshot()
    }

    fn apply_command(
        &self,
        session: SessionId,
        sequence: u64,
        operation: ManagerOperation,
    ) -> Result<ManagerResponse> {
        let mut core = self.core.lock().expect("cluster lock");
        if !core.leader_alive {
            return Err(Error::Unavailable);
        }
        match core.host.session_state(session) {
            None => return Err(Error::SessionExpired),
            Some(state) if !state.is_open() => return Err(Error::SessionExpired),
            Some(_) => {}
        }

        let core = &mut *core;
        let runtime = core
            .runtimes
            .get_mut(&session)
            .expect("open session without runtime");

        // At-most-once application: a retried submission reuses its
        // sequence and gets the cached response back.
        if sequence <= runtime.last_sequence {
            if let Some((cached_sequence, response)) = &runtime.cached {
                if *cached_sequence == sequence {
                    return response
                        .clone()
                        .map_err(|code| error_for(code, &operation));
                }
            }
            return Err(Error::Internal(format!(
                "stale sequence {sequence} for session {session}"
            )));
        }
        runtime.last_sequence = sequence;

        core.clock += 1;
        core.next_index += 1;
        let entry = CommittedEntry {
            index: LogIndex::new(core.next_index),
            session,
            timestamp: core.clock,
            operation: operation.clone(),
        };
        core.log.push(LogRecord::Entry {
            index: core.next_index,
            session,
            timestamp: core.clock,
            operation: operation.clone(),
        });

        let result = core.host.apply(entry);
        runtime.cached = Some((sequence, result.clone()));
        result.map_err(|code| error_for(code, &operation))
    }

    fn close_session(&self, session: SessionId) {
        let mut core = self.core.lock().expect("cluster lock");
        core.log.push(LogRecord::CloseSession { session });
        core.host.close_session(session);
        core.runtimes.remove(&session);
    }
}

fn notify_clients(core: &mut ClusterCore, f: impl Fn(&LocalSession)) {
    core.clients.retain(|weak| match weak.upgrade() {
        Some(client) => {
            f(&client);
            true
        }
        None => false,
    });
}

/// Attach wire-level error context the code alone cannot carry.
fn error_for(code: ErrorCode, operation: &ManagerOperation) -> Error {
    match code {
        ErrorCode::NoSuchResource => {
            let resource_id = match operation {
                ManagerOperation::Resource(envelope) => envelope.resource_id(),
                ManagerOperation::CloseResource { resource_id } => *resource_id,
                _ => ResourceId::default(),
            };
            Error::NoSuchResource(resource_id)
        }
        ErrorCode::UnknownType => {
            let type_id = match operation {
                ManagerOperation::GetResource { type_id, .. }
                | ManagerOperation::GetResourceIfExists { type_id, .. } => *type_id,
                _ => TypeId::default(),
            };
            Error::UnknownType(type_id)
        }
        ErrorCode::TypeMismatch => {
            let key = match operation {
                ManagerOperation::GetResource { key, .. }
                | ManagerOperation::GetResourceIfExists { key, .. } => key.clone(),
                _ => String::new(),
            };
            Error::TypeMismatch {
                key,
                existing: TypeId::default(),
            }
        }
        other => other.into_error(),
    }
}

/// A client session on the embedded cluster.
pub struct LocalSession {
    id: SessionId,
    cluster: LocalCluster,
    state: Mutex<State>,
    state_tx: broadcast::Sender<State>,
    events: Mutex<Option<mpsc::UnboundedReceiver<EventEnvelope>>>,
    next_sequence: AtomicU64,
    submit_lock: tokio::sync::Mutex<()>,
}

impl LocalSession {
    fn set_state(&self, state: State) {
        *self.state.lock().expect("state lock") = state;
        let _ = self.state_tx.send(state);
    }

    async fn await_connected(&self) -> Result<()> {
        loop {
            match self.state() {
                State::Connected => return Ok(()),
                State::Closed => return Err(Error::SessionExpired),
                State::Suspended => {
                    let mut rx = self.state_tx.subscribe();
                    if self.state() != State::Suspended {
                        continue;
                    }
                    if rx.recv().await.is_err() {
                        return Err(Error::SessionExpired);
                    }
                }
            }
        }
    }
}

#[async_trait]
impl RaftSession for LocalSession {
    fn session_id(&self) -> SessionId {
        self.id
    }

    fn state(&self) -> State {
        *self.state.lock().expect("state lock")
    }

    fn on_state_change(&self) -> broadcast::Receiver<State> {
        self.state_tx.subscribe()
    }

    async fn submit(&self, operation: ManagerOperation) -> Result<ManagerResponse> {
        self.await_connected().await?;
        let _guard = self.submit_lock.lock().await;
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.cluster.apply_command(self.id, sequence, operation)
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<EventEnvelope>> {
        self.events.lock().expect("events lock").take()
    }

    fn acknowledge(&self, sequence: EventSequence) {
        let mut core = self.cluster.core.lock().expect("cluster lock");
        core.host.acknowledge(self.id, sequence);
    }

    async fn close(&self) -> Result<()> {
        self.set_state(State::Closed);
        self.cluster.close_session(self.id);
        Ok(())
    }
}

/// Connects clients to an embedded cluster, ignoring the address.
pub struct LocalConnector {
    cluster: LocalCluster,
}

impl LocalConnector {
    pub fn new(cluster: LocalCluster) -> Self {
        Self { cluster }
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&self, _address: &Address) -> Result<Arc<dyn RaftSession>> {
        let session = self.cluster.connect().await?;
        Ok(session)
    }
}

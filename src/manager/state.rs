//! The resource manager state machine.
//!
//! The manager multiplexes every logical resource onto the one replicated
//! log. It owns the name registry (`(key, type)` to id), instantiates and
//! routes to per-resource state machines, tracks which sessions hold each
//! resource open, and sweeps session state into the machines when sessions
//! close or expire.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::ResourceConfig;
use crate::error::ErrorCode;
use crate::manager::commit::{Commit, CommitLedger};
use crate::manager::machine::{MachineContext, ResourceStateMachine, TimerQueue};
use crate::manager::session::SessionRegistry;
use crate::protocol::Envelope;
use crate::registry::TypeRegistry;
use crate::types::{LogIndex, ResourceId, SessionId, TimerId, TypeId};

/// Operations replicated through the log and applied by the manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ManagerOperation {
    /// Get or create the resource for `(key, type)` and join its owners.
    GetResource { key: String, type_id: TypeId },

    /// Get the resource for `(key, type)` without creating it.
    GetResourceIfExists { key: String, type_id: TypeId },

    /// Leave the resource's owner set; the record persists.
    CloseResource { resource_id: ResourceId },

    /// A resource-level envelope (command, query, configure, delete).
    Resource(Envelope),
}

/// Responses produced by applying manager operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ManagerResponse {
    /// The resolved resource id.
    Resource(ResourceId),

    /// The resolved resource id, or none when it does not exist.
    MaybeResource(Option<ResourceId>),

    /// The operation completed without a payload.
    Done,

    /// The encoded response from a resource state machine.
    Payload(Bytes),
}

/// The replicated record for one named resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub resource_id: ResourceId,
    pub key: String,
    pub type_id: TypeId,
    pub config: ResourceConfig,
    pub owner_sessions: BTreeSet<SessionId>,
}

#[derive(Serialize)]
struct ManagerSnapshot<'a> {
    next_id: u64,
    by_key: &'a BTreeMap<String, ResourceId>,
    records: &'a BTreeMap<ResourceId, ResourceRecord>,
    machines: Vec<(u64, Vec<u8>)>,
}

/// The manager state machine.
///
/// Ordered maps keep every sweep and snapshot in a deterministic order so
/// replicas applying the same log hold byte-equal state.
pub struct ResourceManager {
    types: TypeRegistry,
    by_key: BTreeMap<String, ResourceId>,
    by_id: BTreeMap<ResourceId, ResourceRecord>,
    machines: BTreeMap<ResourceId, Box<dyn ResourceStateMachine>>,
    sessions: BTreeMap<SessionId, BTreeSet<ResourceId>>,
    next_id: u64,
}

impl ResourceManager {
    pub fn new(types: TypeRegistry) -> Self {
        Self {
            types,
            by_key: BTreeMap::new(),
            by_id: BTreeMap::new(),
            machines: BTreeMap::new(),
            sessions: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Apply one committed log entry.
    ///
    /// Exactly one commit is created per entry; entries the manager
    /// handles itself close it before returning, entries routed to a
    /// machine transfer it there.
    pub fn apply(
        &mut self,
        index: LogIndex,
        session: SessionId,
        timestamp: u64,
        operation: ManagerOperation,
        ledger: &Arc<CommitLedger>,
        sessions: &mut SessionRegistry,
        timers: &mut TimerQueue,
    ) -> Result<ManagerResponse, ErrorCode> {
        match operation {
            ManagerOperation::GetResource { key, type_id } => {
                let commit = Commit::new(
                    index,
                    session,
                    timestamp,
                    crate::protocol::CompactionMode::Quorum,
                    (),
                    ledger,
                );
                let result = self.get_resource(&key, type_id, session);
                commit.close();
                result.map(ManagerResponse::Resource)
            }

            ManagerOperation::GetResourceIfExists { key, type_id } => {
                let commit = Commit::new(
                    index,
                    session,
                    timestamp,
                    crate::protocol::CompactionMode::Release,
                    (),
                    ledger,
                );
                let result = self.get_resource_if_exists(&key, type_id);
                commit.close();
                result.map(ManagerResponse::MaybeResource)
            }

            ManagerOperation::CloseResource { resource_id } => {
                let commit = Commit::new(
                    index,
                    session,
                    timestamp,
                    crate::protocol::CompactionMode::Release,
                    (),
                    ledger,
                );
                let result = self.close_resource(resource_id, session);
                commit.close();
                result.map(|_| ManagerResponse::Done)
            }

            ManagerOperation::Resource(envelope) => {
                self.apply_envelope(index, session, timestamp, envelope, ledger, sessions, timers)
            }
        }
    }

    fn apply_envelope(
        &mut self,
        index: LogIndex,
        session: SessionId,
        timestamp: u64,
        envelope: Envelope,
        ledger: &Arc<CommitLedger>,
        sessions: &mut SessionRegistry,
        timers: &mut TimerQueue,
    ) -> Result<ManagerResponse, ErrorCode> {
        let resource_id = envelope.resource_id();
        let compaction = envelope.compaction();

        match envelope {
            Envelope::Command { payload, .. } | Envelope::Query { payload, .. } => {
                let commit = Commit::new(index, session, timestamp, compaction, payload, ledger);
                let Some(machine) = self.machines.get_mut(&resource_id) else {
                    commit.close();
                    tracing::debug!(resource = %resource_id, "operation for unknown resource");
                    return Err(ErrorCode::NoSuchResource);
                };
                let mut ctx = MachineContext::new(resource_id, sessions, timers);
                machine.apply(commit, &mut ctx).map(ManagerResponse::Payload)
            }

            Envelope::Configure { config, .. } => {
                let commit = Commit::new(index, session, timestamp, compaction, (), ledger);
                let result = self.configure_resource(resource_id, config);
                commit.close();
                result.map(|_| ManagerResponse::Done)
            }

            Envelope::Delete { .. } => {
                let commit = Commit::new(index, session, timestamp, compaction, (), ledger);
                let result = self.delete_resource(resource_id, sessions, timers);
                commit.close();
                result.map(|_| ManagerResponse::Done)
            }
        }
    }

    fn get_resource(
        &mut self,
        key: &str,
        type_id: TypeId,
        session: SessionId,
    ) -> Result<ResourceId, ErrorCode> {
        if key.is_empty() || !type_id.is_valid() {
            return Err(ErrorCode::InvalidArgument);
        }
        if self.types.get(type_id).is_none() {
            tracing::warn!(%type_id, "get for unregistered resource type");
            return Err(ErrorCode::UnknownType);
        }

        if let Some(&existing) = self.by_key.get(key) {
            let record = self
                .by_id
                .get_mut(&existing)
                .expect("by_key entry without record");
            if record.type_id != type_id {
                return Err(ErrorCode::TypeMismatch);
            }
            record.owner_sessions.insert(session);
            self.sessions.entry(session).or_default().insert(existing);
            return Ok(existing);
        }

        let new_machine = self.types.get(type_id).expect("checked above").new_machine;
        self.next_id += 1;
        let resource_id = ResourceId::new(self.next_id);

        let mut owner_sessions = BTreeSet::new();
        owner_sessions.insert(session);
        self.by_key.insert(key.to_string(), resource_id);
        self.by_id.insert(
            resource_id,
            ResourceRecord {
                resource_id,
                key: key.to_string(),
                type_id,
                config: ResourceConfig::new(),
                owner_sessions,
            },
        );
        self.machines.insert(resource_id, new_machine());
        self.sessions.entry(session).or_default().insert(resource_id);

        tracing::info!(%resource_id, key, %type_id, "resource created");
        Ok(resource_id)
    }

    /// A side-effect-free lookup: unlike `get_resource`, the caller does
    /// not join the owner set.
    fn get_resource_if_exists(
        &self,
        key: &str,
        type_id: TypeId,
    ) -> Result<Option<ResourceId>, ErrorCode> {
        if key.is_empty() || !type_id.is_valid() {
            return Err(ErrorCode::InvalidArgument);
        }
        match self.by_key.get(key) {
            None => Ok(None),
            Some(&existing) => {
                let record = self
                    .by_id
                    .get(&existing)
                    .expect("by_key entry without record");
                if record.type_id != type_id {
                    return Err(ErrorCode::TypeMismatch);
                }
                Ok(Some(existing))
            }
        }
    }

    fn close_resource(
        &mut self,
        resource_id: ResourceId,
        session: SessionId,
    ) -> Result<(), ErrorCode> {
        let Some(record) = self.by_id.get_mut(&resource_id) else {
            return Err(ErrorCode::NoSuchResource);
        };
        record.owner_sessions.remove(&session);
        if let Some(owned) = self.sessions.get_mut(&session) {
            owned.remove(&resource_id);
        }
        Ok(())
    }

    fn configure_resource(
        &mut self,
        resource_id: ResourceId,
        config: ResourceConfig,
    ) -> Result<(), ErrorCode> {
        let Some(record) = self.by_id.get_mut(&resource_id) else {
            return Err(ErrorCode::NoSuchResource);
        };
        record.config = config.clone();
        let machine = self
            .machines
            .get_mut(&resource_id)
            .expect("record without machine");
        machine.configure(&config);
        Ok(())
    }

    fn delete_resource(
        &mut self,
        resource_id: ResourceId,
        sessions: &mut SessionRegistry,
        timers: &mut TimerQueue,
    ) -> Result<(), ErrorCode> {
        let Some(record) = self.by_id.remove(&resource_id) else {
            return Err(ErrorCode::NoSuchResource);
        };
        let mut machine = self
            .machines
            .remove(&resource_id)
            .expect("record without machine");

        let mut ctx = MachineContext::new(resource_id, sessions, timers);
        machine.delete(&mut ctx);
        timers.cancel_resource(resource_id);

        self.by_key.remove(&record.key);
        for owned in self.sessions.values_mut() {
            owned.remove(&resource_id);
        }

        tracing::info!(%resource_id, key = %record.key, "resource deleted");
        Ok(())
    }

    /// A timer scheduled by a machine fired.
    pub fn fire_timer(
        &mut self,
        timer: TimerId,
        resource_id: ResourceId,
        sessions: &mut SessionRegistry,
        timers: &mut TimerQueue,
    ) {
        if let Some(machine) = self.machines.get_mut(&resource_id) {
            let mut ctx = MachineContext::new(resource_id, sessions, timers);
            machine.fire_timer(timer, &mut ctx);
        }
    }

    /// Sweep an expired session out of every machine and owner set.
    pub fn session_expired(
        &mut self,
        session: SessionId,
        sessions: &mut SessionRegistry,
        timers: &mut TimerQueue,
    ) {
        self.sweep_session(session, sessions, timers, true);
    }

    /// Sweep an explicitly closed session.
    pub fn session_closed(
        &mut self,
        session: SessionId,
        sessions: &mut SessionRegistry,
        timers: &mut TimerQueue,
    ) {
        self.sweep_session(session, sessions, timers, false);
    }

    fn sweep_session(
        &mut self,
        session: SessionId,
        sessions: &mut SessionRegistry,
        timers: &mut TimerQueue,
        expired: bool,
    ) {
        // Hooks run on every machine: subscriptions may outlive the
        // owner-set membership that created them.
        for (&resource_id, machine) in self.machines.iter_mut() {
            let mut ctx = MachineContext::new(resource_id, sessions, timers);
            if expired {
                machine.session_expired(session, &mut ctx);
            } else {
                machine.session_closed(session, &mut ctx);
            }
        }
        if let Some(owned) = self.sessions.remove(&session) {
            for resource_id in owned {
                if let Some(record) = self.by_id.get_mut(&resource_id) {
                    record.owner_sessions.remove(&session);
                }
            }
        }
    }

    /// The record for a resource, if it exists.
    pub fn record(&self, resource_id: ResourceId) -> Option<&ResourceRecord> {
        self.by_id.get(&resource_id)
    }

    /// The id bound to a key, if any.
    pub fn lookup_key(&self, key: &str) -> Option<ResourceId> {
        self.by_key.get(key).copied()
    }

    /// Number of live resources.
    pub fn resource_count(&self) -> usize {
        self.by_id.len()
    }

    /// Serialized logical state of the manager and every machine, in id
    /// order. Replaying the same log on a fresh manager yields equal
    /// bytes.
    pub fn snapshot(&self) -> Vec<u8> {
        let machines = self
            .machines
            .iter()
            .map(|(id, machine)| (id.value(), machine.snapshot()))
            .collect();
        let view = ManagerSnapshot {
            next_id: self.next_id,
            by_key: &self.by_key,
            records: &self.by_id,
            machines,
        };
        bincode::serialize(&view).expect("manager snapshot must serialize")
    }
}

//! Operation envelope and consistency levels.
//!
//! Every resource-level operation travels the cluster wrapped in an
//! [`Envelope`] carrying the target resource id and the consistency level
//! declared by the submitting gateway. The manager unwraps the envelope,
//! routes the inner payload to the owning state machine, and never
//! interprets the payload itself; payload bodies are opaque serialized
//! operation values owned by the resource's codec bundle.
//!
//! # Wire format
//!
//! ```text
//! tag(u8)=ENVELOPE | resourceId:u64 | consistencyTag:u8 | payloadLen:u32 | payload
//! ```
//!
//! The consistency tag both distinguishes command from query from the
//! manager-level `Configure`/`Delete` variants and carries the level
//! itself.

use bytes::{BufMut, Bytes};
use nombytes::NomBytes;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::config::ResourceConfig;
use crate::constants::ENVELOPE_TAG;
use crate::encode::ToByte;
use crate::error::{Error, Result};
use crate::parser;
use crate::types::ResourceId;

// =============================================================================
// Consistency levels
// =============================================================================

/// Per-operation write consistency declared by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WriteConsistency {
    /// Commands complete only after the effect is committed and applied;
    /// events published during application have reached their sessions.
    #[default]
    Atomic,
    /// Like `Atomic`, but the leader may answer under its lease without a
    /// full quorum round on the completion path.
    AtomicLease,
    /// Commands complete once committed; application may lag.
    Sequential,
    /// Commands complete once committed; event delivery is asynchronous.
    SequentialEvent,
}

impl WriteConsistency {
    /// Wire tag for this level.
    pub const fn tag(self) -> u8 {
        match self {
            WriteConsistency::Atomic => 0x01,
            WriteConsistency::AtomicLease => 0x02,
            WriteConsistency::Sequential => 0x03,
            WriteConsistency::SequentialEvent => 0x04,
        }
    }

    /// Decode a wire tag.
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(WriteConsistency::Atomic),
            0x02 => Some(WriteConsistency::AtomicLease),
            0x03 => Some(WriteConsistency::Sequential),
            0x04 => Some(WriteConsistency::SequentialEvent),
            _ => None,
        }
    }
}

/// Per-operation read consistency declared by the gateway.
///
/// `Causal` and `Local` queries may be served by a follower; the rest
/// require the leader, with `AtomicLease` accepting a leader lease in
/// place of a full round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReadConsistency {
    /// Linearizable read through the leader with a quorum round.
    #[default]
    Atomic,
    /// Linearizable read served under the leader lease.
    AtomicLease,
    /// Sequentially consistent read through the leader.
    Sequential,
    /// Read from any replica that has seen this session's writes.
    Causal,
    /// Read from the connected replica with whatever it has applied.
    Local,
}

impl ReadConsistency {
    /// Wire tag for this level.
    pub const fn tag(self) -> u8 {
        match self {
            ReadConsistency::Atomic => 0x11,
            ReadConsistency::AtomicLease => 0x12,
            ReadConsistency::Sequential => 0x13,
            ReadConsistency::Causal => 0x14,
            ReadConsistency::Local => 0x15,
        }
    }

    /// Decode a wire tag.
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x11 => Some(ReadConsistency::Atomic),
            0x12 => Some(ReadConsistency::AtomicLease),
            0x13 => Some(ReadConsistency::Sequential),
            0x14 => Some(ReadConsistency::Causal),
            0x15 => Some(ReadConsistency::Local),
            _ => None,
        }
    }

    /// Whether a follower may answer this query.
    pub const fn allows_follower_read(self) -> bool {
        matches!(self, ReadConsistency::Causal | ReadConsistency::Local)
    }

    /// Whether the leader lease substitutes for a quorum round.
    pub const fn uses_lease(self) -> bool {
        matches!(self, ReadConsistency::AtomicLease)
    }
}

/// How the log may compact the entry once its commit is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CompactionMode {
    /// The entry records state; retain until quorum-replicated snapshots
    /// cover it.
    #[default]
    Quorum,
    /// The entry's effect is fully captured by later entries; release as
    /// soon as the commit closes.
    Release,
    /// The entry deletes state; retain as a tombstone through compaction.
    Tombstone,
}

// =============================================================================
// Envelope
// =============================================================================

/// Consistency tag for the manager-level configure variant.
const CONFIGURE_TAG: u8 = 0xF0;

/// Consistency tag for the manager-level delete variant.
const DELETE_TAG: u8 = 0xF1;

/// A resource-level operation addressed to one resource id.
///
/// `Configure` and `Delete` are handled by the resource manager itself and
/// never reach the resource state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Envelope {
    /// A state-changing operation with its declared write consistency.
    Command {
        resource_id: ResourceId,
        consistency: WriteConsistency,
        payload: Bytes,
    },
    /// A read-only operation with its declared read consistency.
    Query {
        resource_id: ResourceId,
        consistency: ReadConsistency,
        payload: Bytes,
    },
    /// Replace the resource's replicated configuration.
    Configure {
        resource_id: ResourceId,
        config: ResourceConfig,
    },
    /// Delete the resource and evict its state machine.
    Delete { resource_id: ResourceId },
}

impl Envelope {
    /// The resource this envelope addresses.
    pub fn resource_id(&self) -> ResourceId {
        match self {
            Envelope::Command { resource_id, .. }
            | Envelope::Query { resource_id, .. }
            | Envelope::Configure { resource_id, .. }
            | Envelope::Delete { resource_id } => *resource_id,
        }
    }

    /// Compaction mode declared for this envelope.
    ///
    /// Queries record no state and release immediately; deletions are
    /// tombstones.
    pub fn compaction(&self) -> CompactionMode {
        match self {
            Envelope::Command { .. } | Envelope::Configure { .. } => CompactionMode::Quorum,
            Envelope::Query { .. } => CompactionMode::Release,
            Envelope::Delete { .. } => CompactionMode::Tombstone,
        }
    }

    fn consistency_tag(&self) -> u8 {
        match self {
            Envelope::Command { consistency, .. } => consistency.tag(),
            Envelope::Query { consistency, .. } => consistency.tag(),
            Envelope::Configure { .. } => CONFIGURE_TAG,
            Envelope::Delete { .. } => DELETE_TAG,
        }
    }

    /// Encode the envelope into its wire representation.
    pub fn to_wire(&self) -> Result<Bytes> {
        let mut buffer = Vec::new();
        self.encode(&mut buffer)?;
        Ok(Bytes::from(buffer))
    }

    /// Decode an envelope from its wire representation.
    pub fn from_wire(data: Bytes) -> Result<Envelope> {
        let input = NomBytes::new(data.clone());
        let (input, tag) =
            parser::parse_tag(input).map_err(|_| Error::Parse(data.clone()))?;
        if tag != ENVELOPE_TAG {
            return Err(Error::Parse(data));
        }
        let (input, resource_id) =
            parser::parse_u64(input).map_err(|_| Error::Parse(data.clone()))?;
        let (input, consistency_tag) =
            parser::parse_tag(input).map_err(|_| Error::Parse(data.clone()))?;
        let (_, payload) = parser::parse_payload(input).map_err(|_| Error::Parse(data.clone()))?;

        let resource_id = ResourceId::new(resource_id);
        if let Some(consistency) = WriteConsistency::from_tag(consistency_tag) {
            return Ok(Envelope::Command {
                resource_id,
                consistency,
                payload,
            });
        }
        if let Some(consistency) = ReadConsistency::from_tag(consistency_tag) {
            return Ok(Envelope::Query {
                resource_id,
                consistency,
                payload,
            });
        }
        match consistency_tag {
            CONFIGURE_TAG => {
                let config = decode_payload(&payload)?;
                Ok(Envelope::Configure {
                    resource_id,
                    config,
                })
            }
            DELETE_TAG => Ok(Envelope::Delete { resource_id }),
            _ => Err(Error::Parse(data)),
        }
    }
}

impl ToByte for Envelope {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        ENVELOPE_TAG.encode(buffer)?;
        self.resource_id().encode(buffer)?;
        self.consistency_tag().encode(buffer)?;
        match self {
            Envelope::Command { payload, .. } | Envelope::Query { payload, .. } => {
                payload.encode(buffer)
            }
            Envelope::Configure { config, .. } => encode_payload(config)?.encode(buffer),
            Envelope::Delete { .. } => Bytes::new().encode(buffer),
        }
    }
}

// =============================================================================
// Payload bodies
// =============================================================================

/// Encode an operation body for transport inside an envelope.
pub fn encode_payload<T: Serialize>(value: &T) -> Result<Bytes> {
    bincode::serialize(value)
        .map(Bytes::from)
        .map_err(|e| Error::Config(format!("payload encode failed: {e}")))
}

/// Decode an operation body received inside an envelope.
pub fn decode_payload<T: DeserializeOwned>(payload: &Bytes) -> Result<T> {
    bincode::deserialize(payload).map_err(|_| Error::Parse(payload.clone()))
}

//! Type-safe wrappers for protocol primitives.
//!
//! These newtypes prevent mixing up different integer ids that share an
//! underlying representation but carry different semantic meanings: a
//! session id is never a resource id, even though both are `u64`s on the
//! wire.

use bytes::BufMut;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::encode::ToByte;
use crate::error::Result;

/// A replicated resource identifier.
///
/// Resource ids are 64-bit unsigned integers assigned monotonically by the
/// resource manager when a `(key, type)` pair is first created. The id is
/// an alternate key for the resource record; `(key, type)` is the primary
/// key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct ResourceId(pub u64);

impl ResourceId {
    /// Create a new resource id from a raw value.
    #[inline]
    pub const fn new(value: u64) -> Self {
        ResourceId(value)
    }

    /// Get the raw u64 value.
    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl From<u64> for ResourceId {
    fn from(value: u64) -> Self {
        ResourceId(value)
    }
}

impl From<ResourceId> for u64 {
    fn from(id: ResourceId) -> Self {
        id.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ToByte for ResourceId {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        self.0.encode(buffer)
    }
}

/// A client session identifier.
///
/// Session ids are 64-bit unsigned integers assigned by the cluster when a
/// client registers. All per-session state (event sequences, duplicate
/// filtering, resource ownership) is keyed by this id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct SessionId(pub u64);

impl SessionId {
    /// Create a new session id from a raw value.
    #[inline]
    pub const fn new(value: u64) -> Self {
        SessionId(value)
    }

    /// Get the raw u64 value.
    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl From<u64> for SessionId {
    fn from(value: u64) -> Self {
        SessionId(value)
    }
}

impl From<SessionId> for u64 {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ToByte for SessionId {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        self.0.encode(buffer)
    }
}

/// A resource type identifier.
///
/// Type ids are 16-bit signed integers. Negative ids are reserved for
/// framework envelope types; resource descriptors assign their own ids.
/// Two resource types compare equal iff their ids match.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct TypeId(pub i16);

impl TypeId {
    /// Create a new type id from a raw value.
    #[inline]
    pub const fn new(value: i16) -> Self {
        TypeId(value)
    }

    /// Get the raw i16 value.
    #[inline]
    pub const fn value(self) -> i16 {
        self.0
    }

    /// Check whether the id is valid for a user resource type.
    ///
    /// Zero is never a valid type id.
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl From<i16> for TypeId {
    fn from(value: i16) -> Self {
        TypeId(value)
    }
}

impl From<TypeId> for i16 {
    fn from(id: TypeId) -> Self {
        id.0
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ToByte for TypeId {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        self.0.encode(buffer)
    }
}

/// A per-session event sequence number.
///
/// Every server-initiated event carries a monotonic sequence assigned when
/// the event is queued on its session. Clients acknowledge the highest
/// contiguous sequence they have processed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct EventSequence(pub u64);

impl EventSequence {
    /// Create a new event sequence from a raw value.
    #[inline]
    pub const fn new(value: u64) -> Self {
        EventSequence(value)
    }

    /// Get the raw u64 value.
    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The next sequence in the stream.
    #[inline]
    pub const fn next(self) -> Self {
        EventSequence(self.0 + 1)
    }
}

impl fmt::Display for EventSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A position in the replicated log.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct LogIndex(pub u64);

impl LogIndex {
    /// Create a new log index from a raw value.
    #[inline]
    pub const fn new(value: u64) -> Self {
        LogIndex(value)
    }

    /// Get the raw u64 value.
    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LogIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A state-machine timer identifier.
///
/// Timer ids are allocated monotonically by the host so that `(fire_at,
/// timer_id)` gives a total firing order that replays identically.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct TimerId(pub u64);

impl TimerId {
    /// Create a new timer id from a raw value.
    #[inline]
    pub const fn new(value: u64) -> Self {
        TimerId(value)
    }

    /// Get the raw u64 value.
    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_id_new_and_value() {
        let id = ResourceId::new(42);
        assert_eq!(id.value(), 42);
    }

    #[test]
    fn test_resource_id_conversions() {
        let id: ResourceId = 7u64.into();
        assert_eq!(id.value(), 7);
        let raw: u64 = id.into();
        assert_eq!(raw, 7);
    }

    #[test]
    fn test_resource_id_encode() {
        let mut buf = Vec::new();
        ResourceId::new(0x0102030405060708).encode(&mut buf).unwrap();
        assert_eq!(buf, vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
    }

    #[test]
    fn test_session_id_ordering() {
        assert!(SessionId::new(1) < SessionId::new(2));
        assert_eq!(SessionId::new(3), SessionId::new(3));
    }

    #[test]
    fn test_type_id_validity() {
        assert!(!TypeId::new(0).is_valid());
        assert!(TypeId::new(1).is_valid());
        assert!(TypeId::new(-32).is_valid());
    }

    #[test]
    fn test_type_id_encode() {
        let mut buf = Vec::new();
        TypeId::new(-50).encode(&mut buf).unwrap();
        assert_eq!(buf, vec![0xFF, 0xCE]);
    }

    #[test]
    fn test_event_sequence_next() {
        let seq = EventSequence::new(9);
        assert_eq!(seq.next().value(), 10);
    }

    #[test]
    fn test_defaults() {
        assert_eq!(ResourceId::default().value(), 0);
        assert_eq!(SessionId::default().value(), 0);
        assert_eq!(TypeId::default().value(), 0);
        assert_eq!(EventSequence::default().value(), 0);
        assert_eq!(LogIndex::default().value(), 0);
        assert_eq!(TimerId::default().value(), 0);
    }

    #[test]
    fn test_hash() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(ResourceId::new(1));
        set.insert(ResourceId::new(2));
        set.insert(ResourceId::new(1));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", ResourceId::new(5)), "5");
        assert_eq!(format!("{}", TypeId::new(-32)), "-32");
    }
}

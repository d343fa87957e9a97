//! Resource-type registry and process-wide codec registry.
//!
//! A [`TypeDescriptor`] carries everything needed to serve one resource
//! kind: the stable type id, the server-side state machine constructor,
//! and the codec bundle to register with the serializer the first time a
//! gateway for the type is opened.
//!
//! Type ids are the dispatch key for everything: the manager instantiates
//! machines by id, the wire protocol names operations by id, and the codec
//! registry rejects collisions at load.

use std::collections::BTreeMap;
use std::fmt;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::error::{Error, Result};
use crate::manager::machine::ResourceStateMachine;
use crate::types::TypeId;

/// A resource type: a stable 16-bit id plus a human name.
///
/// Two resource types compare equal iff their ids match; the name is
/// informational only.
#[derive(Debug, Clone, Copy)]
pub struct ResourceType {
    id: TypeId,
    name: &'static str,
}

impl ResourceType {
    pub const fn new(id: i16, name: &'static str) -> Self {
        Self {
            id: TypeId(id),
            name,
        }
    }

    pub const fn id(&self) -> TypeId {
        self.id
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ResourceType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ResourceType {}

impl std::hash::Hash for ResourceType {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.id)
    }
}

/// Everything needed to serve one resource kind.
#[derive(Clone)]
pub struct TypeDescriptor {
    /// The resource type this descriptor serves.
    pub resource_type: ResourceType,
    /// Server-side state machine constructor.
    pub new_machine: fn() -> Box<dyn ResourceStateMachine>,
    /// Serializer entries `(type id, class name)` registered on gateway
    /// open.
    pub codecs: &'static [(i16, &'static str)],
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("resource_type", &self.resource_type)
            .field("codecs", &self.codecs)
            .finish()
    }
}

/// The set of resource types a cluster member serves.
///
/// Loaded at startup; duplicate ids are an error.
#[derive(Debug, Default, Clone)]
pub struct TypeRegistry {
    by_id: BTreeMap<i16, TypeDescriptor>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor. Fails on a duplicate id.
    pub fn register(&mut self, descriptor: TypeDescriptor) -> Result<()> {
        let id = descriptor.resource_type.id();
        if !id.is_valid() {
            return Err(Error::InvalidArgument(format!(
                "type id 0 is reserved ({})",
                descriptor.resource_type.name()
            )));
        }
        if self.by_id.contains_key(&id.value()) {
            return Err(Error::InvalidArgument(format!(
                "duplicate resource type id: {id}"
            )));
        }
        self.by_id.insert(id.value(), descriptor);
        Ok(())
    }

    /// Look up a descriptor by type id.
    pub fn get(&self, id: TypeId) -> Option<&TypeDescriptor> {
        self.by_id.get(&id.value())
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

// =============================================================================
// Process-wide codec registry
// =============================================================================

static CODECS: Lazy<DashMap<i16, &'static str>> = Lazy::new(DashMap::new);

/// Register a serializer entry.
///
/// Registration is idempotent for the same `(id, class)` pair; a second
/// registration of the same id with a different class fails with
/// `CodecConflict`. Gateways call this for their type's codec bundle on
/// open, so repeated opens of the same resource kind are cheap no-ops.
pub fn register_codec(id: i16, class: &'static str) -> Result<()> {
    match CODECS.entry(id) {
        dashmap::mapref::entry::Entry::Occupied(existing) => {
            if *existing.get() == class {
                Ok(())
            } else {
                tracing::error!(
                    id,
                    registered = existing.get(),
                    conflicting = class,
                    "serializer id registered with a different class"
                );
                Err(Error::CodecConflict(id))
            }
        }
        dashmap::mapref::entry::Entry::Vacant(slot) => {
            slot.insert(class);
            Ok(())
        }
    }
}

/// Register a descriptor's whole codec bundle.
pub fn register_codec_bundle(descriptor: &TypeDescriptor) -> Result<()> {
    for (id, class) in descriptor.codecs {
        register_codec(*id, class)?;
    }
    Ok(())
}

/// Look up the class registered for a serializer id.
pub fn registered_codec(id: i16) -> Option<&'static str> {
    CODECS.get(&id).map(|entry| *entry.value())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::machine::tests::NullMachine;

    fn null_machine() -> Box<dyn ResourceStateMachine> {
        Box::new(NullMachine)
    }

    fn descriptor(id: i16, name: &'static str) -> TypeDescriptor {
        TypeDescriptor {
            resource_type: ResourceType::new(id, name),
            new_machine: null_machine,
            codecs: &[],
        }
    }

    #[test]
    fn test_resource_type_equality_is_id_only() {
        let a = ResourceType::new(1, "value");
        let b = ResourceType::new(1, "renamed");
        let c = ResourceType::new(2, "value");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = TypeRegistry::new();
        registry.register(descriptor(1, "value")).unwrap();
        registry.register(descriptor(2, "map")).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.get(TypeId::new(1)).unwrap().resource_type.name(),
            "value"
        );
        assert!(registry.get(TypeId::new(3)).is_none());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut registry = TypeRegistry::new();
        registry.register(descriptor(7, "topic")).unwrap();
        let err = registry.register(descriptor(7, "other")).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(msg) if msg.contains("duplicate")));
    }

    #[test]
    fn test_zero_id_rejected() {
        let mut registry = TypeRegistry::new();
        let err = registry.register(descriptor(0, "broken")).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_codec_registration_idempotent() {
        register_codec(9001, "test.codec.A").unwrap();
        register_codec(9001, "test.codec.A").unwrap();
        assert_eq!(registered_codec(9001), Some("test.codec.A"));
    }

    #[test]
    fn test_codec_conflict() {
        register_codec(9002, "test.codec.B").unwrap();
        let err = register_codec(9002, "test.codec.C").unwrap_err();
        assert_eq!(err, Error::CodecConflict(9002));
    }
}

//! The resource state machines shipped with the framework.
//!
//! Four resource kinds cover the manager's whole surface: [`value`] (TTL
//! eviction and single-owner commits), [`multimap`] (replicated config
//! and deterministic iteration), [`topic`] (per-session subscriptions
//! with ordered fan-out), and [`queue`] (at-least-once redelivery across
//! session loss).
//!
//! Each kind registers a [`TypeDescriptor`] carrying its stable type id,
//! state machine constructor, and codec bundle.

pub mod multimap;
pub mod queue;
pub mod topic;
pub mod value;

use crate::constants::TYPE_ID_TASK_QUEUE;
use crate::error::Result;
use crate::manager::machine::ResourceStateMachine;
use crate::registry::{ResourceType, TypeDescriptor, TypeRegistry};

/// Stable type id for the replicated value.
pub const TYPE_ID_VALUE: i16 = -21;

/// Stable type id for the replicated multimap.
pub const TYPE_ID_MULTI_MAP: i16 = -12;

/// Stable type id for the topic.
pub const TYPE_ID_TOPIC: i16 = -31;

/// The value resource type.
pub const VALUE_TYPE: ResourceType = ResourceType::new(TYPE_ID_VALUE, "value");

/// The multimap resource type.
pub const MULTI_MAP_TYPE: ResourceType = ResourceType::new(TYPE_ID_MULTI_MAP, "multi-map");

/// The topic resource type.
pub const TOPIC_TYPE: ResourceType = ResourceType::new(TYPE_ID_TOPIC, "topic");

/// The task queue resource type.
pub const TASK_QUEUE_TYPE: ResourceType = ResourceType::new(TYPE_ID_TASK_QUEUE, "task-queue");

fn new_value() -> Box<dyn ResourceStateMachine> {
    Box::new(value::ValueState::new())
}

fn new_multimap() -> Box<dyn ResourceStateMachine> {
    Box::new(multimap::MultiMapState::new())
}

fn new_topic() -> Box<dyn ResourceStateMachine> {
    Box::new(topic::TopicState::new())
}

fn new_queue() -> Box<dyn ResourceStateMachine> {
    Box::new(queue::TaskQueueState::new())
}

/// Descriptor for the value resource.
pub fn value_descriptor() -> TypeDescriptor {
    TypeDescriptor {
        resource_type: VALUE_TYPE,
        new_machine: new_value,
        codecs: &[(TYPE_ID_VALUE, "quorate::resources::value::ValueRequest")],
    }
}

/// Descriptor for the multimap resource.
pub fn multimap_descriptor() -> TypeDescriptor {
    TypeDescriptor {
        resource_type: MULTI_MAP_TYPE,
        new_machine: new_multimap,
        codecs: &[(
            TYPE_ID_MULTI_MAP,
            "quorate::resources::multimap::MultiMapRequest",
        )],
    }
}

/// Descriptor for the topic resource.
pub fn topic_descriptor() -> TypeDescriptor {
    TypeDescriptor {
        resource_type: TOPIC_TYPE,
        new_machine: new_topic,
        codecs: &[(TYPE_ID_TOPIC, "quorate::resources::topic::TopicRequest")],
    }
}

/// Descriptor for the task queue resource.
pub fn task_queue_descriptor() -> TypeDescriptor {
    TypeDescriptor {
        resource_type: TASK_QUEUE_TYPE,
        new_machine: new_queue,
        codecs: &[(
            TYPE_ID_TASK_QUEUE,
            "quorate::resources::queue::QueueRequest",
        )],
    }
}

/// A registry with the four built-in resource types loaded.
pub fn default_registry() -> Result<TypeRegistry> {
    let mut registry = TypeRegistry::new();
    registry.register(value_descriptor())?;
    registry.register(multimap_descriptor())?;
    registry.register(topic_descriptor())?;
    registry.register(task_queue_descriptor())?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeId;

    #[test]
    fn test_default_registry_has_all_types() {
        let registry = default_registry().unwrap();
        assert_eq!(registry.len(), 4);
        assert!(registry.get(TypeId::new(TYPE_ID_VALUE)).is_some());
        assert!(registry.get(TypeId::new(TYPE_ID_MULTI_MAP)).is_some());
        assert!(registry.get(TypeId::new(TYPE_ID_TOPIC)).is_some());
        assert!(registry.get(TypeId::new(TYPE_ID_TASK_QUEUE)).is_some());
    }

    #[test]
    fn test_type_ids_match_descriptors() {
        assert_eq!(TASK_QUEUE_TYPE.id().value(), -32);
        assert_eq!(value_descriptor().resource_type, VALUE_TYPE);
        assert_eq!(topic_descriptor().resource_type.name(), "topic");
    }
}

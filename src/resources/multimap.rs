//! Replicated multimap state machine.
//!
//! Maps keys to ordered bags of values. The bag order is a replicated
//! config option set at creation: insertion order keeps arrival order,
//! natural order keeps values sorted bytewise. Keys iterate in sorted
//! order everywhere; nothing in this machine depends on hash-table
//! layout, so replicas replaying the same log iterate identically.
//!
//! Empty bags are deleted: no key ever maps to an empty value list.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::ResourceConfig;
use crate::error::ErrorCode;
use crate::manager::commit::Commit;
use crate::manager::machine::{MachineContext, ResourceStateMachine};
use crate::protocol::{decode_payload, encode_payload};

/// Config key selecting the value ordering policy.
pub const VALUE_ORDER_KEY: &str = "value-order";

/// Ordering policy for the values under one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Order {
    /// Values keep the order they were inserted in.
    #[default]
    Insertion,
    /// Values stay sorted bytewise.
    Natural,
}

impl Order {
    pub fn as_str(self) -> &'static str {
        match self {
            Order::Insertion => "insertion",
            Order::Natural => "natural",
        }
    }

    pub fn from_config(config: &ResourceConfig) -> Self {
        match config.get(VALUE_ORDER_KEY) {
            Some("natural") => Order::Natural,
            _ => Order::Insertion,
        }
    }
}

/// Build the replicated config selecting a value order.
pub fn config_with_order(order: Order) -> ResourceConfig {
    ResourceConfig::new().with(VALUE_ORDER_KEY, order.as_str())
}

/// Operations on a replicated multimap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MultiMapRequest {
    Put { key: String, value: Bytes },
    PutIfAbsent { key: String, value: Bytes },
    RemoveKey { key: String },
    RemoveEntry { key: String, value: Bytes },
    Get { key: String },
    Keys,
    Values,
    Entries,
    Size,
    IsEmpty,
    Clear,
    ContainsKey { key: String },
    ContainsValue { value: Bytes },
    ContainsEntry { key: String, value: Bytes },
}

/// Responses from multimap operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MultiMapResponse {
    Bool(bool),
    Values(Vec<Bytes>),
    Keys(Vec<String>),
    Entries(Vec<(String, Bytes)>),
    Size(u64),
    Done,
}

/// The multimap state machine.
#[derive(Default)]
pub struct MultiMapState {
    map: BTreeMap<String, Vec<Bytes>>,
    order: Order,
}

impl MultiMapState {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, key: String, value: Bytes) {
        let bag = self.map.entry(key).or_default();
        match self.order {
            Order::Insertion => bag.push(value),
            Order::Natural => {
                let at = bag.partition_point(|v| v.as_ref() <= value.as_ref());
                bag.insert(at, value);
            }
        }
    }

    fn handle(&mut self, request: MultiMapRequest) -> MultiMapResponse {
        match request {
            MultiMapRequest::Put { key, value } => {
                self.insert(key, value);
                MultiMapResponse::Bool(true)
            }

            MultiMapRequest::PutIfAbsent { key, value } => {
                let present = self
                    .map
                    .get(&key)
                    .is_some_and(|bag| bag.contains(&value));
                if present {
                    MultiMapResponse::Bool(false)
                } else {
                    self.insert(key, value);
                    MultiMapResponse::Bool(true)
                }
            }

            MultiMapRequest::RemoveKey { key } => {
                let removed = self.map.remove(&key).unwrap_or_default();
                MultiMapResponse::Values(removed)
            }

            MultiMapRequest::RemoveEntry { key, value } => {
                let Some(bag) = self.map.get_mut(&key) else {
                    return MultiMapResponse::Bool(false);
                };
                let Some(at) = bag.iter().position(|v| *v == value) else {
                    return MultiMapResponse::Bool(false);
                };
                bag.remove(at);
                if bag.is_empty() {
                    self.map.remove(&key);
                }
                MultiMapResponse::Bool(true)
            }

            MultiMapRequest::Get { key } => {
                MultiMapResponse::Values(self.map.get(&key).cloned().unwrap_or_default())
            }

            MultiMapRequest::Keys => MultiMapResponse::Keys(self.map.keys().cloned().collect()),

            MultiMapRequest::Values => MultiMapResponse::Values(
                self.map.values().flat_map(|bag| bag.iter().cloned()).collect(),
            ),

            MultiMapRequest::Entries => MultiMapResponse::Entries(
                self.map
                    .iter()
                    .flat_map(|(k, bag)| bag.iter().map(move |v| (k.clone(), v.clone())))
                    .collect(),
            ),

            MultiMapRequest::Size => {
                MultiMapResponse::Size(self.map.values().map(Vec::len).sum::<usize>() as u64)
            }

            MultiMapRequest::IsEmpty => MultiMapResponse::Bool(self.map.is_empty()),

            MultiMapRequest::Clear => {
                self.map.clear();
                MultiMapResponse::Done
            }

            MultiMapRequest::ContainsKey { key } => {
                MultiMapResponse::Bool(self.map.contains_key(&key))
            }

            MultiMapRequest::ContainsValue { value } => MultiMapResponse::Bool(
                self.map.values().any(|bag| bag.contains(&value)),
            ),

            MultiMapRequest::ContainsEntry { key, value } => MultiMapResponse::Bool(
                self.map.get(&key).is_some_and(|bag| bag.contains(&value)),
            ),
        }
    }
}

impl ResourceStateMachine for MultiMapState {
    fn apply(
        &mut self,
        commit: Commit<Bytes>,
        _ctx: &mut MachineContext<'_>,
    ) -> Result<Bytes, ErrorCode> {
        let Ok(request) = decode_payload::<MultiMapRequest>(commit.operation()) else {
            commit.close();
            return Err(ErrorCode::InvalidArgument);
        };
        // No multimap operation retains state beyond the value copies, so
        // every commit closes here.
        commit.close();
        let response = self.handle(request);
        encode_payload(&response).map_err(|_| ErrorCode::Internal)
    }

    fn configure(&mut self, config: &ResourceConfig) {
        self.order = Order::from_config(config);
    }

    fn delete(&mut self, _ctx: &mut MachineContext<'_>) {
        self.map.clear();
    }

    fn snapshot(&self) -> Vec<u8> {
        bincode::serialize(&(&self.map, self.order)).expect("multimap snapshot must serialize")
    }
}

//! Property-bag configuration for clients and resources.
//!
//! Two kinds of configuration exist and must not be confused:
//!
//! - [`ClusterProperties`]: local bootstrap properties for one client
//!   process (seed addresses, qualified `serializer.*` / `transport.*`
//!   options). Never replicated.
//! - [`ResourceConfig`]: the replicated per-resource configuration
//!   submitted through a `Configure` envelope and applied on every
//!   replica's state machine (e.g. a multimap's value ordering).
//!
//! # Recognized bootstrap keys
//!
//! | Key | Meaning |
//! |---|---|
//! | `cluster.seed` | comma-separated `host:port` seed list |
//! | `serializer.*` | qualified serializer options |
//! | `transport.*` | qualified transport options |

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Bootstrap property key for the seed list.
pub const SEED_KEY: &str = "cluster.seed";

/// Qualification prefix for serializer options.
pub const SERIALIZER_PREFIX: &str = "serializer";

/// Qualification prefix for transport options.
pub const TRANSPORT_PREFIX: &str = "transport";

/// A `host:port` cluster member address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::Config(format!("malformed address: {s}")))?;
        if host.is_empty() {
            return Err(Error::Config(format!("malformed address: {s}")));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| Error::Config(format!("invalid port number: {port}")))?;
        Ok(Address::new(host, port))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Local bootstrap properties for one client process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterProperties {
    properties: BTreeMap<String, String>,
}

impl ClusterProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from key/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            properties: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Set a property, returning self for chaining.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Look up a raw property.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Parse the `cluster.seed` list.
    ///
    /// Fails with a configuration error naming the offending entry when an
    /// address is malformed or carries a bad port.
    pub fn seeds(&self) -> Result<Vec<Address>> {
        let raw = self
            .get(SEED_KEY)
            .ok_or_else(|| Error::Config(format!("missing property: {SEED_KEY}")))?;
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Address::from_str)
            .collect()
    }

    /// The qualified sub-view for a prefix, with the prefix stripped.
    ///
    /// `scoped("serializer")` returns every `serializer.x` property as `x`.
    pub fn scoped(&self, prefix: &str) -> BTreeMap<String, String> {
        let qualified = format!("{prefix}.");
        self.properties
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(&qualified)
                    .map(|rest| (rest.to_string(), v.clone()))
            })
            .collect()
    }
}

/// Replicated per-resource configuration.
///
/// Applied through a `Configure` envelope on every replica; affects the
/// resource from the perspective of all clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    entries: BTreeMap<String, String>,
}

impl ResourceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an entry, returning self for chaining.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Look up an entry.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//! Cluster membership glue for clients.
//!
//! Clients bootstrap from a `cluster.seed` list: each address is tried in
//! order with the connect retry policy until one yields a live session.
//! The transport is an external collaborator consumed through the
//! [`Connector`] seam; the embedded cluster in [`crate::local`] provides
//! one for in-process use.

use std::sync::Arc;

use async_trait::async_trait;
use backon::Retryable;
use uuid::Uuid;

use crate::client::retry;
use crate::client::session::RaftSession;
use crate::config::{Address, ClusterProperties};
use crate::error::{Error, Result};

/// Opens sessions against one cluster member address.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &Address) -> Result<Arc<dyn RaftSession>>;
}

/// A client bootstrapped from seed properties.
pub struct QuorateClient {
    client_id: Uuid,
    seeds: Vec<Address>,
    connector: Arc<dyn Connector>,
}

impl std::fmt::Debug for QuorateClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuorateClient")
            .field("client_id", &self.client_id)
            .field("seeds", &self.seeds)
            .finish()
    }
}

impl QuorateClient {
    /// Build a client from bootstrap properties.
    ///
    /// Fails synchronously when the seed list is missing or malformed.
    pub fn new(properties: &ClusterProperties, connector: Arc<dyn Connector>) -> Result<Self> {
        let seeds = properties.seeds()?;
        if seeds.is_empty() {
            return Err(Error::Config("empty cluster.seed list".to_string()));
        }
        Ok(Self {
            client_id: Uuid::new_v4(),
            seeds,
            connector,
        })
    }

    /// This client instance's id.
    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    /// The parsed seed list.
    pub fn seeds(&self) -> &[Address] {
        &self.seeds
    }

    /// Open a session against the first reachable seed.
    pub async fn connect_session(&self) -> Result<Arc<dyn RaftSession>> {
        let attempt = || async {
            let mut last_error = Error::Unavailable;
            for address in &self.seeds {
                match self.connector.connect(address).await {
                    Ok(session) => {
                        tracing::debug!(client = %self.client_id, %address, "session opened");
                        return Ok(session);
                    }
                    Err(error) => {
                        tracing::debug!(%address, %error, "seed unreachable");
                        last_error = error;
                    }
                }
            }
            Err(last_error)
        };

        attempt
            .retry(retry::connect_policy())
            .when(Error::is_retriable)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SEED_KEY;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingConnector {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Connector for FailingConnector {
        async fn connect(&self, _address: &Address) -> Result<Arc<dyn RaftSession>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(Error::Io(std::io::ErrorKind::ConnectionRefused))
        }
    }

    #[test]
    fn test_rejects_missing_seed_list() {
        let connector = Arc::new(FailingConnector {
            attempts: AtomicUsize::new(0),
        });
        let err = QuorateClient::new(&ClusterProperties::new(), connector).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_parses_seed_list() {
        let connector = Arc::new(FailingConnector {
            attempts: AtomicUsize::new(0),
        });
        let properties = ClusterProperties::new().with(SEED_KEY, "a:5000,b:5001");
        let client = QuorateClient::new(&properties, connector).unwrap();
        assert_eq!(client.seeds().len(), 2);
    }

    #[tokio::test]
    async fn test_connect_tries_every_seed() {
        let connector = Arc::new(FailingConnector {
            attempts: AtomicUsize::new(0),
        });
        let properties = ClusterProperties::new().with(SEED_KEY, "a:5000,b:5001");
        let client = QuorateClient::new(&properties, Arc::clone(&connector) as Arc<dyn Connector>)
            .unwrap();

        let result = client.connect_session().await;
        assert!(result.is_err());
        // Io errors are not retriable, so exactly one pass over the seeds.
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
    }
}

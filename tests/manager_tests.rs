//! End-to-end tests for resource naming, ownership, and routing.

use std::sync::Arc;

use quorate::client::gateway::ResourceGateway;
use quorate::client::{DistributedMultiMap, DistributedValue, QuorateClient};
use quorate::config::ClusterProperties;
use quorate::error::Error;
use quorate::local::{LocalCluster, LocalConnector};
use quorate::resources::{task_queue_descriptor, value_descriptor};

#[tokio::test]
async fn test_concurrent_opens_resolve_to_one_resource() {
    let cluster = LocalCluster::new(3);

    let (a, b) = tokio::join!(
        async {
            let session = cluster.connect().await.unwrap();
            ResourceGateway::open(session, &value_descriptor(), "race").await.unwrap()
        },
        async {
            let session = cluster.connect().await.unwrap();
            ResourceGateway::open(session, &value_descriptor(), "race").await.unwrap()
        },
    );

    assert_eq!(a.resource_id(), b.resource_id());
}

#[tokio::test]
async fn test_key_bound_to_one_type() {
    let cluster = LocalCluster::new(3);

    let session = cluster.connect().await.unwrap();
    ResourceGateway::open(session, &value_descriptor(), "shared").await.unwrap();

    let session = cluster.connect().await.unwrap();
    let err = ResourceGateway::open(session, &task_queue_descriptor(), "shared")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TypeMismatch { key, .. } if key == "shared"));
}

#[tokio::test]
async fn test_empty_key_rejected_synchronously() {
    let cluster = LocalCluster::new(3);
    let session = cluster.connect().await.unwrap();
    let err = ResourceGateway::open(session, &value_descriptor(), "")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[tokio::test]
async fn test_distinct_keys_get_distinct_ids() {
    let cluster = LocalCluster::new(3);

    let session = cluster.connect().await.unwrap();
    let a = ResourceGateway::open(session, &value_descriptor(), "a").await.unwrap();
    let session = cluster.connect().await.unwrap();
    let b = ResourceGateway::open(session, &value_descriptor(), "b").await.unwrap();

    assert_ne!(a.resource_id(), b.resource_id());
}

#[tokio::test]
async fn test_find_does_not_create() {
    let cluster = LocalCluster::new(3);
    let session = cluster.connect().await.unwrap();

    let missing =
        ResourceGateway::find(session.as_ref(), &value_descriptor(), "ghost").await.unwrap();
    assert_eq!(missing, None);

    let created = ResourceGateway::open(session.clone(), &value_descriptor(), "ghost")
        .await
        .unwrap();
    let found = ResourceGateway::find(session.as_ref(), &value_descriptor(), "ghost").await.unwrap();
    assert_eq!(found, Some(created.resource_id()));
}

#[tokio::test]
async fn test_resource_survives_all_owners_closing() {
    let cluster = LocalCluster::new(3);

    {
        let session = cluster.connect().await.unwrap();
        let value = DistributedValue::<i32>::open(session, "persistent").await.unwrap();
        value.set(&42).await.unwrap();
        value.close().await.unwrap();
    }

    // A later client finds the state intact.
    let session = cluster.connect().await.unwrap();
    let value = DistributedValue::<i32>::open(session, "persistent").await.unwrap();
    assert_eq!(value.get().await.unwrap(), Some(42));
}

#[tokio::test]
async fn test_delete_frees_the_key() {
    let cluster = LocalCluster::new(3);

    let session = cluster.connect().await.unwrap();
    let value = DistributedValue::<i32>::open(session, "reborn").await.unwrap();
    value.set(&1).await.unwrap();
    value.delete().await.unwrap();

    // The key can be reused, even under a different type.
    let session = cluster.connect().await.unwrap();
    let map = DistributedMultiMap::<String>::open(session, "reborn").await.unwrap();
    map.put("k", &"v".to_string()).await.unwrap();
    assert_eq!(map.size().await.unwrap(), 1);
}

#[tokio::test]
async fn test_operations_after_close_fail_locally() {
    let cluster = LocalCluster::new(3);
    let session = cluster.connect().await.unwrap();
    let value = DistributedValue::<i32>::open(session, "v").await.unwrap();

    value.close().await.unwrap();
    let err = value.set(&1).await.unwrap_err();
    assert!(matches!(err, Error::IllegalState(_)));
}

#[tokio::test]
async fn test_bootstrap_through_seed_properties() {
    let cluster = LocalCluster::new(3);
    let properties = ClusterProperties::new().with("cluster.seed", "node-1:5000,node-2:5000");
    let connector = Arc::new(LocalConnector::new(cluster.clone()));
    let client = QuorateClient::new(&properties, connector).unwrap();

    let session = client.connect_session().await.unwrap();
    let value = DistributedValue::<i32>::open(session, "boot").await.unwrap();
    value.set(&1).await.unwrap();
    assert_eq!(value.get().await.unwrap(), Some(1));
}

#[tokio::test]
async fn test_session_expiry_releases_ownership() {
    let cluster = LocalCluster::new(3);

    let session = cluster.connect().await.unwrap();
    let doomed = DistributedValue::<i32>::open(session.clone(), "v").await.unwrap();
    doomed.set(&9).await.unwrap();

    use quorate::client::RaftSession;
    cluster.expire_session(session.session_id());

    // The expired handle fails; the state survives for others.
    assert!(matches!(doomed.get().await, Err(Error::SessionExpired)));

    let session = cluster.connect().await.unwrap();
    let fresh = DistributedValue::<i32>::open(session, "v").await.unwrap();
    assert_eq!(fresh.get().await.unwrap(), Some(9));

    assert_eq!(cluster.leaked_commits(), 0);
}

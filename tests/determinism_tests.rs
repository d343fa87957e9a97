//! Replay determinism tests.
//!
//! Replaying a cluster's log on a fresh host must reproduce the live
//! host's logical state byte for byte, including timer-driven effects.

use std::time::Duration;

use quorate::client::{DistributedMultiMap, DistributedTaskQueue, DistributedValue, RaftSession};
use quorate::local::LocalCluster;
use quorate::resources::multimap::Order;

#[tokio::test]
async fn test_value_workload_replays_identically() {
    let cluster = LocalCluster::new(3);
    let session = cluster.connect().await.unwrap();
    let value = DistributedValue::<i64>::open(session, "v").await.unwrap();

    for i in 0..10 {
        value.set(&i).await.unwrap();
    }
    value.compare_and_set(Some(&9), Some(&100)).await.unwrap();

    assert!(cluster.replay_matches_live());
}

#[tokio::test]
async fn test_ttl_eviction_replays_identically() {
    let cluster = LocalCluster::new(3);
    let session = cluster.connect().await.unwrap();
    let value = DistributedValue::<i64>::open(session, "v").await.unwrap();

    value
        .set_with_ttl(&1, Duration::from_millis(100))
        .await
        .unwrap();
    cluster.advance(50);
    value
        .set_with_ttl(&2, Duration::from_millis(100))
        .await
        .unwrap();
    cluster.advance(500);
    assert_eq!(value.get().await.unwrap(), None);

    assert!(cluster.replay_matches_live());
}

#[tokio::test]
async fn test_multimap_workload_replays_identically() {
    let cluster = LocalCluster::new(3);
    let session = cluster.connect().await.unwrap();
    let map = DistributedMultiMap::<String>::open(session, "m").await.unwrap();
    map.configure_order(Order::Natural).await.unwrap();

    for (k, v) in [("b", "2"), ("a", "9"), ("a", "1"), ("c", "5")] {
        map.put(k, &v.to_string()).await.unwrap();
    }
    map.remove_entry("a", &"9".to_string()).await.unwrap();

    assert!(cluster.replay_matches_live());
}

#[tokio::test]
async fn test_queue_with_session_loss_replays_identically() {
    let cluster = LocalCluster::new(3);

    let consumer_session = cluster.connect().await.unwrap();
    let consumer_id = consumer_session.session_id();
    let consumer: DistributedTaskQueue<String> =
        DistributedTaskQueue::open(consumer_session, "q").await.unwrap();
    consumer.consumer(|_task| {}).await.unwrap();

    let submitter_session = cluster.connect().await.unwrap();
    let submitter: DistributedTaskQueue<String> =
        DistributedTaskQueue::open(submitter_session, "q").await.unwrap();
    let submitter = submitter.async_mode();

    for i in 0..3 {
        submitter.submit(&format!("t{i}")).await.unwrap();
    }

    // Lose the consumer mid-stream; its in-flight task requeues.
    cluster.expire_session(consumer_id);

    assert!(cluster.replay_matches_live());
}

#[tokio::test]
async fn test_mixed_workload_replays_identically() {
    let cluster = LocalCluster::new(3);

    let session = cluster.connect().await.unwrap();
    let value = DistributedValue::<i64>::open(session, "v").await.unwrap();
    let session = cluster.connect().await.unwrap();
    let map = DistributedMultiMap::<String>::open(session, "m").await.unwrap();

    value.set(&1).await.unwrap();
    map.put("k", &"v".to_string()).await.unwrap();
    value
        .set_with_ttl(&2, Duration::from_millis(10))
        .await
        .unwrap();
    cluster.advance(100);
    map.clear().await.unwrap();
    value.delete().await.unwrap();

    assert!(cluster.replay_matches_live());
}

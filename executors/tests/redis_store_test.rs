use fixtures::*;

use std::time::Duration;

use alloy::primitives::Bytes;
use chrono::Utc;
use txqueue_executors::{
    eoa::{
        LaneKey, RedisTransactionStore, TransactionRecord, TransactionStatus, TransactionStore,
        TransactionStoreError,
    },
    redis::{self, AsyncCommands, aio::ConnectionManager},
};

// Run with REDIS_URL=redis://127.0.0.1:6379/ to include these tests.
async fn redis_store() -> Option<RedisTransactionStore> {
    let Ok(url) = std::env::var("REDIS_URL") else {
        println!("REDIS_URL not set, skipping");
        return None;
    };
    setup_tracing();

    let client = redis::Client::open(url.as_str()).unwrap();
    let connection = client.get_connection_manager().await.unwrap();
    let namespace = format!("test_{}", uuid::Uuid::new_v4().simple());
    Some(RedisTransactionStore::new(connection, Some(namespace)))
}

async fn cleanup_redis_keys(conn_manager: &ConnectionManager, namespace: &str) {
    let mut conn = conn_manager.clone();
    let keys_pattern = format!("{namespace}:txqueue:*");

    let keys: Vec<String> = redis::cmd("KEYS")
        .arg(&keys_pattern)
        .query_async(&mut conn)
        .await
        .unwrap_or_default();
    if !keys.is_empty() {
        redis::cmd("DEL")
            .arg(keys)
            .query_async::<()>(&mut conn)
            .await
            .unwrap_or_default();
    }
}

async fn cleanup(store: &RedisTransactionStore) {
    let namespace = store.keys.namespace.clone().unwrap_or_default();
    cleanup_redis_keys(&store.redis, &namespace).await;
}

fn queued(queue_id: &str) -> TransactionRecord {
    TransactionRecord::from_intent(
        queue_id.to_string(),
        &transfer_intent(DEV_WALLET),
        Bytes::from_static(&[0xa9, 0x05, 0x9c, 0xbb]),
        Utc::now(),
    )
}

fn lane() -> LaneKey {
    LaneKey::new(DEV_WALLET, CHAIN_ID)
}

#[tokio::test]
async fn swaps_move_records_between_lane_indexes() {
    let Some(store) = redis_store().await else {
        return;
    };

    let record = queued("a");
    store.insert(&record).await.unwrap();
    store.insert(&queued("b")).await.unwrap();
    assert_eq!(
        store.insert(&record).await,
        Err(TransactionStoreError::DuplicateQueueId {
            queue_id: "a".to_string()
        })
    );

    let ids: Vec<String> = store
        .queued_transactions(lane(), 10)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.queue_id)
        .collect();
    assert_eq!(ids, vec!["a", "b"]);

    let mut submitted = record.clone();
    submitted.status = TransactionStatus::Submitted;
    submitted.submitted_tx_nonce = Some(START_NONCE);
    let written = store.compare_and_swap(&record, submitted).await.unwrap();
    assert_eq!(written.version, 1);
    assert_eq!(store.get("a").await.unwrap(), Some(written));

    let mut cancelled = record.clone();
    cancelled.status = TransactionStatus::Cancelled;
    assert!(
        store
            .compare_and_swap(&record, cancelled)
            .await
            .unwrap_err()
            .is_conflict()
    );

    assert_eq!(store.highest_nonce(lane()).await.unwrap(), Some(START_NONCE));
    assert_eq!(store.queued_transactions(lane(), 10).await.unwrap().len(), 1);
    let submitted = store.submitted_transactions(lane()).await.unwrap();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].queue_id, "a");

    cleanup(&store).await;
}

#[tokio::test]
async fn lane_lease_is_exclusive_and_renewable() {
    let Some(store) = redis_store().await else {
        return;
    };
    let ttl = Duration::from_secs(30);

    assert!(store.acquire_lane(lane(), "w1", ttl).await.unwrap());
    assert!(!store.acquire_lane(lane(), "w1", ttl).await.unwrap());
    assert!(!store.acquire_lane(lane(), "w2", ttl).await.unwrap());

    assert!(!store.renew_lane(lane(), "w2", ttl).await.unwrap());
    assert!(store.renew_lane(lane(), "w1", ttl).await.unwrap());

    store.release_lane(lane(), "w2").await.unwrap();
    assert!(!store.acquire_lane(lane(), "w2", ttl).await.unwrap());

    store.release_lane(lane(), "w1").await.unwrap();
    assert!(store.acquire_lane(lane(), "w2", ttl).await.unwrap());

    cleanup(&store).await;
}

#[tokio::test]
async fn expired_lease_cannot_be_renewed() {
    let Some(store) = redis_store().await else {
        return;
    };

    assert!(
        store
            .acquire_lane(lane(), "w1", Duration::from_millis(100))
            .await
            .unwrap()
    );
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert!(
        !store
            .renew_lane(lane(), "w1", Duration::from_secs(30))
            .await
            .unwrap()
    );
    assert!(
        store
            .acquire_lane(lane(), "w2", Duration::from_secs(30))
            .await
            .unwrap()
    );

    cleanup(&store).await;
}

#[tokio::test]
async fn drained_lanes_are_pruned() {
    let Some(store) = redis_store().await else {
        return;
    };
    let lanes_set = store.keys.lanes_set_name(CHAIN_ID);
    let mut conn = store.redis.clone();

    let record = queued("a");
    store.insert(&record).await.unwrap();
    assert_eq!(store.active_lanes(CHAIN_ID).await.unwrap(), vec![lane()]);

    let mut cancelled = record.clone();
    cancelled.status = TransactionStatus::Cancelled;
    store.compare_and_swap(&record, cancelled).await.unwrap();

    assert!(store.active_lanes(CHAIN_ID).await.unwrap().is_empty());
    let members: Vec<String> = conn.smembers(&lanes_set).await.unwrap();
    assert!(members.is_empty());

    store.insert(&queued("b")).await.unwrap();
    assert_eq!(store.active_lanes(CHAIN_ID).await.unwrap(), vec![lane()]);

    cleanup(&store).await;
}

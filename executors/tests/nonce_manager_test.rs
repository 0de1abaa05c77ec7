use fixtures::*;

use chrono::Utc;
use txqueue_core::chain::ChainSettings;
use txqueue_executors::eoa::{
    InMemoryTransactionStore, LaneKey, NonceManager, TransactionRecord, TransactionStatus,
    TransactionStore,
};

fn lane() -> LaneKey {
    LaneKey::new(DEV_WALLET, CHAIN_ID)
}

fn chain() -> MockChain {
    MockChain::new(ChainSettings::new(CHAIN_ID), START_NONCE)
}

#[tokio::test]
async fn seeds_from_the_pending_count_and_counts_up() {
    let chain = chain();
    let store = InMemoryTransactionStore::new();
    let nonces = NonceManager::new();

    assert_eq!(nonces.peek(lane()).await, None);
    for expected in START_NONCE..START_NONCE + 3 {
        assert_eq!(nonces.allocate(&chain, &store, lane()).await.unwrap(), expected);
    }
    assert_eq!(nonces.peek(lane()).await, Some(START_NONCE + 3));

    // the chain is only asked once
    chain.state().pending_count = 0;
    assert_eq!(
        nonces.allocate(&chain, &store, lane()).await.unwrap(),
        START_NONCE + 3
    );
}

#[tokio::test]
async fn lanes_are_independent() {
    let chain = chain();
    let store = InMemoryTransactionStore::new();
    let nonces = NonceManager::new();
    let other = LaneKey::new(SCENARIO_WALLET, CHAIN_ID);

    assert_eq!(nonces.allocate(&chain, &store, lane()).await.unwrap(), START_NONCE);
    assert_eq!(nonces.allocate(&chain, &store, lane()).await.unwrap(), START_NONCE + 1);
    assert_eq!(nonces.allocate(&chain, &store, other).await.unwrap(), START_NONCE);
}

#[tokio::test]
async fn recorded_nonces_are_a_floor() {
    let chain = chain();
    let store = InMemoryTransactionStore::new();
    let nonces = NonceManager::new();

    let record = TransactionRecord::from_intent(
        "recorded".to_string(),
        &transfer_intent(DEV_WALLET),
        Default::default(),
        Utc::now(),
    );
    store.insert(&record).await.unwrap();
    let mut submitted = record.clone();
    submitted.status = TransactionStatus::Submitted;
    submitted.submitted_tx_nonce = Some(600);
    store.compare_and_swap(&record, submitted).await.unwrap();

    assert_eq!(nonces.allocate(&chain, &store, lane()).await.unwrap(), 601);
}

#[tokio::test]
async fn recycled_nonces_are_reused_lowest_first() {
    let chain = chain();
    let store = InMemoryTransactionStore::new();
    let nonces = NonceManager::new();

    let allocated: Vec<u64> = {
        let mut allocated = Vec::new();
        for _ in 0..4 {
            allocated.push(nonces.allocate(&chain, &store, lane()).await.unwrap());
        }
        allocated
    };
    assert_eq!(allocated, vec![562, 563, 564, 565]);

    nonces.recycle(lane(), 564).await;
    nonces.recycle(lane(), 563).await;

    assert_eq!(nonces.allocate(&chain, &store, lane()).await.unwrap(), 563);
    assert_eq!(nonces.allocate(&chain, &store, lane()).await.unwrap(), 564);
    assert_eq!(nonces.allocate(&chain, &store, lane()).await.unwrap(), 566);
}

#[tokio::test]
async fn recycling_the_latest_nonce_rolls_back() {
    let chain = chain();
    let store = InMemoryTransactionStore::new();
    let nonces = NonceManager::new();

    for _ in 0..3 {
        nonces.allocate(&chain, &store, lane()).await.unwrap();
    }
    nonces.recycle(lane(), 563).await;
    nonces.recycle(lane(), 564).await;

    // 564 rolled the mark back and absorbed 563, no holes are left behind
    assert_eq!(nonces.peek(lane()).await, Some(563));
    assert_eq!(nonces.allocate(&chain, &store, lane()).await.unwrap(), 563);
    assert_eq!(nonces.allocate(&chain, &store, lane()).await.unwrap(), 564);
}

#[tokio::test]
async fn reconcile_follows_the_chain_and_drops_stale_recycled_nonces() {
    let chain = chain();
    let store = InMemoryTransactionStore::new();
    let nonces = NonceManager::new();

    for _ in 0..4 {
        nonces.allocate(&chain, &store, lane()).await.unwrap();
    }
    nonces.recycle(lane(), 562).await;

    chain.consume_nonces_externally(570);
    assert_eq!(nonces.reconcile(&chain, &store, lane()).await.unwrap(), 570);

    // 562 was used by someone else meanwhile
    assert_eq!(nonces.allocate(&chain, &store, lane()).await.unwrap(), 570);
}

#[tokio::test]
async fn concurrent_allocations_never_collide() {
    let chain = chain();
    let store = InMemoryTransactionStore::new();
    let nonces = std::sync::Arc::new(NonceManager::new());

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let chain = chain.clone();
            let store = store.clone();
            let nonces = nonces.clone();
            tokio::spawn(async move { nonces.allocate(&chain, &store, lane()).await.unwrap() })
        })
        .collect();

    let mut allocated = Vec::new();
    for handle in handles {
        allocated.push(handle.await.unwrap());
    }
    allocated.sort_unstable();

    let expected: Vec<u64> = (START_NONCE..START_NONCE + 20).collect();
    assert_eq!(allocated, expected);
}

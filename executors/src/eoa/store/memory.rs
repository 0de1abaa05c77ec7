use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
    time::Duration,
};

use tokio::{sync::Mutex, time::Instant};

use super::{
    LaneKey, TransactionRecord, TransactionStatus, TransactionStore, TransactionStoreError,
    prepare_swap,
};

#[derive(Default)]
struct Inner {
    records: HashMap<String, TransactionRecord>,
    /// Enqueue sequence per queue id, for FIFO ordering within a lane
    sequence: HashMap<String, u64>,
    next_sequence: u64,
    highest_nonce: HashMap<LaneKey, u64>,
    leases: HashMap<LaneKey, (String, Instant)>,
}

/// Process-local record store. Same semantics as the Redis store, nothing survives a restart.
#[derive(Clone, Default)]
pub struct InMemoryTransactionStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lane_records<'a>(
        inner: &'a Inner,
        lane: LaneKey,
        status: TransactionStatus,
    ) -> impl Iterator<Item = &'a TransactionRecord> {
        inner
            .records
            .values()
            .filter(move |record| record.status == status && record.lane() == lane)
    }
}

impl TransactionStore for InMemoryTransactionStore {
    async fn insert(&self, record: &TransactionRecord) -> Result<(), TransactionStoreError> {
        let mut inner = self.inner.lock().await;
        if inner.records.contains_key(&record.queue_id) {
            return Err(TransactionStoreError::DuplicateQueueId {
                queue_id: record.queue_id.clone(),
            });
        }

        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.sequence.insert(record.queue_id.clone(), sequence);
        inner
            .records
            .insert(record.queue_id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, queue_id: &str) -> Result<Option<TransactionRecord>, TransactionStoreError> {
        Ok(self.inner.lock().await.records.get(queue_id).cloned())
    }

    async fn compare_and_swap(
        &self,
        current: &TransactionRecord,
        next: TransactionRecord,
    ) -> Result<TransactionRecord, TransactionStoreError> {
        let mut inner = self.inner.lock().await;
        let stored = inner.records.get(&current.queue_id).ok_or_else(|| {
            TransactionStoreError::TransactionNotFound {
                queue_id: current.queue_id.clone(),
            }
        })?;

        let written = prepare_swap(stored, current, next)?;

        if let Some(nonce) = written.submitted_tx_nonce {
            let highest = inner.highest_nonce.entry(written.lane()).or_insert(nonce);
            *highest = (*highest).max(nonce);
        }
        inner
            .records
            .insert(written.queue_id.clone(), written.clone());
        Ok(written)
    }

    async fn queued_transactions(
        &self,
        lane: LaneKey,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>, TransactionStoreError> {
        let inner = self.inner.lock().await;
        let mut queued: Vec<(u64, TransactionRecord)> =
            Self::lane_records(&inner, lane, TransactionStatus::Queued)
                .map(|record| {
                    let sequence = inner
                        .sequence
                        .get(&record.queue_id)
                        .copied()
                        .unwrap_or(u64::MAX);
                    (sequence, record.clone())
                })
                .collect();

        queued.sort_by_key(|(sequence, _)| *sequence);
        Ok(queued
            .into_iter()
            .take(limit)
            .map(|(_, record)| record)
            .collect())
    }

    async fn submitted_transactions(
        &self,
        lane: LaneKey,
    ) -> Result<Vec<TransactionRecord>, TransactionStoreError> {
        let inner = self.inner.lock().await;
        let mut submitted: Vec<TransactionRecord> =
            Self::lane_records(&inner, lane, TransactionStatus::Submitted)
                .cloned()
                .collect();

        submitted.sort_by_key(|record| record.submitted_tx_nonce);
        Ok(submitted)
    }

    async fn active_lanes(&self, chain_id: u64) -> Result<Vec<LaneKey>, TransactionStoreError> {
        let inner = self.inner.lock().await;
        let lanes: BTreeSet<LaneKey> = inner
            .records
            .values()
            .filter(|record| record.chain_id == chain_id && !record.status.is_terminal())
            .map(TransactionRecord::lane)
            .collect();

        Ok(lanes.into_iter().collect())
    }

    async fn highest_nonce(&self, lane: LaneKey) -> Result<Option<u64>, TransactionStoreError> {
        Ok(self.inner.lock().await.highest_nonce.get(&lane).copied())
    }

    async fn acquire_lane(
        &self,
        lane: LaneKey,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, TransactionStoreError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        match inner.leases.get(&lane) {
            Some((_, expires_at)) if *expires_at > now => Ok(false),
            _ => {
                inner.leases.insert(lane, (owner.to_string(), now + ttl));
                Ok(true)
            }
        }
    }

    async fn renew_lane(
        &self,
        lane: LaneKey,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, TransactionStoreError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        match inner.leases.get_mut(&lane) {
            Some((holder, expires_at)) if holder == owner && *expires_at > now => {
                *expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_lane(&self, lane: LaneKey, owner: &str) -> Result<(), TransactionStoreError> {
        let mut inner = self.inner.lock().await;
        if inner
            .leases
            .get(&lane)
            .is_some_and(|(holder, _)| holder == owner)
        {
            inner.leases.remove(&lane);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eoa::store::NON_EXTENSION;
    use alloy::primitives::{Address, Bytes, U256, address};
    use chrono::Utc;
    use txqueue_core::transaction::TxType;

    const WALLET: Address = address!("1946267d81Fb8aDeeEa28e6B98bcD446c8248473");

    fn queued(queue_id: &str) -> TransactionRecord {
        TransactionRecord {
            queue_id: queue_id.to_string(),
            wallet_address: WALLET,
            contract_address: Some(address!("365b83D67D5539C6583b9c0266A548926Bf216F4")),
            chain_id: 80001,
            status: TransactionStatus::Queued,
            encoded_input_data: Bytes::from_static(&[0xa9, 0x05, 0x9c, 0xbb]),
            function_name: Some("transfer".to_string()),
            function_args: None,
            extension: NON_EXTENSION.to_string(),
            value: U256::ZERO,
            tx_type: TxType::Eip1559,
            gas_price: None,
            max_priority_fee_per_gas: None,
            max_fee_per_gas: None,
            gas_limit: None,
            tx_hash: None,
            submitted_tx_nonce: None,
            created_timestamp: Utc::now(),
            tx_submitted_timestamp: None,
            tx_mined_timestamp: None,
            cancelled_timestamp: None,
            block_number: None,
            error_message: None,
            replaced_tx_hashes: Vec::new(),
            cancellation_tx_hash: None,
            submission_attempts: 0,
            gas_escalations: 0,
            next_attempt_at: None,
            last_broadcast_at: None,
            nonce_consumed_at: None,
            version: 0,
        }
    }

    fn lane() -> LaneKey {
        LaneKey::new(WALLET, 80001)
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = InMemoryTransactionStore::new();
        store.insert(&queued("a")).await.unwrap();

        assert_eq!(
            store.insert(&queued("a")).await,
            Err(TransactionStoreError::DuplicateQueueId {
                queue_id: "a".to_string()
            })
        );
    }

    #[tokio::test]
    async fn queued_transactions_come_back_in_enqueue_order() {
        let store = InMemoryTransactionStore::new();
        for id in ["c", "a", "b"] {
            store.insert(&queued(id)).await.unwrap();
        }

        let ids: Vec<String> = store
            .queued_transactions(lane(), 10)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.queue_id)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);

        assert_eq!(store.queued_transactions(lane(), 2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn second_writer_with_same_snapshot_loses() {
        let store = InMemoryTransactionStore::new();
        let record = queued("a");
        store.insert(&record).await.unwrap();

        let mut submitted = record.clone();
        submitted.status = TransactionStatus::Submitted;
        submitted.submitted_tx_nonce = Some(562);
        let written = store.compare_and_swap(&record, submitted).await.unwrap();
        assert_eq!(written.version, 1);

        let mut cancelled = record.clone();
        cancelled.status = TransactionStatus::Cancelled;
        let err = store.compare_and_swap(&record, cancelled).await.unwrap_err();
        assert!(err.is_conflict());

        assert_eq!(store.highest_nonce(lane()).await.unwrap(), Some(562));
        assert!(store.queued_transactions(lane(), 10).await.unwrap().is_empty());
        assert_eq!(store.submitted_transactions(lane()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn lease_is_exclusive_until_released() {
        let store = InMemoryTransactionStore::new();
        let ttl = Duration::from_secs(30);

        assert!(store.acquire_lane(lane(), "w1", ttl).await.unwrap());
        assert!(!store.acquire_lane(lane(), "w1", ttl).await.unwrap());
        assert!(!store.acquire_lane(lane(), "w2", ttl).await.unwrap());

        store.release_lane(lane(), "w2").await.unwrap();
        assert!(!store.acquire_lane(lane(), "w2", ttl).await.unwrap());

        store.release_lane(lane(), "w1").await.unwrap();
        assert!(store.acquire_lane(lane(), "w2", ttl).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lease_can_be_taken_over() {
        let store = InMemoryTransactionStore::new();
        assert!(
            store
                .acquire_lane(lane(), "w1", Duration::from_secs(5))
                .await
                .unwrap()
        );

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(
            store
                .acquire_lane(lane(), "w2", Duration::from_secs(5))
                .await
                .unwrap()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn only_the_live_holder_can_renew() {
        let store = InMemoryTransactionStore::new();
        let ttl = Duration::from_secs(5);
        assert!(store.acquire_lane(lane(), "w1", ttl).await.unwrap());

        assert!(!store.renew_lane(lane(), "w2", ttl).await.unwrap());

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(store.renew_lane(lane(), "w1", ttl).await.unwrap());

        // renewed at 4s, so still held at 8s
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(!store.acquire_lane(lane(), "w2", ttl).await.unwrap());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!store.renew_lane(lane(), "w1", ttl).await.unwrap());
        assert!(store.acquire_lane(lane(), "w2", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn terminal_records_leave_active_lanes() {
        let store = InMemoryTransactionStore::new();
        let record = queued("a");
        store.insert(&record).await.unwrap();
        assert_eq!(store.active_lanes(80001).await.unwrap(), vec![lane()]);

        let mut cancelled = record.clone();
        cancelled.status = TransactionStatus::Cancelled;
        store.compare_and_swap(&record, cancelled).await.unwrap();
        assert!(store.active_lanes(80001).await.unwrap().is_empty());
    }
}

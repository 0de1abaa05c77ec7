use std::time::Duration;

use alloy::primitives::Address;
use redis::{AsyncCommands, Pipeline, aio::ConnectionManager};

use super::{
    LaneKey, TransactionRecord, TransactionStatus, TransactionStore, TransactionStoreError,
    prepare_swap,
};

const MAX_RETRIES: u32 = 10;
const RETRY_BASE_DELAY_MS: u64 = 10;

const RELEASE_LANE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

const RENEW_LANE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

// Drops the wallet from the lane set once both of its indexes are empty. Runs atomically
// against inserts, which add to the queued index and the set in one transaction.
const LANE_ACTIVE_SCRIPT: &str = r#"
if redis.call('ZCARD', KEYS[1]) + redis.call('ZCARD', KEYS[2]) > 0 then
    return 1
end
redis.call('SREM', KEYS[3], ARGV[1])
return 0
"#;

/// A multi-key write that must apply atomically on top of the state it validated.
///
/// The keys returned by `watch_keys` are WATCHed before `validation` runs. If any of them
/// change before the pipeline built by `operation` executes, the whole thing is retried.
trait SafeRedisTransaction: Send + Sync {
    type ValidationData: Send;
    type OperationResult: Send;

    fn name(&self) -> &str;
    fn operation(
        &self,
        pipeline: &mut Pipeline,
        validation_data: Self::ValidationData,
    ) -> Self::OperationResult;
    fn validation(
        &self,
        conn: &mut ConnectionManager,
    ) -> impl Future<Output = Result<Self::ValidationData, TransactionStoreError>> + Send;
    fn watch_keys(&self) -> Vec<String>;
}

#[derive(Debug, Clone)]
pub struct TransactionStoreKeys {
    pub namespace: Option<String>,
}

impl TransactionStoreKeys {
    pub fn new(namespace: Option<String>) -> Self {
        Self { namespace }
    }

    fn prefixed(&self, suffix: String) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}:txqueue:{suffix}"),
            None => format!("txqueue:{suffix}"),
        }
    }

    /// JSON blob of a [`TransactionRecord`]
    pub fn transaction_data_key_name(&self, queue_id: &str) -> String {
        self.prefixed(format!("tx_data:{queue_id}"))
    }

    /// ZSET of queued ids for a lane, scored by enqueue sequence
    pub fn queued_zset_name(&self, lane: LaneKey) -> String {
        self.prefixed(format!("queued:{}:{}", lane.chain_id, lane.wallet))
    }

    /// ZSET of submitted ids for a lane, scored by nonce
    pub fn submitted_zset_name(&self, lane: LaneKey) -> String {
        self.prefixed(format!("submitted:{}:{}", lane.chain_id, lane.wallet))
    }

    /// SET of wallets with queued or submitted work on a chain, pruned lazily
    pub fn lanes_set_name(&self, chain_id: u64) -> String {
        self.prefixed(format!("lanes:{chain_id}"))
    }

    pub fn highest_nonce_key_name(&self, lane: LaneKey) -> String {
        self.prefixed(format!("max_nonce:{}:{}", lane.chain_id, lane.wallet))
    }

    pub fn lane_lock_key_name(&self, lane: LaneKey) -> String {
        self.prefixed(format!("lock:{}:{}", lane.chain_id, lane.wallet))
    }

    pub fn enqueue_sequence_key_name(&self) -> String {
        self.prefixed("enqueue_seq".to_string())
    }
}

/// Record store backed by Redis. Safe to share between processes.
#[derive(Clone)]
pub struct RedisTransactionStore {
    pub redis: ConnectionManager,
    pub keys: TransactionStoreKeys,
}

impl RedisTransactionStore {
    pub fn new(redis: ConnectionManager, namespace: Option<String>) -> Self {
        Self {
            redis,
            keys: TransactionStoreKeys::new(namespace),
        }
    }

    async fn execute_with_watch_and_retry<T: SafeRedisTransaction>(
        &self,
        safe_tx: &T,
    ) -> Result<T::OperationResult, TransactionStoreError> {
        let mut conn = self.redis.clone();
        let mut retry_count = 0;

        loop {
            if retry_count >= MAX_RETRIES {
                return Err(TransactionStoreError::InternalError {
                    message: format!(
                        "Exceeded max retries ({MAX_RETRIES}) for {}",
                        safe_tx.name()
                    ),
                });
            }

            if retry_count > 0 {
                let delay_ms = RETRY_BASE_DELAY_MS * (1 << (retry_count - 1).min(6));
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                tracing::debug!(
                    retry_count = retry_count,
                    delay_ms = delay_ms,
                    operation = safe_tx.name(),
                    "Retrying atomic operation"
                );
            }

            let mut watch_cmd = redis::cmd("WATCH");
            for key in safe_tx.watch_keys() {
                watch_cmd.arg(key);
            }
            let _: () = watch_cmd.query_async(&mut conn).await?;

            match safe_tx.validation(&mut conn).await {
                Ok(validation_data) => {
                    let mut pipeline = redis::pipe();
                    pipeline.atomic();
                    let result = safe_tx.operation(&mut pipeline, validation_data);

                    // EXEC replies nil when a watched key changed
                    let exec: Option<Vec<redis::Value>> = pipeline.query_async(&mut conn).await?;
                    match exec {
                        Some(_) => return Ok(result),
                        None => {
                            retry_count += 1;
                            continue;
                        }
                    }
                }
                Err(e) => {
                    let _: () = redis::cmd("UNWATCH").query_async(&mut conn).await?;
                    return Err(e);
                }
            }
        }
    }

    async fn load_many(
        &self,
        queue_ids: Vec<String>,
    ) -> Result<Vec<TransactionRecord>, TransactionStoreError> {
        if queue_ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = queue_ids
            .iter()
            .map(|id| self.keys.transaction_data_key_name(id))
            .collect();

        let mut conn = self.redis.clone();
        let blobs: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await?;

        let mut records = Vec::with_capacity(blobs.len());
        for (queue_id, blob) in queue_ids.iter().zip(blobs) {
            match blob {
                Some(json) => records.push(serde_json::from_str(&json)?),
                None => {
                    tracing::warn!(queue_id = queue_id, "Index references a missing record");
                }
            }
        }
        Ok(records)
    }
}

struct InsertTransaction<'a> {
    keys: &'a TransactionStoreKeys,
    record: &'a TransactionRecord,
    record_json: String,
    sequence: i64,
}

impl SafeRedisTransaction for InsertTransaction<'_> {
    type ValidationData = ();
    type OperationResult = ();

    fn name(&self) -> &str {
        "insert queued"
    }

    fn watch_keys(&self) -> Vec<String> {
        vec![self.keys.transaction_data_key_name(&self.record.queue_id)]
    }

    async fn validation(&self, conn: &mut ConnectionManager) -> Result<(), TransactionStoreError> {
        let exists: bool = conn
            .exists(self.keys.transaction_data_key_name(&self.record.queue_id))
            .await?;
        if exists {
            return Err(TransactionStoreError::DuplicateQueueId {
                queue_id: self.record.queue_id.clone(),
            });
        }
        Ok(())
    }

    fn operation(&self, pipeline: &mut Pipeline, _: ()) {
        let lane = self.record.lane();
        pipeline.set(
            self.keys.transaction_data_key_name(&self.record.queue_id),
            &self.record_json,
        );
        pipeline.zadd(
            self.keys.queued_zset_name(lane),
            &self.record.queue_id,
            self.sequence,
        );
        pipeline.sadd(
            self.keys.lanes_set_name(lane.chain_id),
            lane.wallet.to_string(),
        );
    }
}

struct CompareAndSwapTransaction<'a> {
    keys: &'a TransactionStoreKeys,
    current: &'a TransactionRecord,
    next: TransactionRecord,
}

struct SwapValidation {
    previous_status: TransactionStatus,
    written: TransactionRecord,
    written_json: String,
    raise_highest_nonce: Option<u64>,
}

impl SafeRedisTransaction for CompareAndSwapTransaction<'_> {
    type ValidationData = SwapValidation;
    type OperationResult = TransactionRecord;

    fn name(&self) -> &str {
        "compare and swap"
    }

    fn watch_keys(&self) -> Vec<String> {
        vec![
            self.keys.transaction_data_key_name(&self.current.queue_id),
            self.keys.highest_nonce_key_name(self.current.lane()),
        ]
    }

    async fn validation(
        &self,
        conn: &mut ConnectionManager,
    ) -> Result<SwapValidation, TransactionStoreError> {
        let stored: Option<String> = conn
            .get(self.keys.transaction_data_key_name(&self.current.queue_id))
            .await?;
        let stored: TransactionRecord = match stored {
            Some(json) => serde_json::from_str(&json)?,
            None => {
                return Err(TransactionStoreError::TransactionNotFound {
                    queue_id: self.current.queue_id.clone(),
                });
            }
        };

        let written = prepare_swap(&stored, self.current, self.next.clone())?;

        let raise_highest_nonce = match written.submitted_tx_nonce {
            Some(nonce) => {
                let highest: Option<u64> = conn
                    .get(self.keys.highest_nonce_key_name(written.lane()))
                    .await?;
                highest.is_none_or(|h| nonce > h).then_some(nonce)
            }
            None => None,
        };

        Ok(SwapValidation {
            previous_status: stored.status,
            written_json: serde_json::to_string(&written)?,
            written,
            raise_highest_nonce,
        })
    }

    fn operation(&self, pipeline: &mut Pipeline, data: SwapValidation) -> TransactionRecord {
        let written = data.written;
        let lane = written.lane();
        let queue_id = &written.queue_id;

        pipeline.set(
            self.keys.transaction_data_key_name(queue_id),
            &data.written_json,
        );

        if data.previous_status == TransactionStatus::Queued
            && written.status != TransactionStatus::Queued
        {
            pipeline.zrem(self.keys.queued_zset_name(lane), queue_id);
        }

        match (written.status, written.submitted_tx_nonce) {
            (TransactionStatus::Submitted, Some(nonce)) => {
                pipeline.zadd(self.keys.submitted_zset_name(lane), queue_id, nonce);
            }
            _ if data.previous_status == TransactionStatus::Submitted => {
                pipeline.zrem(self.keys.submitted_zset_name(lane), queue_id);
            }
            _ => {}
        }

        if let Some(nonce) = data.raise_highest_nonce {
            pipeline.set(self.keys.highest_nonce_key_name(lane), nonce);
        }

        written
    }
}

impl TransactionStore for RedisTransactionStore {
    async fn insert(&self, record: &TransactionRecord) -> Result<(), TransactionStoreError> {
        let mut conn = self.redis.clone();
        let sequence: i64 = conn
            .incr(self.keys.enqueue_sequence_key_name(), 1)
            .await?;

        self.execute_with_watch_and_retry(&InsertTransaction {
            keys: &self.keys,
            record,
            record_json: serde_json::to_string(record)?,
            sequence,
        })
        .await
    }

    async fn get(&self, queue_id: &str) -> Result<Option<TransactionRecord>, TransactionStoreError> {
        let mut conn = self.redis.clone();
        let json: Option<String> = conn
            .get(self.keys.transaction_data_key_name(queue_id))
            .await?;

        Ok(json.map(|json| serde_json::from_str(&json)).transpose()?)
    }

    async fn compare_and_swap(
        &self,
        current: &TransactionRecord,
        next: TransactionRecord,
    ) -> Result<TransactionRecord, TransactionStoreError> {
        self.execute_with_watch_and_retry(&CompareAndSwapTransaction {
            keys: &self.keys,
            current,
            next,
        })
        .await
    }

    async fn queued_transactions(
        &self,
        lane: LaneKey,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>, TransactionStoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.redis.clone();
        let ids: Vec<String> = conn
            .zrange(self.keys.queued_zset_name(lane), 0, limit as isize - 1)
            .await?;

        self.load_many(ids).await
    }

    async fn submitted_transactions(
        &self,
        lane: LaneKey,
    ) -> Result<Vec<TransactionRecord>, TransactionStoreError> {
        let mut conn = self.redis.clone();
        let ids: Vec<String> = conn
            .zrange(self.keys.submitted_zset_name(lane), 0, -1)
            .await?;

        self.load_many(ids).await
    }

    async fn active_lanes(&self, chain_id: u64) -> Result<Vec<LaneKey>, TransactionStoreError> {
        let mut conn = self.redis.clone();
        let lanes_set = self.keys.lanes_set_name(chain_id);
        let wallets: Vec<String> = conn.smembers(&lanes_set).await?;
        let script = redis::Script::new(LANE_ACTIVE_SCRIPT);

        let mut lanes = Vec::new();
        for raw in wallets {
            let Ok(wallet) = raw.parse::<Address>() else {
                tracing::warn!(chain_id = chain_id, wallet = raw, "Dropping malformed lane");
                let _: i64 = conn.srem(&lanes_set, &raw).await?;
                continue;
            };
            let lane = LaneKey::new(wallet, chain_id);

            let active: i64 = script
                .key(self.keys.queued_zset_name(lane))
                .key(self.keys.submitted_zset_name(lane))
                .key(&lanes_set)
                .arg(&raw)
                .invoke_async(&mut conn)
                .await?;

            if active == 1 {
                lanes.push(lane);
            } else {
                tracing::debug!(lane = %lane, "Pruned drained lane");
            }
        }

        lanes.sort();
        Ok(lanes)
    }

    async fn highest_nonce(&self, lane: LaneKey) -> Result<Option<u64>, TransactionStoreError> {
        let mut conn = self.redis.clone();
        Ok(conn.get(self.keys.highest_nonce_key_name(lane)).await?)
    }

    async fn acquire_lane(
        &self,
        lane: LaneKey,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, TransactionStoreError> {
        let mut conn = self.redis.clone();
        let key = self.keys.lane_lock_key_name(lane);
        let ttl_ms = ttl.as_millis() as u64;

        let acquired: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(owner)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(acquired.is_some())
    }

    async fn renew_lane(
        &self,
        lane: LaneKey,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, TransactionStoreError> {
        let renewed: i64 = redis::Script::new(RENEW_LANE_SCRIPT)
            .key(self.keys.lane_lock_key_name(lane))
            .arg(owner)
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut self.redis.clone())
            .await?;
        Ok(renewed == 1)
    }

    async fn release_lane(&self, lane: LaneKey, owner: &str) -> Result<(), TransactionStoreError> {
        let _: i64 = redis::Script::new(RELEASE_LANE_SCRIPT)
            .key(self.keys.lane_lock_key_name(lane))
            .arg(owner)
            .invoke_async(&mut self.redis.clone())
            .await?;
        Ok(())
    }
}

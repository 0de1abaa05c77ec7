use std::{fmt, future::Future, time::Duration};

use alloy::primitives::{Address, B256, Bytes, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use txqueue_core::{
    defs::{AddressDef, BytesDef, HashDef, U256Def},
    transaction::{GasQuote, TransactionIntent, TxType},
};

mod error;
mod memory;
mod redis_store;

pub use error::TransactionStoreError;
pub use memory::InMemoryTransactionStore;
pub use redis_store::{RedisTransactionStore, TransactionStoreKeys};

pub const NON_EXTENSION: &str = "non-extension";

/// Lifecycle of a queued transaction.
///
/// `queued -> submitted -> {mined | errored}`, `queued -> {cancelled | errored}` and
/// `submitted -> cancelled`. `submitted -> submitted` is a replacement at the same nonce.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Queued,
    Submitted,
    Mined,
    Errored,
    Cancelled,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Mined | TransactionStatus::Errored | TransactionStatus::Cancelled
        )
    }

    /// Whether a write moving a record from `self` to `next` is allowed.
    /// Same-state writes are bookkeeping (retries, replacements), not transitions.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;

        matches!(
            (self, next),
            (Queued, Queued | Submitted | Cancelled | Errored)
                | (Submitted, Submitted | Mined | Errored | Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Queued => "queued",
            TransactionStatus::Submitted => "submitted",
            TransactionStatus::Mined => "mined",
            TransactionStatus::Errored => "errored",
            TransactionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One nonce sequence: a wallet on a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LaneKey {
    pub chain_id: u64,
    pub wallet: Address,
}

impl LaneKey {
    pub fn new(wallet: Address, chain_id: u64) -> Self {
        Self { chain_id, wallet }
    }
}

impl fmt::Display for LaneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain_id, self.wallet)
    }
}

/// The durable record behind a `queueId`.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub queue_id: String,

    #[schema(value_type = AddressDef)]
    pub wallet_address: Address,
    #[schema(value_type = Option<AddressDef>)]
    pub contract_address: Option<Address>,
    #[serde_as(as = "DisplayFromStr")]
    #[schema(value_type = String, example = "80001")]
    pub chain_id: u64,

    pub status: TransactionStatus,

    #[schema(value_type = BytesDef)]
    pub encoded_input_data: Bytes,
    pub function_name: Option<String>,
    pub function_args: Option<String>,
    pub extension: String,
    #[schema(value_type = U256Def)]
    pub value: U256,

    #[schema(value_type = u8, example = 2)]
    pub tx_type: TxType,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[schema(value_type = Option<String>)]
    pub gas_price: Option<u128>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[schema(value_type = Option<String>)]
    pub max_priority_fee_per_gas: Option<u128>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[schema(value_type = Option<String>)]
    pub max_fee_per_gas: Option<u128>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[schema(value_type = Option<String>)]
    pub gas_limit: Option<u64>,

    #[schema(value_type = Option<HashDef>)]
    pub tx_hash: Option<B256>,
    pub submitted_tx_nonce: Option<u64>,

    pub created_timestamp: DateTime<Utc>,
    pub tx_submitted_timestamp: Option<DateTime<Utc>>,
    pub tx_mined_timestamp: Option<DateTime<Utc>>,
    pub cancelled_timestamp: Option<DateTime<Utc>>,
    pub block_number: Option<u64>,
    pub error_message: Option<String>,

    /// Hashes broadcast earlier at the same nonce and superseded by `txHash`.
    #[serde(default)]
    #[schema(value_type = Vec<HashDef>)]
    pub replaced_tx_hashes: Vec<B256>,
    /// The no-op replacement broadcast by a cancel request.
    #[schema(value_type = Option<HashDef>)]
    pub cancellation_tx_hash: Option<B256>,

    #[serde(default)]
    pub submission_attempts: u32,
    #[serde(default)]
    pub gas_escalations: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_broadcast_at: Option<DateTime<Utc>>,
    /// First time the watcher saw this nonce consumed without a receipt for any known hash.
    pub nonce_consumed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub version: u64,
}

impl TransactionRecord {
    /// A fresh `queued` record. Caller supplied gas values are stored as-is and take
    /// precedence over quotes at submission time.
    pub fn from_intent(
        queue_id: String,
        intent: &TransactionIntent,
        encoded_input_data: Bytes,
        created_timestamp: DateTime<Utc>,
    ) -> Self {
        let tx_type = intent.tx_type();
        let quote = intent.gas.quote(tx_type);

        Self {
            queue_id,
            wallet_address: intent.wallet_address,
            contract_address: intent.contract_address,
            chain_id: intent.chain_id,
            status: TransactionStatus::Queued,
            encoded_input_data,
            function_name: intent.function_name.clone(),
            function_args: (!intent.function_args.is_empty())
                .then(|| intent.function_args.join(",")),
            extension: intent
                .extension
                .clone()
                .unwrap_or_else(|| NON_EXTENSION.to_string()),
            value: intent.value,
            tx_type,
            gas_price: quote.and_then(|q| q.gas_price()),
            max_priority_fee_per_gas: quote.and_then(|q| q.max_priority_fee_per_gas()),
            max_fee_per_gas: quote.and_then(|q| q.max_fee_per_gas()),
            gas_limit: intent.gas.gas_limit,
            tx_hash: None,
            submitted_tx_nonce: None,
            created_timestamp,
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

    pub fn lane(&self) -> LaneKey {
        LaneKey::new(self.wallet_address, self.chain_id)
    }

    /// The fee bid recorded on this record, if complete for its transaction type.
    pub fn gas_quote(&self) -> Option<GasQuote> {
        if self.tx_type.is_eip1559() {
            match (self.max_fee_per_gas, self.max_priority_fee_per_gas) {
                (Some(max_fee_per_gas), Some(max_priority_fee_per_gas)) => Some(GasQuote::Eip1559 {
                    max_fee_per_gas,
                    max_priority_fee_per_gas,
                }),
                _ => None,
            }
        } else {
            self.gas_price.map(|gas_price| GasQuote::Legacy { gas_price })
        }
    }

    pub fn set_gas_quote(&mut self, quote: GasQuote) {
        self.gas_price = quote.gas_price();
        self.max_fee_per_gas = quote.max_fee_per_gas();
        self.max_priority_fee_per_gas = quote.max_priority_fee_per_gas();
    }

    /// Every hash that may have landed for this record's nonce.
    pub fn known_hashes(&self) -> Vec<B256> {
        self.tx_hash
            .iter()
            .chain(self.replaced_tx_hashes.iter())
            .chain(self.cancellation_tx_hash.iter())
            .copied()
            .collect()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.is_none_or(|at| at <= now)
    }
}

/// Durable storage of transaction records. Every write after `insert` is a compare-and-swap
/// against the copy the writer read.
pub trait TransactionStore: Send + Sync + 'static {
    /// Persists a new record. Fails on a duplicate `queueId`.
    fn insert(
        &self,
        record: &TransactionRecord,
    ) -> impl Future<Output = Result<(), TransactionStoreError>> + Send;

    fn get(
        &self,
        queue_id: &str,
    ) -> impl Future<Output = Result<Option<TransactionRecord>, TransactionStoreError>> + Send;

    /// Replaces `current` with `next` if the stored record still has `current`'s status and
    /// version. Returns the stored record, with its version bumped.
    fn compare_and_swap(
        &self,
        current: &TransactionRecord,
        next: TransactionRecord,
    ) -> impl Future<Output = Result<TransactionRecord, TransactionStoreError>> + Send;

    /// Queued records of a lane in enqueue order.
    fn queued_transactions(
        &self,
        lane: LaneKey,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<TransactionRecord>, TransactionStoreError>> + Send;

    /// Submitted records of a lane ordered by nonce.
    fn submitted_transactions(
        &self,
        lane: LaneKey,
    ) -> impl Future<Output = Result<Vec<TransactionRecord>, TransactionStoreError>> + Send;

    /// Lanes on a chain with queued or submitted work.
    fn active_lanes(
        &self,
        chain_id: u64,
    ) -> impl Future<Output = Result<Vec<LaneKey>, TransactionStoreError>> + Send;

    /// Highest nonce ever attached to a record of this lane.
    fn highest_nonce(
        &self,
        lane: LaneKey,
    ) -> impl Future<Output = Result<Option<u64>, TransactionStoreError>> + Send;

    /// Takes the lane lease for `owner` if nobody holds an unexpired one. A holder asking again
    /// is refused like anyone else, every pass uses its own owner token.
    fn acquire_lane(
        &self,
        lane: LaneKey,
        owner: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, TransactionStoreError>> + Send;

    /// Extends an unexpired lease held by `owner`. `false` means the lease was lost.
    fn renew_lane(
        &self,
        lane: LaneKey,
        owner: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, TransactionStoreError>> + Send;

    fn release_lane(
        &self,
        lane: LaneKey,
        owner: &str,
    ) -> impl Future<Output = Result<(), TransactionStoreError>> + Send;
}

/// Checks a proposed swap against the stored record and produces the record to write.
pub(crate) fn prepare_swap(
    stored: &TransactionRecord,
    current: &TransactionRecord,
    mut next: TransactionRecord,
) -> Result<TransactionRecord, TransactionStoreError> {
    if stored.status != current.status || stored.version != current.version {
        return Err(TransactionStoreError::StateConflict {
            queue_id: stored.queue_id.clone(),
            expected: current.status,
            actual: stored.status,
        });
    }

    if !stored.status.can_transition_to(next.status) {
        return Err(TransactionStoreError::InvalidTransition {
            queue_id: stored.queue_id.clone(),
            from: stored.status,
            to: next.status,
        });
    }

    let immutable_changed = if next.queue_id != stored.queue_id {
        Some("queueId")
    } else if next.wallet_address != stored.wallet_address || next.chain_id != stored.chain_id {
        Some("lane")
    } else if next.encoded_input_data != stored.encoded_input_data {
        Some("encodedInputData")
    } else if stored.submitted_tx_nonce.is_some()
        && next.submitted_tx_nonce != stored.submitted_tx_nonce
    {
        Some("submittedTxNonce")
    } else if next.created_timestamp != stored.created_timestamp {
        Some("createdTimestamp")
    } else {
        None
    };

    if let Some(field) = immutable_changed {
        return Err(TransactionStoreError::ImmutableFieldChanged {
            queue_id: stored.queue_id.clone(),
            field: field.to_string(),
        });
    }

    next.version = stored.version + 1;
    Ok(next)
}

/// Runtime choice between the durable Redis store and the in-memory one.
#[derive(Clone)]
pub enum TransactionStoreBackend {
    Redis(RedisTransactionStore),
    Memory(InMemoryTransactionStore),
}

impl TransactionStore for TransactionStoreBackend {
    async fn insert(&self, record: &TransactionRecord) -> Result<(), TransactionStoreError> {
        match self {
            Self::Redis(store) => store.insert(record).await,
            Self::Memory(store) => store.insert(record).await,
        }
    }

    async fn get(&self, queue_id: &str) -> Result<Option<TransactionRecord>, TransactionStoreError> {
        match self {
            Self::Redis(store) => store.get(queue_id).await,
            Self::Memory(store) => store.get(queue_id).await,
        }
    }

    async fn compare_and_swap(
        &self,
        current: &TransactionRecord,
        next: TransactionRecord,
    ) -> Result<TransactionRecord, TransactionStoreError> {
        match self {
            Self::Redis(store) => store.compare_and_swap(current, next).await,
            Self::Memory(store) => store.compare_and_swap(current, next).await,
        }
    }

    async fn queued_transactions(
        &self,
        lane: LaneKey,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>, TransactionStoreError> {
        match self {
            Self::Redis(store) => store.queued_transactions(lane, limit).await,
            Self::Memory(store) => store.queued_transactions(lane, limit).await,
        }
    }

    async fn submitted_transactions(
        &self,
        lane: LaneKey,
    ) -> Result<Vec<TransactionRecord>, TransactionStoreError> {
        match self {
            Self::Redis(store) => store.submitted_transactions(lane).await,
            Self::Memory(store) => store.submitted_transactions(lane).await,
        }
    }

    async fn active_lanes(&self, chain_id: u64) -> Result<Vec<LaneKey>, TransactionStoreError> {
        match self {
            Self::Redis(store) => store.active_lanes(chain_id).await,
            Self::Memory(store) => store.active_lanes(chain_id).await,
        }
    }

    async fn highest_nonce(&self, lane: LaneKey) -> Result<Option<u64>, TransactionStoreError> {
        match self {
            Self::Redis(store) => store.highest_nonce(lane).await,
            Self::Memory(store) => store.highest_nonce(lane).await,
        }
    }

    async fn acquire_lane(
        &self,
        lane: LaneKey,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, TransactionStoreError> {
        match self {
            Self::Redis(store) => store.acquire_lane(lane, owner, ttl).await,
            Self::Memory(store) => store.acquire_lane(lane, owner, ttl).await,
        }
    }

    async fn renew_lane(
        &self,
        lane: LaneKey,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, TransactionStoreError> {
        match self {
            Self::Redis(store) => store.renew_lane(lane, owner, ttl).await,
            Self::Memory(store) => store.renew_lane(lane, owner, ttl).await,
        }
    }

    async fn release_lane(&self, lane: LaneKey, owner: &str) -> Result<(), TransactionStoreError> {
        match self {
            Self::Redis(store) => store.release_lane(lane, owner).await,
            Self::Memory(store) => store.release_lane(lane, owner).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;
    use TransactionStatus::*;

    fn record() -> TransactionRecord {
        let intent: TransactionIntent = serde_json::from_value(serde_json::json!({
            "chainId": "80001",
            "walletAddress": "0x1946267d81Fb8aDeeEa28e6B98bcD446c8248473",
            "contractAddress": "0x365b83D67D5539C6583b9c0266A548926Bf216F4",
            "functionName": "transfer",
            "functionArgs": ["0x3EcDBF3B911d0e9052b64850693888b008e18373", "1000000"],
            "encodedInputData": "0xa9059cbb"
        }))
        .unwrap();

        TransactionRecord::from_intent(
            "queue-1".to_string(),
            &intent,
            intent.encoded_input_data.clone().unwrap(),
            Utc::now(),
        )
    }

    #[test]
    fn terminal_states_never_transition() {
        for terminal in [Mined, Errored, Cancelled] {
            for next in [Queued, Submitted, Mined, Errored, Cancelled] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn forward_transitions_are_allowed() {
        assert!(Queued.can_transition_to(Submitted));
        assert!(Queued.can_transition_to(Cancelled));
        assert!(Submitted.can_transition_to(Mined));
        assert!(Submitted.can_transition_to(Submitted));
        assert!(!Submitted.can_transition_to(Queued));
    }

    #[test]
    fn record_from_intent_matches_wire_shape() {
        let record = record();
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["status"], "queued");
        assert_eq!(json["chainId"], "80001");
        assert_eq!(json["extension"], NON_EXTENSION);
        assert_eq!(json["txType"], 2);
        assert_eq!(
            json["functionArgs"],
            "0x3EcDBF3B911d0e9052b64850693888b008e18373,1000000"
        );
        assert!(json["txHash"].is_null());
        assert!(json["submittedTxNonce"].is_null());
        assert_eq!(
            record.wallet_address,
            address!("1946267d81Fb8aDeeEa28e6B98bcD446c8248473")
        );
    }

    #[test]
    fn swap_rejects_stale_version() {
        let stored = record();
        let mut stale = stored.clone();
        stale.version = 3;

        let mut next = stored.clone();
        next.status = Cancelled;

        assert!(matches!(
            prepare_swap(&stored, &stale, next),
            Err(TransactionStoreError::StateConflict { .. })
        ));
    }

    #[test]
    fn swap_rejects_nonce_rewrite() {
        let mut stored = record();
        stored.status = Submitted;
        stored.submitted_tx_nonce = Some(562);

        let mut next = stored.clone();
        next.submitted_tx_nonce = Some(563);

        assert!(matches!(
            prepare_swap(&stored, &stored, next),
            Err(TransactionStoreError::ImmutableFieldChanged { .. })
        ));
    }

    #[test]
    fn swap_bumps_version() {
        let stored = record();
        let mut next = stored.clone();
        next.status = Submitted;
        next.submitted_tx_nonce = Some(0);

        let written = prepare_swap(&stored, &stored, next).unwrap();
        assert_eq!(written.version, stored.version + 1);
    }
}

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use tokio::sync::Mutex;
use txqueue_core::{chain::Chain, error::EngineError};

use crate::eoa::store::{LaneKey, TransactionStore};

#[derive(Debug, Default)]
struct NonceLane {
    /// Next fresh nonce to hand out, `None` until seeded from the chain
    next: Option<u64>,
    /// Allocated but never broadcast, reused lowest first
    recycled: BTreeSet<u64>,
}

/// Hands out nonces per (wallet, chain) lane.
///
/// Each lane has its own async mutex, so allocations within a lane are linearizable while lanes
/// never wait on each other. The high-water mark is seeded once from the chain's pending count and
/// then advanced locally; it is always floored at the highest nonce the store has recorded, which
/// keeps it correct after another process held the lane.
#[derive(Default)]
pub struct NonceManager {
    lanes: Mutex<HashMap<LaneKey, Arc<Mutex<NonceLane>>>>,
}

impl NonceManager {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lane(&self, key: LaneKey) -> Arc<Mutex<NonceLane>> {
        self.lanes.lock().await.entry(key).or_default().clone()
    }

    async fn recorded_floor<S: TransactionStore>(
        store: &S,
        key: LaneKey,
    ) -> Result<u64, EngineError> {
        Ok(store
            .highest_nonce(key)
            .await?
            .map(|nonce| nonce + 1)
            .unwrap_or(0))
    }

    pub async fn allocate<C: Chain, S: TransactionStore>(
        &self,
        chain: &C,
        store: &S,
        key: LaneKey,
    ) -> Result<u64, EngineError> {
        let lane = self.lane(key).await;
        let mut lane = lane.lock().await;

        if let Some(nonce) = lane.recycled.pop_first() {
            tracing::debug!(lane = %key, nonce = nonce, "Reusing recycled nonce");
            return Ok(nonce);
        }

        let recorded = Self::recorded_floor(store, key).await?;
        let next = match lane.next {
            Some(next) => next.max(recorded),
            None => {
                let pending = chain.get_pending_transaction_count(key.wallet).await?;
                tracing::debug!(
                    lane = %key,
                    pending = pending,
                    recorded = recorded,
                    "Seeded nonce high-water mark"
                );
                pending.max(recorded)
            }
        };

        lane.next = Some(next + 1);
        Ok(next)
    }

    /// Returns a nonce that was allocated but never reached the network.
    pub async fn recycle(&self, key: LaneKey, nonce: u64) {
        let lane = self.lane(key).await;
        let mut lane = lane.lock().await;

        if lane.next == Some(nonce + 1) {
            // the most recent allocation rolls the mark back instead of leaving a hole
            let mut next = nonce;
            while next > 0 && lane.recycled.remove(&(next - 1)) {
                next -= 1;
            }
            lane.next = Some(next);
        } else {
            lane.recycled.insert(nonce);
        }
        tracing::debug!(lane = %key, nonce = nonce, "Recycled nonce");
    }

    /// Re-derives the high-water mark from the chain and the store after a rejection that shows
    /// the local view drifted. Returns the new next nonce.
    pub async fn reconcile<C: Chain, S: TransactionStore>(
        &self,
        chain: &C,
        store: &S,
        key: LaneKey,
    ) -> Result<u64, EngineError> {
        let lane = self.lane(key).await;
        let mut lane = lane.lock().await;

        let onchain = chain.get_pending_transaction_count(key.wallet).await?;
        let recorded = Self::recorded_floor(store, key).await?;
        let floor = onchain.max(recorded);

        let dropped = lane.recycled.len();
        lane.recycled.retain(|nonce| *nonce >= onchain && *nonce < floor);
        let dropped = dropped - lane.recycled.len();

        tracing::info!(
            lane = %key,
            previous = ?lane.next,
            next = floor,
            dropped_recycled = dropped,
            "Reconciled nonce high-water mark"
        );
        lane.next = Some(floor);
        Ok(floor)
    }

    /// Next fresh nonce for a lane, if seeded.
    pub async fn peek(&self, key: LaneKey) -> Option<u64> {
        self.lane(key).await.lock().await.next
    }
}

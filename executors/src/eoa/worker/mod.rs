use std::{sync::Arc, time::Duration};

use rand::Rng;
use serde::{Deserialize, Serialize};
use txqueue_core::{chain::Chain, signer::EoaSigner};

use crate::eoa::{
    gas::GasPricingStrategy,
    nonce_manager::NonceManager,
    store::{LaneKey, TransactionStore},
};

pub mod confirm;
pub mod error;
mod send;
mod transaction;

pub use confirm::ConfirmationReport;
pub use send::SendReport;
pub use transaction::CancelOutcome;

use error::EoaExecutorWorkerError;

/// Tunables of the submission worker and the confirmation watcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub poll_interval_ms: u64,
    /// Submitted but unresolved transactions allowed per lane
    pub max_inflight: usize,
    pub max_submission_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Time without inclusion after which a submitted transaction is re-bid
    pub stuck_timeout_secs: u64,
    pub max_escalations: u32,
    /// Time after first submission after which a transaction is given up on
    pub confirmation_timeout_secs: u64,
    /// Time a consumed nonce may go without a receipt for any known hash
    pub receipt_grace_secs: u64,
    pub lane_lease_ttl_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            max_inflight: 100,
            max_submission_attempts: 5,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 60_000,
            stuck_timeout_secs: 60,
            max_escalations: 3,
            confirmation_timeout_secs: 1_800,
            receipt_grace_secs: 30,
            lane_lease_ttl_ms: 30_000,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lane_lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lane_lease_ttl_ms)
    }

    /// Exponential backoff for the given attempt number, never shorter than what the error
    /// classification asked for, capped at `retry_max_delay_ms`, with up to 10% jitter.
    pub fn retry_delay(&self, attempt: u32, requested: Option<Duration>) -> Duration {
        let exponential = self
            .retry_base_delay_ms
            .saturating_mul(1 << attempt.min(16));
        let requested = requested.map(|d| d.as_millis() as u64).unwrap_or_default();
        let delay_ms = exponential.max(requested).min(self.retry_max_delay_ms);

        let jitter = if delay_ms >= 10 {
            rand::rng().random_range(0..=delay_ms / 10)
        } else {
            0
        };
        Duration::from_millis(delay_ms.saturating_add(jitter).min(self.retry_max_delay_ms))
    }
}

/// Everything a lane pass needs besides the chain.
pub struct ExecutorContext<S: TransactionStore> {
    pub store: S,
    pub signer: Arc<EoaSigner>,
    pub nonces: Arc<NonceManager>,
    pub gas: GasPricingStrategy,
    pub config: WorkerConfig,
}

/// One pass over one (wallet, chain) lane.
///
/// Passes run under the lane lease, so only one worker in the whole deployment sends, escalates
/// or cancels for a lane at a time. Each instance leases under its own owner token, so two
/// passes of the same process exclude each other too.
pub struct EoaExecutorWorker<'a, C: Chain, S: TransactionStore> {
    pub chain: &'a C,
    pub ctx: &'a ExecutorContext<S>,
    pub lane: LaneKey,
    pub worker_id: &'a str,
    lease_owner: String,
}

impl<'a, C: Chain, S: TransactionStore> EoaExecutorWorker<'a, C, S> {
    pub fn new(
        chain: &'a C,
        ctx: &'a ExecutorContext<S>,
        lane: LaneKey,
        worker_id: &'a str,
    ) -> Self {
        Self {
            chain,
            ctx,
            lane,
            worker_id,
            lease_owner: format!("{worker_id}:{}", uuid::Uuid::new_v4()),
        }
    }

    async fn acquire_lane(&self) -> Result<bool, EoaExecutorWorkerError> {
        Ok(self
            .ctx
            .store
            .acquire_lane(self.lane, &self.lease_owner, self.ctx.config.lane_lease_ttl())
            .await?)
    }

    /// Pushes the lease deadline out by one TTL. `false` when the lease already expired, in
    /// which case the pass must stop touching the lane.
    async fn renew_lane(&self) -> Result<bool, EoaExecutorWorkerError> {
        let renewed = self
            .ctx
            .store
            .renew_lane(self.lane, &self.lease_owner, self.ctx.config.lane_lease_ttl())
            .await?;
        if !renewed {
            tracing::warn!(lane = %self.lane, "Lane lease lost, stopping pass");
        }
        Ok(renewed)
    }

    async fn release_lane(&self) {
        if let Err(e) = self.ctx.store.release_lane(self.lane, &self.lease_owner).await {
            tracing::error!(lane = %self.lane, error = ?e, "Error releasing lane lease");
        }
    }

    /// Sends due queued transactions of this lane. `Ok(None)` when another worker holds the lane.
    #[tracing::instrument(name = "submission_pass", skip_all, fields(lane = %self.lane))]
    pub async fn run_send_pass(&self) -> Result<Option<SendReport>, EoaExecutorWorkerError> {
        if !self.acquire_lane().await? {
            tracing::trace!("Lane held by another worker, skipping");
            return Ok(None);
        }

        let result = self.send_flow().await;
        self.release_lane().await;
        result.map(Some)
    }

    /// Resolves, escalates or times out submitted transactions of this lane.
    #[tracing::instrument(name = "confirmation_pass", skip_all, fields(lane = %self.lane))]
    pub async fn run_confirm_pass(
        &self,
    ) -> Result<Option<ConfirmationReport>, EoaExecutorWorkerError> {
        if !self.acquire_lane().await? {
            tracing::trace!("Lane held by another worker, skipping");
            return Ok(None);
        }

        let result = self.confirm_flow().await;
        self.release_lane().await;
        result.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_grows_and_is_capped() {
        let config = WorkerConfig {
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 1_000,
            ..Default::default()
        };

        let first = config.retry_delay(0, None);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(110));

        let third = config.retry_delay(2, None);
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(440));

        assert_eq!(config.retry_delay(20, None), Duration::from_millis(1_000));
    }

    #[test]
    fn classification_delay_is_a_floor() {
        let config = WorkerConfig {
            retry_base_delay_ms: 10,
            retry_max_delay_ms: 120_000,
            ..Default::default()
        };

        let delay = config.retry_delay(0, Some(Duration::from_secs(60)));
        assert!(delay >= Duration::from_secs(60));
    }

    #[test]
    fn zero_delays_stay_zero() {
        let config = WorkerConfig {
            retry_base_delay_ms: 0,
            retry_max_delay_ms: 0,
            ..Default::default()
        };
        assert_eq!(
            config.retry_delay(3, Some(Duration::from_secs(30))),
            Duration::ZERO
        );
    }
}

use std::{future::Future, time::Duration};

use alloy::{
    network::TransactionBuilder,
    primitives::{B256, Bytes, U256},
    rpc::types::TransactionRequest,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use txqueue_core::{
    chain::Chain,
    error::EngineError,
    signer::SignedTransaction,
    transaction::{GasQuote, TxType},
};

use crate::eoa::{
    error_classifier::{EoaErrorMapper, EoaExecutionError},
    store::{TransactionRecord, TransactionStatus, TransactionStore},
    worker::{EoaExecutorWorker, error::EoaExecutorWorkerError},
};

// Retry constants for preparation phase
const MAX_PREPARATION_RETRIES: u32 = 3;
const PREPARATION_RETRY_DELAY_MS: u64 = 100;

const NOOP_GAS_LIMIT: u64 = 21_000;
const LANE_WAIT_STEP_MS: u64 = 50;

/// What a cancel request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelOutcome {
    /// The transaction was still queued and will never be sent
    CancelledImmediately,
    /// A replacement was broadcast at the same nonce, the record becomes `cancelled` once it lands
    CancellationPending,
}

/// The envelope type to sign with for a bid. A legacy bid forces a gas price envelope.
pub(crate) fn effective_tx_type(tx_type: TxType, quote: &GasQuote) -> TxType {
    match (tx_type, quote) {
        (TxType::Eip1559, GasQuote::Legacy { .. }) => TxType::Legacy,
        (tx_type, _) => tx_type,
    }
}

impl<C: Chain, S: TransactionStore> EoaExecutorWorker<'_, C, S> {
    /// Retries transient RPC failures a few times before giving up on the pass.
    pub(super) async fn with_preparation_retries<T, F, Fut>(
        &self,
        queue_id: &str,
        mut f: F,
    ) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(result) => return Ok(result),
                Err(error) if error.is_transient() && attempt < MAX_PREPARATION_RETRIES => {
                    attempt += 1;
                    let delay = PREPARATION_RETRY_DELAY_MS * (2_u64.pow(attempt - 1));
                    tracing::warn!(
                        queue_id = queue_id,
                        attempt = attempt,
                        error = ?error,
                        "Retryable error during transaction preparation, will retry"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    pub(super) fn call_request(&self, record: &TransactionRecord) -> TransactionRequest {
        let mut request = TransactionRequest::default()
            .from(record.wallet_address)
            .value(record.value)
            .input(record.encoded_input_data.clone().into())
            .with_chain_id(self.chain.chain_id());

        if let Some(to) = record.contract_address {
            request = request.to(to);
        }
        request
    }

    /// Zero value self-transfer, used to take over a nonce.
    pub(super) fn noop_request(&self) -> TransactionRequest {
        TransactionRequest::default()
            .from(self.lane.wallet)
            .to(self.lane.wallet)
            .value(U256::ZERO)
            .input(Bytes::new().into())
            .with_chain_id(self.chain.chain_id())
            .gas_limit(NOOP_GAS_LIMIT)
    }

    /// Gas limit from the record, or an estimate with a 10% buffer.
    pub(super) async fn resolve_gas_limit(
        &self,
        record: &TransactionRecord,
        request: &TransactionRequest,
    ) -> Result<u64, EngineError> {
        if let Some(gas_limit) = record.gas_limit {
            return Ok(gas_limit);
        }

        let estimate = self
            .with_preparation_retries(&record.queue_id, || self.chain.estimate_gas(request))
            .await?;
        Ok(estimate.saturating_mul(110) / 100)
    }

    /// The bid for a first broadcast: caller overrides on the first attempt, a fresh quote after.
    pub(super) async fn resolve_gas_quote(
        &self,
        record: &TransactionRecord,
    ) -> Result<GasQuote, EngineError> {
        if record.submission_attempts == 0 {
            if let Some(quote) = record.gas_quote() {
                return Ok(quote);
            }
        }

        self.with_preparation_retries(&record.queue_id, || {
            self.ctx.gas.quote(self.chain, record.tx_type)
        })
        .await
    }

    /// Signs a fully specified request. Signing failures are configuration problems and never
    /// reach the network.
    pub(super) async fn sign(
        &self,
        request: TransactionRequest,
        nonce: u64,
        gas_limit: u64,
        quote: &GasQuote,
        tx_type: TxType,
    ) -> Result<SignedTransaction, EngineError> {
        let request = quote.apply_to(request.nonce(nonce).gas_limit(gas_limit), tx_type);
        self.ctx.signer.sign_transaction(request).await
    }

    /// Broadcasts and classifies. `Ok` when the transaction is, or may be, in the mempool.
    pub(super) async fn broadcast(
        &self,
        signed: &SignedTransaction,
    ) -> Result<B256, EoaExecutionError> {
        match self.chain.send_raw_transaction(&signed.raw).await {
            Ok(hash) => {
                if hash != signed.hash {
                    tracing::warn!(
                        expected = %signed.hash,
                        returned = %hash,
                        "Node returned an unexpected transaction hash"
                    );
                }
                Ok(signed.hash)
            }
            Err(error) => {
                let mapped = EoaErrorMapper::map_send_error(&error);
                if EoaErrorMapper::get_recovery_strategy(&mapped).possibly_sent {
                    tracing::warn!(
                        tx_hash = %signed.hash,
                        error = mapped.message(),
                        "Broadcast may have reached the mempool, tracking it as sent"
                    );
                    Ok(signed.hash)
                } else {
                    Err(mapped)
                }
            }
        }
    }

    /// Waits for the lane lease, for at most one lease TTL.
    async fn wait_for_lane(&self) -> Result<(), EoaExecutorWorkerError> {
        let ttl = self.ctx.config.lane_lease_ttl();
        let started = tokio::time::Instant::now();

        loop {
            if self.acquire_lane().await? {
                return Ok(());
            }
            if started.elapsed() >= ttl {
                return Err(EoaExecutorWorkerError::LaneBusy {
                    lane: self.lane.to_string(),
                });
            }
            tokio::time::sleep(Duration::from_millis(LANE_WAIT_STEP_MS)).await;
        }
    }

    /// Cancels a transaction of this lane, holding the lane lease so no broadcast for the lane
    /// is in flight meanwhile.
    #[tracing::instrument(name = "cancel", skip_all, fields(lane = %self.lane, queue_id = queue_id))]
    pub async fn cancel(&self, queue_id: &str) -> Result<CancelOutcome, EngineError> {
        self.wait_for_lane().await?;
        let result = self.cancel_locked(queue_id).await;
        self.release_lane().await;
        result
    }

    async fn cancel_locked(&self, queue_id: &str) -> Result<CancelOutcome, EngineError> {
        let record = self
            .ctx
            .store
            .get(queue_id)
            .await?
            .ok_or_else(|| EngineError::not_found(queue_id))?;

        match record.status {
            TransactionStatus::Queued => {
                let mut next = record.clone();
                next.status = TransactionStatus::Cancelled;
                next.cancelled_timestamp = Some(Utc::now());
                next.next_attempt_at = None;
                self.ctx.store.compare_and_swap(&record, next).await?;

                tracing::info!("Cancelled queued transaction");
                Ok(CancelOutcome::CancelledImmediately)
            }
            TransactionStatus::Submitted if record.cancellation_tx_hash.is_some() => {
                Ok(CancelOutcome::CancellationPending)
            }
            TransactionStatus::Submitted => self.replace_with_noop(record).await,
            TransactionStatus::Mined | TransactionStatus::Errored | TransactionStatus::Cancelled => {
                Err(EngineError::InvalidStateError {
                    queue_id: record.queue_id,
                    status: record.status.to_string(),
                    message: "only queued or submitted transactions can be cancelled".to_string(),
                })
            }
        }
    }

    /// Broadcasts a no-op at `nonce` that outbids `previous`, so the nonce gets used whatever
    /// happens to the transaction it was given to. `Ok(None)` when the nonce is already used.
    pub(super) async fn fill_nonce(
        &self,
        nonce: u64,
        previous: Option<GasQuote>,
        tx_type: TxType,
    ) -> Result<Option<(B256, GasQuote)>, EngineError> {
        let previous = match previous {
            Some(previous) => previous,
            None => self.ctx.gas.quote(self.chain, tx_type).await?,
        };
        let quote = self.ctx.gas.escalate_for_chain(self.chain, &previous).await?;

        let signed = self
            .sign(
                self.noop_request(),
                nonce,
                NOOP_GAS_LIMIT,
                &quote,
                effective_tx_type(tx_type, &quote),
            )
            .await?;

        match self.broadcast(&signed).await {
            Ok(hash) => {
                tracing::info!(nonce = nonce, tx_hash = %hash, "Broadcast no-op at nonce");
                Ok(Some((hash, quote)))
            }
            Err(EoaExecutionError::NonceTooLow { .. }) => Ok(None),
            Err(error) => Err(EngineError::SubmissionError {
                chain_id: self.chain.chain_id(),
                message: format!("failed to broadcast no-op at nonce {nonce}: {}", error.message()),
            }),
        }
    }

    /// Outbids a submitted transaction with a no-op at the same nonce.
    async fn replace_with_noop(
        &self,
        record: TransactionRecord,
    ) -> Result<CancelOutcome, EngineError> {
        let nonce = record
            .submitted_tx_nonce
            .ok_or_else(|| EngineError::InternalError {
                message: format!("submitted transaction {} has no nonce", record.queue_id),
            })?;

        let Some((hash, quote)) = self
            .fill_nonce(nonce, record.gas_quote(), record.tx_type)
            .await?
        else {
            return Err(EngineError::InvalidStateError {
                queue_id: record.queue_id,
                status: record.status.to_string(),
                message: "the transaction was already included in a block".to_string(),
            });
        };

        let mut next = record.clone();
        next.cancellation_tx_hash = Some(hash);
        next.set_gas_quote(quote);
        next.last_broadcast_at = Some(Utc::now());
        self.ctx.store.compare_and_swap(&record, next).await?;

        tracing::info!(
            nonce = nonce,
            tx_hash = %hash,
            "Broadcast cancellation replacement"
        );
        Ok(CancelOutcome::CancellationPending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_bid_downgrades_eip1559_envelope() {
        let legacy = GasQuote::Legacy { gas_price: 1 };
        let dynamic = GasQuote::Eip1559 {
            max_fee_per_gas: 2,
            max_priority_fee_per_gas: 1,
        };

        assert_eq!(effective_tx_type(TxType::Eip1559, &legacy), TxType::Legacy);
        assert_eq!(effective_tx_type(TxType::AccessList, &legacy), TxType::AccessList);
        assert_eq!(effective_tx_type(TxType::Eip1559, &dynamic), TxType::Eip1559);
    }

    #[test]
    fn cancel_outcome_serializes_screaming_case() {
        assert_eq!(
            serde_json::to_value(CancelOutcome::CancelledImmediately).unwrap(),
            "CANCELLED_IMMEDIATELY"
        );
        assert_eq!(
            serde_json::to_value(CancelOutcome::CancellationPending).unwrap(),
            "CANCELLATION_PENDING"
        );
    }
}

use alloy::primitives::B256;
use chrono::{Duration as ChronoDuration, Utc};
use txqueue_core::{chain::Chain, error::EngineError};

use crate::eoa::{
    error_classifier::{EoaErrorMapper, EoaExecutionError},
    store::{TransactionRecord, TransactionStatus, TransactionStore},
    worker::{
        EoaExecutorWorker, error::EoaExecutorWorkerError, transaction::effective_tx_type,
    },
};

/// What a submission pass did for its lane.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReport {
    pub sent: u32,
    pub retried: u32,
    pub failed: u32,
    /// Left queued because the lane is at its in-flight limit or blocked by a retry
    pub deferred: u32,
}

enum SendOutcome {
    Submitted,
    /// Rescheduled, later transactions of the lane must wait
    Retry,
    /// Written as `errored`, the lane can move on
    Failed,
    /// The record changed underneath us
    Skipped,
}

impl<C: Chain, S: TransactionStore> EoaExecutorWorker<'_, C, S> {
    pub(super) async fn send_flow(&self) -> Result<SendReport, EoaExecutorWorkerError> {
        let mut report = SendReport::default();

        let inflight = self.ctx.store.submitted_transactions(self.lane).await?.len();
        let budget = self.ctx.config.max_inflight.saturating_sub(inflight);
        if budget == 0 {
            tracing::debug!(inflight = inflight, "Lane at in-flight limit");
            return Ok(report);
        }

        let queued = self.ctx.store.queued_transactions(self.lane, budget).await?;
        let total = queued.len() as u32;
        let now = Utc::now();

        for record in queued {
            if !self.renew_lane().await? {
                break;
            }
            if !record.is_due(now) {
                tracing::debug!(
                    queue_id = record.queue_id,
                    next_attempt_at = ?record.next_attempt_at,
                    "Oldest queued transaction is backing off, lane waits"
                );
                break;
            }

            match self.send_transaction(record).await? {
                SendOutcome::Submitted => report.sent += 1,
                SendOutcome::Failed => report.failed += 1,
                SendOutcome::Skipped => {}
                SendOutcome::Retry => {
                    report.retried += 1;
                    break;
                }
            }
        }

        report.deferred = total.saturating_sub(report.sent + report.failed + report.retried);
        if report.sent + report.failed + report.retried > 0 {
            tracing::info!(
                sent = report.sent,
                retried = report.retried,
                failed = report.failed,
                deferred = report.deferred,
                "Submission pass finished"
            );
        }
        Ok(report)
    }

    #[tracing::instrument(skip_all, fields(queue_id = %record.queue_id))]
    async fn send_transaction(
        &self,
        record: TransactionRecord,
    ) -> Result<SendOutcome, EoaExecutorWorkerError> {
        let request = self.call_request(&record);

        let prepared = async {
            let gas_limit = self.resolve_gas_limit(&record, &request).await?;
            let quote = self.resolve_gas_quote(&record).await?;
            Ok::<_, EngineError>((gas_limit, quote))
        }
        .await;

        let (gas_limit, quote) = match prepared {
            Ok(prepared) => prepared,
            Err(error) => {
                let mapped = EoaErrorMapper::map_send_error(&error);
                return self.handle_failure(record, None, mapped).await;
            }
        };
        let tx_type = effective_tx_type(record.tx_type, &quote);

        let nonce = self
            .ctx
            .nonces
            .allocate(self.chain, &self.ctx.store, self.lane)
            .await?;

        let signed = match self.sign(request, nonce, gas_limit, &quote, tx_type).await {
            Ok(signed) => signed,
            Err(error) => {
                self.ctx.nonces.recycle(self.lane, nonce).await;
                return self.fail(record, error.to_string()).await;
            }
        };

        match self.broadcast(&signed).await {
            Ok(hash) => {
                let mut next = record.clone();
                let now = Utc::now();
                next.status = TransactionStatus::Submitted;
                next.tx_hash = Some(hash);
                next.submitted_tx_nonce = Some(nonce);
                next.tx_type = tx_type;
                next.gas_limit = Some(gas_limit);
                next.set_gas_quote(quote);
                next.tx_submitted_timestamp = Some(now);
                next.last_broadcast_at = Some(now);
                next.submission_attempts += 1;
                next.next_attempt_at = None;

                match self.ctx.store.compare_and_swap(&record, next.clone()).await {
                    Ok(_) => {
                        tracing::info!(nonce = nonce, tx_hash = %hash, "Transaction submitted");
                        Ok(SendOutcome::Submitted)
                    }
                    Err(e) if e.is_conflict() => {
                        self.record_late_broadcast(next, nonce, hash).await
                    }
                    Err(e) => {
                        // the transaction is out, the nonce stays consumed
                        tracing::error!(
                            nonce = nonce,
                            tx_hash = %hash,
                            error = ?e,
                            "Broadcast transaction could not be recorded"
                        );
                        Err(e.into())
                    }
                }
            }
            Err(error) => self.handle_failure(record, Some(nonce), error).await,
        }
    }

    /// The record changed while its transaction was being broadcast. A record that is still
    /// queued takes the broadcast. Otherwise no record owns the nonce any more, so it is taken
    /// over by a no-op that outbids the call.
    async fn record_late_broadcast(
        &self,
        submitted: TransactionRecord,
        nonce: u64,
        hash: B256,
    ) -> Result<SendOutcome, EoaExecutorWorkerError> {
        let stored = self.ctx.store.get(&submitted.queue_id).await?;

        if let Some(stored) = stored.filter(|r| r.status == TransactionStatus::Queued) {
            self.ctx.store.compare_and_swap(&stored, submitted).await?;
            tracing::info!(nonce = nonce, tx_hash = %hash, "Transaction submitted");
            return Ok(SendOutcome::Submitted);
        }

        tracing::warn!(
            nonce = nonce,
            tx_hash = %hash,
            "Record changed during broadcast, replacing the call with a no-op"
        );
        match self
            .fill_nonce(nonce, submitted.gas_quote(), submitted.tx_type)
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => tracing::warn!(nonce = nonce, "Nonce already used by the broadcast call"),
            Err(e) => {
                tracing::error!(nonce = nonce, error = %e, "Nonce left to the unrecorded call")
            }
        }
        Ok(SendOutcome::Skipped)
    }

    async fn handle_failure(
        &self,
        record: TransactionRecord,
        nonce: Option<u64>,
        error: EoaExecutionError,
    ) -> Result<SendOutcome, EoaExecutorWorkerError> {
        let strategy = EoaErrorMapper::get_recovery_strategy(&error);

        if let Some(nonce) = nonce {
            if strategy.recycle_nonce {
                self.ctx.nonces.recycle(self.lane, nonce).await;
            }
            if strategy.needs_resync {
                self.ctx
                    .nonces
                    .reconcile(self.chain, &self.ctx.store, self.lane)
                    .await?;
            }
        }

        let attempts = record.submission_attempts + 1;
        if !strategy.retryable || attempts >= self.ctx.config.max_submission_attempts {
            tracing::warn!(
                attempts = attempts,
                error = error.message(),
                "Transaction failed permanently"
            );
            return self.fail(record, error.message().to_string()).await;
        }

        let delay = self
            .ctx
            .config
            .retry_delay(record.submission_attempts, strategy.retry_delay);

        let mut next = record.clone();
        next.submission_attempts = attempts;
        next.next_attempt_at =
            Some(Utc::now() + ChronoDuration::from_std(delay).unwrap_or(ChronoDuration::zero()));

        tracing::warn!(
            attempts = attempts,
            delay_ms = delay.as_millis() as u64,
            error = error.message(),
            "Transaction submission failed, will retry"
        );

        match self.ctx.store.compare_and_swap(&record, next).await {
            Ok(_) => Ok(SendOutcome::Retry),
            Err(e) if e.is_conflict() => Ok(SendOutcome::Skipped),
            Err(e) => Err(e.into()),
        }
    }

    async fn fail(
        &self,
        record: TransactionRecord,
        reason: String,
    ) -> Result<SendOutcome, EoaExecutorWorkerError> {
        let mut next = record.clone();
        next.status = TransactionStatus::Errored;
        next.error_message = Some(reason);
        next.submission_attempts += 1;
        next.next_attempt_at = None;

        match self.ctx.store.compare_and_swap(&record, next).await {
            Ok(_) => Ok(SendOutcome::Failed),
            Err(e) if e.is_conflict() => Ok(SendOutcome::Skipped),
            Err(e) => Err(e.into()),
        }
    }
}

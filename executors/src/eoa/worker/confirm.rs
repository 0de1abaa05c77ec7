use chrono::{DateTime, Utc};
use txqueue_core::{
    chain::{Chain, ReceiptSummary},
    error::EngineError,
};

use crate::eoa::{
    error_classifier::EoaExecutionError,
    store::{TransactionRecord, TransactionStatus, TransactionStore},
    worker::{
        EoaExecutorWorker, error::EoaExecutorWorkerError, transaction::effective_tx_type,
    },
};

/// What a confirmation pass resolved for its lane.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfirmationReport {
    pub mined: u32,
    pub reverted: u32,
    pub cancelled: u32,
    /// Nonce used by a transaction the engine never saw a receipt for
    pub consumed: u32,
    pub escalated: u32,
    pub timed_out: u32,
}

impl ConfirmationReport {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn elapsed_secs(since: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<u64> {
    since.map(|since| (now - since).num_seconds().max(0) as u64)
}

impl<C: Chain, S: TransactionStore> EoaExecutorWorker<'_, C, S> {
    pub(super) async fn confirm_flow(&self) -> Result<ConfirmationReport, EoaExecutorWorkerError> {
        let mut report = ConfirmationReport::default();

        let submitted = self.ctx.store.submitted_transactions(self.lane).await?;
        if submitted.is_empty() {
            return Ok(report);
        }

        let mined_count = self.chain.get_transaction_count(self.lane.wallet).await?;
        let head = self.chain.get_block_number().await?;

        tracing::debug!(
            submitted = submitted.len(),
            mined_count = mined_count,
            head = head,
            "Checking submitted transactions"
        );

        for record in submitted {
            if !self.renew_lane().await? {
                break;
            }
            let Some(nonce) = record.submitted_tx_nonce else {
                tracing::error!(queue_id = record.queue_id, "Submitted record has no nonce");
                continue;
            };

            let result = if nonce < mined_count {
                self.resolve_consumed_nonce(record, head, &mut report).await
            } else {
                self.check_pending(record, nonce, &mut report).await
            };

            match result {
                Ok(()) => {}
                Err(EoaExecutorWorkerError::StoreError { inner_error, .. })
                    if inner_error.is_conflict() =>
                {
                    tracing::debug!(nonce = nonce, "Record changed during confirmation, skipping");
                }
                Err(e) => return Err(e),
            }
        }

        if !report.is_empty() {
            tracing::info!(
                mined = report.mined,
                reverted = report.reverted,
                cancelled = report.cancelled,
                consumed = report.consumed,
                escalated = report.escalated,
                timed_out = report.timed_out,
                "Confirmation pass finished"
            );
        }
        Ok(report)
    }

    /// The wallet's nonce moved past this record, so exactly one transaction used it.
    #[tracing::instrument(skip_all, fields(queue_id = %record.queue_id, nonce = ?record.submitted_tx_nonce))]
    async fn resolve_consumed_nonce(
        &self,
        record: TransactionRecord,
        head: u64,
        report: &mut ConfirmationReport,
    ) -> Result<(), EoaExecutorWorkerError> {
        let mut found: Option<ReceiptSummary> = None;
        for hash in record.known_hashes() {
            if let Some(receipt) = self.chain.get_transaction_receipt(hash).await? {
                found = Some(receipt);
                break;
            }
        }

        let now = Utc::now();

        let Some(receipt) = found else {
            return self.handle_missing_receipt(record, now, report).await;
        };

        let depth = head.saturating_sub(receipt.block_number) + 1;
        let required = self.chain.settings().confirmations.max(1);
        if depth < required {
            tracing::debug!(
                block_number = receipt.block_number,
                depth = depth,
                required = required,
                "Receipt found, waiting for confirmations"
            );
            return Ok(());
        }

        let mut next = record.clone();
        next.block_number = Some(receipt.block_number);
        next.nonce_consumed_at = None;

        if record.cancellation_tx_hash == Some(receipt.transaction_hash) {
            next.status = TransactionStatus::Cancelled;
            next.cancelled_timestamp = Some(now);
            self.ctx.store.compare_and_swap(&record, next).await?;
            report.cancelled += 1;
            tracing::info!(tx_hash = %receipt.transaction_hash, "Cancellation replacement mined");
            return Ok(());
        }

        if record.tx_hash != Some(receipt.transaction_hash) {
            // an earlier bid at this nonce won
            if let Some(current) = record.tx_hash {
                next.replaced_tx_hashes.push(current);
            }
            next.replaced_tx_hashes
                .retain(|hash| *hash != receipt.transaction_hash);
            next.tx_hash = Some(receipt.transaction_hash);
        }

        if receipt.success {
            next.status = TransactionStatus::Mined;
            next.tx_mined_timestamp = Some(now);
            self.ctx.store.compare_and_swap(&record, next).await?;
            report.mined += 1;
            tracing::info!(
                tx_hash = %receipt.transaction_hash,
                block_number = receipt.block_number,
                gas_used = receipt.gas_used,
                "Transaction mined"
            );
        } else {
            next.status = TransactionStatus::Errored;
            next.tx_mined_timestamp = Some(now);
            next.error_message = Some("transaction reverted".to_string());
            self.ctx.store.compare_and_swap(&record, next).await?;
            report.reverted += 1;
            tracing::warn!(
                tx_hash = %receipt.transaction_hash,
                block_number = receipt.block_number,
                "Transaction reverted on chain"
            );
        }
        Ok(())
    }

    /// No known hash has a receipt although the nonce is used. Receipts can lag behind the
    /// nonce on load balanced RPCs, so this is only final after a grace period.
    async fn handle_missing_receipt(
        &self,
        record: TransactionRecord,
        now: DateTime<Utc>,
        report: &mut ConfirmationReport,
    ) -> Result<(), EoaExecutorWorkerError> {
        let Some(first_seen) = record.nonce_consumed_at else {
            let mut next = record.clone();
            next.nonce_consumed_at = Some(now);
            self.ctx.store.compare_and_swap(&record, next).await?;
            tracing::debug!("Nonce consumed without a known receipt, starting grace period");
            return Ok(());
        };

        if elapsed_secs(Some(first_seen), now).unwrap_or_default()
            < self.ctx.config.receipt_grace_secs
        {
            return Ok(());
        }

        let mut next = record.clone();
        next.status = TransactionStatus::Errored;
        next.error_message = Some("nonce consumed by another transaction".to_string());
        self.ctx.store.compare_and_swap(&record, next).await?;
        report.consumed += 1;
        tracing::warn!("Nonce was consumed by a transaction the engine did not send");
        Ok(())
    }

    /// Not included yet: time out, re-bid, or keep waiting.
    #[tracing::instrument(skip_all, fields(queue_id = %record.queue_id, nonce = ?record.submitted_tx_nonce))]
    async fn check_pending(
        &self,
        record: TransactionRecord,
        nonce: u64,
        report: &mut ConfirmationReport,
    ) -> Result<(), EoaExecutorWorkerError> {
        let now = Utc::now();
        let config = &self.ctx.config;

        let since_submission =
            elapsed_secs(record.tx_submitted_timestamp, now).unwrap_or_default();
        if since_submission >= config.confirmation_timeout_secs {
            return self.time_out(record, nonce, since_submission, report).await;
        }

        let since_broadcast = elapsed_secs(
            record.last_broadcast_at.or(record.tx_submitted_timestamp),
            now,
        )
        .unwrap_or_default();
        let stuck = since_broadcast >= config.stuck_timeout_secs;

        if stuck
            && record.gas_escalations < config.max_escalations
            && record.cancellation_tx_hash.is_none()
            && self.escalate(record).await?
        {
            report.escalated += 1;
        }
        Ok(())
    }

    /// Gives up on a transaction. Its nonce is first taken over by a no-op, so later
    /// transactions of the lane are not stuck behind a gap. Until that no-op is out the record
    /// stays `submitted` and the next pass tries again.
    async fn time_out(
        &self,
        record: TransactionRecord,
        nonce: u64,
        elapsed: u64,
        report: &mut ConfirmationReport,
    ) -> Result<(), EoaExecutorWorkerError> {
        let filler = match record.cancellation_tx_hash {
            Some(hash) => hash,
            None => match self
                .fill_nonce(nonce, record.gas_quote(), record.tx_type)
                .await
            {
                Ok(Some((hash, _))) => hash,
                Ok(None) => {
                    tracing::debug!("Nonce already used, the next pass resolves the receipt");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Could not fill the nonce of a timed out transaction");
                    return Ok(());
                }
            },
        };

        let error = EngineError::ConfirmationTimeoutError {
            queue_id: record.queue_id.clone(),
            timeout_seconds: self.ctx.config.confirmation_timeout_secs,
        };
        let mut next = record.clone();
        next.status = TransactionStatus::Errored;
        next.error_message = Some(error.to_string());
        next.cancellation_tx_hash = Some(filler);
        next.last_broadcast_at = Some(Utc::now());
        self.ctx.store.compare_and_swap(&record, next).await?;

        report.timed_out += 1;
        tracing::warn!(
            elapsed_secs = elapsed,
            filler_tx_hash = %filler,
            "Transaction not confirmed in time, giving up"
        );
        Ok(())
    }

    /// Re-signs the same call at the same nonce and gas limit with a higher bid. Returns whether
    /// an escalation was recorded.
    async fn escalate(&self, record: TransactionRecord) -> Result<bool, EoaExecutorWorkerError> {
        let (Some(nonce), Some(gas_limit)) = (record.submitted_tx_nonce, record.gas_limit) else {
            return Err(EoaExecutorWorkerError::InternalError {
                message: format!(
                    "submitted transaction {} is missing its nonce or gas limit",
                    record.queue_id
                ),
            });
        };

        let previous = match record.gas_quote() {
            Some(previous) => previous,
            None => self.ctx.gas.quote(self.chain, record.tx_type).await?,
        };

        let quote = match self.ctx.gas.escalate_for_chain(self.chain, &previous).await {
            Ok(quote) => quote,
            Err(e) => {
                tracing::warn!(error = %e, "Cannot escalate further, keeping current bid");
                let mut next = record.clone();
                next.last_broadcast_at = Some(Utc::now());
                self.ctx.store.compare_and_swap(&record, next).await?;
                return Ok(false);
            }
        };
        let tx_type = effective_tx_type(record.tx_type, &quote);

        let signed = self
            .sign(self.call_request(&record), nonce, gas_limit, &quote, tx_type)
            .await?;

        let now = Utc::now();
        let mut next = record.clone();
        next.last_broadcast_at = Some(now);

        match self.broadcast(&signed).await {
            Ok(hash) => {
                if let Some(previous_hash) = record.tx_hash {
                    if previous_hash != hash {
                        next.replaced_tx_hashes.push(previous_hash);
                    }
                }
                next.tx_hash = Some(hash);
                next.tx_type = tx_type;
                next.set_gas_quote(quote);
                next.gas_escalations += 1;
                self.ctx.store.compare_and_swap(&record, next).await?;

                tracing::info!(
                    tx_hash = %hash,
                    escalation = record.gas_escalations + 1,
                    "Broadcast replacement with a higher bid"
                );
                Ok(true)
            }
            Err(EoaExecutionError::ReplacementUnderpriced { message }) => {
                // keep the bid so the next round starts above it
                next.tx_type = tx_type;
                next.set_gas_quote(quote);
                next.gas_escalations += 1;
                self.ctx.store.compare_and_swap(&record, next).await?;
                tracing::warn!(error = %message, "Replacement underpriced, will bid higher");
                Ok(true)
            }
            Err(EoaExecutionError::NonceTooLow { .. }) => {
                tracing::debug!("Nonce already used, the next pass resolves the receipt");
                Ok(false)
            }
            Err(error) => {
                self.ctx.store.compare_and_swap(&record, next).await?;
                tracing::warn!(error = error.message(), "Replacement broadcast failed");
                Ok(false)
            }
        }
    }
}

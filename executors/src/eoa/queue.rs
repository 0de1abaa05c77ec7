use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use txqueue_core::{
    chain::ChainService,
    encoder::CallEncoder,
    error::EngineError,
    transaction::TransactionIntent,
};

use crate::{
    eoa::{
        store::{LaneKey, TransactionRecord, TransactionStore},
        worker::{
            CancelOutcome, ConfirmationReport, EoaExecutorWorker, ExecutorContext, SendReport,
        },
    },
    shutdown::{ShutdownHandle, WorkerHandle},
};

/// Lanes of one chain processed at the same time by a single loop.
const LANE_CONCURRENCY: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueResponse {
    pub queue_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub queue_id: String,
    pub result: CancelOutcome,
}

/// Totals of one submission pass over every active lane of a chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainSendReport {
    pub lanes: u32,
    /// Lanes skipped because another worker held them
    pub busy_lanes: u32,
    pub sent: u32,
    pub retried: u32,
    pub failed: u32,
}

impl ChainSendReport {
    fn add(&mut self, report: Option<SendReport>) {
        self.lanes += 1;
        match report {
            Some(report) => {
                self.sent += report.sent;
                self.retried += report.retried;
                self.failed += report.failed;
            }
            None => self.busy_lanes += 1,
        }
    }
}

/// Totals of one confirmation pass over every active lane of a chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainConfirmationReport {
    pub lanes: u32,
    pub busy_lanes: u32,
    pub mined: u32,
    pub reverted: u32,
    pub cancelled: u32,
    pub consumed: u32,
    pub escalated: u32,
    pub timed_out: u32,
}

impl ChainConfirmationReport {
    fn add(&mut self, report: Option<ConfirmationReport>) {
        self.lanes += 1;
        match report {
            Some(report) => {
                self.mined += report.mined;
                self.reverted += report.reverted;
                self.cancelled += report.cancelled;
                self.consumed += report.consumed;
                self.escalated += report.escalated;
                self.timed_out += report.timed_out;
            }
            None => self.busy_lanes += 1,
        }
    }
}

/// Entry point of the engine: accepts intents, answers status queries and cancels, and runs the
/// background submission and confirmation loops.
pub struct EoaTransactionQueue<CS: ChainService, S: TransactionStore> {
    chain_service: Arc<CS>,
    ctx: Arc<ExecutorContext<S>>,
    encoder: Arc<dyn CallEncoder>,
    worker_id: String,
}

impl<CS, S> EoaTransactionQueue<CS, S>
where
    CS: ChainService + 'static,
    S: TransactionStore,
{
    pub fn new(chain_service: Arc<CS>, ctx: ExecutorContext<S>, encoder: Arc<dyn CallEncoder>) -> Self {
        Self {
            chain_service,
            ctx: Arc::new(ctx),
            encoder,
            worker_id: format!("worker:{}", uuid::Uuid::new_v4()),
        }
    }

    pub fn context(&self) -> &ExecutorContext<S> {
        &self.ctx
    }

    pub fn chain_service(&self) -> &Arc<CS> {
        &self.chain_service
    }

    /// Validates and persists an intent as a `queued` record. Nothing touches the network here
    /// beyond resolving the chain configuration.
    #[tracing::instrument(
        name = "enqueue",
        skip_all,
        fields(chain_id = intent.chain_id, wallet = %intent.wallet_address)
    )]
    pub async fn enqueue(&self, intent: TransactionIntent) -> Result<EnqueueResponse, EngineError> {
        intent.validate()?;
        self.chain_service.get_chain(intent.chain_id)?;

        if !self.ctx.signer.has_signer(&intent.wallet_address) {
            return Err(EngineError::validation(format!(
                "No signer is configured for wallet {}",
                intent.wallet_address
            )));
        }

        let encoded_input_data = match (&intent.encoded_input_data, &intent.function_name) {
            (Some(data), _) => data.clone(),
            (None, Some(function)) => self.encoder.encode(function, &intent.function_args)?,
            (None, None) => {
                return Err(EngineError::validation(
                    "either encodedInputData or functionName must be provided",
                ));
            }
        };

        let queue_id = uuid::Uuid::new_v4().to_string();
        let record =
            TransactionRecord::from_intent(queue_id.clone(), &intent, encoded_input_data, Utc::now());
        self.ctx.store.insert(&record).await?;

        tracing::info!(queue_id = %queue_id, "Transaction queued");
        Ok(EnqueueResponse { queue_id })
    }

    pub async fn get_status(&self, queue_id: &str) -> Result<TransactionRecord, EngineError> {
        self.ctx
            .store
            .get(queue_id)
            .await?
            .ok_or_else(|| EngineError::not_found(queue_id))
    }

    pub async fn cancel(&self, queue_id: &str) -> Result<CancelResponse, EngineError> {
        let record = self.get_status(queue_id).await?;
        let chain = self.chain_service.get_chain(record.chain_id)?;

        let worker_id = format!("cancel:{}", uuid::Uuid::new_v4());
        let worker = EoaExecutorWorker::new(&chain, &*self.ctx, record.lane(), &worker_id);
        let result = worker.cancel(queue_id).await?;

        Ok(CancelResponse {
            queue_id: queue_id.to_string(),
            result,
        })
    }

    async fn active_lanes(&self, chain_id: u64) -> Result<Vec<LaneKey>, EngineError> {
        Ok(self.ctx.store.active_lanes(chain_id).await?)
    }

    /// One submission pass over every lane of a chain with queued work.
    pub async fn run_send_pass(&self, chain_id: u64) -> Result<ChainSendReport, EngineError> {
        let chain = self.chain_service.get_chain(chain_id)?;
        let lanes = self.active_lanes(chain_id).await?;

        let chain = &chain;
        let results: Vec<_> = futures::stream::iter(lanes)
            .map(|lane| async move {
                EoaExecutorWorker::new(chain, &*self.ctx, lane, &self.worker_id)
                    .run_send_pass()
                    .await
                    .map_err(|e| (lane, e))
            })
            .buffer_unordered(LANE_CONCURRENCY)
            .collect()
            .await;

        let mut report = ChainSendReport::default();
        for result in results {
            match result {
                Ok(lane_report) => report.add(lane_report),
                Err((lane, e)) => {
                    report.lanes += 1;
                    tracing::error!(lane = %lane, error = ?e, "Submission pass failed");
                }
            }
        }
        Ok(report)
    }

    /// One confirmation pass over every lane of a chain with submitted work.
    pub async fn run_confirm_pass(
        &self,
        chain_id: u64,
    ) -> Result<ChainConfirmationReport, EngineError> {
        let chain = self.chain_service.get_chain(chain_id)?;
        let lanes = self.active_lanes(chain_id).await?;

        let chain = &chain;
        let results: Vec<_> = futures::stream::iter(lanes)
            .map(|lane| async move {
                EoaExecutorWorker::new(chain, &*self.ctx, lane, &self.worker_id)
                    .run_confirm_pass()
                    .await
                    .map_err(|e| (lane, e))
            })
            .buffer_unordered(LANE_CONCURRENCY)
            .collect()
            .await;

        let mut report = ChainConfirmationReport::default();
        for result in results {
            match result {
                Ok(lane_report) => report.add(lane_report),
                Err((lane, e)) => {
                    report.lanes += 1;
                    tracing::error!(lane = %lane, error = ?e, "Confirmation pass failed");
                }
            }
        }
        Ok(report)
    }

    /// Spawns a submission loop and a confirmation loop per configured chain.
    pub fn start_workers(self: &Arc<Self>) -> ShutdownHandle {
        let mut handle = ShutdownHandle::new();

        for chain_id in self.chain_service.chain_ids() {
            handle.add_worker(self.spawn_loop(chain_id, LoopKind::Submission));
            handle.add_worker(self.spawn_loop(chain_id, LoopKind::Confirmation));
        }

        tracing::info!(
            workers = handle.worker_count(),
            worker_id = %self.worker_id,
            "Started transaction workers"
        );
        handle
    }

    fn spawn_loop(self: &Arc<Self>, chain_id: u64, kind: LoopKind) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let queue = self.clone();
        let name = format!("{}:{chain_id}", kind.as_str());
        let span = tracing::info_span!("worker_loop", kind = kind.as_str(), chain_id = chain_id);

        let join_handle = tokio::spawn(
            async move {
                let mut interval = tokio::time::interval(queue.ctx.config.poll_interval());
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

                tracing::info!("Worker loop started");
                loop {
                    tokio::select! {
                        _ = &mut shutdown_rx => {
                            tracing::info!("Shutdown signal received");
                            break;
                        }

                        _ = interval.tick() => {
                            let result = match kind {
                                LoopKind::Submission => queue.run_send_pass(chain_id).await.map(|_| ()),
                                LoopKind::Confirmation => queue.run_confirm_pass(chain_id).await.map(|_| ()),
                            };
                            if let Err(e) = result {
                                tracing::error!(error = ?e, "Worker pass failed");
                            }
                        }
                    }
                }
                Ok(())
            }
            .instrument(span),
        );

        WorkerHandle {
            name,
            join_handle,
            shutdown_tx,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum LoopKind {
    Submission,
    Confirmation,
}

impl LoopKind {
    fn as_str(&self) -> &'static str {
        match self {
            LoopKind::Submission => "submission",
            LoopKind::Confirmation => "confirmation",
        }
    }
}

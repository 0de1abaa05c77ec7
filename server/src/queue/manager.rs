// src/queue/manager.rs
use std::sync::Arc;

use txqueue_core::{
    chain::{ChainService, RpcChainService},
    encoder::SignatureCallEncoder,
    error::EngineError,
    signer::EoaSigner,
    transaction::TransactionIntent,
};
use txqueue_executors::{
    eoa::{
        CancelResponse, EnqueueResponse, EoaTransactionQueue, ExecutorContext, GasConfig,
        GasPricingStrategy, InMemoryTransactionStore, NonceManager, RedisTransactionStore,
        TransactionRecord, TransactionStoreBackend, TransactionStoreError, WorkerConfig,
    },
    shutdown::ShutdownHandle,
};

use crate::config::{RedisConfig, StoreBackend, StoreConfig};

pub type EngineTransactionQueue = EoaTransactionQueue<RpcChainService, TransactionStoreBackend>;

/// Owns the transaction queue and its background workers.
pub struct QueueManager {
    pub transaction_queue: Arc<EngineTransactionQueue>,
    pub store_backend: StoreBackend,
}

impl QueueManager {
    pub async fn new(
        redis_config: &RedisConfig,
        store_config: &StoreConfig,
        queue_config: &WorkerConfig,
        gas_config: &GasConfig,
        chain_service: Arc<RpcChainService>,
        eoa_signer: Arc<EoaSigner>,
    ) -> Result<Self, EngineError> {
        let store = match store_config.backend {
            StoreBackend::Redis => {
                let redis_client = txqueue_executors::redis::Client::open(redis_config.url.as_str())
                    .map_err(TransactionStoreError::from)?;
                let connection = redis_client
                    .get_connection_manager()
                    .await
                    .map_err(TransactionStoreError::from)?;

                tracing::info!(namespace = ?store_config.namespace, "Using Redis transaction store");
                TransactionStoreBackend::Redis(RedisTransactionStore::new(
                    connection,
                    store_config.namespace.clone(),
                ))
            }
            StoreBackend::Memory => {
                tracing::warn!("Using in-memory transaction store, records are lost on restart");
                TransactionStoreBackend::Memory(InMemoryTransactionStore::new())
            }
        };

        Ok(Self::with_store(
            store,
            store_config.backend,
            queue_config,
            gas_config,
            chain_service,
            eoa_signer,
        ))
    }

    pub fn with_store(
        store: TransactionStoreBackend,
        store_backend: StoreBackend,
        queue_config: &WorkerConfig,
        gas_config: &GasConfig,
        chain_service: Arc<RpcChainService>,
        eoa_signer: Arc<EoaSigner>,
    ) -> Self {
        let ctx = ExecutorContext {
            store,
            signer: eoa_signer,
            nonces: Arc::new(NonceManager::new()),
            gas: GasPricingStrategy::new(gas_config.clone()),
            config: queue_config.clone(),
        };

        let transaction_queue = Arc::new(EoaTransactionQueue::new(
            chain_service,
            ctx,
            Arc::new(SignatureCallEncoder),
        ));

        Self {
            transaction_queue,
            store_backend,
        }
    }

    pub async fn enqueue(&self, intent: TransactionIntent) -> Result<EnqueueResponse, EngineError> {
        self.transaction_queue.enqueue(intent).await
    }

    pub async fn get_status(&self, queue_id: &str) -> Result<TransactionRecord, EngineError> {
        self.transaction_queue.get_status(queue_id).await
    }

    pub async fn cancel(&self, queue_id: &str) -> Result<CancelResponse, EngineError> {
        self.transaction_queue.cancel(queue_id).await
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        self.transaction_queue.chain_service().chain_ids()
    }

    pub fn wallet_count(&self) -> usize {
        self.transaction_queue.context().signer.addresses().len()
    }

    /// Start the submission and confirmation loops for every configured chain
    pub fn start_workers(&self) -> ShutdownHandle {
        tracing::info!("Starting transaction workers");
        self.transaction_queue.start_workers()
    }
}

pub mod error_classifier;
pub mod gas;
pub mod nonce_manager;
pub mod queue;
pub mod store;
pub mod worker;

pub use error_classifier::{EoaErrorMapper, EoaExecutionError, RecoveryStrategy};
pub use gas::{GasConfig, GasPricingStrategy};
pub use nonce_manager::NonceManager;
pub use queue::{CancelResponse, EnqueueResponse, EoaTransactionQueue};
pub use store::{
    InMemoryTransactionStore, LaneKey, RedisTransactionStore, TransactionRecord,
    TransactionStatus, TransactionStore, TransactionStoreBackend, TransactionStoreError,
};
pub use worker::{CancelOutcome, EoaExecutorWorker, ExecutorContext, WorkerConfig};

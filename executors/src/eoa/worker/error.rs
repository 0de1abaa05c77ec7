use txqueue_core::error::EngineError;

use crate::eoa::store::TransactionStoreError;

/// Failures that abort a lane pass. Per-transaction failures never surface here, they are
/// written to the record instead.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EoaExecutorWorkerError {
    #[error("Store error: {message}")]
    StoreError {
        message: String,
        inner_error: TransactionStoreError,
    },

    #[error("RPC error encountered during generic operation: {message}")]
    RpcError {
        message: String,
        inner_error: EngineError,
    },

    #[error("Lane {lane} is held by another worker")]
    LaneBusy { lane: String },

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl From<TransactionStoreError> for EoaExecutorWorkerError {
    fn from(error: TransactionStoreError) -> Self {
        EoaExecutorWorkerError::StoreError {
            message: error.to_string(),
            inner_error: error,
        }
    }
}

impl From<EngineError> for EoaExecutorWorkerError {
    fn from(error: EngineError) -> Self {
        EoaExecutorWorkerError::RpcError {
            message: error.to_string(),
            inner_error: error,
        }
    }
}

impl From<EoaExecutorWorkerError> for EngineError {
    fn from(error: EoaExecutorWorkerError) -> Self {
        match error {
            EoaExecutorWorkerError::StoreError { inner_error, .. } => inner_error.into(),
            EoaExecutorWorkerError::RpcError { inner_error, .. } => inner_error,
            EoaExecutorWorkerError::LaneBusy { lane } => EngineError::StoreError {
                message: format!("Lane {lane} is busy, retry shortly"),
            },
            EoaExecutorWorkerError::InternalError { message } => {
                EngineError::InternalError { message }
            }
        }
    }
}

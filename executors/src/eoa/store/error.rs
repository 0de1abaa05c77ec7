use thiserror::Error;
use txqueue_core::error::EngineError;

use super::TransactionStatus;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionStoreError {
    #[error("Redis error: {message}")]
    RedisError { message: String },

    #[error("Serialization error: {message}")]
    DeserError { message: String },

    #[error("Transaction not found: {queue_id}")]
    TransactionNotFound { queue_id: String },

    #[error("Transaction {queue_id} already exists")]
    DuplicateQueueId { queue_id: String },

    #[error("Transaction {queue_id} changed underneath: expected {expected}, found {actual}")]
    StateConflict {
        queue_id: String,
        expected: TransactionStatus,
        actual: TransactionStatus,
    },

    #[error("Transaction {queue_id} cannot move from {from} to {to}")]
    InvalidTransition {
        queue_id: String,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("Transaction {queue_id}: field {field} cannot change")]
    ImmutableFieldChanged { queue_id: String, field: String },

    #[error("WATCH failed - state changed during operation")]
    WatchFailed,

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl TransactionStoreError {
    /// Another writer won the race. The caller should re-read and decide again.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            TransactionStoreError::StateConflict { .. } | TransactionStoreError::WatchFailed
        )
    }
}

impl From<redis::RedisError> for TransactionStoreError {
    fn from(error: redis::RedisError) -> Self {
        TransactionStoreError::RedisError {
            message: error.to_string(),
        }
    }
}

impl From<serde_json::Error> for TransactionStoreError {
    fn from(error: serde_json::Error) -> Self {
        TransactionStoreError::DeserError {
            message: error.to_string(),
        }
    }
}

impl From<TransactionStoreError> for EngineError {
    fn from(error: TransactionStoreError) -> Self {
        match error {
            TransactionStoreError::TransactionNotFound { queue_id } => {
                EngineError::NotFoundError { queue_id }
            }
            TransactionStoreError::StateConflict {
                queue_id, actual, ..
            } => EngineError::InvalidStateError {
                queue_id,
                status: actual.to_string(),
                message: "transaction changed concurrently, retry the request".to_string(),
            },
            TransactionStoreError::InvalidTransition { queue_id, from, to } => {
                EngineError::InvalidStateError {
                    queue_id,
                    status: from.to_string(),
                    message: format!("cannot move to {to}"),
                }
            }
            other => EngineError::StoreError {
                message: other.to_string(),
            },
        }
    }
}

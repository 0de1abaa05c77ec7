use std::time::Duration;

use txqueue_core::error::EngineError;

/// Domain-specific EOA execution errors mapped from RPC errors
#[derive(Debug, Clone, PartialEq)]
pub enum EoaExecutionError {
    /// Nonce already consumed on chain, the local high-water mark is stale
    NonceTooLow { message: String },

    /// Nonce too high - indicates nonce gap or desync
    NonceTooHigh { message: String },

    /// Transaction already known in mempool
    AlreadyKnown { message: String },

    /// Another transaction holds this nonce in the mempool with a higher bid
    ReplacementUnderpriced { message: String },

    /// Insufficient funds for transaction
    InsufficientFunds { message: String },

    /// Gas-related error (limit, estimation, etc.)
    GasError { message: String },

    /// Transaction pool is full or has limits
    PoolLimitExceeded { message: String },

    /// Account does not exist or invalid
    AccountError { message: String },

    /// The call reverts, resending it will not help
    ExecutionReverted { message: String },

    /// Timeouts, connection failures, rate limits. The node may or may not have seen the request.
    Transport { message: String },

    /// Any other error reported by the node
    RpcError { message: String },
}

/// Recovery strategy for an EOA execution error
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryStrategy {
    /// A failed broadcast may still have reached the mempool, track it as submitted
    pub possibly_sent: bool,
    /// Should we recycle the nonce
    pub recycle_nonce: bool,
    /// Should we re-derive the nonce high-water mark
    pub needs_resync: bool,
    /// Is this error retryable
    pub retryable: bool,
    /// Retry delay if retryable
    pub retry_delay: Option<Duration>,
}

/// Maps RPC errors to domain-specific EOA errors and determines recovery strategies
pub struct EoaErrorMapper;

impl EoaErrorMapper {
    pub fn map_send_error(error: &EngineError) -> EoaExecutionError {
        if let Some(response) = error.rpc_error_response() {
            return Self::map_ethereum_error(response.code, &response.message);
        }

        if error.is_transient() {
            EoaExecutionError::Transport {
                message: error.to_string(),
            }
        } else {
            EoaExecutionError::RpcError {
                message: error.to_string(),
            }
        }
    }

    /// Map Ethereum-specific errors that we need to act on
    fn map_ethereum_error(code: i64, message: &str) -> EoaExecutionError {
        let msg_lower = message.to_lowercase();
        let message = message.to_string();

        // code 3 is the standard revert error, other nodes only say so in the message
        if code == 3 || msg_lower.contains("execution reverted") || msg_lower.contains("revert") {
            return EoaExecutionError::ExecutionReverted { message };
        }

        if msg_lower.contains("nonce too low") {
            EoaExecutionError::NonceTooLow { message }
        } else if msg_lower.contains("nonce too high") {
            EoaExecutionError::NonceTooHigh { message }
        } else if msg_lower.contains("already known") || msg_lower.contains("duplicate") {
            EoaExecutionError::AlreadyKnown { message }
        } else if msg_lower.contains("replacement") && msg_lower.contains("underpriced") {
            EoaExecutionError::ReplacementUnderpriced { message }
        } else if msg_lower.contains("insufficient funds") {
            EoaExecutionError::InsufficientFunds { message }
        } else if msg_lower.contains("gas") || msg_lower.contains("underpriced") {
            EoaExecutionError::GasError { message }
        } else if msg_lower.contains("txpool") || msg_lower.contains("pool limit") {
            EoaExecutionError::PoolLimitExceeded { message }
        } else if msg_lower.contains("account") {
            EoaExecutionError::AccountError { message }
        } else {
            EoaExecutionError::RpcError {
                message: format!("RPC error code {code}: {message}"),
            }
        }
    }

    /// Determine recovery strategy for an EOA execution error
    pub fn get_recovery_strategy(error: &EoaExecutionError) -> RecoveryStrategy {
        match error {
            EoaExecutionError::NonceTooLow { .. } => RecoveryStrategy {
                possibly_sent: false,
                recycle_nonce: false,
                needs_resync: true,
                retryable: true,
                retry_delay: Some(Duration::from_secs(1)),
            },

            EoaExecutionError::NonceTooHigh { .. } => RecoveryStrategy {
                possibly_sent: false,
                recycle_nonce: true,
                needs_resync: true,
                retryable: true,
                retry_delay: Some(Duration::from_secs(10)),
            },

            EoaExecutionError::AlreadyKnown { .. } => RecoveryStrategy {
                possibly_sent: true,
                recycle_nonce: false,
                needs_resync: false,
                retryable: false,
                retry_delay: None,
            },

            EoaExecutionError::ReplacementUnderpriced { .. } => RecoveryStrategy {
                possibly_sent: false,
                recycle_nonce: false,
                needs_resync: true,
                retryable: true,
                retry_delay: Some(Duration::from_secs(10)),
            },

            EoaExecutionError::InsufficientFunds { .. } => RecoveryStrategy {
                possibly_sent: false,
                recycle_nonce: true,
                needs_resync: false,
                retryable: true,
                retry_delay: Some(Duration::from_secs(60)),
            },

            EoaExecutionError::GasError { .. } => RecoveryStrategy {
                possibly_sent: false,
                recycle_nonce: true,
                needs_resync: false,
                retryable: true,
                retry_delay: Some(Duration::from_secs(30)),
            },

            EoaExecutionError::PoolLimitExceeded { .. } => RecoveryStrategy {
                possibly_sent: false,
                recycle_nonce: true,
                needs_resync: false,
                retryable: true,
                retry_delay: Some(Duration::from_secs(30)),
            },

            EoaExecutionError::AccountError { .. } | EoaExecutionError::ExecutionReverted { .. } => {
                RecoveryStrategy {
                    possibly_sent: false,
                    recycle_nonce: true,
                    needs_resync: false,
                    retryable: false,
                    retry_delay: None,
                }
            }

            EoaExecutionError::Transport { .. } => RecoveryStrategy {
                possibly_sent: true,
                recycle_nonce: true,
                needs_resync: false,
                retryable: true,
                retry_delay: Some(Duration::from_secs(5)),
            },

            EoaExecutionError::RpcError { .. } => RecoveryStrategy {
                possibly_sent: false,
                recycle_nonce: true,
                needs_resync: false,
                retryable: true,
                retry_delay: Some(Duration::from_secs(5)),
            },
        }
    }
}

impl EoaExecutionError {
    /// Get the message for this error
    pub fn message(&self) -> &str {
        match self {
            EoaExecutionError::NonceTooLow { message }
            | EoaExecutionError::NonceTooHigh { message }
            | EoaExecutionError::AlreadyKnown { message }
            | EoaExecutionError::ReplacementUnderpriced { message }
            | EoaExecutionError::InsufficientFunds { message }
            | EoaExecutionError::GasError { message }
            | EoaExecutionError::PoolLimitExceeded { message }
            | EoaExecutionError::AccountError { message }
            | EoaExecutionError::ExecutionReverted { message }
            | EoaExecutionError::Transport { message }
            | EoaExecutionError::RpcError { message } => message,
        }
    }
}

use alloy::{
    primitives::Address,
    transports::{RpcError as AlloyRpcError, TransportErrorKind},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{chain::Chain, defs::AddressDef};

#[derive(Debug, Error, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcErrorKind {
    /// Server returned an error response.
    #[error("server returned an error response: {}", .0.as_display())]
    ErrorResp(RpcErrorResponse),

    /// Server returned a null response when a non-null response was expected.
    #[error("server returned a null response when a non-null response was expected")]
    NullResp,

    /// Rpc server returned an unsupported feature.
    #[error("unsupported feature: {message}")]
    UnsupportedFeature { message: String },

    /// Returned when a local pre-processing step fails.
    #[error("local usage error: {message}")]
    InternalError { message: String },

    /// JSON serialization error.
    #[error("serialization error: {message}")]
    SerError { message: String },

    /// JSON deserialization error.
    #[error("deserialization error: {message}, text: {text}")]
    DeserError { message: String, text: String },

    #[error("HTTP error {status}")]
    TransportHttpError { status: u16, body: String },

    #[error("Other transport error: {message}")]
    OtherTransportError { message: String },
}

#[derive(Debug, Serialize, Deserialize, Clone, utoipa::ToSchema)]
pub struct RpcErrorResponse {
    /// The error code.
    pub code: i64,
    /// The error message (if any).
    pub message: String,
    /// The error data (if any).
    pub data: Option<String>,
}

impl RpcErrorResponse {
    pub fn as_display(&self) -> String {
        format!(
            "code {}: {}{}",
            self.code,
            self.message,
            self.data
                .as_ref()
                .map(|data| format!(", data: {data}"))
                .unwrap_or_default()
        )
    }
}

/// Every error the engine can surface. The `errorCode` tag is the stable, machine readable
/// code that callers receive alongside the message and HTTP status.
#[derive(Error, Debug, Serialize, Clone, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "errorCode")]
pub enum EngineError {
    #[schema(title = "Validation Error")]
    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[schema(title = "Unknown Chain Error")]
    #[error("Chain {chain_id} is not configured")]
    #[serde(rename_all = "camelCase")]
    UnknownChainError { chain_id: u64 },

    #[schema(title = "Nonce Conflict Error")]
    #[error("Nonce conflict for {wallet_address} on chain {chain_id}: {message}")]
    #[serde(rename_all = "camelCase")]
    NonceConflictError {
        chain_id: u64,
        #[schema(value_type = AddressDef)]
        wallet_address: Address,
        message: String,
    },

    #[schema(title = "Submission Error")]
    #[error("Submission failed on chain {chain_id}: {message}")]
    #[serde(rename_all = "camelCase")]
    SubmissionError { chain_id: u64, message: String },

    #[schema(title = "Confirmation Timeout Error")]
    #[error("Transaction {queue_id} was not confirmed within {timeout_seconds} seconds")]
    #[serde(rename_all = "camelCase")]
    ConfirmationTimeoutError { queue_id: String, timeout_seconds: u64 },

    #[schema(title = "Transaction Not Found")]
    #[error("Transaction not found with queueId {queue_id}")]
    #[serde(rename = "TX_NOT_FOUND", rename_all = "camelCase")]
    NotFoundError { queue_id: String },

    #[schema(title = "Invalid State Error")]
    #[error("Transaction {queue_id} is {status}: {message}")]
    #[serde(rename_all = "camelCase")]
    InvalidStateError {
        queue_id: String,
        status: String,
        message: String,
    },

    #[schema(title = "EVM RPC Error")]
    #[error("RPC error on chain {chain_id} at {rpc_url}: {message}")]
    #[serde(rename_all = "camelCase")]
    RpcError {
        chain_id: u64,
        rpc_url: String,
        message: String,
        kind: RpcErrorKind,
    },

    #[schema(title = "RPC Configuration Error")]
    #[error("Bad RPC configuration: {message}")]
    RpcConfigError { message: String },

    #[schema(title = "Signing Error")]
    #[error("Signing error: {message}")]
    SigningError { message: String },

    #[schema(title = "Store Error")]
    #[error("Transaction store error: {message}")]
    StoreError { message: String },

    #[schema(title = "Engine Internal Error")]
    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl EngineError {
    /// The stable code serialized in the `errorCode` field.
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::ValidationError { .. } => "VALIDATION_ERROR",
            EngineError::UnknownChainError { .. } => "UNKNOWN_CHAIN_ERROR",
            EngineError::NonceConflictError { .. } => "NONCE_CONFLICT_ERROR",
            EngineError::SubmissionError { .. } => "SUBMISSION_ERROR",
            EngineError::ConfirmationTimeoutError { .. } => "CONFIRMATION_TIMEOUT_ERROR",
            EngineError::NotFoundError { .. } => "TX_NOT_FOUND",
            EngineError::InvalidStateError { .. } => "INVALID_STATE_ERROR",
            EngineError::RpcError { .. } => "RPC_ERROR",
            EngineError::RpcConfigError { .. } => "RPC_CONFIG_ERROR",
            EngineError::SigningError { .. } => "SIGNING_ERROR",
            EngineError::StoreError { .. } => "STORE_ERROR",
            EngineError::InternalError { .. } => "INTERNAL_ERROR",
        }
    }

    /// Transport level failures that are worth retrying as-is.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::RpcError { kind, .. } => match kind {
                RpcErrorKind::ErrorResp(_) | RpcErrorKind::UnsupportedFeature { .. } => false,
                RpcErrorKind::TransportHttpError { status, .. } => {
                    *status == 429 || *status >= 500
                }
                _ => true,
            },
            EngineError::StoreError { .. } => true,
            _ => false,
        }
    }

    /// The JSON-RPC error payload, when the node answered with one.
    pub fn rpc_error_response(&self) -> Option<&RpcErrorResponse> {
        match self {
            EngineError::RpcError {
                kind: RpcErrorKind::ErrorResp(response),
                ..
            } => Some(response),
            _ => None,
        }
    }

    pub fn not_found(queue_id: impl Into<String>) -> Self {
        EngineError::NotFoundError {
            queue_id: queue_id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::ValidationError {
            message: message.into(),
        }
    }
}

pub trait AlloyRpcErrorToEngineError {
    fn to_engine_error(&self, chain: &impl Chain) -> EngineError;
}

fn to_engine_rpc_error_kind(err: &AlloyRpcError<TransportErrorKind>) -> RpcErrorKind {
    match err {
        AlloyRpcError::ErrorResp(err) => RpcErrorKind::ErrorResp(RpcErrorResponse {
            code: err.code,
            message: err.message.to_string(),
            data: err.data.as_ref().map(|data| data.to_string()),
        }),
        AlloyRpcError::NullResp => RpcErrorKind::NullResp,
        AlloyRpcError::UnsupportedFeature(feature) => RpcErrorKind::UnsupportedFeature {
            message: feature.to_string(),
        },
        AlloyRpcError::LocalUsageError(err) => RpcErrorKind::InternalError {
            message: err.to_string(),
        },
        AlloyRpcError::SerError(err) => RpcErrorKind::SerError {
            message: err.to_string(),
        },
        AlloyRpcError::DeserError { err, text } => RpcErrorKind::DeserError {
            message: err.to_string(),
            text: text.to_string(),
        },
        AlloyRpcError::Transport(err) => match err {
            TransportErrorKind::HttpError(err) => RpcErrorKind::TransportHttpError {
                status: err.status,
                body: err.body.to_string(),
            },
            _ => RpcErrorKind::OtherTransportError {
                message: err.to_string(),
            },
        },
    }
}

impl AlloyRpcErrorToEngineError for AlloyRpcError<TransportErrorKind> {
    fn to_engine_error(&self, chain: &impl Chain) -> EngineError {
        EngineError::RpcError {
            chain_id: chain.chain_id(),
            rpc_url: chain.rpc_url().to_string(),
            message: self.to_string(),
            kind: to_engine_rpc_error_kind(self),
        }
    }
}

// Transaction Queue Operations

use axum::{
    debug_handler,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use txqueue_core::transaction::TransactionIntent;
use txqueue_executors::eoa::{CancelResponse, EnqueueResponse, TransactionRecord};

use crate::http::{
    error::{ApiEngineError, EngineResult},
    extractors::EngineJson,
    server::EngineServerState,
    types::{ErrorResponse, SuccessResponse},
};

#[utoipa::path(
    post,
    operation_id = "enqueueTransaction",
    path = "/transaction/enqueue",
    tag = "Transaction",
    request_body(content = TransactionIntent, description = "Transaction to queue", content_type = "application/json"),
    responses(
        (status = 202, description = "Transaction accepted into the queue", body = SuccessResponse<EnqueueResponse>, content_type = "application/json"),
        (status = 400, description = "Invalid intent, unknown chain or wallet without a signer", body = ErrorResponse, content_type = "application/json"),
    )
)]
/// Enqueue Transaction
///
/// Validate and persist a transaction intent. The returned `queueId` can be polled for status
/// straight away; nonce, gas and broadcast happen in the background.
#[debug_handler]
pub async fn enqueue_transaction(
    State(state): State<EngineServerState>,
    EngineJson(intent): EngineJson<TransactionIntent>,
) -> Result<impl IntoResponse, ApiEngineError> {
    let response = state.queue_manager.enqueue(intent).await.api_error()?;

    tracing::info!(queue_id = %response.queue_id, "Transaction queued");

    Ok((StatusCode::ACCEPTED, Json(SuccessResponse::new(response))))
}

#[utoipa::path(
    get,
    operation_id = "getTransactionStatus",
    path = "/transaction/status/{queueId}",
    tag = "Transaction",
    responses(
        (status = 200, description = "Current state of the transaction", body = SuccessResponse<TransactionRecord>, content_type = "application/json"),
        (status = 404, description = "No transaction with this queue id", body = ErrorResponse, content_type = "application/json"),
    ),
    params(
        ("queueId" = String, Path, description = "Queue id returned by enqueue"),
    )
)]
/// Get Transaction Status
#[debug_handler]
pub async fn get_transaction_status(
    State(state): State<EngineServerState>,
    Path(queue_id): Path<String>,
) -> Result<impl IntoResponse, ApiEngineError> {
    let record = state.queue_manager.get_status(&queue_id).await.api_error()?;

    Ok((StatusCode::OK, Json(SuccessResponse::new(record))))
}

#[utoipa::path(
    post,
    operation_id = "cancelTransaction",
    path = "/transaction/cancel/{queueId}",
    tag = "Transaction",
    responses(
        (status = 200, description = "Transaction cancellation result", body = SuccessResponse<CancelResponse>, content_type = "application/json"),
        (status = 404, description = "No transaction with this queue id", body = ErrorResponse, content_type = "application/json"),
        (status = 409, description = "Transaction already reached a final state", body = ErrorResponse, content_type = "application/json"),
    ),
    params(
        ("queueId" = String, Path, description = "Queue id to cancel"),
    )
)]
/// Cancel Transaction
///
/// Queued transactions are cancelled immediately. Submitted ones are replaced at the same nonce
/// by a zero value self transfer, and become `cancelled` once that replacement is mined.
#[debug_handler]
pub async fn cancel_transaction(
    State(state): State<EngineServerState>,
    Path(queue_id): Path<String>,
) -> Result<impl IntoResponse, ApiEngineError> {
    tracing::info!(queue_id = %queue_id, "Processing transaction cancellation request");

    let response = state.queue_manager.cancel(&queue_id).await.api_error()?;

    tracing::info!(
        queue_id = %queue_id,
        result = ?response.result,
        "Transaction cancellation processed"
    );

    Ok((StatusCode::OK, Json(SuccessResponse::new(response))))
}

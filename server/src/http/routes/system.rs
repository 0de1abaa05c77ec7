use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    config::StoreBackend,
    http::{server::EngineServerState, types::SuccessResponse},
};

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// `redis` or `memory`
    pub store: &'static str,
    pub chain_ids: Vec<u64>,
    pub wallets: usize,
}

#[utoipa::path(
    get,
    operation_id = "health",
    path = "/system/health",
    tag = "System",
    responses(
        (status = 200, description = "Engine is up", body = SuccessResponse<HealthResponse>, content_type = "application/json"),
    )
)]
/// Health Check
pub async fn health(State(state): State<EngineServerState>) -> impl IntoResponse {
    let store = match state.queue_manager.store_backend {
        StoreBackend::Redis => "redis",
        StoreBackend::Memory => "memory",
    };

    (
        StatusCode::OK,
        Json(SuccessResponse::new(HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            store,
            chain_ids: state.queue_manager.chain_ids(),
            wallets: state.queue_manager.wallet_count(),
        })),
    )
}

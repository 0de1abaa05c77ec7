use serde::{Deserialize, Serialize};
use txqueue_core::error::EngineError;

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct SuccessResponse<T> {
    pub result: T,
}

impl<T> SuccessResponse<T> {
    pub fn new(result: T) -> Self {
        Self { result }
    }
}

/// Shape of every error body, documented for the OpenAPI schema.
/// The handlers build it through `ApiEngineError`.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: ErrorResponseInner,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponseInner {
    pub message: String,
    pub status_code: u16,
    pub error_code: String,
    pub details: EngineError,
}

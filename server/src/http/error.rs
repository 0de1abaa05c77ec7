use axum::{Json, http::StatusCode, response::IntoResponse};
use serde_json::json;
use txqueue_core::error::{EngineError, RpcErrorKind};

/// Pairs an `EngineError` with its HTTP status so handlers can return it directly
pub struct ApiEngineError(pub EngineError);

impl From<EngineError> for ApiEngineError {
    fn from(error: EngineError) -> Self {
        ApiEngineError(error)
    }
}

impl IntoResponse for ApiEngineError {
    fn into_response(self) -> axum::response::Response {
        let code = self.status_code();

        self.with_status(code)
    }
}

impl ApiEngineError {
    fn with_status(self, status: StatusCode) -> axum::response::Response {
        if status.is_server_error() {
            tracing::error!(error = ?self.0, status = status.as_u16(), "Request failed");
        }

        (
            status,
            Json(json!({
                "error": {
                    "message": self.0.to_string(),
                    "statusCode": status.as_u16(),
                    "errorCode": self.0.error_code(),
                    "details": self.0
                }
            })),
        )
            .into_response()
    }

    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            EngineError::ValidationError { .. } => StatusCode::BAD_REQUEST,
            EngineError::UnknownChainError { .. } => StatusCode::BAD_REQUEST,
            EngineError::NotFoundError { .. } => StatusCode::NOT_FOUND,
            EngineError::InvalidStateError { .. } => StatusCode::CONFLICT,
            EngineError::NonceConflictError { .. } => StatusCode::CONFLICT,
            EngineError::RpcError { kind, .. } => match kind {
                RpcErrorKind::NullResp => StatusCode::BAD_GATEWAY,
                RpcErrorKind::ErrorResp(_) => StatusCode::BAD_GATEWAY,
                RpcErrorKind::UnsupportedFeature { .. } => StatusCode::NOT_IMPLEMENTED,
                RpcErrorKind::TransportHttpError { .. } => StatusCode::BAD_GATEWAY,
                _ => StatusCode::SERVICE_UNAVAILABLE,
            },
            EngineError::SubmissionError { .. } => StatusCode::BAD_GATEWAY,
            EngineError::ConfirmationTimeoutError { .. }
            | EngineError::RpcConfigError { .. }
            | EngineError::SigningError { .. }
            | EngineError::StoreError { .. }
            | EngineError::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub trait EngineResult<T, E> {
    fn api_error(self) -> Result<T, ApiEngineError>;
}

impl<T, E: Into<EngineError>> EngineResult<T, E> for Result<T, E> {
    fn api_error(self) -> Result<T, ApiEngineError> {
        self.map_err(|e| ApiEngineError(e.into()))
    }
}

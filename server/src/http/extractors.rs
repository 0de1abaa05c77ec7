use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
};
use txqueue_core::error::EngineError;

use crate::http::error::ApiEngineError;

/// JSON body extractor whose rejections use the engine error envelope
pub struct EngineJson<T>(pub T);

impl<T, S> FromRequest<S> for EngineJson<T>
where
    T: serde::de::DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiEngineError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(data)) => Ok(EngineJson(data)),
            Err(rejection) => {
                let message = match rejection {
                    JsonRejection::JsonDataError(err) => format!("Invalid JSON data: {}", err),
                    JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
                    JsonRejection::MissingJsonContentType(_) => {
                        "Missing or invalid Content-Type header. Expected application/json"
                            .to_string()
                    }
                    JsonRejection::BytesRejection(err) => {
                        format!("Failed to read request body: {}", err)
                    }
                    _ => "Invalid JSON request".to_string(),
                };

                Err(ApiEngineError(EngineError::ValidationError { message }))
            }
        }
    }
}

// SPDX-License-Identifier: PolyForm-Shield-1.0

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use model_runtime::PredictError;
use protocol::ErrorResponse;
use serving::ServingError;
use tracing::warn;

/// Errors returned by gateway handlers, rendered as `{error, code}` JSON.
#[derive(Debug)]
pub enum ApiError {
    Serving(ServingError),
    Unauthorized,
    /// `DELETE /models/{name}` on a key that was not registered.
    ModelNotLoaded { name: String, version: String },
    /// Request body or query string could not be decoded.
    Rejected { status: StatusCode, message: String },
}

impl From<ServingError> for ApiError {
    fn from(err: ServingError) -> Self {
        ApiError::Serving(err)
    }
}

impl From<model_runtime::UnsupportedKindError> for ApiError {
    fn from(err: model_runtime::UnsupportedKindError) -> Self {
        ApiError::Serving(ServingError::UnsupportedKind(err))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::ModelNotLoaded { .. } => StatusCode::NOT_FOUND,
            ApiError::Rejected { status, .. } => *status,
            ApiError::Serving(err) => match err {
                ServingError::NotFound { .. } => StatusCode::NOT_FOUND,
                ServingError::UnsupportedKind(_) | ServingError::InvalidBatchSize => {
                    StatusCode::BAD_REQUEST
                }
                ServingError::Predict(PredictError::InvalidInput(_)) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                // The handle was unloaded between lookup and execution.
                ServingError::Predict(PredictError::NotLoaded) => StatusCode::NOT_FOUND,
                ServingError::Backpressure { .. } | ServingError::ShuttingDown => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                ServingError::Load(_)
                | ServingError::Predict(PredictError::Execution(_))
                | ServingError::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Unauthorized => "invalid or missing API key".to_string(),
            ApiError::ModelNotLoaded { name, version } => {
                format!("model '{name}' version '{version}' not found")
            }
            ApiError::Rejected { message, .. } => message.clone(),
            ApiError::Serving(err) => err.to_string(),
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Serving(err) if err.is_retryable())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("gateway: request failed with {}: {}", status, self.message());
        }

        let body = ErrorResponse {
            error: self.message(),
            code: status.as_u16(),
        };
        let mut response = (status, Json(body)).into_response();
        if self.is_retryable() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}

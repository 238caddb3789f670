//! Maps the crate-wide `FaasError` taxonomy onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use faas_common::FaasError;
use serde_json::json;

/// Newtype so we can implement `IntoResponse` for `FaasError` without
/// owning that type (it lives in `faas-common`, which stays framework
/// agnostic).
pub struct ApiError(pub FaasError);

impl From<FaasError> for ApiError {
    fn from(err: FaasError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            FaasError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            FaasError::StartFailure(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            FaasError::ReadinessTimeout => (
                StatusCode::GATEWAY_TIMEOUT,
                "container timed out starting".to_string(),
            ),
            FaasError::ProxyTransport(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            FaasError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            FaasError::Storage(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            FaasError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

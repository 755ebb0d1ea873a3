//! Maps [`ServiceError`] onto the HTTP surface's status codes (spec.md §6,
//! §7). A thin wrapper rather than implementing `IntoResponse` directly on
//! `ServiceError` itself, since that type lives in `svc-core` and must
//! stay free of any web-framework dependency.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use svc_core::ServiceError;

pub struct ApiError(pub ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.kind().http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

//! API error mapping.
//!
//! Each scheduler error kind maps onto exactly one HTTP status; the JSON
//! body carries the machine-readable code and whether a retry is sensible.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use vodworks_core::SchedulerError;

pub struct ApiError(pub SchedulerError);

pub type ApiResult<T> = Result<T, ApiError>;

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, code = self.0.error_code(), "Request failed");
        } else {
            tracing::debug!(error = %self.0, code = self.0.error_code(), "Request rejected");
        }
        let body = Json(json!({
            "error": self.0.to_string(),
            "code": self.0.error_code(),
            "retryable": self.0.is_retryable(),
        }));
        (status, body).into_response()
    }
}

//! HTTP error responses
//!
//! Every error renders as `{"error": "<message>"}`; admission rejections also
//! carry a machine-readable `reason`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use job_engine::RejectReason;

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Rejected(RejectReason),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Rejected(RejectReason::RateLimitExceeded) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Rejected(RejectReason::AtCapacity | RejectReason::ShuttingDown) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ApiError::NotFound(msg) | ApiError::BadRequest(msg) => {
                serde_json::json!({ "error": msg })
            }
            ApiError::Rejected(reason) => serde_json::json!({
                "error": reason.message(),
                "reason": reason.label(),
            }),
        };

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;
use serde_json::json;

/// Internal error carrying an opaque static message.  Context is logged with
/// `tracing` at the failure site; the message itself stays generic.
#[derive(Debug)]
pub struct AppError(pub &'static str);

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for AppError {}

/// Error surfaced to a synchronous caller (the outbound-call trigger and the
/// follow-up job endpoint).  Unlike webhook acknowledgement, someone is
/// waiting on these responses, so the status and message carry real detail.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} {}", self.status, self.message)
    }
}

impl From<AppError> for ApiError {
    fn from(e: AppError) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.0)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

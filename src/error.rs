//! Error codes and the JSON error body returned by HTTP routes.
//!
//! DESIGN
//! ======
//! Every domain error enum implements [`ErrorCode`]. Routes convert domain
//! errors into an [`ApiError`] (status + code + message), which renders as
//! `{"error": "...", "code": "E_..."}`. The UI client parses the same body
//! back into its own error type.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};

/// Stable machine-readable code attached to every surfaced error.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

/// Wire shape of an error response body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default)]
    pub code: String,
}

/// An error ready to be rendered by an Axum handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, err: &(impl ErrorCode + ?Sized)) -> Self {
        Self { status, code: err.error_code(), message: err.to_string() }
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, code: "E_VALIDATION", message: message.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, code = self.code, error = %self.message, "request failed");
        } else {
            tracing::warn!(status = %self.status, code = self.code, error = %self.message, "request rejected");
        }
        let body = ErrorBody { error: self.message, code: self.code.to_owned() };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;

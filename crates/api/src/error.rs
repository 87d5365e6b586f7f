//! API error types with HTTP response mapping.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{DomainError, ErrorKind};
use serde::Serialize;
use thiserror::Error;

/// A request parameter that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParamError {
    #[serde(rename = "type")]
    pub error_type: &'static str,
    pub code: &'static str,
    pub message: String,
    pub param: String,
}

impl ParamError {
    /// A required parameter was absent or empty.
    pub fn missing(param: &str) -> Self {
        Self {
            error_type: "invalid_request_error",
            code: "parameter_missing",
            message: format!("We expected a value for {param}, but none was provided"),
            param: param.to_string(),
        }
    }
}

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// One or more request parameters are invalid.
    #[error("Invalid request: {} parameter(s) rejected", .0.len())]
    Validation(Vec<ParamError>),

    /// The body could not be read as JSON.
    #[error("Malformed request body: {0}")]
    BadRequest(String),

    /// A command failed.
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl ApiError {
    /// Returns the HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Domain(err) => status_for(err.kind()),
        }
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::LockContention => StatusCode::CONFLICT,
        ErrorKind::TransitionRejected => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::StorageFailure | ErrorKind::RelayFailure => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        metrics::counter!("http_errors_total", "status" => status.as_u16().to_string())
            .increment(1);

        let body = match self {
            ApiError::Validation(errors) => serde_json::json!({ "errors": errors }),
            ApiError::BadRequest(message) => serde_json::json!({ "error": message }),
            ApiError::Domain(err) => {
                if status.is_server_error() {
                    tracing::error!(error = %err, kind = %err.kind(), "command failed");
                }
                serde_json::json!({ "error": err.to_string(), "kind": err.kind().as_str() })
            }
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

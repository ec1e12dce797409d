//! Error types for sono-eval
//!
//! Every domain failure kind maps to its own status and machine code; store
//! failures collapse into an opaque 500 after being logged.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Malformed authoring input (400, VALIDATION_ERROR)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Malformed ledger input (400, INVALID_INPUT)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Conflict (409) - e.g., protocol key already taken
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Selection path rejected by the taxonomy (422)
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Missing or malformed caller identity (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<sono_common::Error> for ApiError {
    fn from(err: sono_common::Error) -> Self {
        use sono_common::Error;

        match err {
            Error::NotFound(msg) => ApiError::NotFound(msg),
            Error::Validation(msg) => ApiError::Validation(msg),
            Error::InvalidInput(msg) => ApiError::InvalidInput(msg),
            Error::Conflict(msg) => ApiError::Conflict(msg),
            Error::InvalidPath(msg) => ApiError::InvalidPath(msg),
            other => {
                error!(error = %other, "Request failed with store error");
                ApiError::Internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg),
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::InvalidPath(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_PATH", msg)
            }
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg),
            // Details already logged; callers get an opaque message
            ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Internal server error".to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

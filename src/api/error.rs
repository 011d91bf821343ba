//! API error types and conversions

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::storage::StorageError;

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;

/// API error types
///
/// One variant per error kind the edge can surface; the HTTP mapping
/// lives in `IntoResponse` so handlers just use `?`.
#[derive(Debug)]
pub enum ApiError {
    /// Invalid request parameters
    BadRequest(String),

    /// No usable session or token
    Unauthorized(String),

    /// Authenticated but not allowed to touch this resource
    Forbidden(String),

    /// Resource not found
    NotFound(String),

    /// Optimistic-concurrency conflict; carries the stored version
    VersionConflict { current: i64 },

    /// Storage operation failed
    StorageError(String),

    /// Feature disabled or dependency not wired up
    Unavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Version conflicts carry the current version so clients can
        // refresh and retry.
        if let ApiError::VersionConflict { current } = self {
            let body = Json(json!({
                "error": "version_conflict",
                "current_version": current,
            }));
            return (StatusCode::CONFLICT, body).into_response();
        }

        let (status, error_message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::StorageError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::VersionConflict { .. } => unreachable!("handled above"),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => ApiError::NotFound(what),
            StorageError::VersionConflict { current } => ApiError::VersionConflict { current },
            other => ApiError::StorageError(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Unavailable(err.to_string())
    }
}

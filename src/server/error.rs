//! Mapping of [`TileError`] onto HTTP responses.
//!
//! | Error                                  | Status |
//! |----------------------------------------|--------|
//! | unknown identifier, tile out of range  | 404    |
//! | malformed parameter                    | 400    |
//! | retryable upstream failure             | 503    |
//! | decode, I/O, encode, internal          | 500    |

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::error::{IoError, TileError};

/// Seconds a client should wait before retrying a 503.
const RETRY_AFTER_SECS: u32 = 1;

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "invalid_parameter")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    pub status: u16,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>, status: StatusCode) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: status.as_u16(),
        }
    }
}

/// Status code and error type of `err`.
pub fn classify(err: &TileError) -> (StatusCode, &'static str) {
    match err {
        TileError::NotFound { .. } | TileError::Io(IoError::NotFound(_)) => {
            (StatusCode::NOT_FOUND, "not_found")
        }
        TileError::TileOutOfRange { .. } => (StatusCode::NOT_FOUND, "tile_out_of_range"),
        TileError::Parameter { .. } => (StatusCode::BAD_REQUEST, "invalid_parameter"),
        TileError::Io(io) if io.is_retryable() => {
            (StatusCode::SERVICE_UNAVAILABLE, "upstream_unavailable")
        }
        TileError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
        TileError::Source { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "source_error"),
        TileError::Encode { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "encode_error"),
        TileError::CacheCorruption { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "cache_corruption"),
        TileError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    }
}

/// Convert TileError to HTTP response.
///
/// 5xx errors are logged at ERROR level, 404s at DEBUG (common and
/// expected while panning a map), other client errors at WARN.
impl IntoResponse for TileError {
    fn into_response(self) -> Response {
        let (status, error_type) = classify(&self);
        let message = self.to_string();

        if status.is_server_error() {
            error!(error_type, status = status.as_u16(), "Server error: {}", message);
        } else if status == StatusCode::NOT_FOUND {
            debug!(error_type, status = status.as_u16(), "Not found: {}", message);
        } else {
            warn!(error_type, status = status.as_u16(), "Client error: {}", message);
        }

        let body = Json(ErrorResponse::new(error_type, message, status));
        if status == StatusCode::SERVICE_UNAVAILABLE {
            (status, [(header::RETRY_AFTER, RETRY_AFTER_SECS.to_string())], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use tidings_core::{ClientError, CursorError, StorageError};
use tidings_engine::TimelineError;

/// Errors surfaced by HTTP handlers.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Timeline(#[from] TimelineError),

    #[error("Invalid cursor: {0}")]
    Cursor(#[from] CursorError),

    #[error("Could not publish event: {0}")]
    Publish(#[from] ClientError),

    #[error("Trim failed: {0}")]
    Trim(#[from] StorageError),

    #[error("Could not encode event: {0}")]
    Encode(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorMessage,
}

#[derive(Serialize)]
struct ErrorMessage {
    code: &'static str,
    message: String,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Timeline(TimelineError::InvalidPageSize) => {
                (StatusCode::BAD_REQUEST, "invalid_page_size")
            }
            ApiError::Cursor(_) => (StatusCode::BAD_REQUEST, "invalid_cursor"),
            ApiError::Timeline(TimelineError::Cache(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "cache_unavailable")
            }
            ApiError::Publish(_) => (StatusCode::SERVICE_UNAVAILABLE, "bus_unavailable"),
            ApiError::Trim(_) => (StatusCode::SERVICE_UNAVAILABLE, "cache_unavailable"),
            ApiError::Encode(_) => (StatusCode::INTERNAL_SERVER_ERROR, "encode_failed"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code, "request failed");
        }

        let body = ErrorBody {
            error: ErrorMessage {
                code,
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

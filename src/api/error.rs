//! Client-facing errors of the HTTP surface

use crate::error::BgRemovalError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Message returned when the upload does not declare an image type
pub const INVALID_FILE_TYPE_MESSAGE: &str = "File must be an image";

/// Errors a request to the upload route can end in
#[derive(Debug, Error)]
pub enum ApiError {
    /// The client sent something that is not an image upload (400)
    #[error("{0}")]
    InvalidInput(String),

    /// Reading, decoding or processing failed (500)
    #[error("Error processing image: {0}")]
    InternalProcessing(String),
}

impl ApiError {
    #[must_use]
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn internal<E: std::fmt::Display>(error: E) -> Self {
        Self::InternalProcessing(error.to_string())
    }

    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::InternalProcessing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<BgRemovalError> for ApiError {
    fn from(error: BgRemovalError) -> Self {
        Self::InternalProcessing(error.message())
    }
}

/// JSON error body: `{"detail": "..."}`
#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            Self::InvalidInput(msg) => tracing::warn!(%status, "Rejected upload: {msg}"),
            Self::InternalProcessing(msg) => tracing::error!(%status, "Processing failed: {msg}"),
        }
        (
            status,
            Json(ErrorBody {
                detail: self.to_string(),
            }),
        )
            .into_response()
    }
}

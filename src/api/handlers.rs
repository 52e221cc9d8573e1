//! Route handlers

use super::error::{ApiError, INVALID_FILE_TYPE_MESSAGE};
use super::AppState;
use axum::body::Bytes;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

/// Multipart field carrying the upload
pub const UPLOAD_FIELD: &str = "file";

const OUTPUT_CONTENT_DISPOSITION: &str = "attachment; filename=no_bg_image.png";

#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// `GET /`
pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Background Removal API is running",
    })
}

/// `GET /health`
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

/// `POST /remove-background`
///
/// Expects a multipart form with an image in the `file` field and answers with
/// the cut-out as a PNG attachment.
pub async fn remove_background(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("remove_background", %request_id);

    async move {
        let mut multipart = multipart.map_err(|e| ApiError::invalid_input(e.body_text()))?;
        let upload = read_upload(&mut multipart).await?;
        tracing::info!(
            file_name = %upload.file_name,
            content_type = %upload.content_type,
            input_bytes = upload.bytes.len(),
            "Processing upload"
        );

        let png = state
            .remover
            .remove_background(Vec::from(upload.bytes))
            .await?;
        tracing::info!(output_bytes = png.len(), "Background removed");

        Ok((
            [
                (header::CONTENT_TYPE, "image/png"),
                (header::CONTENT_DISPOSITION, OUTPUT_CONTENT_DISPOSITION),
            ],
            png,
        )
            .into_response())
    }
    .instrument(span)
    .await
}

struct Upload {
    file_name: String,
    content_type: String,
    bytes: Bytes,
}

/// Find the upload field, check its declared type, then read it fully
///
/// Unrelated form fields are skipped. The body is only read once the type
/// check passed.
async fn read_upload(multipart: &mut Multipart) -> Result<Upload, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::internal(e.body_text()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let content_type = field.content_type().unwrap_or_default().to_string();
        if !content_type.starts_with("image/") {
            return Err(ApiError::invalid_input(INVALID_FILE_TYPE_MESSAGE));
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::internal(e.body_text()))?;

        return Ok(Upload {
            file_name,
            content_type,
            bytes,
        });
    }

    Err(ApiError::invalid_input(format!(
        "Missing '{UPLOAD_FIELD}' field in multipart form"
    )))
}

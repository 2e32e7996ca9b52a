//! Folder archive handler.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::Response,
};
use std::sync::Arc;

use crate::web::error::ApiError;
use crate::web::handlers::{content_disposition_header, AppState};
use crate::web::middleware::AuthUser;

/// GET /api/folders/:id/archive - Download a folder subtree as a zip.
///
/// The archive is fully built before the first byte is sent, so failures
/// surface as a JSON error rather than a truncated stream.
pub async fn download_archive(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    Path(folder_id): Path<String>,
) -> Result<Response, ApiError> {
    let export = state
        .engine
        .export_folder(claims.owner_id(), &folder_id)
        .await?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(header::CONTENT_LENGTH, export.size)
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition_header("attachment", &export.filename),
        )
        .header(header::CACHE_CONTROL, "no-store")
        .body(Body::from_stream(export.stream))
        .map_err(|e| {
            tracing::error!("Failed to build response: {}", e);
            ApiError::internal("Failed to build response")
        })
}

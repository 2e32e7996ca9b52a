//! File API handlers: upload, content delivery, metadata and signed URLs.

use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use crate::delivery::Delivery;
use crate::ingest::UploadStatus;
use crate::web::dto::{
    ApiResponse, ContentQuery, FileResponse, SignedUrlRequest, SignedUrlResponse,
    UpdateEntryRequest, ValidatedJson,
};
use crate::web::error::ApiError;
use crate::web::handlers::{content_disposition_header, range_header, AppState};
use crate::web::middleware::{apply_content_headers, AuthUser, OptionalAuthUser};
use crate::StowageError;

/// Turn an open delivery into a streaming response.
pub(crate) fn delivery_response(delivery: Delivery) -> Result<Response, ApiError> {
    let status = if delivery.range.is_some() {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, delivery.content_type.as_str())
        .header(header::CONTENT_LENGTH, delivery.reader.len)
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition_header("inline", &delivery.filename),
        );
    if let Some(content_range) = delivery.content_range() {
        builder = builder.header(header::CONTENT_RANGE, content_range);
    }
    if delivery.accept_ranges {
        builder = builder.header(header::ACCEPT_RANGES, "bytes");
    }
    if let Some(modified) = delivery.reader.info.modified {
        builder = builder.header(
            header::LAST_MODIFIED,
            modified.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        );
    }

    let mut response = builder
        .body(Body::from_stream(delivery.reader.stream))
        .map_err(|e| {
            tracing::error!("Failed to build response: {}", e);
            ApiError::internal("Failed to build response")
        })?;
    apply_content_headers(response.headers_mut());
    Ok(response)
}

/// POST /api/files - Upload one or more files (multipart).
///
/// 200 when every file was stored, 207 when some failed, 500 when all failed.
pub async fn upload_files(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let report = state.engine.ingest(claims.owner_id(), multipart).await?;

    let status = match report.status {
        UploadStatus::Complete => StatusCode::OK,
        UploadStatus::Partial => StatusCode::MULTI_STATUS,
        UploadStatus::Failed => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::info!(
        owner = claims.owner_id(),
        stored = report.stored.len(),
        failed = report.failed.len(),
        "Upload finished"
    );

    Ok((status, Json(ApiResponse::new(report))).into_response())
}

async fn serve_content(
    state: &AppState,
    session: Option<&str>,
    token: Option<&str>,
    file_id: &str,
    headers: &HeaderMap,
) -> Result<Response, ApiError> {
    let range = range_header(headers);
    let delivery = match (token, session) {
        (Some(token), _) => {
            state
                .engine
                .open_with_capability(token, file_id, range)
                .await?
        }
        (None, Some(owner_id)) => state.engine.open_for_owner(owner_id, file_id, range).await?,
        (None, None) => return Err(ApiError::unauthorized("Missing authorization")),
    };
    delivery_response(delivery)
}

/// GET /api/files/:id - Stream file content (session or `?token=`).
pub async fn get_content(
    State(state): State<Arc<AppState>>,
    OptionalAuthUser(claims): OptionalAuthUser,
    Path(file_id): Path<String>,
    Query(query): Query<ContentQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    serve_content(
        &state,
        claims.as_ref().map(|c| c.owner_id()),
        query.token.as_deref(),
        &file_id,
        &headers,
    )
    .await
}

/// GET /api/files/:id/content/:filename - Same as [`get_content`]; the filename is cosmetic.
pub async fn get_named_content(
    State(state): State<Arc<AppState>>,
    OptionalAuthUser(claims): OptionalAuthUser,
    Path((file_id, _filename)): Path<(String, String)>,
    Query(query): Query<ContentQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    serve_content(
        &state,
        claims.as_ref().map(|c| c.owner_id()),
        query.token.as_deref(),
        &file_id,
        &headers,
    )
    .await
}

/// GET /api/files/:id/info - File metadata.
pub async fn get_file_info(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    Path(file_id): Path<String>,
) -> Result<Json<ApiResponse<FileResponse>>, ApiError> {
    let file = state.engine.get_file(claims.owner_id(), &file_id).await?;
    Ok(Json(ApiResponse::new(file.into())))
}

/// PATCH /api/files/:id - Rename and/or move a file.
pub async fn update_file(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    Path(file_id): Path<String>,
    ValidatedJson(req): ValidatedJson<UpdateEntryRequest>,
) -> Result<Json<ApiResponse<FileResponse>>, ApiError> {
    let update = req.file_update();
    if update.is_empty() {
        return Err(ApiError::bad_request("Nothing to update"));
    }

    let file = state
        .engine
        .update_file(claims.owner_id(), &file_id, &update)
        .await?;
    Ok(Json(ApiResponse::new(file.into())))
}

/// DELETE /api/files/:id - Delete a file and its bytes.
pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    Path(file_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.engine.delete_file(claims.owner_id(), &file_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/files/:id/signed-url - Mint a capability URL for a file.
pub async fn issue_signed_url(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    Path(file_id): Path<String>,
    ValidatedJson(req): ValidatedJson<SignedUrlRequest>,
) -> Result<Json<ApiResponse<SignedUrlResponse>>, ApiError> {
    let (file, capability) = state
        .engine
        .issue_capability(claims.owner_id(), &file_id, req.ttl_seconds)
        .await?;

    let filename = req.filename.as_deref().unwrap_or(&file.filename);
    Ok(Json(ApiResponse::new(SignedUrlResponse::new(
        &state.public_base_url,
        filename,
        capability,
    ))))
}

/// GET /api/static/*path - Bytes by path under the owner's legacy layouts.
pub async fn get_static(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let delivery = state
        .engine
        .open_legacy_static(claims.owner_id(), &path, range_header(&headers))
        .await
        .map_err(|e| match e {
            StowageError::NotFound(_) => ApiError::not_found("File not found"),
            other => other.into(),
        })?;
    delivery_response(delivery)
}

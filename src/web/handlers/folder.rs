//! Folder API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::web::dto::{
    ApiResponse, ChildrenResponse, CreateFolderRequest, FolderListResponse, FolderResponse,
    ListFoldersQuery, UpdateEntryRequest, ValidatedJson,
};
use crate::web::error::ApiError;
use crate::web::handlers::AppState;
use crate::web::middleware::AuthUser;

/// GET /api/folders - List subfolders of `?parent=` (the owner's root when empty).
pub async fn list_folders(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    Query(query): Query<ListFoldersQuery>,
) -> Result<Json<ApiResponse<FolderListResponse>>, ApiError> {
    let (parent_id, folders) = state
        .engine
        .list_folders(claims.owner_id(), query.parent.as_deref())
        .await?;

    Ok(Json(ApiResponse::new(FolderListResponse {
        parent_id,
        folders: folders.into_iter().map(FolderResponse::from).collect(),
    })))
}

/// POST /api/folders - Create a folder.
pub async fn create_folder(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    ValidatedJson(req): ValidatedJson<CreateFolderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<FolderResponse>>), ApiError> {
    let folder = state
        .engine
        .create_folder(claims.owner_id(), req.parent_id.as_deref(), req.name.trim())
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::new(folder.into()))))
}

/// GET /api/folders/:id/children - Folders then files inside a folder.
pub async fn list_children(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    Path(folder_id): Path<String>,
) -> Result<Json<ApiResponse<ChildrenResponse>>, ApiError> {
    let children = state
        .engine
        .list_children(claims.owner_id(), &folder_id)
        .await?;

    Ok(Json(ApiResponse::new(ChildrenResponse {
        folder_id,
        entries: children.into_iter().map(Into::into).collect(),
    })))
}

/// GET /api/folders/:id/breadcrumb - Path from the root down to a folder.
pub async fn get_breadcrumb(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    Path(folder_id): Path<String>,
) -> Result<Json<ApiResponse<Vec<FolderResponse>>>, ApiError> {
    let crumbs = state
        .engine
        .breadcrumb(claims.owner_id(), &folder_id)
        .await?;

    Ok(Json(ApiResponse::new(
        crumbs.into_iter().map(FolderResponse::from).collect(),
    )))
}

/// PATCH /api/folders/:id - Rename and/or move a folder.
pub async fn update_folder(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    Path(folder_id): Path<String>,
    ValidatedJson(req): ValidatedJson<UpdateEntryRequest>,
) -> Result<Json<ApiResponse<FolderResponse>>, ApiError> {
    let update = req.folder_update();
    if update.is_empty() {
        return Err(ApiError::bad_request("Nothing to update"));
    }

    let folder = state
        .engine
        .update_folder(claims.owner_id(), &folder_id, &update)
        .await?;

    Ok(Json(ApiResponse::new(folder.into())))
}

/// DELETE /api/folders/:id - Delete an empty folder.
pub async fn delete_folder(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    Path(folder_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .engine
        .delete_folder(claims.owner_id(), &folder_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

//! Response DTOs for the web API.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::capability::SignedCapability;
use crate::catalog::{ChildEntry, FileEntry, FolderEntry};

// ============================================================================
// Generic Response Wrappers
// ============================================================================

/// Generic API response wrapper.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    /// Response data.
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    /// Create a new API response.
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// Folder in responses.
#[derive(Debug, Serialize)]
pub struct FolderResponse {
    /// Folder ID.
    pub id: String,
    /// Parent folder ID (`null` for the root).
    pub parent_id: Option<String>,
    /// Folder name.
    pub name: String,
    /// Whether this is the owner's root.
    pub is_root: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last rename/move time.
    pub updated_at: DateTime<Utc>,
}

impl From<FolderEntry> for FolderResponse {
    fn from(folder: FolderEntry) -> Self {
        Self {
            is_root: folder.is_root(),
            id: folder.id,
            parent_id: folder.parent_id,
            name: folder.name,
            created_at: folder.created_at,
            updated_at: folder.updated_at,
        }
    }
}

/// File metadata in responses. The storage locator is never exposed.
#[derive(Debug, Serialize)]
pub struct FileResponse {
    /// File ID.
    pub id: String,
    /// Folder the file is in.
    pub parent_id: String,
    /// Display filename.
    pub filename: String,
    /// Size in bytes.
    pub size: u64,
    /// Recorded MIME type.
    pub mime_type: Option<String>,
    /// SHA-256 of the bytes.
    pub content_hash: Option<String>,
    /// Open metadata.
    pub meta: BTreeMap<String, String>,
    /// Upload time.
    pub created_at: DateTime<Utc>,
    /// Last rename/move time.
    pub updated_at: DateTime<Utc>,
}

impl From<FileEntry> for FileResponse {
    fn from(file: FileEntry) -> Self {
        Self {
            size: file.size(),
            id: file.id,
            parent_id: file.parent_id,
            filename: file.filename,
            mime_type: file.mime_type,
            content_hash: file.content_hash,
            meta: file.meta.0,
            created_at: file.created_at,
            updated_at: file.updated_at,
        }
    }
}

/// One entry of a folder listing.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChildResponse {
    /// Subfolder.
    Folder(FolderResponse),
    /// File.
    File(FileResponse),
}

impl From<ChildEntry> for ChildResponse {
    fn from(child: ChildEntry) -> Self {
        match child {
            ChildEntry::Folder(f) => ChildResponse::Folder(f.into()),
            ChildEntry::File(f) => ChildResponse::File(f.into()),
        }
    }
}

/// `GET /api/folders` response.
#[derive(Debug, Serialize)]
pub struct FolderListResponse {
    /// The folder that was listed.
    pub parent_id: String,
    /// Its subfolders, ordered by name.
    pub folders: Vec<FolderResponse>,
}

/// `GET /api/folders/:id/children` response.
#[derive(Debug, Serialize)]
pub struct ChildrenResponse {
    /// The folder that was listed.
    pub folder_id: String,
    /// Folders first, then files.
    pub entries: Vec<ChildResponse>,
}

// ============================================================================
// Capabilities
// ============================================================================

/// `POST /api/files/:id/signed-url` response.
#[derive(Debug, Serialize)]
pub struct SignedUrlResponse {
    /// Absolute URL carrying the token.
    pub url: String,
    /// The capability token.
    pub token: String,
    /// Expiry time.
    pub expires_at: DateTime<Utc>,
    /// Effective lifetime after clamping.
    pub ttl_seconds: u64,
}

impl SignedUrlResponse {
    /// Build the response for `capability`, linking `filename` under `base_url`.
    pub fn new(base_url: &str, filename: &str, capability: SignedCapability) -> Self {
        let url = format!(
            "{}/api/files/{}/content/{}?token={}",
            base_url.trim_end_matches('/'),
            urlencoding::encode(&capability.file_id),
            urlencoding::encode(filename),
            urlencoding::encode(&capability.token),
        );
        Self {
            url,
            token: capability.token,
            expires_at: capability.expires_at,
            ttl_seconds: capability.ttl_seconds,
        }
    }
}

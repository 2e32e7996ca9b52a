//! Streaming multipart ingestion.
//!
//! Part bodies arrive one after another on the wire, so each file part is
//! piped straight into the backend before the next one is read. As soon as a
//! part's bytes are durable its catalog insert is spawned; inserts run
//! alongside later parts and are joined before the report is built. A failed
//! insert only fails that file.

use std::collections::HashMap;
use std::io;

use axum::body::Bytes;
use axum::extract::multipart::Field;
use axum::extract::Multipart;
use futures::StreamExt;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::catalog::{validate_entry_name, FileEntry, FileRepository, FolderRepository, NewFile};
use crate::delivery::OCTET_STREAM;
use crate::sandbox::sanitize_segment;
use crate::storage::{join_locator, ByteStream, StorageBackend};
use crate::{Result, StowageError};

/// Overall outcome of an upload request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// Every file was stored.
    Complete,
    /// Some files were stored, some failed.
    Partial,
    /// No file was stored.
    Failed,
}

/// A file that was stored and cataloged.
#[derive(Debug, Clone, Serialize)]
pub struct StoredUpload {
    /// Position of the part among the request's file parts.
    pub index: usize,
    /// New file ID.
    pub id: String,
    /// Catalog filename.
    pub name: String,
    /// Relative path declared by a folder upload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<String>,
    /// Folder the file landed in.
    pub parent_id: String,
    /// Size in bytes.
    pub size: u64,
}

/// A file part that could not be ingested.
#[derive(Debug, Clone, Serialize)]
pub struct FailedUpload {
    /// Position of the part among the request's file parts.
    pub index: usize,
    /// Client-supplied filename.
    pub name: String,
    /// Relative path declared by a folder upload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<String>,
    /// Why it failed.
    pub error: String,
}

/// Per-file results of an upload request.
#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    /// Overall outcome.
    pub status: UploadStatus,
    /// Stored files, in part order.
    pub stored: Vec<StoredUpload>,
    /// Failed files, in part order.
    pub failed: Vec<FailedUpload>,
}

impl UploadReport {
    fn new(mut stored: Vec<StoredUpload>, mut failed: Vec<FailedUpload>) -> Self {
        stored.sort_by_key(|s| s.index);
        failed.sort_by_key(|f| f.index);
        let status = if failed.is_empty() {
            UploadStatus::Complete
        } else if stored.is_empty() {
            UploadStatus::Failed
        } else {
            UploadStatus::Partial
        };
        Self {
            status,
            stored,
            failed,
        }
    }
}

/// Where bytes and catalog rows go for one directory.
#[derive(Debug, Clone)]
struct Destination {
    folder_id: String,
    /// Backend parent location: owner segment then sanitized folder names.
    location: Vec<String>,
}

/// Bookkeeping for a spawned catalog insert.
struct PendingInsert {
    index: usize,
    name: String,
    relative_path: Option<String>,
    locator: String,
}

/// Split a client filename into display components.
///
/// Separators may be `/` or `\`; empty, `.` and `..` components are dropped.
pub fn display_components(raw: &str) -> Vec<String> {
    raw.split(['/', '\\'])
        .map(|part| {
            part.chars()
                .filter(|c| !c.is_control())
                .collect::<String>()
                .trim()
                .to_string()
        })
        .filter(|part| !part.is_empty() && part != "." && part != "..")
        .map(|part| {
            if validate_entry_name(&part).is_ok() {
                part
            } else {
                sanitize_segment(&part).unwrap_or_else(|| "_".to_string())
            }
        })
        .collect()
}

/// Content type to record for a part.
fn upload_mime(declared: Option<&str>, filename: &str) -> Option<String> {
    declared
        .map(str::trim)
        .filter(|m| !m.is_empty() && *m != OCTET_STREAM)
        .map(str::to_string)
        .or_else(|| mime_guess::from_path(filename).first_raw().map(str::to_string))
}

fn storage_segment(name: &str) -> String {
    sanitize_segment(name).unwrap_or_else(|| "_".to_string())
}

async fn resolve_destination(
    pool: &SqlitePool,
    owner_id: &str,
    owner_segment: &str,
    parent: Option<&str>,
) -> Result<Destination> {
    let folders = FolderRepository::new(pool);
    let folder_id = match parent {
        Some(id) => {
            folders
                .get_owned(owner_id, id)
                .await?
                .ok_or_else(|| StowageError::NotFound("destination folder".to_string()))?
                .id
        }
        None => folders.get_root_folder_id(owner_id).await?,
    };

    let mut location = vec![owner_segment.to_string()];
    location.extend(
        folders
            .get_breadcrumb(&folder_id)
            .await?
            .iter()
            .filter(|f| !f.is_root())
            .map(|f| storage_segment(&f.name)),
    );

    Ok(Destination {
        folder_id,
        location,
    })
}

/// Walk (and create) the catalog folders for a folder upload's directories.
async fn ensure_directories(
    pool: &SqlitePool,
    owner_id: &str,
    base: &Destination,
    dirs: &[String],
    cache: &mut HashMap<Vec<String>, Destination>,
) -> Result<Destination> {
    let folders = FolderRepository::new(pool);
    let mut current = base.clone();
    for depth in 0..dirs.len() {
        let key = dirs[..=depth].to_vec();
        if let Some(known) = cache.get(&key) {
            current = known.clone();
            continue;
        }
        let name = &dirs[depth];
        let folder = folders
            .get_or_create_child(owner_id, &current.folder_id, name)
            .await?;
        let mut location = current.location.clone();
        location.push(storage_segment(name));
        current = Destination {
            folder_id: folder.id,
            location,
        };
        cache.insert(key, current.clone());
    }
    Ok(current)
}

/// Longest accepted text field value, in bytes.
const MAX_TEXT_FIELD_BYTES: usize = 1024;

/// Read a text field chunk by chunk, refusing values over [`MAX_TEXT_FIELD_BYTES`].
async fn read_text_field(mut field: Field<'_>) -> Result<String> {
    let mut value = Vec::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| StowageError::Validation(format!("unreadable field: {e}")))?
    {
        if value.len() + chunk.len() > MAX_TEXT_FIELD_BYTES {
            return Err(StowageError::Validation(format!(
                "text field exceeds {MAX_TEXT_FIELD_BYTES} bytes"
            )));
        }
        value.extend_from_slice(&chunk);
    }
    String::from_utf8(value)
        .map_err(|_| StowageError::Validation("text field is not valid UTF-8".to_string()))
}

/// Ingest a multipart upload for `owner_id`.
///
/// Recognized text fields (`parent`, `folder_upload`) must come before the
/// first file part; a late one is reported as a failed entry and ignored.
/// Text values are capped at 1 KiB. An unreadable or
/// oversized text field before any file part fails the request; after one,
/// it ends ingestion with a failed entry and the stored files are kept.
pub async fn ingest(
    pool: &SqlitePool,
    backend: &dyn StorageBackend,
    owner_id: &str,
    mut multipart: Multipart,
    max_file_size: u64,
) -> Result<UploadReport> {
    let owner_segment = sanitize_segment(owner_id).ok_or_else(|| {
        StowageError::Validation("owner id cannot be used as a storage path".to_string())
    })?;

    let mut parent: Option<String> = None;
    let mut folder_upload = false;
    let mut destination: Option<Destination> = None;
    let mut dir_cache: HashMap<Vec<String>, Destination> = HashMap::new();
    let mut pending: Vec<PendingInsert> = Vec::new();
    let mut handles = Vec::new();
    let mut failed: Vec<FailedUpload> = Vec::new();
    let mut file_parts = 0usize;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) if file_parts == 0 => {
                return Err(StowageError::Validation(format!(
                    "malformed multipart body: {e}"
                )));
            }
            Err(e) => {
                warn!(error = %e, "Upload body ended early");
                failed.push(FailedUpload {
                    index: file_parts,
                    name: String::new(),
                    relative_path: None,
                    error: format!("request body ended early: {e}"),
                });
                break;
            }
        };

        let Some(raw_name) = field.file_name().map(str::to_string) else {
            let field_name = field.name().unwrap_or_default().to_string();
            let value = match read_text_field(field).await {
                Ok(value) => value,
                Err(e) if file_parts == 0 => return Err(e),
                Err(e) => {
                    warn!(field = %field_name, error = %e, "Unreadable upload field");
                    failed.push(FailedUpload {
                        index: file_parts,
                        name: field_name,
                        relative_path: None,
                        error: e.to_string(),
                    });
                    break;
                }
            };
            match field_name.as_str() {
                "parent" | "folder_upload" if file_parts > 0 => {
                    failed.push(FailedUpload {
                        index: file_parts,
                        name: field_name.clone(),
                        relative_path: None,
                        error: format!("{field_name} must precede file parts"),
                    });
                }
                "parent" => {
                    parent = Some(value.trim().to_string()).filter(|p| !p.is_empty());
                }
                "folder_upload" => {
                    folder_upload = matches!(value.trim(), "true" | "1");
                }
                other => debug!(field = other, "Ignoring unknown upload field"),
            }
            continue;
        };

        let index = file_parts;
        file_parts += 1;

        let base = match &destination {
            Some(d) => d.clone(),
            None => {
                let d =
                    resolve_destination(pool, owner_id, &owner_segment, parent.as_deref()).await?;
                destination = Some(d.clone());
                d
            }
        };

        let mut components = display_components(&raw_name);
        if !folder_upload {
            components = components.pop().into_iter().collect();
        }
        let relative_path = (folder_upload && components.len() > 1).then(|| components.join("/"));
        let Some((filename, dirs)) = components.split_last() else {
            failed.push(FailedUpload {
                index,
                name: raw_name,
                relative_path: None,
                error: "filename is empty or invalid".to_string(),
            });
            continue;
        };
        let filename = filename.clone();

        let target = match ensure_directories(pool, owner_id, &base, dirs, &mut dir_cache).await {
            Ok(target) => target,
            Err(e) => {
                warn!(error = %e, "Failed to create upload directories");
                failed.push(FailedUpload {
                    index,
                    name: filename,
                    relative_path,
                    error: e.to_string(),
                });
                continue;
            }
        };

        let mime_type = upload_mime(field.content_type(), &filename);
        let mut hasher = Sha256::new();
        let mut received = 0u64;
        let data: ByteStream<'_> = Box::pin(field.map(|chunk| -> io::Result<Bytes> {
            let chunk = chunk.map_err(io::Error::other)?;
            received += chunk.len() as u64;
            if received > max_file_size {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("file exceeds the {max_file_size} byte upload limit"),
                ));
            }
            hasher.update(&chunk);
            Ok(chunk)
        }));

        let written = backend
            .write(&join_locator(&target.location), &storage_segment(&filename), data)
            .await;

        let stored = match written {
            Ok(stored) => stored,
            Err(e) => {
                warn!(file = %filename, error = %e, "Backend write failed");
                failed.push(FailedUpload {
                    index,
                    name: filename,
                    relative_path,
                    error: e.to_string(),
                });
                continue;
            }
        };

        let mut new_file = NewFile::new(
            owner_id,
            &target.folder_id,
            &filename,
            &stored.locator,
            stored.size,
        )
        .with_content_hash(format!("{:x}", hasher.finalize()))
        .with_meta("originalName", &raw_name);
        if let Some(mime_type) = mime_type {
            new_file = new_file.with_mime_type(mime_type);
        }
        if let Some(ref path) = relative_path {
            new_file = new_file.with_meta("relativePath", path);
        }

        let insert_pool = pool.clone();
        handles.push(tokio::spawn(async move {
            FileRepository::new(&insert_pool).create(&new_file).await
        }));
        pending.push(PendingInsert {
            index,
            name: filename,
            relative_path,
            locator: stored.locator,
        });
    }

    if file_parts == 0 {
        return Err(StowageError::Validation(
            "upload contains no file parts".to_string(),
        ));
    }

    let results = futures::future::join_all(handles).await;
    let mut stored = Vec::new();
    for (info, result) in pending.into_iter().zip(results) {
        let outcome: Result<FileEntry> = result
            .unwrap_or_else(|e| Err(StowageError::Database(format!("insert task failed: {e}"))));
        match outcome {
            Ok(entry) => stored.push(StoredUpload {
                index: info.index,
                size: entry.size(),
                id: entry.id,
                name: entry.filename,
                relative_path: info.relative_path,
                parent_id: entry.parent_id,
            }),
            Err(e) => {
                warn!(
                    locator = %info.locator,
                    file = %info.name,
                    error = %e,
                    "Catalog insert failed; stored bytes are orphaned"
                );
                failed.push(FailedUpload {
                    index: info.index,
                    name: info.name,
                    relative_path: info.relative_path,
                    error: e.to_string(),
                });
            }
        }
    }

    let report = UploadReport::new(stored, failed);
    info!(
        owner = owner_id,
        stored = report.stored.len(),
        failed = report.failed.len(),
        "Upload ingested"
    );
    Ok(report)
}

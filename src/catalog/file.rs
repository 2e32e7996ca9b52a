//! File entries and repository.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{QueryBuilder, SqlitePool};
use uuid::Uuid;

use super::validate_entry_name;
use crate::{Result, StowageError};

/// Open key/value metadata attached to a file (`originalName`, ...).
pub type FileMeta = BTreeMap<String, String>;

const FILE_COLUMNS: &str = "id, owner_id, parent_id, filename, storage_locator, size_bytes, \
                            mime_type, content_hash, meta, created_at, updated_at";

/// A file in an owner's namespace.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FileEntry {
    /// Unique file ID.
    pub id: String,
    /// Owner of the file.
    pub owner_id: String,
    /// Folder this file belongs to.
    pub parent_id: String,
    /// Display filename.
    pub filename: String,
    /// Backend-specific reference to the bytes.
    pub storage_locator: String,
    /// Size in bytes.
    pub size_bytes: i64,
    /// MIME type recorded at upload.
    pub mime_type: Option<String>,
    /// Lowercase hex SHA-256 of the bytes.
    pub content_hash: Option<String>,
    /// Open metadata.
    pub meta: Json<FileMeta>,
    /// When the file was stored.
    pub created_at: DateTime<Utc>,
    /// When the file was last renamed or moved.
    pub updated_at: DateTime<Utc>,
}

impl FileEntry {
    /// Size as an unsigned byte count.
    pub fn size(&self) -> u64 {
        u64::try_from(self.size_bytes).unwrap_or(0)
    }

    /// Look up a metadata value.
    pub fn meta_value(&self, key: &str) -> Option<&str> {
        self.meta.0.get(key).map(String::as_str)
    }
}

/// Data for creating a new file entry.
#[derive(Debug, Clone)]
pub struct NewFile {
    /// Owner of the file.
    pub owner_id: String,
    /// Folder the file belongs to.
    pub parent_id: String,
    /// Display filename.
    pub filename: String,
    /// Backend locator of the already-written bytes.
    pub storage_locator: String,
    /// Size in bytes.
    pub size_bytes: i64,
    /// MIME type.
    pub mime_type: Option<String>,
    /// Content hash.
    pub content_hash: Option<String>,
    /// Open metadata.
    pub meta: FileMeta,
}

impl NewFile {
    /// Create a new NewFile.
    pub fn new(
        owner_id: impl Into<String>,
        parent_id: impl Into<String>,
        filename: impl Into<String>,
        storage_locator: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            parent_id: parent_id.into(),
            filename: filename.into(),
            storage_locator: storage_locator.into(),
            size_bytes: i64::try_from(size_bytes).unwrap_or(i64::MAX),
            mime_type: None,
            content_hash: None,
            meta: FileMeta::new(),
        }
    }

    /// Set the MIME type.
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Set the content hash.
    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    /// Add a metadata entry.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }
}

/// Builder for renaming and/or moving a file.
#[derive(Debug, Clone, Default)]
pub struct FileUpdate {
    /// New filename.
    pub filename: Option<String>,
    /// New parent folder ID.
    pub parent_id: Option<String>,
}

impl FileUpdate {
    /// Create a new FileUpdate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the filename.
    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Set the parent folder ID.
    pub fn parent_id(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Check if any fields are set.
    pub fn is_empty(&self) -> bool {
        self.filename.is_none() && self.parent_id.is_none()
    }
}

/// Repository for file entry operations.
pub struct FileRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> FileRepository<'a> {
    /// Create a new FileRepository with the given pool reference.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a file entry for bytes that are already durable.
    ///
    /// The parent must be a folder of the same owner; the check and the
    /// insert are one statement.
    pub async fn create(&self, file: &NewFile) -> Result<FileEntry> {
        validate_entry_name(&file.filename)?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO files (id, owner_id, parent_id, filename, storage_locator, size_bytes,
                                mime_type, content_hash, meta, created_at, updated_at)
             SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
             WHERE EXISTS (SELECT 1 FROM folders WHERE id = ? AND owner_id = ?)",
        )
        .bind(&id)
        .bind(&file.owner_id)
        .bind(&file.parent_id)
        .bind(file.filename.trim())
        .bind(&file.storage_locator)
        .bind(file.size_bytes)
        .bind(&file.mime_type)
        .bind(&file.content_hash)
        .bind(Json(&file.meta))
        .bind(now)
        .bind(now)
        .bind(&file.parent_id)
        .bind(&file.owner_id)
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StowageError::NotFound("parent folder".to_string()));
        }

        self.get_by_id(&id)
            .await?
            .ok_or_else(|| StowageError::NotFound("file".to_string()))
    }

    /// Get a file by ID.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<FileEntry>> {
        let file = sqlx::query_as::<_, FileEntry>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(file)
    }

    /// Get a file by ID, only if it belongs to `owner_id`.
    pub async fn get_owned(&self, owner_id: &str, id: &str) -> Result<Option<FileEntry>> {
        let file = sqlx::query_as::<_, FileEntry>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE id = ? AND owner_id = ?"
        ))
        .bind(id)
        .bind(owner_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(file)
    }

    /// List files in a folder, ordered lexicographically by filename.
    pub async fn list_child_files(
        &self,
        owner_id: &str,
        parent_id: &str,
    ) -> Result<Vec<FileEntry>> {
        let files = sqlx::query_as::<_, FileEntry>(&format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE owner_id = ? AND parent_id = ?
             ORDER BY filename COLLATE BINARY, id"
        ))
        .bind(owner_id)
        .bind(parent_id)
        .fetch_all(self.pool)
        .await?;

        Ok(files)
    }

    /// Rename and/or move a file. Last write wins.
    pub async fn update(
        &self,
        owner_id: &str,
        id: &str,
        update: &FileUpdate,
    ) -> Result<Option<FileEntry>> {
        if update.is_empty() {
            return self.get_owned(owner_id, id).await;
        }

        if let Some(ref filename) = update.filename {
            validate_entry_name(filename)?;
        }

        if let Some(ref parent_id) = update.parent_id {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM folders WHERE id = ? AND owner_id = ?)",
            )
            .bind(parent_id)
            .bind(owner_id)
            .fetch_one(self.pool)
            .await?;
            if !exists {
                return Err(StowageError::NotFound("destination folder".to_string()));
            }
        }

        let mut query: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new("UPDATE files SET ");
        let mut separated = query.separated(", ");

        if let Some(ref filename) = update.filename {
            separated.push("filename = ");
            separated.push_bind_unseparated(filename.trim().to_string());
        }

        if let Some(ref parent_id) = update.parent_id {
            separated.push("parent_id = ");
            separated.push_bind_unseparated(parent_id.clone());
        }

        separated.push("updated_at = ");
        separated.push_bind_unseparated(Utc::now());

        query.push(" WHERE id = ");
        query.push_bind(id);
        query.push(" AND owner_id = ");
        query.push_bind(owner_id);

        let result = query.build().execute(self.pool).await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.get_by_id(id).await
    }

    /// Delete a file entry by ID.
    pub async fn delete(&self, owner_id: &str, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM files WHERE id = ? AND owner_id = ?")
            .bind(id)
            .bind(owner_id)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Count files in a folder.
    pub async fn count_by_parent(&self, parent_id: &str) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE parent_id = ?")
            .bind(parent_id)
            .fetch_one(self.pool)
            .await?;
        Ok(count)
    }
}

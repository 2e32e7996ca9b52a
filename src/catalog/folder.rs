//! Folder entries and repository.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{QueryBuilder, SqlitePool};
use uuid::Uuid;

use super::{validate_entry_name, MAX_FOLDER_DEPTH};
use crate::{Result, StowageError};

/// Display name given to lazily created root folders.
pub const ROOT_FOLDER_NAME: &str = "root";

const FOLDER_COLUMNS: &str = "id, owner_id, parent_id, name, created_at, updated_at";

/// A folder in an owner's namespace.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct FolderEntry {
    /// Unique folder ID.
    pub id: String,
    /// Owner of the folder.
    pub owner_id: String,
    /// Parent folder ID (None only for the owner's root).
    pub parent_id: Option<String>,
    /// Folder name.
    pub name: String,
    /// When the folder was created.
    pub created_at: DateTime<Utc>,
    /// When the folder was last renamed or moved.
    pub updated_at: DateTime<Utc>,
}

impl FolderEntry {
    /// Whether this is the owner's root folder.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Data for creating a new (non-root) folder.
#[derive(Debug, Clone)]
pub struct NewFolder {
    /// Owner of the folder.
    pub owner_id: String,
    /// Parent folder ID.
    pub parent_id: String,
    /// Folder name.
    pub name: String,
}

impl NewFolder {
    /// Create a new NewFolder.
    pub fn new(
        owner_id: impl Into<String>,
        parent_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            parent_id: parent_id.into(),
            name: name.into(),
        }
    }
}

/// Builder for renaming and/or moving a folder.
#[derive(Debug, Clone, Default)]
pub struct FolderUpdate {
    /// New folder name.
    pub name: Option<String>,
    /// New parent folder ID.
    pub parent_id: Option<String>,
}

impl FolderUpdate {
    /// Create a new FolderUpdate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the parent folder ID.
    pub fn parent_id(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Check if any fields are set.
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.parent_id.is_none()
    }
}

/// Repository for folder operations.
pub struct FolderRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> FolderRepository<'a> {
    /// Create a new FolderRepository with the given pool reference.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the owner's root folder ID, creating the root on first access.
    ///
    /// The insert relies on `UNIQUE(owner_id, is_root)`: concurrent first
    /// requests all attempt the insert, exactly one wins, the others become
    /// no-ops, and every caller then reads back the same row.
    pub async fn get_root_folder_id(&self, owner_id: &str) -> Result<String> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO folders (id, owner_id, parent_id, name, is_root, created_at, updated_at)
             VALUES (?, ?, NULL, ?, 1, ?, ?)
             ON CONFLICT (owner_id, is_root) DO NOTHING",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(owner_id)
        .bind(ROOT_FOLDER_NAME)
        .bind(now)
        .bind(now)
        .execute(self.pool)
        .await?;

        let id: String =
            sqlx::query_scalar("SELECT id FROM folders WHERE owner_id = ? AND is_root = 1")
                .bind(owner_id)
                .fetch_one(self.pool)
                .await?;
        Ok(id)
    }

    /// Create a new child folder.
    pub async fn create(&self, folder: &NewFolder) -> Result<FolderEntry> {
        validate_entry_name(&folder.name)?;
        self.get_owned(&folder.owner_id, &folder.parent_id)
            .await?
            .ok_or_else(|| StowageError::NotFound("parent folder".to_string()))?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO folders (id, owner_id, parent_id, name, is_root, created_at, updated_at)
             VALUES (?, ?, ?, ?, NULL, ?, ?)",
        )
        .bind(&id)
        .bind(&folder.owner_id)
        .bind(&folder.parent_id)
        .bind(folder.name.trim())
        .bind(now)
        .bind(now)
        .execute(self.pool)
        .await?;

        self.get_by_id(&id)
            .await?
            .ok_or_else(|| StowageError::NotFound("folder".to_string()))
    }

    /// Get a folder by ID.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<FolderEntry>> {
        let folder = sqlx::query_as::<_, FolderEntry>(&format!(
            "SELECT {FOLDER_COLUMNS} FROM folders WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(folder)
    }

    /// Get a folder by ID, only if it belongs to `owner_id`.
    pub async fn get_owned(&self, owner_id: &str, id: &str) -> Result<Option<FolderEntry>> {
        let folder = sqlx::query_as::<_, FolderEntry>(&format!(
            "SELECT {FOLDER_COLUMNS} FROM folders WHERE id = ? AND owner_id = ?"
        ))
        .bind(id)
        .bind(owner_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(folder)
    }

    /// Get a folder's name.
    pub async fn get_folder_name(&self, id: &str) -> Result<Option<String>> {
        let name = sqlx::query_scalar("SELECT name FROM folders WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        Ok(name)
    }

    /// List child folders, ordered lexicographically by name.
    pub async fn list_child_folders(
        &self,
        owner_id: &str,
        parent_id: &str,
    ) -> Result<Vec<FolderEntry>> {
        let folders = sqlx::query_as::<_, FolderEntry>(&format!(
            "SELECT {FOLDER_COLUMNS} FROM folders
             WHERE owner_id = ? AND parent_id = ?
             ORDER BY name COLLATE BINARY, id"
        ))
        .bind(owner_id)
        .bind(parent_id)
        .fetch_all(self.pool)
        .await?;

        Ok(folders)
    }

    /// Find a direct child folder by exact name.
    pub async fn find_child_by_name(
        &self,
        owner_id: &str,
        parent_id: &str,
        name: &str,
    ) -> Result<Option<FolderEntry>> {
        let folder = sqlx::query_as::<_, FolderEntry>(&format!(
            "SELECT {FOLDER_COLUMNS} FROM folders
             WHERE owner_id = ? AND parent_id = ? AND name = ?
             ORDER BY created_at, id LIMIT 1"
        ))
        .bind(owner_id)
        .bind(parent_id)
        .bind(name)
        .fetch_optional(self.pool)
        .await?;

        Ok(folder)
    }

    /// Return the child folder called `name`, creating it if missing.
    pub async fn get_or_create_child(
        &self,
        owner_id: &str,
        parent_id: &str,
        name: &str,
    ) -> Result<FolderEntry> {
        if let Some(existing) = self.find_child_by_name(owner_id, parent_id, name).await? {
            return Ok(existing);
        }
        self.create(&NewFolder::new(owner_id, parent_id, name)).await
    }

    /// Ancestor chain from the root down to `folder_id` (inclusive).
    ///
    /// Returns an empty list if the folder does not exist.
    pub async fn get_breadcrumb(&self, folder_id: &str) -> Result<Vec<FolderEntry>> {
        let folders = sqlx::query_as::<_, FolderEntry>(
            "WITH RECURSIVE chain(id, depth) AS (
                 SELECT id, 0 FROM folders WHERE id = ?
                 UNION ALL
                 SELECT f.parent_id, c.depth + 1
                 FROM folders f JOIN chain c ON f.id = c.id
                 WHERE f.parent_id IS NOT NULL AND c.depth < ?
             )
             SELECT f.id, f.owner_id, f.parent_id, f.name, f.created_at, f.updated_at
             FROM chain c JOIN folders f ON f.id = c.id
             ORDER BY c.depth DESC",
        )
        .bind(folder_id)
        .bind(MAX_FOLDER_DEPTH as i64)
        .fetch_all(self.pool)
        .await?;

        Ok(folders)
    }

    /// Rename and/or move a folder. Last write wins.
    ///
    /// The root cannot be renamed or moved, and a folder cannot be moved into
    /// itself or one of its descendants.
    pub async fn update(
        &self,
        owner_id: &str,
        id: &str,
        update: &FolderUpdate,
    ) -> Result<Option<FolderEntry>> {
        let Some(folder) = self.get_owned(owner_id, id).await? else {
            return Ok(None);
        };
        if update.is_empty() {
            return Ok(Some(folder));
        }
        if folder.is_root() {
            return Err(StowageError::Validation(
                "the root folder cannot be renamed or moved".to_string(),
            ));
        }

        if let Some(ref name) = update.name {
            validate_entry_name(name)?;
        }

        if let Some(ref parent_id) = update.parent_id {
            self.get_owned(owner_id, parent_id)
                .await?
                .ok_or_else(|| StowageError::NotFound("destination folder".to_string()))?;
            let chain = self.get_breadcrumb(parent_id).await?;
            if chain.iter().any(|f| f.id == folder.id) {
                return Err(StowageError::Validation(
                    "a folder cannot be moved into itself or its descendants".to_string(),
                ));
            }
        }

        let mut query: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new("UPDATE folders SET ");
        let mut separated = query.separated(", ");

        if let Some(ref name) = update.name {
            separated.push("name = ");
            separated.push_bind_unseparated(name.trim().to_string());
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

    /// Delete an empty, non-root folder.
    ///
    /// Returns `false` when the folder does not exist for this owner.
    pub async fn delete_empty(&self, owner_id: &str, id: &str) -> Result<bool> {
        let Some(folder) = self.get_owned(owner_id, id).await? else {
            return Ok(false);
        };
        if folder.is_root() {
            return Err(StowageError::Validation(
                "the root folder cannot be deleted".to_string(),
            ));
        }

        let children: i64 = sqlx::query_scalar(
            "SELECT (SELECT COUNT(*) FROM folders WHERE parent_id = ?)
                  + (SELECT COUNT(*) FROM files WHERE parent_id = ?)",
        )
        .bind(id)
        .bind(id)
        .fetch_one(self.pool)
        .await?;
        if children > 0 {
            return Err(StowageError::Validation("folder is not empty".to_string()));
        }

        let result = sqlx::query("DELETE FROM folders WHERE id = ? AND owner_id = ?")
            .bind(id)
            .bind(owner_id)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Count root rows for an owner (always 0 or 1).
    pub async fn count_roots(&self, owner_id: &str) -> Result<i64> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM folders WHERE owner_id = ? AND parent_id IS NULL",
        )
        .bind(owner_id)
        .fetch_one(self.pool)
        .await?;
        Ok(count)
    }
}

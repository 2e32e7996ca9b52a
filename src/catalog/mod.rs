//! Metadata catalog.
//!
//! Durable records of the folder/file hierarchy, independent of where the
//! bytes live:
//! - [`FolderRepository`]: roots, children, breadcrumbs, rename/move/delete
//! - [`FileRepository`]: file entries and their storage locators
//!
//! Listings are deterministic: folders before files, each group ordered by
//! name with binary collation, ties broken by id.

mod file;
mod folder;

pub use file::{FileEntry, FileMeta, FileRepository, FileUpdate, NewFile};
pub use folder::{FolderEntry, FolderRepository, FolderUpdate, NewFolder, ROOT_FOLDER_NAME};

use sqlx::SqlitePool;

use crate::{Result, StowageError};

/// Maximum length of a folder or file name in characters.
pub const MAX_NAME_LENGTH: usize = 255;

/// Depth cap for ancestor walks.
pub const MAX_FOLDER_DEPTH: usize = 64;

/// Validate a display name for a folder or file.
///
/// Catalog names may contain any printable Unicode; they never reach the
/// filesystem directly.
pub fn validate_entry_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(StowageError::Validation("name must not be empty".to_string()));
    }
    if trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(StowageError::Validation(format!(
            "name must be at most {MAX_NAME_LENGTH} characters"
        )));
    }
    if trimmed == "." || trimmed == ".." {
        return Err(StowageError::Validation(format!("invalid name: {trimmed}")));
    }
    if trimmed
        .chars()
        .any(|c| c == '/' || c == '\\' || c.is_control())
    {
        return Err(StowageError::Validation(
            "name must not contain path separators or control characters".to_string(),
        ));
    }
    Ok(())
}

/// A child of a folder: either a subfolder or a file.
#[derive(Debug, Clone)]
pub enum ChildEntry {
    /// Subfolder.
    Folder(FolderEntry),
    /// File.
    File(FileEntry),
}

impl ChildEntry {
    /// The entry's ID.
    pub fn id(&self) -> &str {
        match self {
            ChildEntry::Folder(f) => &f.id,
            ChildEntry::File(f) => &f.id,
        }
    }

    /// The entry's display name.
    pub fn name(&self) -> &str {
        match self {
            ChildEntry::Folder(f) => &f.name,
            ChildEntry::File(f) => &f.filename,
        }
    }
}

/// List folders and then files under `parent_id` for `owner_id`.
pub async fn list_children(
    pool: &SqlitePool,
    owner_id: &str,
    parent_id: &str,
) -> Result<Vec<ChildEntry>> {
    let folders = FolderRepository::new(pool)
        .list_child_folders(owner_id, parent_id)
        .await?;
    let files = FileRepository::new(pool)
        .list_child_files(owner_id, parent_id)
        .await?;

    Ok(folders
        .into_iter()
        .map(ChildEntry::Folder)
        .chain(files.into_iter().map(ChildEntry::File))
        .collect())
}

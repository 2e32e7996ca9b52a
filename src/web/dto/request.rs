//! Request DTOs for the web API.

use serde::Deserialize;
use validator::{Validate, ValidationErrors};

use super::validation::{check_optional, entity_id, entry_name};
use crate::catalog::{FileUpdate, FolderUpdate};

/// Create folder request.
#[derive(Debug, Deserialize)]
pub struct CreateFolderRequest {
    /// Folder name.
    pub name: String,
    /// Parent folder (the owner's root when absent).
    #[serde(default)]
    pub parent_id: Option<String>,
}

impl Validate for CreateFolderRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        check_optional(&mut errors, "name", Some(&self.name), entry_name);
        check_optional(&mut errors, "parent_id", self.parent_id.as_deref(), entity_id);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Rename and/or move request, shared by folders and files.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateEntryRequest {
    /// New name.
    #[serde(default)]
    pub name: Option<String>,
    /// New parent folder.
    #[serde(default)]
    pub parent_id: Option<String>,
}

impl Validate for UpdateEntryRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        check_optional(&mut errors, "name", self.name.as_deref(), entry_name);
        check_optional(&mut errors, "parent_id", self.parent_id.as_deref(), entity_id);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl UpdateEntryRequest {
    /// As a folder update.
    pub fn folder_update(&self) -> FolderUpdate {
        let mut update = FolderUpdate::new();
        if let Some(name) = &self.name {
            update = update.name(name.trim());
        }
        if let Some(parent_id) = &self.parent_id {
            update = update.parent_id(parent_id);
        }
        update
    }

    /// As a file update.
    pub fn file_update(&self) -> FileUpdate {
        let mut update = FileUpdate::new();
        if let Some(name) = &self.name {
            update = update.filename(name.trim());
        }
        if let Some(parent_id) = &self.parent_id {
            update = update.parent_id(parent_id);
        }
        update
    }
}

/// Signed URL request.
#[derive(Debug, Default, Deserialize)]
pub struct SignedUrlRequest {
    /// Cosmetic filename for the URL path.
    #[serde(default)]
    pub filename: Option<String>,
    /// Requested lifetime; clamped to the allowed window.
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

impl Validate for SignedUrlRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        check_optional(&mut errors, "filename", self.filename.as_deref(), entry_name);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Folder listing query.
#[derive(Debug, Default, Deserialize)]
pub struct ListFoldersQuery {
    /// Parent folder; empty or absent means the owner's root.
    #[serde(default)]
    pub parent: Option<String>,
}

/// Content delivery query.
#[derive(Debug, Default, Deserialize)]
pub struct ContentQuery {
    /// Signed capability.
    #[serde(default)]
    pub token: Option<String>,
}

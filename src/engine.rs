//! The storage engine facade.
//!
//! [`FileEngine`] owns the database, the active backend and the capability
//! issuer. The backend is chosen once at startup and handed in; nothing here
//! reads configuration or global state.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::Multipart;
use chrono::Utc;
use tracing::{info, warn};

use crate::archive::{ArchiveExport, ArchiveExporter};
use crate::capability::{CapabilityIssuer, SignedCapability, DEFAULT_TTL_SECS};
use crate::catalog::{
    list_children, ChildEntry, FileEntry, FileRepository, FileUpdate, FolderEntry,
    FolderRepository, FolderUpdate, NewFolder,
};
use crate::config::Config;
use crate::db::Database;
use crate::delivery::{self, Delivery};
use crate::ingest::{self, UploadReport};
use crate::legacy::{self, LegacyLookup};
use crate::sandbox::sanitize_segment;
use crate::storage::StorageBackend;
use crate::{Result, StowageError};

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Directory under which export staging directories are created.
    pub staging_root: PathBuf,
    /// Maximum size of a single uploaded file in bytes.
    pub max_file_size: u64,
}

impl EngineOptions {
    /// Derive options from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            staging_root: config.storage.staging_root(),
            max_file_size: config.web.max_upload_size_bytes(),
        }
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Per-owner folder and file storage.
pub struct FileEngine {
    db: Database,
    backend: Arc<dyn StorageBackend>,
    issuer: CapabilityIssuer,
    options: EngineOptions,
}

impl FileEngine {
    /// Create an engine over an open database and the active backend.
    pub fn new(
        db: Database,
        backend: Arc<dyn StorageBackend>,
        issuer: CapabilityIssuer,
        options: EngineOptions,
    ) -> Self {
        info!(
            backend = backend.name(),
            staging_root = %options.staging_root.display(),
            "File engine ready"
        );
        Self {
            db,
            backend,
            issuer,
            options,
        }
    }

    /// The database handle.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// The active backend.
    pub fn backend(&self) -> &dyn StorageBackend {
        self.backend.as_ref()
    }

    /// Engine options.
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    fn folders(&self) -> FolderRepository<'_> {
        FolderRepository::new(self.db.pool())
    }

    fn files(&self) -> FileRepository<'_> {
        FileRepository::new(self.db.pool())
    }

    /// Get (creating on first use) the owner's root folder ID.
    pub async fn root_folder_id(&self, owner_id: &str) -> Result<String> {
        self.folders().get_root_folder_id(owner_id).await
    }

    async fn owned_folder(&self, owner_id: &str, folder_id: &str) -> Result<FolderEntry> {
        self.folders()
            .get_owned(owner_id, folder_id)
            .await?
            .ok_or_else(|| StowageError::NotFound("folder".to_string()))
    }

    /// Resolve an optional folder ID, defaulting to the owner's root.
    async fn folder_or_root(&self, owner_id: &str, folder_id: Option<&str>) -> Result<String> {
        match folder_id.filter(|id| !id.is_empty()) {
            Some(id) => Ok(self.owned_folder(owner_id, id).await?.id),
            None => self.root_folder_id(owner_id).await,
        }
    }

    /// Create a folder under `parent_id` (the root when absent).
    pub async fn create_folder(
        &self,
        owner_id: &str,
        parent_id: Option<&str>,
        name: &str,
    ) -> Result<FolderEntry> {
        let parent_id = self.folder_or_root(owner_id, parent_id).await?;
        let folder = self
            .folders()
            .create(&NewFolder::new(owner_id, &parent_id, name))
            .await?;
        info!(owner = owner_id, folder = %folder.id, "Folder created");
        Ok(folder)
    }

    /// Subfolders of `parent_id` (the root when absent), with the resolved parent ID.
    pub async fn list_folders(
        &self,
        owner_id: &str,
        parent_id: Option<&str>,
    ) -> Result<(String, Vec<FolderEntry>)> {
        let parent_id = self.folder_or_root(owner_id, parent_id).await?;
        let folders = self
            .folders()
            .list_child_folders(owner_id, &parent_id)
            .await?;
        Ok((parent_id, folders))
    }

    /// Folders then files directly inside `folder_id`.
    pub async fn list_children(&self, owner_id: &str, folder_id: &str) -> Result<Vec<ChildEntry>> {
        let folder = self.owned_folder(owner_id, folder_id).await?;
        list_children(self.db.pool(), owner_id, &folder.id).await
    }

    /// Path from the owner's root down to `folder_id`.
    pub async fn breadcrumb(&self, owner_id: &str, folder_id: &str) -> Result<Vec<FolderEntry>> {
        let folder = self.owned_folder(owner_id, folder_id).await?;
        self.folders().get_breadcrumb(&folder.id).await
    }

    /// Rename and/or move a folder.
    pub async fn update_folder(
        &self,
        owner_id: &str,
        folder_id: &str,
        update: &FolderUpdate,
    ) -> Result<FolderEntry> {
        self.folders()
            .update(owner_id, folder_id, update)
            .await?
            .ok_or_else(|| StowageError::NotFound("folder".to_string()))
    }

    /// Delete an empty folder.
    pub async fn delete_folder(&self, owner_id: &str, folder_id: &str) -> Result<()> {
        if self.folders().delete_empty(owner_id, folder_id).await? {
            info!(owner = owner_id, folder = folder_id, "Folder deleted");
            Ok(())
        } else {
            Err(StowageError::NotFound("folder".to_string()))
        }
    }

    /// Catalog entry for a file the caller owns.
    pub async fn get_file(&self, owner_id: &str, file_id: &str) -> Result<FileEntry> {
        self.files()
            .get_owned(owner_id, file_id)
            .await?
            .ok_or_else(|| StowageError::NotFound("file".to_string()))
    }

    /// Rename and/or move a file. Bytes stay where they are.
    pub async fn update_file(
        &self,
        owner_id: &str,
        file_id: &str,
        update: &FileUpdate,
    ) -> Result<FileEntry> {
        self.files()
            .update(owner_id, file_id, update)
            .await?
            .ok_or_else(|| StowageError::NotFound("file".to_string()))
    }

    /// Delete a file: backend object first, then the catalog row.
    pub async fn delete_file(&self, owner_id: &str, file_id: &str) -> Result<()> {
        let file = self.get_file(owner_id, file_id).await?;

        match self.backend.delete(&file.storage_locator).await {
            Ok(()) => {}
            Err(StowageError::NotFound(_)) => {
                warn!(file = %file.id, locator = %file.storage_locator, "Bytes already gone");
            }
            Err(e) => return Err(e),
        }

        self.files().delete(owner_id, &file.id).await?;
        info!(owner = owner_id, file = %file.id, "File deleted");
        Ok(())
    }

    /// Ingest a multipart upload.
    pub async fn ingest(&self, owner_id: &str, multipart: Multipart) -> Result<UploadReport> {
        ingest::ingest(
            self.db.pool(),
            self.backend.as_ref(),
            owner_id,
            multipart,
            self.options.max_file_size,
        )
        .await
    }

    async fn deliver(&self, file: &FileEntry, range: Option<&str>) -> Result<Delivery> {
        delivery::open(
            self.backend.as_ref(),
            &file.storage_locator,
            &file.filename,
            file.mime_type.as_deref(),
            range,
        )
        .await
    }

    /// Open a file the session owner owns.
    pub async fn open_for_owner(
        &self,
        owner_id: &str,
        file_id: &str,
        range: Option<&str>,
    ) -> Result<Delivery> {
        let file = self.get_file(owner_id, file_id).await?;
        self.deliver(&file, range).await
    }

    /// Open a file with a signed capability instead of a session.
    pub async fn open_with_capability(
        &self,
        token: &str,
        file_id: &str,
        range: Option<&str>,
    ) -> Result<Delivery> {
        let claims = self.issuer.verify(token)?;
        if claims.sub != file_id {
            return Err(StowageError::Authorization(
                "capability does not cover this file".to_string(),
            ));
        }

        let file = self
            .files()
            .get_by_id(file_id)
            .await?
            .ok_or_else(|| StowageError::NotFound("file".to_string()))?;
        if file.owner_id != claims.own {
            return Err(StowageError::Authorization(
                "capability owner no longer owns this file".to_string(),
            ));
        }
        self.deliver(&file, range).await
    }

    /// Mint a capability for a file the requester owns.
    pub async fn issue_capability(
        &self,
        owner_id: &str,
        file_id: &str,
        ttl_seconds: Option<u64>,
    ) -> Result<(FileEntry, SignedCapability)> {
        let file = self
            .files()
            .get_by_id(file_id)
            .await?
            .ok_or_else(|| StowageError::NotFound("file".to_string()))?;
        if file.owner_id != owner_id {
            return Err(StowageError::Permission(
                "only the owner can share this file".to_string(),
            ));
        }

        let capability = self.issuer.mint(
            &file.id,
            owner_id,
            ttl_seconds.unwrap_or(DEFAULT_TTL_SECS),
            Utc::now(),
        )?;
        info!(
            owner = owner_id,
            file = %file.id,
            ttl = capability.ttl_seconds,
            "Capability issued"
        );
        Ok((file, capability))
    }

    /// Export a folder subtree as a zip archive.
    pub async fn export_folder(&self, owner_id: &str, folder_id: &str) -> Result<ArchiveExport> {
        ArchiveExporter::new(
            self.db.pool(),
            self.backend.as_ref(),
            &self.options.staging_root,
        )
        .export_folder_as_archive(owner_id, folder_id)
        .await
    }

    /// Open bytes by raw path under the owner's legacy layouts.
    ///
    /// Each segment is sanitized on its own; segments that sanitize to
    /// nothing (`..`, `.`) are dropped.
    pub async fn open_legacy_static(
        &self,
        owner_id: &str,
        raw_path: &str,
        range: Option<&str>,
    ) -> Result<Delivery> {
        let mut segments: Vec<String> = raw_path
            .split(['/', '\\'])
            .filter_map(sanitize_segment)
            .collect();
        let filename = segments
            .pop()
            .ok_or_else(|| StowageError::Validation("empty static path".to_string()))?;

        let lookup = LegacyLookup {
            owner_id,
            stored_locator: None,
            folder_path: &segments,
            filename: &filename,
        };
        let locator = legacy::locate(self.backend.as_ref(), legacy::STATIC_CANDIDATES, &lookup)
            .await?
            .ok_or_else(|| StowageError::NotFound(format!("static file {filename}")))?;

        delivery::open(self.backend.as_ref(), &locator, &filename, None, range).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::NewFile;
    use crate::storage::{bytes_stream, LocalDiskBackend};
    use bytes::Bytes;
    use futures::StreamExt;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        engine: Arc<FileEngine>,
    }

    async fn setup() -> Fixture {
        let temp = TempDir::new().unwrap();
        let db = Database::open_in_memory().await.unwrap();
        let backend = Arc::new(LocalDiskBackend::new(temp.path().join("files")).unwrap());
        let options = EngineOptions {
            staging_root: temp.path().join("staging"),
            max_file_size: 1024 * 1024,
        };
        let engine = FileEngine::new(db, backend, CapabilityIssuer::new("cap-secret"), options);
        Fixture {
            _temp: temp,
            engine: Arc::new(engine),
        }
    }

    async fn put_file(engine: &FileEngine, owner: &str, parent: &str, name: &str, body: &str) -> FileEntry {
        let stored = engine
            .backend()
            .write(owner, name, bytes_stream(body.to_string()))
            .await
            .unwrap();
        FileRepository::new(engine.database().pool())
            .create(&NewFile::new(owner, parent, name, &stored.locator, stored.size))
            .await
            .unwrap()
    }

    async fn body(delivery: Delivery) -> Vec<u8> {
        let chunks: Vec<std::io::Result<Bytes>> = delivery.reader.stream.collect().await;
        chunks.into_iter().flat_map(|c| c.unwrap().to_vec()).collect()
    }

    #[tokio::test]
    async fn test_concurrent_root_creation() {
        let fx = setup().await;

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let engine = fx.engine.clone();
                tokio::spawn(async move { engine.root_folder_id("alice").await.unwrap() })
            })
            .collect();
        let ids: Vec<String> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert!(ids.iter().all(|id| id == &ids[0]));
        let roots = FolderRepository::new(fx.engine.database().pool())
            .count_roots("alice")
            .await
            .unwrap();
        assert_eq!(roots, 1);
    }

    #[tokio::test]
    async fn test_folder_lifecycle() {
        let fx = setup().await;
        let engine = &fx.engine;

        let docs = engine.create_folder("alice", None, "docs").await.unwrap();
        let sub = engine
            .create_folder("alice", Some(&docs.id), "2024")
            .await
            .unwrap();

        let (root, folders) = engine.list_folders("alice", None).await.unwrap();
        assert_eq!(root, engine.root_folder_id("alice").await.unwrap());
        assert_eq!(folders.len(), 1);
        assert_eq!(folders[0].name, "docs");

        let crumbs = engine.breadcrumb("alice", &sub.id).await.unwrap();
        let names: Vec<&str> = crumbs.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["root", "docs", "2024"]);

        assert!(matches!(
            engine.delete_folder("alice", &docs.id).await,
            Err(StowageError::Validation(_))
        ));
        engine.delete_folder("alice", &sub.id).await.unwrap();
        engine.delete_folder("alice", &docs.id).await.unwrap();
        assert!(engine.list_children("alice", &root).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_folder_is_not_found() {
        let fx = setup().await;
        let docs = fx.engine.create_folder("alice", None, "docs").await.unwrap();

        assert!(matches!(
            fx.engine.list_children("bob", &docs.id).await,
            Err(StowageError::NotFound(_))
        ));
        assert!(matches!(
            fx.engine.create_folder("bob", Some(&docs.id), "x").await,
            Err(StowageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_file_removes_bytes_and_row() {
        let fx = setup().await;
        let root = fx.engine.root_folder_id("alice").await.unwrap();
        let file = put_file(&fx.engine, "alice", &root, "a.txt", "bytes").await;

        fx.engine.delete_file("alice", &file.id).await.unwrap();

        assert!(!fx.engine.backend().exists(&file.storage_locator).await.unwrap());
        assert!(matches!(
            fx.engine.get_file("alice", &file.id).await,
            Err(StowageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_file_with_missing_bytes() {
        let fx = setup().await;
        let root = fx.engine.root_folder_id("alice").await.unwrap();
        let file = put_file(&fx.engine, "alice", &root, "a.txt", "bytes").await;
        fx.engine.backend().delete(&file.storage_locator).await.unwrap();

        fx.engine.delete_file("alice", &file.id).await.unwrap();

        assert!(fx.engine.get_file("alice", &file.id).await.is_err());
    }

    #[tokio::test]
    async fn test_capability_flow() {
        let fx = setup().await;
        let root = fx.engine.root_folder_id("alice").await.unwrap();
        let file = put_file(&fx.engine, "alice", &root, "a.txt", "shared").await;
        let other = put_file(&fx.engine, "alice", &root, "b.txt", "private").await;

        let (entry, cap) = fx
            .engine
            .issue_capability("alice", &file.id, None)
            .await
            .unwrap();
        assert_eq!(entry.filename, "a.txt");
        assert_eq!(cap.ttl_seconds, DEFAULT_TTL_SECS);

        let delivery = fx
            .engine
            .open_with_capability(&cap.token, &file.id, None)
            .await
            .unwrap();
        assert_eq!(body(delivery).await, b"shared");

        assert!(matches!(
            fx.engine.open_with_capability(&cap.token, &other.id, None).await,
            Err(StowageError::Authorization(_))
        ));
        assert!(matches!(
            fx.engine.issue_capability("bob", &file.id, None).await,
            Err(StowageError::Permission(_))
        ));
        assert!(matches!(
            fx.engine.issue_capability("alice", "missing", None).await,
            Err(StowageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_open_for_owner_with_range() {
        let fx = setup().await;
        let root = fx.engine.root_folder_id("alice").await.unwrap();
        let file = put_file(&fx.engine, "alice", &root, "a.txt", "0123456789").await;

        let delivery = fx
            .engine
            .open_for_owner("alice", &file.id, Some("bytes=2-4"))
            .await
            .unwrap();

        assert_eq!(delivery.content_range().as_deref(), Some("bytes 2-4/10"));
        assert_eq!(body(delivery).await, b"234");
        assert!(matches!(
            fx.engine.open_for_owner("bob", &file.id, None).await,
            Err(StowageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_legacy_static_fallback_chain() {
        let fx = setup().await;
        let backend = fx.engine.backend();
        backend
            .write("alice/notes", "today.txt", bytes_stream("nested"))
            .await
            .unwrap();
        backend.write("", "flat.txt", bytes_stream("flat")).await.unwrap();
        backend
            .write("files", "prefixed.txt", bytes_stream("prefixed"))
            .await
            .unwrap();

        let nested = fx
            .engine
            .open_legacy_static("alice", "notes/today.txt", None)
            .await
            .unwrap();
        assert_eq!(body(nested).await, b"nested");

        let flat = fx
            .engine
            .open_legacy_static("alice", "whatever/flat.txt", None)
            .await
            .unwrap();
        assert_eq!(body(flat).await, b"flat");

        let prefixed = fx
            .engine
            .open_legacy_static("alice", "prefixed.txt", None)
            .await
            .unwrap();
        assert_eq!(body(prefixed).await, b"prefixed");

        assert!(matches!(
            fx.engine.open_legacy_static("alice", "nope.txt", None).await,
            Err(StowageError::NotFound(_))
        ));
        assert!(matches!(
            fx.engine.open_legacy_static("alice", "../..", None).await,
            Err(StowageError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_export_folder_through_engine() {
        let fx = setup().await;
        let root = fx.engine.root_folder_id("alice").await.unwrap();
        put_file(&fx.engine, "alice", &root, "a.txt", "bytes").await;

        let export = fx.engine.export_folder("alice", &root).await.unwrap();

        assert_eq!(export.filename, "root.zip");
        assert!(export.size > 0);
    }
}

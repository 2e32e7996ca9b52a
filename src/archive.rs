//! Folder export as a zip archive.
//!
//! Export runs in three steps inside a private staging directory:
//! 1. breadth-first walk of the folder subtree, copying each file's bytes
//!    into a mirror of the tree (files whose bytes cannot be found anywhere
//!    are skipped)
//! 2. compression of the mirror into `archive.zip` on a blocking thread
//! 3. streaming of the archive to the caller
//!
//! The staging directory is owned by a [`TempDir`]. Before streaming starts it
//! is removed by early return; afterwards [`ArchiveStream`] removes it when the
//! stream ends, fails, or is dropped.

use std::collections::{HashSet, VecDeque};
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use sqlx::SqlitePool;
use tempfile::TempDir;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::catalog::{validate_entry_name, FileRepository, FolderRepository};
use crate::legacy::{self, LegacyLookup};
use crate::sandbox::sanitize_segment;
use crate::storage::StorageBackend;
use crate::{Result, StowageError};

/// Prefix of per-export staging directories.
pub const STAGING_PREFIX: &str = "stowage-export-";

const TREE_DIR: &str = "tree";
const ARCHIVE_NAME: &str = "archive.zip";

/// Longest staged entry name in bytes. Common file systems stop at 255 and
/// [`unique_name`] may still append ` (N)`.
const MAX_STAGED_NAME_BYTES: usize = 240;

/// Extensions longer than this are cut along with the stem.
const MAX_KEPT_EXTENSION_BYTES: usize = 16;

/// A finished archive ready to stream.
#[derive(Debug)]
pub struct ArchiveExport {
    /// Download name, `<folder name>.zip`.
    pub filename: String,
    /// Archive size in bytes.
    pub size: u64,
    /// The archive bytes.
    pub stream: ArchiveStream,
}

/// Archive byte stream that owns its staging directory.
pub struct ArchiveStream {
    inner: ReaderStream<File>,
    staging: Option<TempDir>,
}

impl ArchiveStream {
    /// Path of the staging directory while it still exists.
    pub fn staging_path(&self) -> Option<&Path> {
        self.staging.as_ref().map(|dir| dir.path())
    }

    fn release(&mut self) {
        if let Some(dir) = self.staging.take() {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => debug!(path = %path.display(), "Staging directory removed"),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove staging directory"),
            }
        }
    }
}

impl std::fmt::Debug for ArchiveStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveStream")
            .field("staging", &self.staging_path())
            .finish_non_exhaustive()
    }
}

impl Stream for ArchiveStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let poll = Pin::new(&mut self.inner).poll_next(cx);
        if matches!(poll, Poll::Ready(None) | Poll::Ready(Some(Err(_)))) {
            self.release();
        }
        poll
    }
}

/// Counters from the staging walk.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StagingSummary {
    /// Folders mirrored (excluding the export root).
    pub folders: usize,
    /// Files copied.
    pub files: usize,
    /// Files skipped because their bytes were not found.
    pub skipped: usize,
}

/// One queued folder in the breadth-first walk.
struct QueuedFolder {
    folder_id: String,
    /// Directory inside the staging tree.
    staged: PathBuf,
    /// Sanitized folder names from the owner root, for layout fallbacks.
    layout_path: Vec<String>,
}

/// Exports folder subtrees.
pub struct ArchiveExporter<'a> {
    pool: &'a SqlitePool,
    backend: &'a dyn StorageBackend,
    staging_root: &'a Path,
}

impl<'a> ArchiveExporter<'a> {
    /// Create an exporter staging under `staging_root`.
    pub fn new(
        pool: &'a SqlitePool,
        backend: &'a dyn StorageBackend,
        staging_root: &'a Path,
    ) -> Self {
        Self {
            pool,
            backend,
            staging_root,
        }
    }

    /// Export `folder_id` and everything below it.
    pub async fn export_folder_as_archive(
        &self,
        owner_id: &str,
        folder_id: &str,
    ) -> Result<ArchiveExport> {
        let folders = FolderRepository::new(self.pool);
        let folder = folders
            .get_owned(owner_id, folder_id)
            .await?
            .ok_or_else(|| StowageError::NotFound("folder".to_string()))?;

        tokio::fs::create_dir_all(self.staging_root).await?;
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(self.staging_root)?;
        let tree = staging.path().join(TREE_DIR);
        tokio::fs::create_dir(&tree).await?;

        let layout_path: Vec<String> = folders
            .get_breadcrumb(&folder.id)
            .await?
            .iter()
            .filter(|f| !f.is_root())
            .map(|f| layout_segment(&f.name))
            .collect();

        let summary = self
            .stage(owner_id, &folder.id, &tree, layout_path)
            .await?;

        let archive_path = staging.path().join(ARCHIVE_NAME);
        let zip_tree = tree.clone();
        let zip_path = archive_path.clone();
        let size = tokio::task::spawn_blocking(move || build_zip(&zip_tree, &zip_path))
            .await
            .map_err(|e| StowageError::Backend(format!("compression task failed: {e}")))??;

        let file = File::open(&archive_path).await?;
        info!(
            owner = owner_id,
            folder = %folder.id,
            folders = summary.folders,
            files = summary.files,
            skipped = summary.skipped,
            size,
            "Folder archive ready"
        );

        Ok(ArchiveExport {
            filename: format!("{}.zip", folder.name),
            size,
            stream: ArchiveStream {
                inner: ReaderStream::new(file),
                staging: Some(staging),
            },
        })
    }

    /// Breadth-first copy of the subtree into `tree`.
    async fn stage(
        &self,
        owner_id: &str,
        folder_id: &str,
        tree: &Path,
        layout_path: Vec<String>,
    ) -> Result<StagingSummary> {
        let folders = FolderRepository::new(self.pool);
        let files = FileRepository::new(self.pool);
        let mut summary = StagingSummary::default();
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue = VecDeque::from([QueuedFolder {
            folder_id: folder_id.to_string(),
            staged: tree.to_path_buf(),
            layout_path,
        }]);

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.folder_id.clone()) {
                continue;
            }
            let mut used: HashSet<String> = HashSet::new();

            for sub in folders
                .list_child_folders(owner_id, &current.folder_id)
                .await?
            {
                let name = unique_name(&mut used, &staging_name(&sub.name));
                let staged = current.staged.join(&name);
                tokio::fs::create_dir(&staged).await?;
                summary.folders += 1;

                let mut layout_path = current.layout_path.clone();
                layout_path.push(layout_segment(&sub.name));
                queue.push_back(QueuedFolder {
                    folder_id: sub.id,
                    staged,
                    layout_path,
                });
            }

            for file in files.list_child_files(owner_id, &current.folder_id).await? {
                let lookup = LegacyLookup {
                    owner_id,
                    stored_locator: Some(&file.storage_locator),
                    folder_path: &current.layout_path,
                    filename: &file.filename,
                };
                let Some(locator) =
                    legacy::locate(self.backend, legacy::CATALOG_CANDIDATES, &lookup).await?
                else {
                    warn!(file = %file.id, name = %file.filename, "Bytes not found, skipping");
                    summary.skipped += 1;
                    continue;
                };

                let name = unique_name(&mut used, &staging_name(&file.filename));
                if self
                    .copy_into(&locator, &current.staged.join(&name))
                    .await?
                {
                    summary.files += 1;
                } else {
                    warn!(file = %file.id, locator = %locator, "Bytes vanished, skipping");
                    summary.skipped += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Copy one object into the staging tree. Returns `false` if it is gone.
    async fn copy_into(&self, locator: &str, dest: &Path) -> Result<bool> {
        let reader = match self.backend.read(locator).await {
            Ok(reader) => reader,
            Err(StowageError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        let mut out = File::create(dest).await?;
        let mut stream = reader.stream;
        while let Some(chunk) = stream.next().await {
            out.write_all(&chunk?).await?;
        }
        out.flush().await?;
        Ok(true)
    }
}

/// Name for an entry inside the staging tree.
fn staging_name(name: &str) -> String {
    let name = if validate_entry_name(name).is_ok() {
        name.trim().to_string()
    } else {
        layout_segment(name)
    };
    fit_name(&name, MAX_STAGED_NAME_BYTES)
}

/// Cut `name` to at most `max` bytes on a char boundary, keeping a short
/// extension.
fn fit_name(name: &str, max: usize) -> String {
    if name.len() <= max {
        return name.to_string();
    }

    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 && name.len() - dot <= MAX_KEPT_EXTENSION_BYTES => name.split_at(dot),
        _ => (name, ""),
    };
    let mut end = max.saturating_sub(ext.len()).min(stem.len());
    while !stem.is_char_boundary(end) {
        end -= 1;
    }
    match stem[..end].trim_end() {
        "" => format!("_{ext}"),
        stem => format!("{stem}{ext}"),
    }
}

fn layout_segment(name: &str) -> String {
    sanitize_segment(name).unwrap_or_else(|| "_".to_string())
}

/// Pick a name not yet used in this directory: `name`, `name (1)`, ...
fn unique_name(used: &mut HashSet<String>, name: &str) -> String {
    if used.insert(name.to_string()) {
        return name.to_string();
    }

    let path = Path::new(name);
    let (stem, ext) = match (path.file_stem().and_then(|s| s.to_str()), path.extension()) {
        (Some(stem), Some(ext)) => (stem.to_string(), format!(".{}", ext.to_string_lossy())),
        _ => (name.to_string(), String::new()),
    };

    let mut n = 1;
    loop {
        let candidate = format!("{stem} ({n}){ext}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

fn zip_error(e: zip::result::ZipError) -> StowageError {
    StowageError::Backend(format!("archive compression failed: {e}"))
}

/// Compress `tree` into `archive_path`, returning the archive size.
fn build_zip(tree: &Path, archive_path: &Path) -> Result<u64> {
    let file = std::fs::File::create(archive_path)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    add_directory_entries(&mut zip, tree, "", &options)?;

    let file = zip.finish().map_err(zip_error)?;
    Ok(file.metadata()?.len())
}

/// Add the contents of `dir` in sorted order; directories get explicit entries.
fn add_directory_entries<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    dir: &Path,
    prefix: &str,
    options: &SimpleFileOptions,
) -> Result<()> {
    let mut entries = std::fs::read_dir(dir)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let name = format!("{prefix}{}", entry.file_name().to_string_lossy());
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            let dir_name = format!("{name}/");
            zip.add_directory(dir_name.clone(), options.clone())
                .map_err(zip_error)?;
            add_directory_entries(zip, &entry.path(), &dir_name, options)?;
        } else if file_type.is_file() {
            let len = entry.metadata()?.len();
            zip.start_file(name, options.clone().large_file(len >= u64::from(u32::MAX)))
                .map_err(zip_error)?;
            let mut source = std::fs::File::open(entry.path())?;
            io::copy(&mut source, zip)?;
        }
    }
    Ok(())
}

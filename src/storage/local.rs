//! Local disk backend.
//!
//! Objects are stored under a base directory, nested by owner and folder
//! names:
//! ```text
//! {base_path}/
//! ├── alice/
//! │   ├── notes.txt
//! │   ├── notes-20240501093012345.txt
//! │   └── photos/
//! │       └── cat.jpg
//! └── bob/
//!     └── ...
//! ```
//! Every path goes through [`resolve_safe_path`].

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument, warn};

use super::{
    join_locator, locator_segments, ByteStream, ObjectInfo, ObjectReader, StorageBackend,
    StoredObject,
};
use crate::sandbox::{resolve_safe_path, validate_segment};
use crate::{Result, StowageError};

/// Attempts with a numeric suffix after the timestamp name is also taken.
const MAX_RENAME_ATTEMPTS: u32 = 1000;

/// Local disk storage backend.
#[derive(Debug, Clone)]
pub struct LocalDiskBackend {
    /// Base directory for file storage.
    base_path: PathBuf,
}

impl LocalDiskBackend {
    /// Create a new LocalDiskBackend with the given base path.
    ///
    /// The base directory will be created if it doesn't exist.
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;

        Ok(Self { base_path })
    }

    /// Get the base path of this storage.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve a locator to an absolute path inside the sandbox.
    pub fn object_path(&self, locator: &str) -> Result<PathBuf> {
        resolve_safe_path(&self.base_path, locator_segments(locator))
    }

    /// Name used when `name` is already taken: `stem-YYYYMMDDHHMMSSmmm.ext`.
    fn timestamped_name(name: &str, now: DateTime<Utc>, attempt: u32) -> String {
        let path = Path::new(name);
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(name);
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default();
        let stamp = now.format("%Y%m%d%H%M%S%3f");

        if attempt == 0 {
            format!("{stem}-{stamp}{ext}")
        } else {
            format!("{stem}-{stamp}-{attempt}{ext}")
        }
    }

    /// Create a file that did not exist before, renaming on collision.
    async fn create_unique(&self, parent: &[&str], name: &str) -> Result<(File, String, PathBuf)> {
        let now = Utc::now();
        let candidates = std::iter::once(name.to_string())
            .chain((0..MAX_RENAME_ATTEMPTS).map(|n| Self::timestamped_name(name, now, n)));

        for candidate in candidates {
            let mut segments: Vec<&str> = parent.to_vec();
            segments.push(&candidate);
            let path = resolve_safe_path(&self.base_path, &segments)?;

            match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(file) => return Ok((file, candidate, path)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    debug!(name = %candidate, "Name taken, trying next candidate");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StowageError::Backend(format!(
            "could not find a free name for {name}"
        )))
    }

    async fn open(&self, locator: &str) -> Result<(File, ObjectInfo)> {
        let path = self.object_path(locator)?;
        let file = File::open(&path).await.map_err(|e| not_found_or_io(e, locator))?;
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(StowageError::NotFound(format!("object {locator}")));
        }
        let info = ObjectInfo {
            size: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        };
        Ok((file, info))
    }
}

fn not_found_or_io(e: io::Error, locator: &str) -> StowageError {
    if e.kind() == io::ErrorKind::NotFound {
        StowageError::NotFound(format!("object {locator}"))
    } else {
        StowageError::Io(e)
    }
}

async fn copy_stream(file: &mut File, mut data: ByteStream<'_>) -> io::Result<u64> {
    let mut written = 0u64;
    while let Some(chunk) = data.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

#[async_trait]
impl StorageBackend for LocalDiskBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn supports_range(&self) -> bool {
        true
    }

    #[instrument(skip(self, data), fields(backend = "local"))]
    async fn write(&self, parent: &str, name: &str, data: ByteStream<'_>) -> Result<StoredObject> {
        validate_segment(name)?;
        let parent_segments = locator_segments(parent);
        if !parent_segments.is_empty() {
            let dir = resolve_safe_path(&self.base_path, &parent_segments)?;
            fs::create_dir_all(&dir).await?;
        }

        let (mut file, stored_name, path) = self.create_unique(&parent_segments, name).await?;
        match copy_stream(&mut file, data).await {
            Ok(size) => {
                let mut segments = parent_segments;
                segments.push(&stored_name);
                debug!(size, stored_name = %stored_name, "Object written");
                Ok(StoredObject {
                    locator: join_locator(segments),
                    size,
                    stored_name,
                })
            }
            Err(e) => {
                drop(file);
                if let Err(remove_err) = fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %remove_err, "Failed to remove partial file");
                }
                Err(StowageError::Io(e))
            }
        }
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn read(&self, locator: &str) -> Result<ObjectReader> {
        let (file, info) = self.open(locator).await?;
        Ok(ObjectReader {
            stream: Box::pin(ReaderStream::new(file)),
            len: info.size,
            info,
        })
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn read_range(&self, locator: &str, start: u64, end: u64) -> Result<ObjectReader> {
        let (mut file, info) = self.open(locator).await?;
        if start > end || end >= info.size {
            return Err(StowageError::RangeNotSatisfiable { size: info.size });
        }

        let len = end - start + 1;
        file.seek(SeekFrom::Start(start)).await?;
        Ok(ObjectReader {
            stream: Box::pin(ReaderStream::new(file.take(len))),
            len,
            info,
        })
    }

    async fn stat(&self, locator: &str) -> Result<ObjectInfo> {
        let (_, info) = self.open(locator).await?;
        Ok(info)
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn delete(&self, locator: &str) -> Result<()> {
        let path = self.object_path(locator)?;
        fs::remove_file(&path)
            .await
            .map_err(|e| not_found_or_io(e, locator))
    }

    async fn exists(&self, locator: &str) -> Result<bool> {
        let path = self.object_path(locator)?;
        match fs::metadata(&path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

//! Storage backends.
//!
//! Bytes live behind the [`StorageBackend`] capability set. Exactly one
//! backend is active per process; it is built once at startup by
//! [`build_backend`] and shared as `Arc<dyn StorageBackend>`.
//!
//! Locators are opaque to callers. The local backend uses `/`-joined relative
//! paths under its base directory; the remote backend uses provider object ids.

mod local;
mod remote;

pub use local::LocalDiskBackend;
pub use remote::RemoteDriveBackend;

use std::io;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use tracing::info;

use crate::config::{BackendKind, StorageConfig};
use crate::{Result, StowageError};

/// A boxed stream of byte chunks.
///
/// Writes accept borrowed streams so a request body can be piped straight
/// into a backend.
pub type ByteStream<'a> = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + 'a>>;

/// Result of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Locator to persist in the catalog.
    pub locator: String,
    /// Number of bytes written.
    pub size: u64,
    /// Final name on the backend (after any collision rename).
    pub stored_name: String,
}

/// Object metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Total object size in bytes.
    pub size: u64,
    /// Last modification time, if the backend reports one.
    pub modified: Option<DateTime<Utc>>,
}

/// An open read of a whole object or of a byte window.
pub struct ObjectReader {
    /// The bytes.
    pub stream: ByteStream<'static>,
    /// Number of bytes `stream` yields.
    pub len: u64,
    /// Metadata of the whole object.
    pub info: ObjectInfo,
}

impl std::fmt::Debug for ObjectReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectReader")
            .field("len", &self.len)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// Capability set shared by all storage backends.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Whether [`StorageBackend::read_range`] is available.
    fn supports_range(&self) -> bool {
        false
    }

    /// Write a new object called `name` under `parent`.
    ///
    /// `parent` is a `/`-joined relative location (owner first). A name
    /// collision never overwrites: the object is stored under a new name,
    /// reported in [`StoredObject::stored_name`].
    async fn write(&self, parent: &str, name: &str, data: ByteStream<'_>) -> Result<StoredObject>;

    /// Open a whole object for reading.
    async fn read(&self, locator: &str) -> Result<ObjectReader>;

    /// Open the inclusive byte window `start..=end` of an object.
    async fn read_range(&self, locator: &str, _start: u64, _end: u64) -> Result<ObjectReader> {
        Err(StowageError::Unsupported(format!(
            "{} backend cannot read byte ranges of {locator}",
            self.name()
        )))
    }

    /// Get object metadata.
    async fn stat(&self, locator: &str) -> Result<ObjectInfo>;

    /// Delete an object.
    async fn delete(&self, locator: &str) -> Result<()>;

    /// Check whether an object exists.
    async fn exists(&self, locator: &str) -> Result<bool>;
}

/// Build the configured backend.
pub fn build_backend(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match config.backend {
        BackendKind::Local => Arc::new(LocalDiskBackend::new(&config.local.base_path)?),
        BackendKind::Remote => Arc::new(RemoteDriveBackend::new(&config.remote)?),
    };
    info!(backend = backend.name(), "Storage backend ready");
    Ok(backend)
}

/// Split a locator or parent location into its `/`-separated parts.
pub(crate) fn locator_segments(locator: &str) -> Vec<&str> {
    locator.split('/').filter(|s| !s.is_empty()).collect()
}

/// Join segments into a locator.
pub fn join_locator<I, S>(segments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    segments
        .into_iter()
        .map(|s| s.as_ref().to_string())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Wrap an in-memory buffer as a [`ByteStream`].
pub fn bytes_stream(data: impl Into<Bytes>) -> ByteStream<'static> {
    let data: Bytes = data.into();
    Box::pin(futures::stream::once(async move { Ok(data) }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocalStorageConfig;
    use tempfile::TempDir;

    #[test]
    fn test_locator_segments() {
        assert_eq!(locator_segments("alice/docs/a.txt"), vec!["alice", "docs", "a.txt"]);
        assert_eq!(locator_segments("/alice//a.txt/"), vec!["alice", "a.txt"]);
        assert!(locator_segments("").is_empty());
    }

    #[test]
    fn test_join_locator() {
        assert_eq!(join_locator(["alice", "", "a.txt"]), "alice/a.txt");
        assert_eq!(join_locator(Vec::<String>::new()), "");
    }

    #[tokio::test]
    async fn test_build_local_backend() {
        let temp = TempDir::new().unwrap();
        let config = StorageConfig {
            local: LocalStorageConfig {
                base_path: temp.path().join("files").to_string_lossy().into_owned(),
            },
            ..Default::default()
        };

        let backend = build_backend(&config).unwrap();

        assert_eq!(backend.name(), "local");
        assert!(backend.supports_range());
        assert!(temp.path().join("files").is_dir());
    }
}

//! Remote drive backend.
//!
//! Talks to a REST cloud drive with bearer-token auth:
//! - `POST   {endpoint}/objects?parent=&name=` with the raw body
//! - `GET    {endpoint}/objects/{id}` for metadata
//! - `GET    {endpoint}/objects/{id}/content` for bytes (optionally ranged)
//! - `DELETE {endpoint}/objects/{id}`
//!
//! Locators are the provider's object ids.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use reqwest::{header, Client, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::{ByteStream, ObjectInfo, ObjectReader, StorageBackend, StoredObject};
use crate::config::RemoteStorageConfig;
use crate::{Result, StowageError};

/// Chunks buffered between the incoming stream and the upload request.
const UPLOAD_CHANNEL_CAPACITY: usize = 8;

/// Object metadata as returned by the drive.
#[derive(Debug, Deserialize)]
struct DriveObject {
    id: String,
    size: u64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    modified_at: Option<DateTime<Utc>>,
}

/// Remote cloud-drive storage backend.
#[derive(Debug, Clone)]
pub struct RemoteDriveBackend {
    client: Client,
    endpoint: String,
    access_token: String,
    range_reads: bool,
}

impl RemoteDriveBackend {
    /// Create a backend from configuration.
    pub fn new(config: &RemoteStorageConfig) -> Result<Self> {
        url::Url::parse(&config.endpoint).map_err(|e| {
            StowageError::Config(format!("invalid remote endpoint {}: {e}", config.endpoint))
        })?;

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| StowageError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
            range_reads: config.range_reads,
        })
    }

    fn object_url(&self, locator: &str) -> String {
        format!("{}/objects/{}", self.endpoint, urlencoding::encode(locator))
    }

    fn content_url(&self, locator: &str) -> String {
        format!("{}/content", self.object_url(locator))
    }

    /// Map a non-success response to an error.
    async fn check(response: Response, locator: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(StowageError::NotFound(format!("object {locator}")));
        }
        let body = response.text().await.unwrap_or_default();
        Err(StowageError::Backend(format!(
            "drive returned {status} for {locator}: {}",
            body.chars().take(200).collect::<String>()
        )))
    }

    fn into_stream(response: Response) -> ByteStream<'static> {
        Box::pin(response.bytes_stream().map(|chunk| chunk.map_err(io::Error::other)))
    }
}

/// Forward `data` into the upload channel until it ends or the request is gone.
async fn pump(mut data: ByteStream<'_>, mut tx: mpsc::Sender<io::Result<Bytes>>) -> io::Result<u64> {
    let mut sent = 0u64;
    while let Some(chunk) = data.next().await {
        match chunk {
            Ok(bytes) => {
                let len = bytes.len() as u64;
                if tx.send(Ok(bytes)).await.is_err() {
                    break;
                }
                sent += len;
            }
            Err(e) => {
                // Fail the request body so the drive never commits a truncated object.
                let _ = tx
                    .send(Err(io::Error::new(e.kind(), e.to_string())))
                    .await;
                return Err(e);
            }
        }
    }
    Ok(sent)
}

#[async_trait]
impl StorageBackend for RemoteDriveBackend {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn supports_range(&self) -> bool {
        self.range_reads
    }

    #[instrument(skip(self, data), fields(backend = "remote"))]
    async fn write(&self, parent: &str, name: &str, data: ByteStream<'_>) -> Result<StoredObject> {
        let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(UPLOAD_CHANNEL_CAPACITY);

        let request = self
            .client
            .post(format!("{}/objects", self.endpoint))
            .query(&[("parent", parent), ("name", name)])
            .bearer_auth(&self.access_token)
            .body(reqwest::Body::wrap_stream(rx))
            .send();

        let (pumped, response) = tokio::join!(pump(data, tx), request);
        let sent = pumped?;
        let response = Self::check(response?, name).await?;
        let object: DriveObject = response.json().await?;

        if object.size != sent {
            warn!(
                id = %object.id,
                sent,
                reported = object.size,
                "Drive reported a different size than was uploaded"
            );
        }
        debug!(id = %object.id, size = object.size, "Object uploaded");

        Ok(StoredObject {
            locator: object.id,
            size: object.size,
            stored_name: object.name.unwrap_or_else(|| name.to_string()),
        })
    }

    #[instrument(skip(self), fields(backend = "remote"))]
    async fn read(&self, locator: &str) -> Result<ObjectReader> {
        let info = self.stat(locator).await?;
        let response = self
            .client
            .get(self.content_url(locator))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let response = Self::check(response, locator).await?;

        Ok(ObjectReader {
            stream: Self::into_stream(response),
            len: info.size,
            info,
        })
    }

    #[instrument(skip(self), fields(backend = "remote"))]
    async fn read_range(&self, locator: &str, start: u64, end: u64) -> Result<ObjectReader> {
        if !self.range_reads {
            return Err(StowageError::Unsupported(
                "remote drive range reads are disabled".to_string(),
            ));
        }

        let info = self.stat(locator).await?;
        if start > end || end >= info.size {
            return Err(StowageError::RangeNotSatisfiable { size: info.size });
        }

        let response = self
            .client
            .get(self.content_url(locator))
            .bearer_auth(&self.access_token)
            .header(header::RANGE, format!("bytes={start}-{end}"))
            .send()
            .await?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => Ok(ObjectReader {
                stream: Self::into_stream(response),
                len: end - start + 1,
                info,
            }),
            StatusCode::RANGE_NOT_SATISFIABLE => {
                Err(StowageError::RangeNotSatisfiable { size: info.size })
            }
            status if status.is_success() => Err(StowageError::Unsupported(format!(
                "drive ignored the Range header ({status})"
            ))),
            _ => {
                Self::check(response, locator).await?;
                Err(StowageError::Backend("unexpected drive response".to_string()))
            }
        }
    }

    async fn stat(&self, locator: &str) -> Result<ObjectInfo> {
        let response = self
            .client
            .get(self.object_url(locator))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let object: DriveObject = Self::check(response, locator).await?.json().await?;

        Ok(ObjectInfo {
            size: object.size,
            modified: object.modified_at,
        })
    }

    #[instrument(skip(self), fields(backend = "remote"))]
    async fn delete(&self, locator: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.object_url(locator))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        Self::check(response, locator).await?;
        Ok(())
    }

    async fn exists(&self, locator: &str) -> Result<bool> {
        match self.stat(locator).await {
            Ok(_) => Ok(true),
            Err(StowageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

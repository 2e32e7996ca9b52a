//! Fixtures for unit tests: an in-process fake drive and a backend whose
//! reads fail halfway.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::storage::{
    ByteStream, LocalDiskBackend, ObjectInfo, ObjectReader, StorageBackend, StoredObject,
};
use crate::Result;

struct DriveBlob {
    name: String,
    parent: String,
    data: Bytes,
}

#[derive(Default)]
struct DriveState {
    objects: HashMap<String, DriveBlob>,
    last_token: Option<String>,
    next_id: u64,
    range_reads: bool,
}

type SharedDrive = Arc<Mutex<DriveState>>;

/// A cloud drive served by axum on an ephemeral local port.
pub struct FakeDrive {
    addr: SocketAddr,
    state: SharedDrive,
}

#[derive(Deserialize)]
struct UploadQuery {
    parent: String,
    name: String,
}

impl FakeDrive {
    /// Start the drive. `range_reads` controls whether `Range` is honoured.
    pub async fn start(range_reads: bool) -> Self {
        let state: SharedDrive = Arc::new(Mutex::new(DriveState {
            range_reads,
            ..Default::default()
        }));

        let app = Router::new()
            .route("/objects", post(upload))
            .route("/objects/:id", get(metadata).delete(remove))
            .route("/objects/:id/content", get(content))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    /// Base URL of the drive API.
    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Parent location an object was uploaded under.
    pub fn parent_of(&self, id: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.objects.get(id).map(|o| o.parent.clone())
    }

    /// Bearer token of the most recent upload.
    pub fn last_token(&self) -> Option<String> {
        self.state.lock().unwrap().last_token.clone()
    }

    /// Number of stored objects.
    pub fn object_count(&self) -> usize {
        self.state.lock().unwrap().objects.len()
    }
}

fn describe(id: &str, blob: &DriveBlob) -> serde_json::Value {
    json!({
        "id": id,
        "name": blob.name,
        "size": blob.data.len(),
        "modified_at": Utc::now(),
    })
}

async fn upload(
    State(state): State<SharedDrive>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut state = state.lock().unwrap();
    state.next_id += 1;
    let id = format!("obj-{}", state.next_id);
    state.last_token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    let blob = DriveBlob {
        name: query.name,
        parent: query.parent,
        data: body,
    };
    let described = describe(&id, &blob);
    state.objects.insert(id, blob);

    (StatusCode::CREATED, Json(described)).into_response()
}

async fn metadata(State(state): State<SharedDrive>, Path(id): Path<String>) -> Response {
    let state = state.lock().unwrap();
    match state.objects.get(&id) {
        Some(blob) => Json(describe(&id, blob)).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn content(
    State(state): State<SharedDrive>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let state = state.lock().unwrap();
    let Some(blob) = state.objects.get(&id) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("bytes="))
        .and_then(|v| v.split_once('-'))
        .and_then(|(a, b)| Some((a.parse::<usize>().ok()?, b.parse::<usize>().ok()?)));

    match range {
        Some((start, end)) if state.range_reads => {
            if start >= blob.data.len() {
                return StatusCode::RANGE_NOT_SATISFIABLE.into_response();
            }
            let end = end.min(blob.data.len() - 1);
            (
                StatusCode::PARTIAL_CONTENT,
                [(
                    header::CONTENT_RANGE,
                    format!("bytes {start}-{end}/{}", blob.data.len()),
                )],
                blob.data.slice(start..=end),
            )
                .into_response()
        }
        _ => blob.data.clone().into_response(),
    }
}

async fn remove(State(state): State<SharedDrive>, Path(id): Path<String>) -> StatusCode {
    match state.lock().unwrap().objects.remove(&id) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

/// Local backend whose reads of one locator fail after the first chunk.
pub struct FlakyBackend {
    inner: LocalDiskBackend,
    poisoned: Mutex<Option<String>>,
}

impl FlakyBackend {
    /// Wrap a local backend.
    pub fn new(inner: LocalDiskBackend) -> Self {
        Self {
            inner,
            poisoned: Mutex::new(None),
        }
    }

    /// Make reads of `locator` fail mid-stream.
    pub fn poison(&self, locator: &str) {
        *self.poisoned.lock().unwrap() = Some(locator.to_string());
    }

    fn is_poisoned(&self, locator: &str) -> bool {
        self.poisoned.lock().unwrap().as_deref() == Some(locator)
    }
}

#[async_trait]
impl StorageBackend for FlakyBackend {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn supports_range(&self) -> bool {
        self.inner.supports_range()
    }

    async fn write(&self, parent: &str, name: &str, data: ByteStream<'_>) -> Result<StoredObject> {
        self.inner.write(parent, name, data).await
    }

    async fn read(&self, locator: &str) -> Result<ObjectReader> {
        let mut reader = self.inner.read(locator).await?;
        if self.is_poisoned(locator) {
            let first = Bytes::from_static(b"partial");
            let failing = futures::stream::iter(vec![
                Ok(first),
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "disk went away")),
            ]);
            reader.stream = Box::pin(failing);
        }
        Ok(reader)
    }

    async fn stat(&self, locator: &str) -> Result<ObjectInfo> {
        self.inner.stat(locator).await
    }

    async fn delete(&self, locator: &str) -> Result<()> {
        self.inner.delete(locator).await
    }

    async fn exists(&self, locator: &str) -> Result<bool> {
        self.inner.exists(locator).await
    }
}

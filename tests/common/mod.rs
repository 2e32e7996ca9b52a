//! Test helpers for web API tests.
//!
//! Provides TestApp (an axum-test server over a temporary local backend) and
//! helpers for session tokens and multipart uploads.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use tempfile::TempDir;

use stowage::web::handlers::AppState;
use stowage::web::middleware::JwtState;
use stowage::web::router::create_router;
use stowage::{CapabilityIssuer, Database, EngineOptions, FileEngine, LocalDiskBackend};

/// Session signing secret used by every test server.
pub const SESSION_SECRET: &str = "test-session-secret";

/// Capability signing secret used by every test server.
pub const CAPABILITY_SECRET: &str = "test-capability-secret";

/// Base URL signed URLs are built against.
pub const PUBLIC_BASE_URL: &str = "http://files.test";

/// Upload limit for test servers.
pub const MAX_FILE_SIZE: u64 = 4096;

/// A running test application.
pub struct TestApp {
    /// The axum-test server.
    pub server: TestServer,
    /// The engine behind the server.
    pub engine: Arc<FileEngine>,
    /// Keeps the storage and staging directories alive.
    pub temp: TempDir,
}

impl TestApp {
    /// Create a test app with an in-memory database and a temporary local backend.
    pub async fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let db = Database::open_in_memory()
            .await
            .expect("Failed to create test database");
        let backend = Arc::new(
            LocalDiskBackend::new(temp.path().join("files")).expect("Failed to create backend"),
        );
        let engine = Arc::new(FileEngine::new(
            db,
            backend,
            CapabilityIssuer::new(CAPABILITY_SECRET),
            EngineOptions {
                staging_root: temp.path().join("staging"),
                max_file_size: MAX_FILE_SIZE,
            },
        ));

        let app_state = Arc::new(AppState::new(engine.clone(), PUBLIC_BASE_URL));
        let jwt_state = Arc::new(JwtState::new(SESSION_SECRET));
        let router = create_router(app_state, jwt_state, &[]);
        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            engine,
            temp,
        }
    }

    /// Root directory of the local backend.
    pub fn storage_root(&self) -> PathBuf {
        self.temp.path().join("files")
    }

    /// Staging root used for archive exports.
    pub fn staging_root(&self) -> PathBuf {
        self.temp.path().join("staging")
    }

    /// Upload files for `owner` and return the response.
    pub async fn upload(&self, owner: &str, form: MultipartForm) -> axum_test::TestResponse {
        self.server
            .post("/api/files")
            .add_header(axum::http::header::AUTHORIZATION, bearer(owner))
            .multipart(form)
            .await
    }

    /// Upload a single file into the owner's root and return its ID.
    pub async fn upload_one(&self, owner: &str, filename: &str, data: &[u8]) -> String {
        let response = self.upload(owner, file_form(&[(filename, data)])).await;
        response.assert_status_ok();
        let body = response.json::<Value>();
        body["data"]["stored"][0]["id"]
            .as_str()
            .expect("upload response has no file id")
            .to_string()
    }
}

/// Mint a session token for `owner`.
pub fn session_token(owner: &str) -> String {
    let now = Utc::now().timestamp();
    let claims = json!({
        "sub": owner,
        "iat": now,
        "exp": now + 900,
    });
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SESSION_SECRET.as_bytes()),
    )
    .expect("Failed to encode session token")
}

/// `Authorization` header value for `owner`.
pub fn bearer(owner: &str) -> String {
    format!("Bearer {}", session_token(owner))
}

/// A multipart form with one `file` part per entry.
pub fn file_form(files: &[(&str, &[u8])]) -> MultipartForm {
    files.iter().fold(MultipartForm::new(), |form, (name, data)| {
        form.add_part(
            "file",
            Part::bytes(data.to_vec())
                .file_name(*name)
                .mime_type("application/octet-stream"),
        )
    })
}

/// `len` bytes of a repeating pattern.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Number of entries in a directory, zero if it does not exist.
pub fn dir_entry_count(path: &Path) -> usize {
    std::fs::read_dir(path).map(|d| d.count()).unwrap_or(0)
}

//! Web API File Tests
//!
//! Integration tests for upload, content delivery and signed URL endpoints.

mod common;

use axum::http::header::{
    ACCEPT_RANGES, ACCESS_CONTROL_ALLOW_ORIGIN, AUTHORIZATION, CACHE_CONTROL, CONTENT_RANGE,
    CONTENT_TYPE, RANGE,
};
use axum::http::StatusCode;
use axum_test::multipart::{MultipartForm, Part};
use serde_json::{json, Value};

use common::{bearer, file_form, pattern, TestApp, MAX_FILE_SIZE};

// ============================================================================
// Upload Tests
// ============================================================================

#[tokio::test]
async fn test_upload_all_files_stored() {
    let app = TestApp::new().await;

    let response = app
        .upload(
            "alice",
            file_form(&[("a.txt", b"alpha"), ("b.txt", b"bravo")]),
        )
        .await;

    response.assert_status_ok();
    let body = response.json::<Value>();
    assert_eq!(body["data"]["status"], "complete");
    assert_eq!(body["data"]["stored"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"]["stored"][0]["name"], "a.txt");
    assert_eq!(body["data"]["stored"][1]["size"], 5);
    assert!(body["data"]["failed"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_upload_partial_failure_is_multi_status() {
    let app = TestApp::new().await;
    let too_big = pattern(MAX_FILE_SIZE as usize + 1);

    let response = app
        .upload(
            "alice",
            file_form(&[("small.txt", b"fits"), ("big.bin", &too_big)]),
        )
        .await;

    response.assert_status(StatusCode::MULTI_STATUS);
    let body = response.json::<Value>();
    assert_eq!(body["data"]["status"], "partial");
    assert_eq!(body["data"]["stored"][0]["name"], "small.txt");
    assert_eq!(body["data"]["failed"][0]["name"], "big.bin");
    assert_eq!(body["data"]["failed"][0]["index"], 1);
}

#[tokio::test]
async fn test_upload_all_failed_is_server_error() {
    let app = TestApp::new().await;
    let too_big = pattern(MAX_FILE_SIZE as usize + 1);

    let response = app.upload("alice", file_form(&[("big.bin", &too_big)])).await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body = response.json::<Value>();
    assert_eq!(body["data"]["status"], "failed");
    assert!(body["data"]["stored"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_upload_without_file_parts() {
    let app = TestApp::new().await;

    let response = app
        .upload("alice", MultipartForm::new().add_text("note", "no files here"))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_into_folder_with_relative_paths() {
    let app = TestApp::new().await;

    let folder = app
        .server
        .post("/api/folders")
        .add_header(AUTHORIZATION, bearer("alice"))
        .json(&json!({ "name": "Projects" }))
        .await
        .json::<Value>();
    let folder_id = folder["data"]["id"].as_str().unwrap().to_string();

    let form = MultipartForm::new()
        .add_text("parent", folder_id.clone())
        .add_text("folder_upload", "true")
        .add_part(
            "file",
            Part::bytes(b"fn main() {}".to_vec()).file_name("site/src/main.rs"),
        );
    let response = app.upload("alice", form).await;

    response.assert_status_ok();
    let body = response.json::<Value>();
    let stored = &body["data"]["stored"][0];
    assert_eq!(stored["name"], "main.rs");
    assert_eq!(stored["relative_path"], "site/src/main.rs");
    assert_ne!(stored["parent_id"], folder_id.as_str());

    assert!(app
        .storage_root()
        .join("alice/Projects/site/src/main.rs")
        .is_file());
}

#[tokio::test]
async fn test_upload_requires_session() {
    let app = TestApp::new().await;

    let response = app
        .server
        .post("/api/files")
        .multipart(file_form(&[("a.txt", b"alpha")]))
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}

// ============================================================================
// Content Delivery Tests
// ============================================================================

#[tokio::test]
async fn test_get_content_full() {
    let app = TestApp::new().await;
    let data = pattern(1000);
    let id = app.upload_one("alice", "clip.txt", &data).await;

    let response = app
        .server
        .get(&format!("/api/files/{}", id))
        .add_header(AUTHORIZATION, bearer("alice"))
        .await;

    response.assert_status_ok();
    assert_eq!(response.as_bytes().as_ref(), data.as_slice());
    assert_eq!(
        response.header(CONTENT_TYPE).to_str().unwrap(),
        "text/plain"
    );
    assert_eq!(response.header(ACCEPT_RANGES).to_str().unwrap(), "bytes");
    assert_eq!(
        response.header(CACHE_CONTROL).to_str().unwrap(),
        "private, max-age=300"
    );
    assert_eq!(
        response
            .header(ACCESS_CONTROL_ALLOW_ORIGIN)
            .to_str()
            .unwrap(),
        "*"
    );
}

#[tokio::test]
async fn test_get_content_range() {
    let app = TestApp::new().await;
    let data = pattern(1000);
    let id = app.upload_one("alice", "clip.bin", &data).await;

    let response = app
        .server
        .get(&format!("/api/files/{}", id))
        .add_header(AUTHORIZATION, bearer("alice"))
        .add_header(RANGE, "bytes=0-99".to_string())
        .await;

    response.assert_status(StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.header(CONTENT_RANGE).to_str().unwrap(),
        "bytes 0-99/1000"
    );
    assert_eq!(response.as_bytes().as_ref(), &data[..100]);
}

#[tokio::test]
async fn test_get_content_range_not_satisfiable() {
    let app = TestApp::new().await;
    let id = app.upload_one("alice", "clip.bin", &pattern(1000)).await;

    let response = app
        .server
        .get(&format!("/api/files/{}", id))
        .add_header(AUTHORIZATION, bearer("alice"))
        .add_header(RANGE, "bytes=2000-".to_string())
        .await;

    response.assert_status(StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(
        response.header(CONTENT_RANGE).to_str().unwrap(),
        "bytes */1000"
    );
    assert!(response.as_bytes().is_empty());
}

#[tokio::test]
async fn test_get_content_requires_credentials() {
    let app = TestApp::new().await;
    let id = app.upload_one("alice", "a.txt", b"alpha").await;

    let response = app.server.get(&format!("/api/files/{}", id)).await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_get_content_of_other_owner() {
    let app = TestApp::new().await;
    let id = app.upload_one("alice", "a.txt", b"alpha").await;

    let response = app
        .server
        .get(&format!("/api/files/{}", id))
        .add_header(AUTHORIZATION, bearer("mallory"))
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
}

// ============================================================================
// Signed URL Tests
// ============================================================================

#[tokio::test]
async fn test_signed_url_flow() {
    let app = TestApp::new().await;
    let id = app.upload_one("alice", "report.txt", b"quarterly").await;

    let response = app
        .server
        .post(&format!("/api/files/{}/signed-url", id))
        .add_header(AUTHORIZATION, bearer("alice"))
        .json(&json!({ "filename": "q3 report.txt", "ttl_seconds": 5 }))
        .await;

    response.assert_status_ok();
    let body = response.json::<Value>();
    let url = body["data"]["url"].as_str().unwrap();
    assert!(url.starts_with(&format!(
        "http://files.test/api/files/{}/content/q3%20report.txt?token=",
        id
    )));
    // Clamped up to the minimum lifetime.
    assert_eq!(body["data"]["ttl_seconds"], 60);

    // The URL works without a session.
    let path = url.trim_start_matches("http://files.test");
    let content = app.server.get(path).await;
    content.assert_status_ok();
    assert_eq!(content.as_bytes().as_ref(), b"quarterly");
}

#[tokio::test]
async fn test_signed_url_for_files_named_like_routes() {
    let app = TestApp::new().await;

    let files: [(&str, &[u8]); 2] = [("info", b"info bytes"), ("signed-url", b"signed bytes")];
    for (name, data) in files {
        let id = app.upload_one("alice", name, data).await;

        let body = app
            .server
            .post(&format!("/api/files/{}/signed-url", id))
            .add_header(AUTHORIZATION, bearer("alice"))
            .json(&json!({}))
            .await
            .json::<Value>();
        let url = body["data"]["url"].as_str().unwrap();
        assert!(url.starts_with(&format!(
            "http://files.test/api/files/{}/content/{}?token=",
            id, name
        )));

        // Served as content without a session, not as metadata or a signing call.
        let content = app
            .server
            .get(url.trim_start_matches("http://files.test"))
            .await;
        content.assert_status_ok();
        assert_eq!(content.as_bytes().as_ref(), data);
    }
}

#[tokio::test]
async fn test_signed_url_token_bound_to_file() {
    let app = TestApp::new().await;
    let first = app.upload_one("alice", "one.txt", b"one").await;
    let second = app.upload_one("alice", "two.txt", b"two").await;

    let body = app
        .server
        .post(&format!("/api/files/{}/signed-url", first))
        .add_header(AUTHORIZATION, bearer("alice"))
        .json(&json!({}))
        .await
        .json::<Value>();
    let token = body["data"]["token"].as_str().unwrap();

    let response = app
        .server
        .get(&format!("/api/files/{}?token={}", second, token))
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_signed_url_invalid_token() {
    let app = TestApp::new().await;
    let id = app.upload_one("alice", "one.txt", b"one").await;

    let response = app
        .server
        .get(&format!("/api/files/{}/content/one.txt?token=not.a.token", id))
        .add_header(AUTHORIZATION, bearer("alice"))
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_signed_url_for_other_owner() {
    let app = TestApp::new().await;
    let id = app.upload_one("alice", "one.txt", b"one").await;

    let response = app
        .server
        .post(&format!("/api/files/{}/signed-url", id))
        .add_header(AUTHORIZATION, bearer("mallory"))
        .json(&json!({}))
        .await;

    response.assert_status(StatusCode::FORBIDDEN);
}

// ============================================================================
// Metadata Tests
// ============================================================================

#[tokio::test]
async fn test_file_info_hides_locator() {
    let app = TestApp::new().await;
    let id = app.upload_one("alice", "notes.md", b"# notes").await;

    let response = app
        .server
        .get(&format!("/api/files/{}/info", id))
        .add_header(AUTHORIZATION, bearer("alice"))
        .await;

    response.assert_status_ok();
    let body = response.json::<Value>();
    assert_eq!(body["data"]["filename"], "notes.md");
    assert_eq!(body["data"]["size"], 7);
    assert_eq!(body["data"]["meta"]["originalName"], "notes.md");
    assert!(body["data"]["content_hash"].is_string());
    assert!(body["data"].get("storage_locator").is_none());
}

#[tokio::test]
async fn test_rename_and_delete_file() {
    let app = TestApp::new().await;
    let id = app.upload_one("alice", "draft.txt", b"draft").await;

    let response = app
        .server
        .patch(&format!("/api/files/{}", id))
        .add_header(AUTHORIZATION, bearer("alice"))
        .json(&json!({ "name": "final.txt" }))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["data"]["filename"], "final.txt");

    let response = app
        .server
        .patch(&format!("/api/files/{}", id))
        .add_header(AUTHORIZATION, bearer("alice"))
        .json(&json!({}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let response = app
        .server
        .delete(&format!("/api/files/{}", id))
        .add_header(AUTHORIZATION, bearer("alice"))
        .await;
    response.assert_status(StatusCode::NO_CONTENT);
    assert!(!app.storage_root().join("alice/draft.txt").exists());

    let response = app
        .server
        .get(&format!("/api/files/{}/info", id))
        .add_header(AUTHORIZATION, bearer("alice"))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
}

// ============================================================================
// Static Route Tests
// ============================================================================

#[tokio::test]
async fn test_static_nested_owner_layout() {
    let app = TestApp::new().await;
    app.upload_one("alice", "logo.svg", b"<svg/>").await;

    let response = app
        .server
        .get("/api/static/logo.svg")
        .add_header(AUTHORIZATION, bearer("alice"))
        .await;

    response.assert_status_ok();
    assert_eq!(response.as_bytes().as_ref(), b"<svg/>");
    assert_eq!(
        response.header(CONTENT_TYPE).to_str().unwrap(),
        "image/svg+xml"
    );
}

#[tokio::test]
async fn test_static_files_prefixed_layout() {
    let app = TestApp::new().await;
    let legacy_dir = app.storage_root().join("files");
    std::fs::create_dir_all(&legacy_dir).unwrap();
    std::fs::write(legacy_dir.join("legacy.txt"), b"old bytes").unwrap();

    let response = app
        .server
        .get("/api/static/legacy.txt")
        .add_header(AUTHORIZATION, bearer("alice"))
        .await;

    response.assert_status_ok();
    assert_eq!(response.as_bytes().as_ref(), b"old bytes");
}

#[tokio::test]
async fn test_static_not_found() {
    let app = TestApp::new().await;

    let response = app
        .server
        .get("/api/static/nowhere/missing.txt")
        .add_header(AUTHORIZATION, bearer("alice"))
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(
        response.json::<Value>()["error"]["message"],
        "File not found"
    );
}

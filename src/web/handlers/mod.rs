//! API handlers.

pub mod archive;
pub mod file;
pub mod folder;

pub use archive::*;
pub use file::*;
pub use folder::*;

use std::sync::Arc;

use axum::http::{header, HeaderMap};

use crate::engine::FileEngine;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// The storage engine.
    pub engine: Arc<FileEngine>,
    /// Absolute base URL used in signed URLs.
    pub public_base_url: String,
}

impl AppState {
    /// Create a new application state.
    pub fn new(engine: Arc<FileEngine>, public_base_url: impl Into<String>) -> Self {
        Self {
            engine,
            public_base_url: public_base_url.into(),
        }
    }
}

/// Build a `Content-Disposition` value.
///
/// Control characters are stripped. Non-ASCII names or names with quotes or
/// backslashes get an RFC 5987 `filename*` alongside a sanitized fallback.
pub(crate) fn content_disposition_header(disposition: &str, filename: &str) -> String {
    let cleaned: String = filename.chars().filter(|c| !c.is_control()).collect();
    let fallback: String = cleaned
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if !c.is_ascii() => '_',
            c => c,
        })
        .collect();

    if cleaned.is_ascii() && !cleaned.contains(['"', '\\']) {
        return format!("{disposition}; filename=\"{cleaned}\"");
    }

    format!(
        "{disposition}; filename=\"{fallback}\"; filename*=UTF-8''{}",
        urlencoding::encode(&cleaned)
    )
}

/// The `Range` header, if present and readable.
pub(crate) fn range_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::RANGE).and_then(|v| v.to_str().ok())
}

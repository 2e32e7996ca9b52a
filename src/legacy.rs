//! Locating bytes stored under older layouts.
//!
//! Files written before locators were recorded per entry may sit in one of
//! several places. Lookups try an ordered list of candidate generators and
//! take the first locator that exists on the backend. This is migration debt:
//! once every entry carries a valid locator the fallbacks can go.

use tracing::debug;

use crate::sandbox::sanitize_segment;
use crate::storage::{join_locator, StorageBackend};
use crate::{Result, StowageError};

/// What is known about the bytes being looked for.
#[derive(Debug, Clone, Copy)]
pub struct LegacyLookup<'a> {
    /// Owner of the file.
    pub owner_id: &'a str,
    /// Locator recorded in the catalog, if any.
    pub stored_locator: Option<&'a str>,
    /// Sanitized folder path from the owner root down to the file's folder.
    pub folder_path: &'a [String],
    /// File name (sanitized before use).
    pub filename: &'a str,
}

/// A candidate-path generator.
pub type CandidateFn = fn(&LegacyLookup<'_>) -> Option<String>;

/// Order used when exporting catalog entries.
pub const CATALOG_CANDIDATES: &[CandidateFn] = &[
    stored_locator,
    nested_owner_layout,
    flat_layout,
    files_prefixed_layout,
];

/// Order used by the static path route.
pub const STATIC_CANDIDATES: &[CandidateFn] =
    &[nested_owner_layout, flat_layout, files_prefixed_layout];

/// The locator recorded in the catalog.
pub fn stored_locator(lookup: &LegacyLookup<'_>) -> Option<String> {
    lookup
        .stored_locator
        .filter(|l| !l.is_empty())
        .map(str::to_string)
}

/// `<owner>/<folders...>/<filename>`
pub fn nested_owner_layout(lookup: &LegacyLookup<'_>) -> Option<String> {
    let owner = sanitize_segment(lookup.owner_id)?;
    let filename = sanitize_segment(lookup.filename)?;
    let mut segments = vec![owner];
    segments.extend(lookup.folder_path.iter().cloned());
    segments.push(filename);
    Some(join_locator(segments))
}

/// `<filename>` directly under the storage root.
pub fn flat_layout(lookup: &LegacyLookup<'_>) -> Option<String> {
    sanitize_segment(lookup.filename)
}

/// `files/<filename>`
pub fn files_prefixed_layout(lookup: &LegacyLookup<'_>) -> Option<String> {
    sanitize_segment(lookup.filename).map(|name| join_locator(["files", name.as_str()]))
}

/// Generate candidates in order, without duplicates.
pub fn candidates(strategies: &[CandidateFn], lookup: &LegacyLookup<'_>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for candidate in strategies.iter().filter_map(|strategy| strategy(lookup)) {
        if !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    out
}

/// Return the first candidate that exists on `backend`.
pub async fn locate(
    backend: &dyn StorageBackend,
    strategies: &[CandidateFn],
    lookup: &LegacyLookup<'_>,
) -> Result<Option<String>> {
    for candidate in candidates(strategies, lookup) {
        match backend.exists(&candidate).await {
            Ok(true) => return Ok(Some(candidate)),
            Ok(false) => {}
            Err(StowageError::Sandbox(reason)) => {
                debug!(candidate = %candidate, %reason, "Skipping unusable candidate");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{bytes_stream, LocalDiskBackend};
    use tempfile::TempDir;

    fn lookup<'a>(folder_path: &'a [String], stored: Option<&'a str>) -> LegacyLookup<'a> {
        LegacyLookup {
            owner_id: "alice",
            stored_locator: stored,
            folder_path,
            filename: "report.pdf",
        }
    }

    #[test]
    fn test_candidate_order() {
        let path = vec!["docs".to_string(), "2024".to_string()];
        let found = candidates(CATALOG_CANDIDATES, &lookup(&path, Some("alice/docs/report-1.pdf")));

        assert_eq!(
            found,
            vec![
                "alice/docs/report-1.pdf",
                "alice/docs/2024/report.pdf",
                "report.pdf",
                "files/report.pdf",
            ]
        );
    }

    #[test]
    fn test_candidates_are_deduplicated() {
        let path = vec!["docs".to_string()];
        let found = candidates(CATALOG_CANDIDATES, &lookup(&path, Some("alice/docs/report.pdf")));

        assert_eq!(found.len(), 3);
        assert_eq!(found[0], "alice/docs/report.pdf");
    }

    #[test]
    fn test_hostile_filename_is_sanitized() {
        let path: Vec<String> = vec![];
        let hostile = LegacyLookup {
            owner_id: "../../etc",
            stored_locator: None,
            folder_path: &path,
            filename: "../passwd",
        };

        for candidate in candidates(STATIC_CANDIDATES, &hostile) {
            assert!(!candidate.split('/').any(|s| s == ".."), "{candidate}");
        }
    }

    #[tokio::test]
    async fn test_locate_falls_back_to_files_prefix() {
        let temp = TempDir::new().unwrap();
        let backend = LocalDiskBackend::new(temp.path()).unwrap();
        backend
            .write("files", "report.pdf", bytes_stream("legacy"))
            .await
            .unwrap();
        let path: Vec<String> = vec![];

        let found = locate(&backend, CATALOG_CANDIDATES, &lookup(&path, Some("alice/gone.pdf")))
            .await
            .unwrap();

        assert_eq!(found.as_deref(), Some("files/report.pdf"));
    }

    #[tokio::test]
    async fn test_locate_prefers_earlier_candidates() {
        let temp = TempDir::new().unwrap();
        let backend = LocalDiskBackend::new(temp.path()).unwrap();
        backend.write("", "report.pdf", bytes_stream("flat")).await.unwrap();
        backend
            .write("alice", "report.pdf", bytes_stream("nested"))
            .await
            .unwrap();
        let path: Vec<String> = vec![];

        let found = locate(&backend, STATIC_CANDIDATES, &lookup(&path, None))
            .await
            .unwrap();

        assert_eq!(found.as_deref(), Some("alice/report.pdf"));
    }

    #[tokio::test]
    async fn test_locate_nothing() {
        let temp = TempDir::new().unwrap();
        let backend = LocalDiskBackend::new(temp.path()).unwrap();
        let path: Vec<String> = vec![];

        let found = locate(&backend, STATIC_CANDIDATES, &lookup(&path, None))
            .await
            .unwrap();

        assert!(found.is_none());
    }
}

//! Path sandboxing.
//!
//! Every filesystem path the engine touches is built from validated segments
//! joined under a base directory. [`resolve_safe_path`] validates segments
//! before any filesystem call and then verifies, after canonicalization, that
//! the result is still strictly inside the base directory.

use std::io;
use std::path::{Component, Path, PathBuf};

use crate::{Result, StowageError};

/// Maximum length of a single path segment (in bytes).
pub const MAX_SEGMENT_LENGTH: usize = 255;

/// Check whether a character is allowed in a path segment.
fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '(' | ')' | '-' | ' ')
}

/// Validate one segment against the allow-list.
///
/// This is pure string inspection; it never touches the filesystem.
pub fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(StowageError::Sandbox("empty path segment".to_string()));
    }
    if segment == "." || segment == ".." {
        return Err(StowageError::Sandbox(format!(
            "relative path segment not allowed: {segment}"
        )));
    }
    if segment.len() > MAX_SEGMENT_LENGTH {
        return Err(StowageError::Sandbox("path segment too long".to_string()));
    }
    if let Some(c) = segment.chars().find(|c| !is_allowed_char(*c)) {
        return Err(StowageError::Sandbox(format!(
            "character {c:?} not allowed in path segment"
        )));
    }
    Ok(())
}

/// Resolve `segments` under `base`, failing closed on any escape attempt.
///
/// All segments are validated before the filesystem is consulted. The base
/// directory must exist. The target itself may not exist yet (writes); in that
/// case its nearest existing ancestor is canonicalized instead, so a symlinked
/// directory pointing outside `base` is still caught.
pub fn resolve_safe_path<I, S>(base: &Path, segments: I) -> Result<PathBuf>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut relative = PathBuf::new();
    for segment in segments {
        let segment = segment.as_ref();
        validate_segment(segment)?;
        relative.push(segment);
    }

    if relative.as_os_str().is_empty() {
        return Err(StowageError::Sandbox("path resolves to the base directory".to_string()));
    }

    // Allow-listed segments cannot produce these, but a component walk keeps
    // the invariant local to this function.
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(StowageError::Sandbox("unsafe path component".to_string()));
    }

    let base_canonical = base.canonicalize().map_err(|e| {
        StowageError::Io(io::Error::new(
            e.kind(),
            format!("failed to canonicalize sandbox base: {e}"),
        ))
    })?;
    let joined = base_canonical.join(&relative);

    let resolved = canonicalize_existing_prefix(&joined)?;
    if resolved == base_canonical || !resolved.starts_with(&base_canonical) {
        return Err(StowageError::Sandbox(format!(
            "path escapes sandbox: {}",
            relative.display()
        )));
    }

    Ok(joined)
}

/// Canonicalize the longest existing prefix of `path` and re-append the rest.
fn canonicalize_existing_prefix(path: &Path) -> Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut missing: Vec<std::ffi::OsString> = Vec::new();

    loop {
        match std::fs::symlink_metadata(&existing) {
            Ok(_) => break,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let Some(name) = existing.file_name().map(|n| n.to_os_string()) else {
                    break;
                };
                missing.push(name);
                if !existing.pop() {
                    break;
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    let mut resolved = existing.canonicalize().map_err(|e| {
        StowageError::Sandbox(format!("cannot canonicalize {}: {e}", existing.display()))
    })?;
    for name in missing.into_iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}

/// Derive a safe segment from untrusted input.
///
/// Disallowed characters become `_`; surrounding whitespace and dots are
/// trimmed. Returns `None` when nothing usable remains. The output always
/// passes [`validate_segment`].
pub fn sanitize_segment(raw: &str) -> Option<String> {
    let mapped: String = raw
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| if is_allowed_char(c) { c } else { '_' })
        .collect();

    let trimmed = mapped.trim_matches(|c: char| c == ' ' || c == '.');
    if trimmed.is_empty() {
        return None;
    }

    let mut segment = trimmed.to_string();
    if segment.len() > MAX_SEGMENT_LENGTH {
        // Keep the extension when truncating. Output is ASCII, so byte
        // offsets are char boundaries.
        let ext = Path::new(&segment)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .filter(|e| e.len() < 16)
            .unwrap_or_default();
        let keep = MAX_SEGMENT_LENGTH - ext.len();
        segment = format!("{}{}", &segment[..keep], ext);
    }

    Some(segment)
}

/// Split a client-declared relative path into sanitized segments.
///
/// Separators may be `/` or `\`. Empty, `.` and `..` components are dropped
/// rather than interpreted, so traversal can never climb above the upload
/// destination.
pub fn split_relative_path(raw: &str) -> Vec<String> {
    raw.split(['/', '\\'])
        .filter(|part| !part.is_empty() && *part != "." && *part != "..")
        .filter_map(sanitize_segment)
        .collect()
}

/// Derive the base filename of an upload, discarding any directory part.
pub fn safe_base_name(raw: &str) -> Option<String> {
    split_relative_path(raw).pop()
}

//! Content delivery: Range parsing, MIME resolution and opening the bytes.

use tracing::debug;

use crate::storage::{ObjectReader, StorageBackend};
use crate::{Result, StowageError};

/// Fallback content type.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// A single byte range as written in a `Range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=start-end`
    Bounded {
        /// First byte.
        start: u64,
        /// Last byte (inclusive), before clamping.
        end: u64,
    },
    /// `bytes=start-`
    From(u64),
    /// `bytes=-n`: the last `n` bytes.
    Suffix(u64),
}

impl ByteRange {
    /// Parse a `Range` header value.
    ///
    /// Only a single range in `bytes` units is accepted.
    pub fn parse(header: &str) -> Result<Self> {
        let spec = header
            .trim()
            .strip_prefix("bytes=")
            .ok_or_else(|| StowageError::Validation("range unit must be bytes".to_string()))?;
        if spec.contains(',') {
            return Err(StowageError::Validation(
                "multiple ranges are not supported".to_string(),
            ));
        }

        let (start, end) = spec
            .trim()
            .split_once('-')
            .ok_or_else(|| StowageError::Validation(format!("malformed range: {header}")))?;
        let number = |s: &str| {
            s.trim()
                .parse::<u64>()
                .map_err(|_| StowageError::Validation(format!("malformed range: {header}")))
        };

        match (start.trim().is_empty(), end.trim().is_empty()) {
            (false, false) => Ok(ByteRange::Bounded {
                start: number(start)?,
                end: number(end)?,
            }),
            (false, true) => Ok(ByteRange::From(number(start)?)),
            (true, false) => Ok(ByteRange::Suffix(number(end)?)),
            (true, true) => Err(StowageError::Validation(format!("malformed range: {header}"))),
        }
    }

    /// Resolve against an object size into an inclusive `(start, end)` window.
    ///
    /// `end` is clamped to `size - 1`. Fails with `RangeNotSatisfiable` when
    /// nothing of the object is selected.
    pub fn resolve(self, size: u64) -> Result<(u64, u64)> {
        let unsatisfiable = || StowageError::RangeNotSatisfiable { size };
        if size == 0 {
            return Err(unsatisfiable());
        }
        let last = size - 1;

        let (start, end) = match self {
            ByteRange::Bounded { start, end } => (start, end.min(last)),
            ByteRange::From(start) => (start, last),
            ByteRange::Suffix(0) => return Err(unsatisfiable()),
            ByteRange::Suffix(n) => (size.saturating_sub(n), last),
        };

        if start > end || start >= size {
            return Err(unsatisfiable());
        }
        Ok((start, end))
    }
}

/// Resolve the content type: stored value, then extension table, then
/// `application/octet-stream`.
pub fn resolve_mime(stored: Option<&str>, filename: &str) -> String {
    stored
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .or_else(|| {
            mime_guess::from_path(filename)
                .first_raw()
                .map(str::to_string)
        })
        .unwrap_or_else(|| OCTET_STREAM.to_string())
}

/// Bytes ready to be sent, with everything the response headers need.
#[derive(Debug)]
pub struct Delivery {
    /// Filename for `Content-Disposition`.
    pub filename: String,
    /// Resolved content type.
    pub content_type: String,
    /// The open read.
    pub reader: ObjectReader,
    /// Inclusive window when serving a partial response.
    pub range: Option<(u64, u64)>,
    /// Whether the backend can serve ranges (`Accept-Ranges: bytes`).
    pub accept_ranges: bool,
}

impl Delivery {
    /// `Content-Range` value for partial responses.
    pub fn content_range(&self) -> Option<String> {
        self.range
            .map(|(start, end)| format!("bytes {start}-{end}/{}", self.reader.info.size))
    }
}

/// Open `locator` for delivery, honouring `range` when the backend can.
///
/// A backend without partial reads gets the whole object, whatever the
/// `Range` header says.
pub async fn open(
    backend: &dyn StorageBackend,
    locator: &str,
    filename: &str,
    stored_mime: Option<&str>,
    range: Option<&str>,
) -> Result<Delivery> {
    let content_type = resolve_mime(stored_mime, filename);
    let accept_ranges = backend.supports_range();

    if let (Some(header), true) = (range, accept_ranges) {
        let requested = ByteRange::parse(header)?;
        let info = backend.stat(locator).await?;
        let (start, end) = requested.resolve(info.size)?;

        match backend.read_range(locator, start, end).await {
            Ok(reader) => {
                return Ok(Delivery {
                    filename: filename.to_string(),
                    content_type,
                    reader,
                    range: Some((start, end)),
                    accept_ranges,
                });
            }
            Err(StowageError::Unsupported(reason)) => {
                debug!(locator, %reason, "Range read unavailable, sending whole object");
            }
            Err(e) => return Err(e),
        }
    }

    let reader = backend.read(locator).await?;
    Ok(Delivery {
        filename: filename.to_string(),
        content_type,
        reader,
        range: None,
        accept_ranges,
    })
}

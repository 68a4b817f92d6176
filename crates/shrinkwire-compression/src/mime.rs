//! Response compressibility checks based on headers and MIME type

use http::header::{HeaderMap, CONTENT_ENCODING, CONTENT_RANGE, CONTENT_TYPE};
use std::collections::HashSet;
use tracing::{debug, trace};

const CATCH_ALL: &str = "*/*";

/// MIME types compressed when no list is configured
pub const DEFAULT_MIME_TYPES: &[&str] = &[
    "text/plain",
    "text/css",
    "application/javascript",
    "text/javascript",
    "text/html",
    "application/xml",
    "text/xml",
    "application/json",
    "text/json",
    "application/wasm",
];

/// MIME allow/deny lists
#[derive(Debug, Clone)]
pub struct MimeFilter {
    mime_types: HashSet<String>,
    excluded: HashSet<String>,
}

impl MimeFilter {
    /// Build from configured lists; an empty allow list falls back to [`DEFAULT_MIME_TYPES`]
    pub fn new<S: AsRef<str>>(mime_types: &[S], excluded: &[S]) -> Self {
        let mut allowed: HashSet<String> = mime_types
            .iter()
            .map(|m| m.as_ref().trim().to_ascii_lowercase())
            .collect();
        if allowed.is_empty() {
            allowed = DEFAULT_MIME_TYPES.iter().map(|m| m.to_string()).collect();
        }

        Self {
            mime_types: allowed,
            excluded: excluded
                .iter()
                .map(|m| m.as_ref().trim().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Whether a MIME type (parameters allowed) should be compressed.
    ///
    /// Exact match is checked first, then `type/*`, then `*/*`; at each step an
    /// exclusion beats an inclusion.
    pub fn is_compressible(&self, content_type: &str) -> bool {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if mime.is_empty() {
            return false;
        }

        self.check(&mime)
            .or_else(|| {
                mime.split_once('/')
                    .and_then(|(kind, _)| self.check(&format!("{kind}/*")))
            })
            .unwrap_or_else(|| self.mime_types.contains(CATCH_ALL))
    }

    fn check(&self, mime: &str) -> Option<bool> {
        if self.excluded.contains(mime) {
            return Some(false);
        }
        if self.mime_types.contains(mime) {
            return Some(true);
        }
        None
    }

    /// Whether a response with these headers may be compressed at all
    pub fn should_compress_response(&self, headers: &HeaderMap) -> bool {
        if headers.contains_key(CONTENT_RANGE) {
            debug!("Response is not compressed because Content-Range is set");
            return false;
        }

        if headers.contains_key(CONTENT_ENCODING) {
            debug!("Response is not compressed because Content-Encoding is already set");
            return false;
        }

        let Some(content_type) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
            debug!("Response is not compressed because Content-Type is missing");
            return false;
        };

        if self.is_compressible(content_type) {
            trace!(content_type, "Response is compressible");
            true
        } else {
            debug!(content_type, "Response is not compressed for its content type");
            false
        }
    }
}

impl Default for MimeFilter {
    fn default() -> Self {
        Self::new::<&str>(&[], &[])
    }
}

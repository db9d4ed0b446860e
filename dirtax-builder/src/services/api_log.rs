//! Verbatim request/response logging
//!
//! Every answered remote request is written to
//! `<dir>/<YYYYmmddTHHMMSS>_<kind>_<slug>.json` before its status is
//! evaluated, so failed calls can be inspected after the fact. A name
//! already used within the same second gets a numeric suffix. Logging is
//! best-effort: a failed write is a warning, never an error.

use dirtax_common::atomic::write_json_atomic;
use dirtax_common::time::log_stamp;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::warn;

const MAX_SLUG_LEN: usize = 120;

/// Replace every character outside `[A-Za-z0-9._-]` with `_`, truncate to
/// 120 characters, and fall back to `item` when nothing remains.
pub fn safe_slug(name: &str) -> String {
    let slug: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_SLUG_LEN)
        .collect();
    if slug.is_empty() {
        "item".to_string()
    } else {
        slug
    }
}

#[derive(Debug, Clone)]
pub struct ApiLogger {
    dir: PathBuf,
}

impl ApiLogger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Record one exchange. The response body is stored as parsed JSON when
    /// possible, otherwise as `{"raw_text": ...}`.
    pub fn log(&self, kind: &str, name: &str, request: &Value, status: u16, response_text: &str) {
        let response: Value = serde_json::from_str(response_text)
            .unwrap_or_else(|_| json!({ "raw_text": response_text }));
        let path = self.unused_path(&format!("{}_{}_{}", log_stamp(), safe_slug(kind), safe_slug(name)));
        let document = json!({
            "request": request,
            "status": status,
            "response": response,
        });
        if let Err(e) = write_json_atomic(&path, &document) {
            warn!(path = %path.display(), error = %e, "Failed to write API log");
        }
    }

    /// `<stem>.json`, or `<stem>_<n>.json` when the same stem was already
    /// written within this second.
    fn unused_path(&self, stem: &str) -> PathBuf {
        let mut path = self.dir.join(format!("{}.json", stem));
        let mut n = 2;
        while path.exists() {
            path = self.dir.join(format!("{}_{}.json", stem, n));
            n += 1;
        }
        path
    }
}

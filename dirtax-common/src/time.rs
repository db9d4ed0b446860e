//! Timestamp utilities

use chrono::{DateTime, Local, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current UTC time as an RFC 3339 string, the format stored in every
/// persisted document.
pub fn utc_now_string() -> String {
    now().to_rfc3339()
}

/// Compact local timestamp used in API log filenames (`20260114T093000`)
pub fn log_stamp() -> String {
    Local::now().format("%Y%m%dT%H%M%S").to_string()
}

//! Per-axis output files
//!
//! Every document is written atomically only after the stage producing it
//! has completed.

use dirtax_common::atomic::write_json_atomic;
use dirtax_common::Result;
use serde::Serialize;
use std::path::Path;
use tracing::debug;

pub const RECORDS_FILE: &str = "records.json";
pub const TOPIC_ASSIGNMENTS_FILE: &str = "topics.assignments.json";
pub const TOPIC_CANDIDATES_FILE: &str = "topics.candidates.json";
pub const L2_FILE: &str = "taxonomy.l2.json";
pub const L1_INPUT_FILE: &str = "l1.input.items.json";
pub const L1_ASSIGNMENTS_FILE: &str = "l1.assignments.json";
pub const L1_FILE: &str = "taxonomy.l1.json";
pub const ORPHANS_FILE: &str = "taxonomy.orphans.json";
pub const TAXONOMY_FILE: &str = "taxonomy.json";
pub const SUMMARY_FILE: &str = "taxonomy.summary.json";

/// Subdirectory of the output root holding request/response logs
pub const API_LOG_DIR: &str = "api_logs";

/// Row of `topics.assignments.json`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TopicAssignmentRow {
    pub i: usize,
    pub topic_id: i32,
}

pub fn write_output<T: Serialize + ?Sized>(dir: &Path, name: &str, value: &T) -> Result<()> {
    let path = dir.join(name);
    write_json_atomic(&path, value)?;
    debug!(path = %path.display(), "Wrote output");
    Ok(())
}

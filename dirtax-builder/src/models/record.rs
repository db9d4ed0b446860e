//! Direction records
//!
//! One record is one normalized direction string extracted from one
//! analyzed paper for one researcher. Records are recomputed on every run
//! and never mutated after construction.

use dirtax_common::fingerprint::{record_key, stable_hash};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the two fixed corpus partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Problem,
    Method,
}

impl Axis {
    pub const ALL: [Axis; 2] = [Axis::Problem, Axis::Method];

    pub fn as_str(&self) -> &'static str {
        match self {
            Axis::Problem => "problem",
            Axis::Method => "method",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Axis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "problem" => Ok(Axis::Problem),
            "method" => Ok(Axis::Method),
            other => Err(format!("invalid axis: {}", other)),
        }
    }
}

/// Axis selector accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum AxisSelection {
    Problem,
    Method,
    Both,
}

impl AxisSelection {
    pub fn axes(&self) -> Vec<Axis> {
        match self {
            AxisSelection::Problem => vec![Axis::Problem],
            AxisSelection::Method => vec![Axis::Method],
            AxisSelection::Both => Axis::ALL.to_vec(),
        }
    }
}

/// One text direction extracted from one paper for one researcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionRecord {
    pub axis: Axis,
    /// Normalized (trimmed, lower-cased) direction text
    pub text: String,
    pub paper_id: String,
    pub paper_title: String,
    pub publication_year: Option<i32>,
    pub researcher_id: String,
    pub researcher_name: String,
    /// Text actually sent to the embedding service
    pub context: String,
}

impl DirectionRecord {
    /// Stable cache key, invariant to record position
    pub fn key(&self) -> String {
        record_key(
            self.axis.as_str(),
            &self.paper_id,
            &self.researcher_id,
            &self.text,
        )
    }

    /// Hash of the embedding context; a cached vector is valid only while
    /// this matches the stored hash.
    pub fn context_hash(&self) -> String {
        stable_hash(&self.context)
    }
}

/// Build the text sent for embedding.
///
/// Direction-only: titles are deliberately kept out so identical directions
/// from different papers land on the same vector.
pub fn embedding_context(direction: &str) -> String {
    direction.to_string()
}

/// Order records by (paper, year, researcher, text) so the collected list
/// does not depend on file or directory iteration order.
pub fn sort_records_stable(records: &mut [DirectionRecord]) {
    records.sort_by(|a, b| {
        let year_a = a.publication_year.map(|y| y.to_string()).unwrap_or_default();
        let year_b = b.publication_year.map(|y| y.to_string()).unwrap_or_default();
        a.paper_id
            .cmp(&b.paper_id)
            .then_with(|| year_a.cmp(&year_b))
            .then_with(|| a.researcher_id.cmp(&b.researcher_id))
            .then_with(|| a.text.cmp(&b.text))
    });
}

/// Row of `records.json`: the record plus its position in the embedding
/// snapshot and its cache identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedRecord {
    pub embedding_index: usize,
    pub record_key: String,
    pub content_hash: String,
    #[serde(flatten)]
    pub record: DirectionRecord,
}

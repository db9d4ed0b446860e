//! Taxonomy entities produced downstream of embedding

use super::record::Axis;
use serde::{Deserialize, Serialize};

/// Cluster id the clusterer assigns to unclustered records
pub const NOISE_TOPIC_ID: i32 = -1;

/// Upper bound on member examples kept per candidate
pub const CANDIDATE_EXAMPLES: usize = 20;

/// Upper bound on examples copied into a labeled entry
pub const L2_EXAMPLES: usize = 8;

/// One clustering output group (noise excluded)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicCandidate {
    pub topic_id: i32,
    pub size: usize,
    /// Ranked keywords, best first
    pub keywords: Vec<String>,
    /// Bounded sample of member texts in record order
    pub examples: Vec<String>,
}

/// One labeled fine-grained category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct L2Entry {
    pub topic_id: i32,
    pub size: usize,
    pub keywords: Vec<String>,
    pub examples: Vec<String>,
    /// Label cache key
    pub topic_fingerprint: String,
    pub l2_name: String,
    pub definition: String,
    pub aliases: Vec<String>,
}

/// Canonical fine-grained label: duplicate names merged across clusters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct L2Item {
    pub l2_name: String,
    pub definition: String,
    pub aliases: Vec<String>,
    pub topic_ids: Vec<i32>,
    /// Total records across merged clusters
    pub size: usize,
}

/// Sub-category of a two-level coarse category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubCategory {
    pub name: String,
    pub definition: String,
    pub aliases: Vec<String>,
    pub l2_names: Vec<String>,
}

/// One coarse category with the fine-grained names assigned to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct L1Category {
    pub name: String,
    pub definition: String,
    pub aliases: Vec<String>,
    /// All L2 names assigned here, including those under sub-categories
    pub l2_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_categories: Vec<SubCategory>,
}

/// One row of the L2 → L1 similarity mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingRow {
    pub l2_name: String,
    pub l1_name: String,
    pub sub_category: Option<String>,
    /// `None` when the mapping came from a fallback bucket
    pub similarity: Option<f32>,
}

/// Fine-grained label whose best coarse match is low-confidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrphanLabel {
    pub l2_name: String,
    pub best_l1_name: String,
    pub similarity: f32,
    pub size: usize,
    pub topic_ids: Vec<i32>,
}

/// Final per-record assignment; derived on every run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub record_index: usize,
    pub axis: Axis,
    pub direction_text: String,
    pub paper_id: String,
    pub paper_title: String,
    pub publication_year: Option<i32>,
    pub researcher_id: String,
    pub researcher_name: String,
    pub topic_id: i32,
    pub l2_name: Option<String>,
    pub l1_name: Option<String>,
    pub sub_category: Option<String>,
}

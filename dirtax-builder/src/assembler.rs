//! Taxonomy assembly
//!
//! Joins the ordered record list with the clustering assignments, the
//! fine-grained labels and the coarse mapping into one assignment per
//! record.

use crate::error::{BuildError, BuildResult};
use crate::models::{Assignment, Axis, DirectionRecord, L1Category, L2Entry, NOISE_TOPIC_ID};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Run parameters and counts recorded alongside the taxonomy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyMeta {
    pub researchers_root: String,
    pub embedding_model: String,
    pub chat_model: String,
    pub enable_thinking: bool,
    pub min_cluster_size: usize,
    pub records: usize,
    pub clusters: usize,
    pub noise_records: usize,
    pub l2_unique_count: usize,
    pub l1_count: usize,
    pub orphan_count: usize,
    pub clustering_fingerprint: Option<String>,
}

/// Contents of `taxonomy.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyDocument {
    pub axis: Axis,
    pub generated_at: String,
    pub meta: TaxonomyMeta,
    pub l1_categories: Vec<L1Category>,
    pub l2_categories: Vec<L2Entry>,
    pub assignments: Vec<Assignment>,
}

/// Build one assignment per record.
///
/// `topic_ids[i]` belongs to `records[i]`. Noise records get no names; a
/// clustered record whose topic has no label is an integrity error.
pub fn assemble(
    axis: Axis,
    records: &[DirectionRecord],
    topic_ids: &[i32],
    l2_entries: &[L2Entry],
    l2_to_l1: &BTreeMap<String, (String, Option<String>)>,
) -> BuildResult<Vec<Assignment>> {
    if records.len() != topic_ids.len() {
        return Err(BuildError::integrity(format!(
            "{} records but {} topic assignments",
            records.len(),
            topic_ids.len()
        )));
    }

    let topic_to_l2: HashMap<i32, &str> = l2_entries
        .iter()
        .map(|e| (e.topic_id, e.l2_name.as_str()))
        .collect();

    let mut assignments = Vec::with_capacity(records.len());
    for (i, (record, &topic_id)) in records.iter().zip(topic_ids).enumerate() {
        let (l2_name, l1_name, sub_category) = if topic_id == NOISE_TOPIC_ID {
            (None, None, None)
        } else {
            let l2 = topic_to_l2.get(&topic_id).ok_or_else(|| {
                BuildError::integrity(format!("record {} is in topic {} which has no label", i, topic_id))
            })?;
            let (l1, sub) = match l2_to_l1.get(*l2) {
                Some((l1, sub)) => (Some(l1.clone()), sub.clone()),
                None => (None, None),
            };
            (Some(l2.to_string()), l1, sub)
        };

        assignments.push(Assignment {
            record_index: i,
            axis,
            direction_text: record.text.clone(),
            paper_id: record.paper_id.clone(),
            paper_title: record.paper_title.clone(),
            publication_year: record.publication_year,
            researcher_id: record.researcher_id.clone(),
            researcher_name: record.researcher_name.clone(),
            topic_id,
            l2_name,
            l1_name,
            sub_category,
        });
    }

    Ok(assignments)
}

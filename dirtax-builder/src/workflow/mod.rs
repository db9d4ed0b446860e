//! Taxonomy build workflow
//!
//! Runs the per-axis pipeline for each selected axis, then writes a run
//! summary at the output root. Remote services are built per axis by the
//! caller so each axis logs its API traffic to its own directory and tests
//! can supply fakes.

pub mod embed;
pub mod pipeline;
pub mod storage;

pub use pipeline::run_axis;

use crate::assembler::TaxonomyDocument;
use crate::clustering::Clusterer;
use crate::config::BuildConfig;
use crate::models::Axis;
use crate::services::{ChatService, EmbeddingService};
use anyhow::{Context, Result};
use dirtax_common::time::utc_now_string;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Collaborators used by one axis run
pub struct Services {
    pub embedder: Box<dyn EmbeddingService>,
    pub chat: Box<dyn ChatService>,
    pub clusterer: Box<dyn Clusterer>,
}

/// One entry of `taxonomy.summary.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisSummary {
    pub axis: Axis,
    pub records: usize,
    pub clusters: usize,
    pub l2: usize,
    pub l1: usize,
    pub orphans: usize,
}

impl AxisSummary {
    pub fn from_document(document: &TaxonomyDocument) -> Self {
        Self {
            axis: document.axis,
            records: document.meta.records,
            clusters: document.meta.clusters,
            l2: document.meta.l2_unique_count,
            l1: document.meta.l1_count,
            orphans: document.meta.orphan_count,
        }
    }
}

#[derive(Debug, Serialize)]
struct SummaryDocument<'a> {
    generated_at: String,
    axes: &'a [AxisSummary],
}

/// Build every selected axis in order; the first failing axis aborts the run.
pub async fn run<F>(config: &BuildConfig, make_services: F) -> Result<Vec<AxisSummary>>
where
    F: Fn(Axis) -> Result<Services>,
{
    let mut summary = Vec::new();
    for axis in config.axis.axes() {
        info!(axis = %axis, "Axis start");
        let services = make_services(axis).with_context(|| format!("Failed to build services for {}", axis))?;
        let result = run_axis(axis, config, &services)
            .await
            .with_context(|| format!("Axis {} failed", axis))?;
        summary.push(result);
    }

    storage::write_output(
        &config.out_dir,
        storage::SUMMARY_FILE,
        &SummaryDocument {
            generated_at: utc_now_string(),
            axes: &summary,
        },
    )?;
    Ok(summary)
}

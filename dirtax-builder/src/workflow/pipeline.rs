//! Single-axis pipeline
//!
//! collect → embed (cached) → cluster (cached) → label (cached) → canonical
//! labels → categories → grouping → assembly. Each stage finishes before
//! its outputs are written, and any fatal error fails the axis.

use super::embed::embed_records;
use super::storage::{self, write_output, TopicAssignmentRow};
use super::{AxisSummary, Services};
use crate::assembler::{assemble, TaxonomyDocument, TaxonomyMeta};
use crate::batch::BatchOrchestrator;
use crate::clustering::{self, build_candidates};
use crate::collector::collect_records;
use crate::config::BuildConfig;
use crate::embedding_cache::snapshot::{write_snapshot, SnapshotRow};
use crate::embedding_cache::{EmbeddingCache, LoadOutcome};
use crate::hierarchy::categories::{categories_path, load_categories, placeholder_categories, write_categories};
use crate::hierarchy::proposal::{propose_categories, ProposalSettings};
use crate::hierarchy::{canonicalize_labels, group, CategorySpec};
use crate::labeling::{CompletionSettings, LabelCache, LabelOrchestrator};
use crate::models::{Axis, IndexedRecord, L2Item};
use anyhow::{Context, Result};
use dirtax_common::fingerprint::{clustering_fingerprint, ClusteringParams};
use dirtax_common::time::utc_now_string;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

/// Run every stage for one axis.
pub async fn run_axis(axis: Axis, config: &BuildConfig, services: &Services) -> Result<AxisSummary> {
    let started = Instant::now();
    let axis_dir = config.out_dir.join(axis.as_str());
    std::fs::create_dir_all(&axis_dir)
        .with_context(|| format!("Failed to create output directory {}", axis_dir.display()))?;

    let records = collect_records(&config.researchers_root, axis)
        .with_context(|| format!("Failed to collect {} records", axis))?;
    info!(axis = %axis, records = records.len(), "Collected records");

    let mut meta = TaxonomyMeta {
        researchers_root: config.researchers_root.display().to_string(),
        embedding_model: config.embedding_model.clone(),
        chat_model: config.chat_model.clone(),
        enable_thinking: config.labels.completion.enable_thinking,
        min_cluster_size: config.clustering.min_cluster_size,
        records: records.len(),
        ..Default::default()
    };

    if records.is_empty() {
        warn!(axis = %axis, "No records collected, writing empty taxonomy");
        let document = TaxonomyDocument {
            axis,
            generated_at: utc_now_string(),
            meta,
            l1_categories: Vec::new(),
            l2_categories: Vec::new(),
            assignments: Vec::new(),
        };
        write_output(&axis_dir, storage::TAXONOMY_FILE, &document)?;
        return Ok(AxisSummary::from_document(&document));
    }

    let indexed: Vec<IndexedRecord> = records
        .iter()
        .enumerate()
        .map(|(i, record)| IndexedRecord {
            embedding_index: i,
            record_key: record.key(),
            content_hash: record.context_hash(),
            record: record.clone(),
        })
        .collect();
    write_output(&axis_dir, storage::RECORDS_FILE, &indexed)?;

    // ------------------------------------------------------------------
    // Embedding
    // ------------------------------------------------------------------
    let (mut cache, outcome) = EmbeddingCache::load(&axis_dir, &config.embedding_model)
        .with_context(|| format!("Failed to load {} embedding cache", axis))?;
    match &outcome {
        LoadOutcome::Warm { entries } => info!(axis = %axis, entries, "Embedding cache loaded"),
        LoadOutcome::Cold { reason } => info!(axis = %axis, reason = %reason, "Embedding cache cold start"),
        LoadOutcome::Recovered { kept, dropped } => {
            warn!(axis = %axis, kept, dropped, "Embedding cache recovered from snapshot")
        }
        LoadOutcome::Migrated { entries } => info!(axis = %axis, entries, "Embedding cache migrated"),
    }

    let (vectors, _) = embed_records(
        axis,
        &indexed,
        &mut cache,
        services.embedder.as_ref(),
        config.batch,
        config.retry,
    )
    .await
    .with_context(|| format!("Embedding stage failed for {}", axis))?;

    let snapshot_rows: Vec<SnapshotRow> = indexed
        .iter()
        .map(|r| SnapshotRow {
            record_key: r.record_key.clone(),
            content_hash: r.content_hash.clone(),
        })
        .collect();
    write_snapshot(&axis_dir, &config.embedding_model, &snapshot_rows, &vectors)
        .context("Failed to write embedding snapshot")?;
    info!(axis = %axis, rows = vectors.len(), dim = cache.dim(), "Embeddings ready");

    // ------------------------------------------------------------------
    // Clustering
    // ------------------------------------------------------------------
    let keys: Vec<String> = indexed.iter().map(|r| r.record_key.clone()).collect();
    let hashes: Vec<String> = indexed.iter().map(|r| r.content_hash.clone()).collect();
    let fingerprint = clustering_fingerprint(
        &ClusteringParams {
            embedding_model: config.embedding_model.clone(),
            min_cluster_size: config.clustering.min_cluster_size,
            random_seed: config.clustering.random_seed,
            target_clusters: config.clustering.target_clusters,
        },
        &keys,
        &hashes,
    )?;

    let docs: Vec<String> = records.iter().map(|r| r.context.clone()).collect();
    let output = match clustering::load_cached(&axis_dir, &fingerprint, records.len())? {
        Some(output) => {
            info!(axis = %axis, topics = output.topic_count(), "Clustering cache hit");
            output
        }
        None => {
            let output = services
                .clusterer
                .cluster(&docs, &vectors)
                .with_context(|| format!("Clustering failed for {}", axis))?;
            clustering::store_cached(&axis_dir, &fingerprint, &output)?;
            info!(
                axis = %axis,
                topics = output.topic_count(),
                noise = output.noise_count(),
                "Clustering finished"
            );
            output
        }
    };

    let texts: Vec<String> = records.iter().map(|r| r.text.clone()).collect();
    let candidates = build_candidates(&texts, &output);
    let assignment_rows: Vec<TopicAssignmentRow> = output
        .assignments
        .iter()
        .enumerate()
        .map(|(i, &topic_id)| TopicAssignmentRow { i, topic_id })
        .collect();
    write_output(&axis_dir, storage::TOPIC_ASSIGNMENTS_FILE, &assignment_rows)?;
    write_output(&axis_dir, storage::TOPIC_CANDIDATES_FILE, &candidates)?;

    // ------------------------------------------------------------------
    // Fine-grained labels
    // ------------------------------------------------------------------
    let mut label_cache = LabelCache::load(&axis_dir)?;
    let labeler = LabelOrchestrator::new(services.chat.as_ref(), config.labels, config.retry);
    let (l2_entries, label_stats) = labeler
        .label_topics(axis, &candidates, &mut label_cache)
        .await
        .with_context(|| format!("Labeling stage failed for {}", axis))?;
    info!(axis = %axis, hits = label_stats.hits, requested = label_stats.requested, "Labels ready");
    write_output(&axis_dir, storage::L2_FILE, &l2_entries)?;

    let items = canonicalize_labels(&l2_entries);
    write_output(&axis_dir, storage::L1_INPUT_FILE, &items)?;

    // ------------------------------------------------------------------
    // Coarse categories
    // ------------------------------------------------------------------
    let categories = resolve_categories(axis, config, services, &items, &axis_dir).await?;
    let embedder = BatchOrchestrator::new(
        services.embedder.as_ref(),
        config.batch,
        config.retry,
        format!("{}_l1", axis),
    );
    let grouping = group(axis, &items, &categories, &embedder, config.grouping)
        .await
        .with_context(|| format!("Grouping stage failed for {}", axis))?;
    write_output(&axis_dir, storage::L1_ASSIGNMENTS_FILE, &grouping.mapping)?;
    write_output(&axis_dir, storage::L1_FILE, &grouping.categories)?;
    write_output(&axis_dir, storage::ORPHANS_FILE, &grouping.orphans)?;
    if !grouping.orphans.is_empty() {
        warn!(axis = %axis, orphans = grouping.orphans.len(), "Labels with low-confidence coarse match");
    }

    // ------------------------------------------------------------------
    // Assembly
    // ------------------------------------------------------------------
    let assignments = assemble(axis, &records, &output.assignments, &l2_entries, &grouping.l2_to_l1)?;

    meta.clusters = candidates.len();
    meta.noise_records = output.noise_count();
    meta.l2_unique_count = items.len();
    meta.l1_count = grouping.categories.len();
    meta.orphan_count = grouping.orphans.len();
    meta.clustering_fingerprint = Some(fingerprint);

    let document = TaxonomyDocument {
        axis,
        generated_at: utc_now_string(),
        meta,
        l1_categories: grouping.categories,
        l2_categories: l2_entries,
        assignments,
    };
    write_output(&axis_dir, storage::TAXONOMY_FILE, &document)?;

    info!(
        axis = %axis,
        records = document.meta.records,
        topics = document.meta.clusters,
        l1 = document.meta.l1_count,
        elapsed_secs = started.elapsed().as_secs(),
        "Axis complete"
    );
    Ok(AxisSummary::from_document(&document))
}

/// Authored file, else a proposal (when enabled), else placeholders.
///
/// Anything other than an authored file is written back so it can be
/// edited before the next run.
async fn resolve_categories(
    axis: Axis,
    config: &BuildConfig,
    services: &Services,
    items: &[L2Item],
    axis_dir: &Path,
) -> Result<Vec<CategorySpec>> {
    let path = categories_path(axis_dir, axis, config.categories_file.as_deref());
    if let Some(categories) = load_categories(&path)? {
        info!(axis = %axis, path = %path.display(), categories = categories.len(), "Loaded category file");
        return Ok(categories);
    }

    let categories = if config.propose_categories && !items.is_empty() {
        let settings = ProposalSettings {
            completion: CompletionSettings {
                max_tokens: config.category_max_tokens,
                enable_thinking: config.labels.completion.enable_thinking,
            },
            l1_min: config.l1_min,
            l1_max: config.l1_max,
        };
        let proposed = propose_categories(axis, items, services.chat.as_ref(), &config.retry, settings, axis_dir)
            .await
            .with_context(|| format!("Category proposal failed for {}", axis))?;
        warn!(
            axis = %axis,
            path = %path.display(),
            categories = proposed.len(),
            "No category file; wrote proposed categories, review and edit before the next run"
        );
        proposed
    } else {
        warn!(
            axis = %axis,
            path = %path.display(),
            "No category file; wrote placeholder categories, edit this file and re-run"
        );
        placeholder_categories()
    };

    write_categories(&path, &categories)?;
    Ok(categories)
}

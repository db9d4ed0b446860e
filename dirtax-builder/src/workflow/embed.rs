//! Embedding stage
//!
//! Serves vectors from the cache where the stored content hash still
//! matches, sends each distinct missing context to the service once, and
//! commits results through the batch orchestrator's checkpoint sink.

use crate::batch::{BatchOrchestrator, BatchSettings, CheckpointSink};
use crate::embedding_cache::{EmbeddingCache, Lookup};
use crate::error::{BuildError, BuildResult};
use crate::models::{Axis, IndexedRecord};
use crate::services::EmbeddingService;
use crate::utils::RetryPolicy;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Per-run embedding counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmbedStats {
    pub hits: usize,
    /// Served from a row stored under another key with identical content
    pub shared: usize,
    pub misses: usize,
    /// Distinct contexts actually sent to the service
    pub requested: usize,
}

/// One distinct missing context and the records waiting on it
struct Pending {
    content_hash: String,
    context: String,
    records: Vec<usize>,
}

/// Commits each finished vector for every record waiting on it and flushes
/// the cache at checkpoints.
struct CacheSink<'a> {
    cache: &'a mut EmbeddingCache,
    pending: &'a [Pending],
    records: &'a [IndexedRecord],
}

impl CheckpointSink for CacheSink<'_> {
    fn absorb(&mut self, index: usize, vector: &[f32]) -> dirtax_common::Result<()> {
        let pending = &self.pending[index];
        for &i in &pending.records {
            self.cache
                .commit(&self.records[i].record_key, &pending.content_hash, vector)?;
        }
        Ok(())
    }

    fn checkpoint(&mut self) -> dirtax_common::Result<()> {
        if self.cache.flush()? {
            debug!(entries = self.cache.len(), rows = self.cache.row_count(), "Embedding cache checkpoint");
        }
        Ok(())
    }

    fn finish(&mut self) -> dirtax_common::Result<()> {
        self.cache.flush().map(|_| ())
    }
}

/// Embed every record, returning vectors in record order.
///
/// On return the cache holds exactly the current record keys and has been
/// flushed.
pub async fn embed_records(
    axis: Axis,
    records: &[IndexedRecord],
    cache: &mut EmbeddingCache,
    service: &dyn EmbeddingService,
    settings: BatchSettings,
    retry: RetryPolicy,
) -> BuildResult<(Vec<Vec<f32>>, EmbedStats)> {
    let mut stats = EmbedStats::default();
    let mut vectors: Vec<Option<Vec<f32>>> = vec![None; records.len()];
    let mut pending: Vec<Pending> = Vec::new();
    let mut pending_by_hash: HashMap<String, usize> = HashMap::new();

    for (i, indexed) in records.iter().enumerate() {
        let (found, shared) = match cache.lookup(&indexed.record_key, &indexed.content_hash) {
            Lookup::Hit(v) => (Some(v.to_vec()), false),
            Lookup::Shared(v) => (Some(v.to_vec()), true),
            Lookup::Miss => (None, false),
        };
        match found {
            Some(vector) => {
                if shared {
                    cache.link(&indexed.record_key, &indexed.content_hash);
                    stats.shared += 1;
                } else {
                    stats.hits += 1;
                }
                vectors[i] = Some(vector);
            }
            None => {
                stats.misses += 1;
                let slot = *pending_by_hash
                    .entry(indexed.content_hash.clone())
                    .or_insert_with(|| {
                        pending.push(Pending {
                            content_hash: indexed.content_hash.clone(),
                            context: indexed.record.context.clone(),
                            records: Vec::new(),
                        });
                        pending.len() - 1
                    });
                pending[slot].records.push(i);
            }
        }
    }
    stats.requested = pending.len();

    info!(
        axis = %axis,
        hits = stats.hits,
        shared = stats.shared,
        misses = stats.misses,
        requests = stats.requested,
        "Embedding cache lookup"
    );

    if !pending.is_empty() {
        let texts: Vec<String> = pending.iter().map(|p| p.context.clone()).collect();
        let orchestrator = BatchOrchestrator::new(service, settings, retry, format!("{}_embedding", axis));
        let fresh = {
            let mut sink = CacheSink {
                cache: &mut *cache,
                pending: &pending,
                records,
            };
            orchestrator.run(&texts, &mut sink).await?
        };
        for (p, vector) in pending.iter().zip(fresh) {
            for &i in &p.records {
                vectors[i] = Some(vector.clone());
            }
        }
    }

    let retain: HashSet<String> = records.iter().map(|r| r.record_key.clone()).collect();
    cache.compact(&retain)?;
    cache.flush()?;

    let vectors = vectors
        .into_iter()
        .enumerate()
        .map(|(i, v)| v.ok_or_else(|| BuildError::integrity(format!("record {} has no embedding", i))))
        .collect::<BuildResult<Vec<_>>>()?;

    Ok((vectors, stats))
}

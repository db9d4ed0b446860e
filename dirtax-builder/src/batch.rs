//! Batch orchestrator
//!
//! Splits an ordered text list into fixed-size batches, embeds them through
//! a bounded pool of in-flight requests, and reassembles the vectors by
//! pre-assigned index. Completions are consumed by a single coordinator
//! loop, which is also the only place the checkpoint sink is touched.

use crate::error::{BuildError, BuildResult};
use crate::services::EmbeddingService;
use crate::utils::RetryPolicy;
use dirtax_common::config::defaults;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    /// Requested items per request
    pub batch_size: usize,
    pub concurrency: usize,
    /// Checkpoint every N completed batches (0 = only at the end)
    pub checkpoint_every: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size: defaults::EMBEDDING_BATCH_SIZE,
            concurrency: defaults::EMBEDDING_CONCURRENCY,
            checkpoint_every: defaults::CHECKPOINT_EVERY,
        }
    }
}

impl BatchSettings {
    /// `max(1, min(batch_size, service_max_batch))`
    pub fn effective_batch_size(&self, service_max_batch: usize) -> usize {
        self.batch_size.min(service_max_batch).max(1)
    }

    /// `max(1, min(concurrency, batch_count))`
    pub fn worker_count(&self, batch_count: usize) -> usize {
        self.concurrency.min(batch_count).max(1)
    }
}

/// Receives vectors as batches complete
pub trait CheckpointSink {
    /// Called once per input index, in completion order
    fn absorb(&mut self, index: usize, vector: &[f32]) -> dirtax_common::Result<()>;

    /// Persist progress so far
    fn checkpoint(&mut self) -> dirtax_common::Result<()>;

    /// Called once after every batch has been absorbed
    fn finish(&mut self) -> dirtax_common::Result<()>;
}

/// Sink for embeddings that are not cached
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCheckpoint;

impl CheckpointSink for NoCheckpoint {
    fn absorb(&mut self, _index: usize, _vector: &[f32]) -> dirtax_common::Result<()> {
        Ok(())
    }

    fn checkpoint(&mut self) -> dirtax_common::Result<()> {
        Ok(())
    }

    fn finish(&mut self) -> dirtax_common::Result<()> {
        Ok(())
    }
}

pub struct BatchOrchestrator<'a> {
    service: &'a dyn EmbeddingService,
    settings: BatchSettings,
    retry: RetryPolicy,
    /// Prefix for batch names in logs and API log files
    label: String,
}

impl<'a> BatchOrchestrator<'a> {
    pub fn new(
        service: &'a dyn EmbeddingService,
        settings: BatchSettings,
        retry: RetryPolicy,
        label: impl Into<String>,
    ) -> Self {
        Self {
            service,
            settings,
            retry,
            label: label.into(),
        }
    }

    /// Embed `texts`, returning `result[i]` for `texts[i]`.
    ///
    /// A remote failure that survives the retry policy, an item-count
    /// mismatch, or an index left without a vector fails the whole call;
    /// progress absorbed before the failure is checkpointed first.
    pub async fn run<S: CheckpointSink>(&self, texts: &[String], sink: &mut S) -> BuildResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            sink.finish()?;
            return Ok(Vec::new());
        }

        let batch_size = self.settings.effective_batch_size(self.service.max_batch());
        if batch_size < self.settings.batch_size {
            info!(
                stage = %self.label,
                requested = self.settings.batch_size,
                effective = batch_size,
                "Batch size reduced to service limit"
            );
        }

        let batches: Vec<(usize, usize)> = (0..texts.len())
            .step_by(batch_size)
            .map(|start| (start, (start + batch_size).min(texts.len())))
            .collect();
        let total = batches.len();
        let workers = self.settings.worker_count(total);

        info!(
            stage = %self.label,
            items = texts.len(),
            batches = total,
            batch_size,
            workers,
            "Starting batched embedding"
        );

        let mut completions = stream::iter(batches.into_iter().enumerate())
            .map(|(batch_index, (start, end))| {
                let chunk = &texts[start..end];
                let name = format!("{}_batch_{:04}", self.label, batch_index);
                async move {
                    let result = self
                        .retry
                        .run(&name, |attempt| {
                            let attempt_name = format!("{}_try{}", name, attempt + 1);
                            async move { self.service.embed(chunk, &attempt_name).await }
                        })
                        .await;
                    (batch_index, start, end, name, result)
                }
            })
            .buffer_unordered(workers);

        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut completed = 0usize;

        while let Some((batch_index, start, end, name, result)) = completions.next().await {
            let vectors = match result {
                Ok(vectors) => vectors,
                Err(e) => {
                    Self::checkpoint_before_failure(sink);
                    return Err(BuildError::service(name, e));
                }
            };

            if vectors.len() != end - start {
                Self::checkpoint_before_failure(sink);
                return Err(BuildError::integrity(format!(
                    "{} returned {} vectors for {} inputs",
                    name,
                    vectors.len(),
                    end - start
                )));
            }

            for (offset, vector) in vectors.into_iter().enumerate() {
                if vector.is_empty() {
                    Self::checkpoint_before_failure(sink);
                    return Err(BuildError::integrity(format!(
                        "{} returned an empty vector at position {}",
                        name, offset
                    )));
                }
                let index = start + offset;
                if let Err(e) = sink.absorb(index, &vector) {
                    Self::checkpoint_before_failure(sink);
                    return Err(e.into());
                }
                results[index] = Some(vector);
            }

            completed += 1;
            info!(
                stage = %self.label,
                batch = batch_index,
                progress = format!("{}/{}", completed, total),
                "Embedding batch complete"
            );

            if self.settings.checkpoint_every > 0 && completed % self.settings.checkpoint_every == 0 {
                sink.checkpoint()?;
            }
        }

        sink.finish()?;

        results
            .into_iter()
            .enumerate()
            .map(|(index, vector)| {
                vector.ok_or_else(|| BuildError::integrity(format!("input {} has no embedding", index)))
            })
            .collect()
    }

    fn checkpoint_before_failure<S: CheckpointSink>(sink: &mut S) {
        if let Err(e) = sink.checkpoint() {
            warn!(error = %e, "Checkpoint after failed batch also failed");
        }
    }
}

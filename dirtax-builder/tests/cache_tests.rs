//! Integration tests for the embedding cache lifecycle
//!
//! Covers recovery from damaged metadata, legacy migration, selective
//! invalidation, idempotent re-runs and content-addressed row sharing.

use async_trait::async_trait;
use dirtax_builder::batch::BatchSettings;
use dirtax_builder::embedding_cache::migration::LEGACY_FILE;
use dirtax_builder::embedding_cache::snapshot::{
    write_snapshot, SnapshotIndex, SnapshotRow, SNAPSHOT_KEYS_FILE,
};
use dirtax_builder::embedding_cache::{EmbeddingCache, LoadOutcome, Lookup, META_FILE, MATRIX_FILE};
use dirtax_builder::models::{Axis, DirectionRecord, IndexedRecord};
use dirtax_builder::services::{EmbeddingService, ServiceError};
use dirtax_builder::utils::RetryPolicy;
use dirtax_builder::workflow::embed::embed_records;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Mutex;
use tempfile::TempDir;

const MODEL: &str = "text-embedding-v4";

/// Deterministic vectors derived from the text bytes; records every text
#[derive(Default)]
struct FakeEmbedder {
    seen: Mutex<Vec<String>>,
}

impl FakeEmbedder {
    fn seen_count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl EmbeddingService for FakeEmbedder {
    fn max_batch(&self) -> usize {
        10
    }

    async fn embed(&self, texts: &[String], _batch_name: &str) -> Result<Vec<Vec<f32>>, ServiceError> {
        self.seen.lock().unwrap().extend(texts.iter().cloned());
        Ok(texts
            .iter()
            .map(|t| {
                let sum: u32 = t.bytes().map(u32::from).sum();
                vec![t.len() as f32, sum as f32, 1.0]
            })
            .collect())
    }
}

/// Embeds like `FakeEmbedder` but rejects any batch containing `fail_on`
struct FailingEmbedder {
    fail_on: String,
    inner: FakeEmbedder,
}

#[async_trait]
impl EmbeddingService for FailingEmbedder {
    fn max_batch(&self) -> usize {
        10
    }

    async fn embed(&self, texts: &[String], batch_name: &str) -> Result<Vec<Vec<f32>>, ServiceError> {
        if texts.iter().any(|t| t == &self.fail_on) {
            return Err(ServiceError::Status {
                status: 400,
                body: "rejected".into(),
            });
        }
        self.inner.embed(texts, batch_name).await
    }
}

fn indexed(paper: &str, text: &str) -> IndexedRecord {
    let record = DirectionRecord {
        axis: Axis::Problem,
        text: text.to_string(),
        paper_id: paper.to_string(),
        paper_title: format!("Title {}", paper),
        publication_year: Some(2024),
        researcher_id: "A100".into(),
        researcher_name: "Researcher".into(),
        context: text.to_string(),
    };
    IndexedRecord {
        embedding_index: 0,
        record_key: record.key(),
        content_hash: record.context_hash(),
        record,
    }
}

fn corpus(n: usize) -> Vec<IndexedRecord> {
    (0..n)
        .map(|i| indexed(&format!("W{}", i), &format!("direction number {}", i)))
        .collect()
}

async fn embed(records: &[IndexedRecord], cache: &mut EmbeddingCache, service: &FakeEmbedder) -> Vec<Vec<f32>> {
    let (vectors, _) = embed_records(
        Axis::Problem,
        records,
        cache,
        service,
        BatchSettings::default(),
        RetryPolicy::none(),
    )
    .await
    .unwrap();
    vectors
}

#[test]
fn test_truncated_metadata_recovers_from_snapshot() {
    let dir = TempDir::new().unwrap();
    let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]];
    let rows: Vec<SnapshotRow> = (0..3)
        .map(|i| SnapshotRow {
            record_key: format!("k{}", i),
            content_hash: format!("h{}", i),
        })
        .collect();
    write_snapshot(dir.path(), MODEL, &rows, &vectors).unwrap();

    // Index names five rows; the matrix holds three.
    let keys_path = dir.path().join(SNAPSHOT_KEYS_FILE);
    let mut index: SnapshotIndex = serde_json::from_slice(&std::fs::read(&keys_path).unwrap()).unwrap();
    for i in 3..5 {
        index.rows.push(SnapshotRow {
            record_key: format!("k{}", i),
            content_hash: format!("h{}", i),
        });
    }
    std::fs::write(&keys_path, serde_json::to_vec(&index).unwrap()).unwrap();

    std::fs::write(dir.path().join(META_FILE), b"{\"version\": 2, \"model\": \"text-emb").unwrap();

    let (mut cache, outcome) = EmbeddingCache::load(dir.path(), MODEL).unwrap();
    assert_eq!(outcome, LoadOutcome::Recovered { kept: 3, dropped: 2 });
    assert_eq!(cache.lookup("k2", "h2"), Lookup::Hit(&[1.0, 1.0]));
    assert_eq!(cache.lookup("k4", "h4"), Lookup::Miss);

    assert!(cache.flush().unwrap());
    let (reloaded, outcome) = EmbeddingCache::load(dir.path(), MODEL).unwrap();
    assert_eq!(outcome, LoadOutcome::Warm { entries: 3 });
    assert_eq!(reloaded.row_count(), 3);
}

#[test]
fn test_corrupt_matrix_without_snapshot_is_cold() {
    let dir = TempDir::new().unwrap();
    let mut cache = EmbeddingCache::empty(dir.path(), MODEL);
    cache.commit("k", "h", &[1.0, 2.0]).unwrap();
    cache.flush().unwrap();
    std::fs::write(dir.path().join(MATRIX_FILE), b"DTXM\x01").unwrap();

    let (cache, outcome) = EmbeddingCache::load(dir.path(), MODEL).unwrap();
    assert!(matches!(outcome, LoadOutcome::Cold { .. }));
    assert!(cache.is_empty());
}

#[test]
fn test_model_change_starts_cold() {
    let dir = TempDir::new().unwrap();
    let mut cache = EmbeddingCache::empty(dir.path(), "old-model");
    cache.commit("k", "h", &[1.0]).unwrap();
    cache.flush().unwrap();

    let (cache, outcome) = EmbeddingCache::load(dir.path(), MODEL).unwrap();
    assert!(matches!(outcome, LoadOutcome::Cold { .. }));
    assert!(cache.is_empty());
}

#[test]
fn test_legacy_cache_is_migrated_once() {
    let dir = TempDir::new().unwrap();
    let legacy = json!({
        "version": 1,
        "model": MODEL,
        "items": {
            "key-a": {"context_hash": "hash-a", "vector": [0.5, 0.25], "updated_at": "2024-01-01T00:00:00Z"},
            "key-b": {"context_hash": "hash-b", "vector": [0.1, 0.9], "updated_at": "2024-01-01T00:00:00Z"},
            "key-c": {"context_hash": "hash-a", "vector": [0.5, 0.25], "updated_at": "2024-01-02T00:00:00Z"}
        }
    });
    std::fs::write(dir.path().join(LEGACY_FILE), legacy.to_string()).unwrap();

    let (cache, outcome) = EmbeddingCache::load(dir.path(), MODEL).unwrap();
    assert_eq!(outcome, LoadOutcome::Migrated { entries: 3 });
    assert_eq!(cache.row_count(), 2);
    assert_eq!(cache.lookup("key-b", "hash-b"), Lookup::Hit(&[0.1, 0.9]));

    assert!(!dir.path().join(LEGACY_FILE).exists());
    assert!(dir.path().join(META_FILE).exists());
    assert!(dir.path().join(MATRIX_FILE).exists());

    let (_, outcome) = EmbeddingCache::load(dir.path(), MODEL).unwrap();
    assert_eq!(outcome, LoadOutcome::Warm { entries: 3 });
}

#[test]
fn test_legacy_cache_for_other_model_is_discarded() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join(LEGACY_FILE),
        json!({"version": 1, "model": "text-embedding-v2", "items": {}}).to_string(),
    )
    .unwrap();

    let (_, outcome) = EmbeddingCache::load(dir.path(), MODEL).unwrap();
    assert!(matches!(outcome, LoadOutcome::Cold { .. }));
    assert!(!dir.path().join(LEGACY_FILE).exists());
}

#[tokio::test]
async fn test_single_edit_is_single_miss() {
    let dir = TempDir::new().unwrap();
    let service = FakeEmbedder::default();
    let mut records = corpus(12);

    let (mut cache, _) = EmbeddingCache::load(dir.path(), MODEL).unwrap();
    embed(&records, &mut cache, &service).await;
    assert_eq!(service.seen_count(), 12);

    records[5] = indexed("W5", "an edited direction");
    let (mut cache, outcome) = EmbeddingCache::load(dir.path(), MODEL).unwrap();
    assert_eq!(outcome, LoadOutcome::Warm { entries: 12 });
    let (_, stats) = embed_records(
        Axis::Problem,
        &records,
        &mut cache,
        &service,
        BatchSettings::default(),
        RetryPolicy::none(),
    )
    .await
    .unwrap();

    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 11);
    assert_eq!(service.seen_count(), 13);
    assert_eq!(cache.len(), 12);
    assert_eq!(cache.row_count(), 12);
}

#[tokio::test]
async fn test_unchanged_rerun_leaves_cache_files_untouched() {
    let dir = TempDir::new().unwrap();
    let service = FakeEmbedder::default();
    let records = corpus(7);

    let (mut cache, _) = EmbeddingCache::load(dir.path(), MODEL).unwrap();
    let first = embed(&records, &mut cache, &service).await;
    let meta_before = std::fs::read(dir.path().join(META_FILE)).unwrap();
    let matrix_before = std::fs::read(dir.path().join(MATRIX_FILE)).unwrap();

    let (mut cache, _) = EmbeddingCache::load(dir.path(), MODEL).unwrap();
    let second = embed(&records, &mut cache, &service).await;

    assert_eq!(first, second);
    assert_eq!(service.seen_count(), 7);
    assert_eq!(std::fs::read(dir.path().join(META_FILE)).unwrap(), meta_before);
    assert_eq!(std::fs::read(dir.path().join(MATRIX_FILE)).unwrap(), matrix_before);
}

#[tokio::test]
async fn test_duplicate_contexts_share_rows() {
    let dir = TempDir::new().unwrap();
    let service = FakeEmbedder::default();

    // 27 distinct directions plus 5 directions that appear on two papers each.
    let mut records = corpus(27);
    for i in 0..5 {
        let text = format!("shared direction {}", i);
        records.push(indexed(&format!("P{}a", i), &text));
        records.push(indexed(&format!("P{}b", i), &text));
    }
    assert_eq!(records.len(), 37);

    let (mut cache, _) = EmbeddingCache::load(dir.path(), MODEL).unwrap();
    let vectors = embed(&records, &mut cache, &service).await;

    assert_eq!(vectors.len(), 37);
    assert_eq!(service.seen_count(), 32);
    assert_eq!(cache.len(), 37);
    assert_eq!(cache.row_count(), 32);

    let mut shared_rows = HashSet::new();
    for pair in records[27..].chunks(2) {
        let a = cache.entry(&pair[0].record_key).unwrap();
        let b = cache.entry(&pair[1].record_key).unwrap();
        assert_ne!(pair[0].record_key, pair[1].record_key);
        assert_eq!(a.row_index, b.row_index);
        shared_rows.insert(a.row_index);
    }
    assert_eq!(shared_rows.len(), 5);

    let (reloaded, outcome) = EmbeddingCache::load(dir.path(), MODEL).unwrap();
    assert_eq!(outcome, LoadOutcome::Warm { entries: 37 });
    assert_eq!(reloaded.row_count(), 32);
}

#[tokio::test]
async fn test_failed_run_resumes_from_checkpoint() {
    let dir = TempDir::new().unwrap();
    let records = corpus(10);
    let settings = BatchSettings {
        batch_size: 2,
        concurrency: 1,
        checkpoint_every: 1,
    };

    // Batches of two in record order; the fourth batch holds record 6.
    let failing = FailingEmbedder {
        fail_on: records[6].record.context.clone(),
        inner: FakeEmbedder::default(),
    };
    let (mut cache, _) = EmbeddingCache::load(dir.path(), MODEL).unwrap();
    let result = embed_records(Axis::Problem, &records, &mut cache, &failing, settings, RetryPolicy::none()).await;
    assert!(result.is_err());
    assert_eq!(failing.inner.seen_count(), 6);

    let (mut cache, outcome) = EmbeddingCache::load(dir.path(), MODEL).unwrap();
    assert_eq!(outcome, LoadOutcome::Warm { entries: 6 });

    let service = FakeEmbedder::default();
    let (vectors, stats) = embed_records(Axis::Problem, &records, &mut cache, &service, settings, RetryPolicy::none())
        .await
        .unwrap();

    assert_eq!(vectors.len(), 10);
    assert_eq!(stats.hits, 6);
    assert_eq!(stats.misses, 4);
    assert_eq!(
        *service.seen.lock().unwrap(),
        records[6..].iter().map(|r| r.record.context.clone()).collect::<Vec<_>>()
    );
    assert_eq!(cache.len(), 10);
}

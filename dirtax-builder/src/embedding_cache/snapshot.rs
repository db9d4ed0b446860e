//! Per-run embedding snapshot
//!
//! After every complete embedding stage the pipeline writes the final
//! record-ordered vectors as `embeddings.bin` (same container as the cache
//! matrix) together with `embeddings.keys.json`, which names the record
//! key and content hash of each row. When the live cache files are lost or
//! damaged the snapshot is the recovery source.

use super::matrix::Matrix;
use super::EmbeddingCache;
use dirtax_common::atomic::{read_json_if_exists, write_atomic, write_json_atomic};
use dirtax_common::time::utc_now_string;
use dirtax_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

pub const SNAPSHOT_MATRIX_FILE: &str = "embeddings.bin";
pub const SNAPSHOT_KEYS_FILE: &str = "embeddings.keys.json";
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub record_key: String,
    pub content_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotIndex {
    pub version: u32,
    pub model: String,
    pub dim: usize,
    pub updated_at: String,
    pub rows: Vec<SnapshotRow>,
}

/// Write the snapshot for one completed run. Row `i` of the matrix is the
/// vector of `rows[i]`.
pub fn write_snapshot(dir: &Path, model: &str, rows: &[SnapshotRow], vectors: &[Vec<f32>]) -> Result<()> {
    if rows.len() != vectors.len() {
        return Err(Error::Integrity(format!(
            "snapshot has {} rows but {} vectors",
            rows.len(),
            vectors.len()
        )));
    }
    let matrix = Matrix::from_rows(vectors)?;
    write_atomic(&dir.join(SNAPSHOT_MATRIX_FILE), &matrix.encode())?;
    write_json_atomic(
        &dir.join(SNAPSHOT_KEYS_FILE),
        &SnapshotIndex {
            version: SNAPSHOT_VERSION,
            model: model.to_string(),
            dim: matrix.dim(),
            updated_at: utc_now_string(),
            rows: rows.to_vec(),
        },
    )
}

/// Rebuild a cache from the snapshot in `dir`.
///
/// Returns `None` when there is no usable snapshot (absent, unreadable, or
/// written for another model). Rows listed past the end of the snapshot
/// matrix are dropped. The rebuilt cache is dirty so the next flush
/// restores the live cache files.
pub fn recover(dir: &Path, model: &str) -> Result<Option<(EmbeddingCache, usize, usize)>> {
    let index: SnapshotIndex = match read_json_if_exists(&dir.join(SNAPSHOT_KEYS_FILE)) {
        Ok(Some(index)) => index,
        Ok(None) => return Ok(None),
        Err(e) => {
            warn!(error = %e, "Embedding snapshot index unreadable, starting cold");
            return Ok(None);
        }
    };
    if index.model != model {
        warn!(snapshot = %index.model, requested = model, "Snapshot built with another model, starting cold");
        return Ok(None);
    }

    let matrix = match std::fs::read(dir.join(SNAPSHOT_MATRIX_FILE)) {
        Ok(bytes) => match Matrix::decode(&bytes) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "Embedding snapshot matrix unreadable, starting cold");
                return Ok(None);
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::Io(e)),
    };

    let mut cache = EmbeddingCache::empty(dir, model);
    let mut kept = 0usize;
    let mut dropped = 0usize;
    for (i, row) in index.rows.iter().enumerate() {
        match matrix.row(i) {
            Some(vector) => {
                cache.commit(&row.record_key, &row.content_hash, vector)?;
                kept += 1;
            }
            None => dropped += 1,
        }
    }

    Ok(Some((cache, kept, dropped)))
}

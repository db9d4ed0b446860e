//! Embedding cache manager
//!
//! Persistent, content-addressed store of embedding vectors for one axis
//! directory. An explicit object owned by the pipeline with a
//! load → lookup/commit → flush lifecycle; nothing is global.
//!
//! # Files
//! - `cache.embedding.meta.json`: version, model, dimension, row count and
//!   the `record_key → {content_hash, row_index, updated_at}` map
//! - `cache.embedding.matrix.bin`: vector rows (see [`matrix`])
//!
//! Rows are keyed by content hash: records whose contexts hash identically
//! share one row regardless of which paper they came from.
//!
//! # Load rules
//! - metadata for a different model: discarded, cold start
//! - entries pointing past the matrix: dropped
//! - metadata or matrix unreadable or absent: rebuilt from the last
//!   complete run's snapshot when one exists ([`snapshot`]), else cold
//! - only a legacy single-file cache present: one-time [`migration`]

pub mod matrix;
pub mod migration;
pub mod snapshot;

use dirtax_common::atomic::{read_json_if_exists, write_atomic, write_json_atomic};
use dirtax_common::time::utc_now_string;
use dirtax_common::{Error, Result};
use matrix::Matrix;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const META_FILE: &str = "cache.embedding.meta.json";
pub const MATRIX_FILE: &str = "cache.embedding.matrix.bin";
pub const META_VERSION: u32 = 2;

/// One cached record key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub content_hash: String,
    pub row_index: usize,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMeta {
    pub version: u32,
    pub model: String,
    pub dim: usize,
    pub row_count: usize,
    pub updated_at: String,
    pub items: BTreeMap<String, CacheEntry>,
}

/// How the cache came to be in memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Warm { entries: usize },
    Cold { reason: String },
    Recovered { kept: usize, dropped: usize },
    Migrated { entries: usize },
}

/// Result of a lookup
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lookup<'a> {
    /// This record key is cached with a matching content hash
    Hit(&'a [f32]),
    /// Another key already stores identical content; [`EmbeddingCache::link`]
    /// records the sharing
    Shared(&'a [f32]),
    Miss,
}

impl<'a> Lookup<'a> {
    pub fn vector(&self) -> Option<&'a [f32]> {
        match self {
            Lookup::Hit(v) | Lookup::Shared(v) => Some(v),
            Lookup::Miss => None,
        }
    }
}

#[derive(Debug)]
pub struct EmbeddingCache {
    dir: PathBuf,
    model: String,
    entries: BTreeMap<String, CacheEntry>,
    by_content: HashMap<String, usize>,
    matrix: Matrix,
    dirty: bool,
}

impl EmbeddingCache {
    /// Empty cache for `model` rooted at `dir`
    pub fn empty(dir: impl Into<PathBuf>, model: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            model: model.into(),
            entries: BTreeMap::new(),
            by_content: HashMap::new(),
            matrix: Matrix::new(),
            dirty: false,
        }
    }

    /// Load the cache for `model` from `dir`.
    ///
    /// Only I/O failures other than "file missing" are errors; every form
    /// of unusable cache content resolves to recovery or a cold start.
    pub fn load(dir: &Path, model: &str) -> Result<(Self, LoadOutcome)> {
        let meta_path = dir.join(META_FILE);

        if !meta_path.exists() {
            if let Some((cache, entries)) = migration::migrate_legacy(dir, model)? {
                return Ok((cache, LoadOutcome::Migrated { entries }));
            }
            return Self::recover(dir, model, "no cache metadata");
        }

        let meta: CacheMeta = match read_json_if_exists(&meta_path) {
            Ok(Some(meta)) => meta,
            Ok(None) => return Self::recover(dir, model, "no cache metadata"),
            Err(e) => {
                warn!(path = %meta_path.display(), error = %e, "Embedding cache metadata unreadable");
                return Self::recover(dir, model, "unreadable cache metadata");
            }
        };

        if meta.model != model {
            let reason = format!("cache built with model {}, requested {}", meta.model, model);
            warn!(cached = %meta.model, requested = model, "Embedding model changed, discarding cache");
            return Ok((Self::empty(dir, model), LoadOutcome::Cold { reason }));
        }
        if meta.version != META_VERSION {
            warn!(version = meta.version, "Unsupported embedding cache version");
            return Self::recover(dir, model, "unsupported cache version");
        }

        let matrix = match std::fs::read(dir.join(MATRIX_FILE)) {
            Ok(bytes) => match Matrix::decode(&bytes) {
                Ok(m) => m,
                Err(e) => {
                    warn!(error = %e, "Embedding matrix unreadable");
                    return Self::recover(dir, model, "unreadable cache matrix");
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Embedding matrix missing");
                return Self::recover(dir, model, "missing cache matrix");
            }
            Err(e) => return Err(Error::Io(e)),
        };
        if !matrix.is_empty() && meta.dim != matrix.dim() {
            warn!(meta_dim = meta.dim, matrix_dim = matrix.dim(), "Embedding cache dimension mismatch");
            return Self::recover(dir, model, "cache dimension mismatch");
        }

        let mut cache = Self {
            dir: dir.to_path_buf(),
            model: model.to_string(),
            entries: BTreeMap::new(),
            by_content: HashMap::new(),
            matrix,
            dirty: false,
        };

        let total = meta.items.len();
        for (key, entry) in meta.items {
            if entry.row_index < cache.matrix.rows() {
                cache.by_content.insert(entry.content_hash.clone(), entry.row_index);
                cache.entries.insert(key, entry);
            }
        }
        let dropped = total - cache.entries.len();
        if dropped > 0 {
            warn!(dropped, "Dropped cache entries pointing past the matrix");
            cache.dirty = true;
        }

        let entries = cache.entries.len();
        info!(entries, rows = cache.matrix.rows(), "Loaded embedding cache");
        Ok((cache, LoadOutcome::Warm { entries }))
    }

    fn recover(dir: &Path, model: &str, reason: &str) -> Result<(Self, LoadOutcome)> {
        match snapshot::recover(dir, model)? {
            Some((cache, kept, dropped)) => {
                info!(kept, dropped, reason, "Recovered embedding cache from snapshot");
                Ok((cache, LoadOutcome::Recovered { kept, dropped }))
            }
            None => Ok((
                Self::empty(dir, model),
                LoadOutcome::Cold {
                    reason: reason.to_string(),
                },
            )),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of stored vector rows
    pub fn row_count(&self) -> usize {
        self.matrix.rows()
    }

    pub fn dim(&self) -> usize {
        self.matrix.dim()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn entry(&self, record_key: &str) -> Option<&CacheEntry> {
        self.entries.get(record_key)
    }

    pub fn lookup(&self, record_key: &str, content_hash: &str) -> Lookup<'_> {
        if let Some(entry) = self.entries.get(record_key) {
            if entry.content_hash == content_hash {
                if let Some(row) = self.matrix.row(entry.row_index) {
                    return Lookup::Hit(row);
                }
            }
        }
        match self.by_content.get(content_hash).and_then(|&r| self.matrix.row(r)) {
            Some(row) => Lookup::Shared(row),
            None => Lookup::Miss,
        }
    }

    /// Point `record_key` at the existing row for `content_hash`.
    ///
    /// Returns false when no row stores that content.
    pub fn link(&mut self, record_key: &str, content_hash: &str) -> bool {
        let Some(&row_index) = self.by_content.get(content_hash) else {
            return false;
        };
        self.entries.insert(
            record_key.to_string(),
            CacheEntry {
                content_hash: content_hash.to_string(),
                row_index,
                updated_at: utc_now_string(),
            },
        );
        self.dirty = true;
        true
    }

    /// Store a freshly computed vector for `record_key`.
    ///
    /// Identical content reuses its existing row; otherwise a row is appended.
    pub fn commit(&mut self, record_key: &str, content_hash: &str, vector: &[f32]) -> Result<()> {
        if self.link(record_key, content_hash) {
            return Ok(());
        }
        let row_index = self.matrix.push(vector)?;
        self.by_content.insert(content_hash.to_string(), row_index);
        self.entries.insert(
            record_key.to_string(),
            CacheEntry {
                content_hash: content_hash.to_string(),
                row_index,
                updated_at: utc_now_string(),
            },
        );
        self.dirty = true;
        Ok(())
    }

    /// Drop entries whose key is not in `retain` and re-pack rows so every
    /// row is referenced. Rows keep first-reference order over sorted keys.
    pub fn compact(&mut self, retain: &HashSet<String>) -> Result<()> {
        let before = self.entries.len();
        self.entries.retain(|key, _| retain.contains(key));
        let removed = before - self.entries.len();

        let referenced: HashSet<usize> = self.entries.values().map(|e| e.row_index).collect();
        if removed == 0 && referenced.len() == self.matrix.rows() {
            return Ok(());
        }

        let mut remap: HashMap<usize, usize> = HashMap::new();
        let mut packed = Matrix::new();
        for entry in self.entries.values_mut() {
            let new_index = match remap.get(&entry.row_index) {
                Some(&i) => i,
                None => {
                    let row = self.matrix.row(entry.row_index).ok_or_else(|| {
                        Error::Internal(format!("cache entry row {} out of range", entry.row_index))
                    })?;
                    let i = packed.push(row)?;
                    remap.insert(entry.row_index, i);
                    i
                }
            };
            entry.row_index = new_index;
        }

        let rows_before = self.matrix.rows();
        self.matrix = packed;
        self.by_content = self
            .entries
            .values()
            .map(|e| (e.content_hash.clone(), e.row_index))
            .collect();
        self.dirty = true;

        info!(
            removed_entries = removed,
            rows_before,
            rows_after = self.matrix.rows(),
            "Compacted embedding cache"
        );
        Ok(())
    }

    /// Persist matrix then metadata, each atomically. Returns whether
    /// anything was written.
    pub fn flush(&mut self) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }

        write_atomic(&self.dir.join(MATRIX_FILE), &self.matrix.encode())?;
        let meta = CacheMeta {
            version: META_VERSION,
            model: self.model.clone(),
            dim: self.matrix.dim(),
            row_count: self.matrix.rows(),
            updated_at: utc_now_string(),
            items: self.entries.clone(),
        };
        write_json_atomic(&self.dir.join(META_FILE), &meta)?;

        self.dirty = false;
        tracing::debug!(entries = self.entries.len(), rows = self.matrix.rows(), "Flushed embedding cache");
        Ok(true)
    }
}

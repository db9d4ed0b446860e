//! One-time migration of the legacy single-file cache
//!
//! Version 1 stored everything inline in `cache.embedding.json`:
//! `{ "version": 1, "model": ..., "items": { key: { context_hash, vector, updated_at } } }`.
//! Migration converts it into the matrix + metadata pair, flushes, and
//! removes the legacy file. A legacy file for another model, or one that
//! does not parse, is removed without migrating.

use super::EmbeddingCache;
use dirtax_common::atomic::read_json_if_exists;
use dirtax_common::Result;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

pub const LEGACY_FILE: &str = "cache.embedding.json";

#[derive(Debug, Deserialize)]
struct LegacyCache {
    #[serde(default)]
    model: String,
    #[serde(default)]
    items: BTreeMap<String, LegacyItem>,
}

#[derive(Debug, Deserialize)]
struct LegacyItem {
    #[serde(default)]
    context_hash: String,
    #[serde(default)]
    vector: Vec<f32>,
}

/// Migrate `dir/cache.embedding.json` if present.
///
/// Returns the migrated cache and its entry count, or `None` when there was
/// nothing to migrate.
pub fn migrate_legacy(dir: &Path, model: &str) -> Result<Option<(EmbeddingCache, usize)>> {
    let legacy_path = dir.join(LEGACY_FILE);

    let legacy: LegacyCache = match read_json_if_exists(&legacy_path) {
        Ok(Some(legacy)) => legacy,
        Ok(None) => return Ok(None),
        Err(e) => {
            warn!(path = %legacy_path.display(), error = %e, "Legacy embedding cache unreadable, discarding");
            std::fs::remove_file(&legacy_path)?;
            return Ok(None);
        }
    };

    if legacy.model != model {
        warn!(
            legacy_model = %legacy.model,
            requested = model,
            "Legacy embedding cache built with another model, discarding"
        );
        std::fs::remove_file(&legacy_path)?;
        return Ok(None);
    }

    let mut cache = EmbeddingCache::empty(dir, model);
    let mut skipped = 0usize;
    for (key, item) in &legacy.items {
        if item.context_hash.is_empty() || item.vector.is_empty() {
            skipped += 1;
            continue;
        }
        if cache.dim() != 0 && item.vector.len() != cache.dim() {
            skipped += 1;
            continue;
        }
        cache.commit(key, &item.context_hash, &item.vector)?;
    }

    // New files must be durable before the only copy of the old data goes away.
    cache.flush()?;
    std::fs::remove_file(&legacy_path)?;

    let entries = cache.len();
    info!(entries, skipped, rows = cache.row_count(), "Migrated legacy embedding cache");
    Ok(Some((cache, entries)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_no_legacy_file() {
        let dir = TempDir::new().unwrap();
        assert!(migrate_legacy(dir.path(), "m").unwrap().is_none());
    }

    #[test]
    fn test_other_model_discards_legacy() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(LEGACY_FILE);
        std::fs::write(&path, json!({"version": 1, "model": "old", "items": {}}).to_string()).unwrap();
        assert!(migrate_legacy(dir.path(), "m").unwrap().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_skips_malformed_items() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(LEGACY_FILE),
            json!({
                "version": 1,
                "model": "m",
                "items": {
                    "a": {"context_hash": "ha", "vector": [1.0, 2.0]},
                    "b": {"context_hash": "hb", "vector": []},
                    "c": {"context_hash": "hc", "vector": [1.0]},
                    "d": {"vector": [3.0, 4.0]}
                }
            })
            .to_string(),
        )
        .unwrap();
        let (cache, entries) = migrate_legacy(dir.path(), "m").unwrap().unwrap();
        assert_eq!(entries, 1);
        assert!(cache.entry("a").is_some());
    }
}

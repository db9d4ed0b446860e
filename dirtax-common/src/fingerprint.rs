//! Content fingerprints
//!
//! Pure, deterministic hashes that every cache layer uses to decide hit or
//! miss. Each fingerprint is SHA-256 over a canonical JSON rendering of a
//! normalized payload (object keys sorted, strings trimmed/lower-cased
//! where the kind calls for it), so fingerprints survive process restarts,
//! field reordering and re-serialization.
//!
//! Four kinds:
//! - [`record_key`]: per-record embedding cache key
//! - [`clustering_fingerprint`]: every input to the clustering step
//! - [`topic_fingerprint`]: a cluster's keyword/example content, independent of its numeric id
//! - [`category_fingerprint`]: inputs to an LLM-proposed category list

use crate::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `text`
pub fn stable_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    format!("{:x}", digest)
}

/// Hash any serializable payload through its canonical JSON form.
///
/// Serialization failures are returned instead of hashing a placeholder.
pub fn canonical_hash<T: Serialize + ?Sized>(payload: &T) -> Result<String> {
    let value = serde_json::to_value(payload)?;
    let mut out = String::new();
    write_canonical(&value, &mut out)?;
    Ok(stable_hash(&out))
}

/// Render `value` as JSON with object keys sorted at every depth.
fn write_canonical(value: &Value, out: &mut String) -> Result<()> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_canonical(&map[key.as_str()], out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        scalar => out.push_str(&serde_json::to_string(scalar)?),
    }
    Ok(())
}

/// Normalize a keyword or example for fingerprinting: trim, lower-case,
/// collapse internal whitespace runs to a single space.
pub fn normalize_term(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Stable embedding cache key for one direction record.
///
/// Depends only on the record's identity fields, never on its position in
/// the collected list, so re-collection that reorders input keeps every key.
pub fn record_key(axis: &str, paper_id: &str, researcher_id: &str, text: &str) -> String {
    stable_hash(&format!("{}|{}|{}|{}", axis, paper_id, researcher_id, text))
}

/// Parameters that change clustering output
#[derive(Debug, Clone, Serialize)]
pub struct ClusteringParams {
    pub embedding_model: String,
    pub min_cluster_size: usize,
    pub random_seed: u64,
    pub target_clusters: i64,
}

/// Fingerprint over everything the clusterer consumes.
///
/// `record_keys` and `context_hashes` are parallel arrays in record order;
/// any edit to a single context, any reorder, and any parameter change
/// produces a different fingerprint.
pub fn clustering_fingerprint(
    params: &ClusteringParams,
    record_keys: &[String],
    context_hashes: &[String],
) -> Result<String> {
    if record_keys.is_empty() {
        return Err(Error::InvalidInput(
            "clustering fingerprint requires at least one record".to_string(),
        ));
    }
    if record_keys.len() != context_hashes.len() {
        return Err(Error::InvalidInput(format!(
            "clustering fingerprint: {} record keys but {} context hashes",
            record_keys.len(),
            context_hashes.len()
        )));
    }
    if params.embedding_model.trim().is_empty() {
        return Err(Error::InvalidInput(
            "clustering fingerprint requires an embedding model name".to_string(),
        ));
    }

    #[derive(Serialize)]
    struct Payload<'a> {
        params: &'a ClusteringParams,
        records: &'a [String],
        contexts: &'a [String],
    }

    canonical_hash(&Payload {
        params,
        records: record_keys,
        contexts: context_hashes,
    })
}

fn normalized_set(items: &[String]) -> Vec<String> {
    let mut out: Vec<String> = items
        .iter()
        .map(|s| normalize_term(s))
        .filter(|s| !s.is_empty())
        .collect();
    out.sort();
    out
}

/// Label cache key for one cluster.
///
/// Invariant to keyword/example order, case and whitespace, and independent
/// of the cluster's numeric id: re-clustering that renumbers clusters still
/// reuses cached labels.
pub fn topic_fingerprint(axis: &str, keywords: &[String], examples: &[String]) -> Result<String> {
    if axis.trim().is_empty() {
        return Err(Error::InvalidInput(
            "topic fingerprint requires an axis".to_string(),
        ));
    }

    #[derive(Serialize)]
    struct Payload {
        axis: String,
        keywords: Vec<String>,
        examples: Vec<String>,
    }

    canonical_hash(&Payload {
        axis: axis.trim().to_lowercase(),
        keywords: normalized_set(keywords),
        examples: normalized_set(examples),
    })
}

/// One fine-grained label as seen by the category proposal step
#[derive(Debug, Clone, Serialize)]
pub struct CategoryInput {
    pub l2_name: String,
    pub definition: String,
}

/// Cache key for a proposed coarse-category list.
pub fn category_fingerprint(axis: &str, items: &[CategoryInput], target: usize) -> Result<String> {
    if axis.trim().is_empty() {
        return Err(Error::InvalidInput(
            "category fingerprint requires an axis".to_string(),
        ));
    }

    let mut normalized: Vec<CategoryInput> = items
        .iter()
        .map(|item| CategoryInput {
            l2_name: item.l2_name.trim().to_lowercase(),
            definition: item.definition.trim().to_lowercase(),
        })
        .collect();
    normalized.sort_by(|a, b| {
        a.l2_name
            .cmp(&b.l2_name)
            .then_with(|| a.definition.cmp(&b.definition))
    });

    #[derive(Serialize)]
    struct Payload {
        axis: String,
        target: usize,
        items: Vec<CategoryInput>,
    }

    canonical_hash(&Payload {
        axis: axis.trim().to_lowercase(),
        target,
        items: normalized,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_stable_hash_known_value() {
        assert_eq!(
            stable_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_canonical_hash_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":{"y":2,"x":[1,2]}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":{"x":[1,2],"y":2},"b":1}"#).unwrap();
        assert_eq!(canonical_hash(&a).unwrap(), canonical_hash(&b).unwrap());
    }

    #[test]
    fn test_record_key_distinguishes_fields() {
        let a = record_key("problem", "W1", "A1", "emotion recognition");
        let b = record_key("method", "W1", "A1", "emotion recognition");
        let c = record_key("problem", "W2", "A1", "emotion recognition");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, record_key("problem", "W1", "A1", "emotion recognition"));
    }

    #[test]
    fn test_normalize_term() {
        assert_eq!(normalize_term("  EEG   Signal\tProcessing "), "eeg signal processing");
        assert_eq!(normalize_term("   "), "");
    }

    #[test]
    fn test_topic_fingerprint_order_case_whitespace_invariant() {
        let a = topic_fingerprint(
            "problem",
            &strings(&["EEG", "artifact removal", "signal"]),
            &strings(&["removing blink artifacts", "ICA for eeg"]),
        )
        .unwrap();
        let b = topic_fingerprint(
            "problem",
            &strings(&["signal", "  Artifact   Removal", "eeg "]),
            &strings(&["ica FOR eeg", "Removing blink artifacts", "  "]),
        )
        .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_topic_fingerprint_changes_with_content() {
        let a = topic_fingerprint("problem", &strings(&["eeg"]), &strings(&["x"])).unwrap();
        let b = topic_fingerprint("problem", &strings(&["ecg"]), &strings(&["x"])).unwrap();
        let c = topic_fingerprint("method", &strings(&["eeg"]), &strings(&["x"])).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_topic_fingerprint_rejects_blank_axis() {
        assert!(matches!(
            topic_fingerprint(" ", &[], &[]),
            Err(Error::InvalidInput(_))
        ));
    }

    fn params() -> ClusteringParams {
        ClusteringParams {
            embedding_model: "text-embedding-v4".to_string(),
            min_cluster_size: 10,
            random_seed: 42,
            target_clusters: -1,
        }
    }

    #[test]
    fn test_clustering_fingerprint_sensitive_to_every_input() {
        let keys = strings(&["k1", "k2"]);
        let hashes = strings(&["h1", "h2"]);
        let base = clustering_fingerprint(&params(), &keys, &hashes).unwrap();

        let mut p = params();
        p.random_seed = 7;
        assert_ne!(base, clustering_fingerprint(&p, &keys, &hashes).unwrap());

        let edited = strings(&["h1", "h2-edited"]);
        assert_ne!(base, clustering_fingerprint(&params(), &keys, &edited).unwrap());

        let reordered = strings(&["k2", "k1"]);
        assert_ne!(base, clustering_fingerprint(&params(), &reordered, &hashes).unwrap());

        assert_eq!(base, clustering_fingerprint(&params(), &keys, &hashes).unwrap());
    }

    #[test]
    fn test_clustering_fingerprint_rejects_malformed_input() {
        let keys = strings(&["k1", "k2"]);
        assert!(matches!(
            clustering_fingerprint(&params(), &keys, &strings(&["h1"])),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            clustering_fingerprint(&params(), &[], &[]),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_category_fingerprint_order_and_case_invariant() {
        let a = vec![
            CategoryInput { l2_name: "EEG Artifacts".into(), definition: "Noise.".into() },
            CategoryInput { l2_name: "Speech Emotion".into(), definition: "Voice.".into() },
        ];
        let b = vec![
            CategoryInput { l2_name: " speech emotion".into(), definition: "voice.".into() },
            CategoryInput { l2_name: "eeg artifacts ".into(), definition: "NOISE.".into() },
        ];
        assert_eq!(
            category_fingerprint("problem", &a, 12).unwrap(),
            category_fingerprint("problem", &b, 12).unwrap()
        );
        assert_ne!(
            category_fingerprint("problem", &a, 12).unwrap(),
            category_fingerprint("problem", &a, 13).unwrap()
        );
    }
}

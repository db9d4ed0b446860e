//! Completion-proposed coarse categories
//!
//! Used only when no category file exists and proposals are enabled. The
//! proposal is cached in `cache.l1.json` keyed by the category fingerprint
//! of the canonical fine-grained labels and the target count.

use super::categories::{CategorySpec, FALLBACK_CATEGORY};
use crate::error::{BuildError, BuildResult};
use crate::labeling::{request_json_object, string_list, CompletionSettings};
use crate::models::{Axis, L2Item};
use crate::services::ChatService;
use crate::utils::RetryPolicy;
use dirtax_common::atomic::{read_json_if_exists, write_json_atomic};
use dirtax_common::fingerprint::{category_fingerprint, CategoryInput};
use dirtax_common::time::utc_now_string;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

pub const PROPOSAL_CACHE_FILE: &str = "cache.l1.json";
const PROPOSAL_CACHE_VERSION: u32 = 1;
const PROPOSAL_KEYS: &[&str] = &["l1_categories"];

/// Suggested `(min, target, max)` coarse category counts for `l2_count`
/// fine-grained labels.
///
/// `target = round(sqrt(n) * 1.3)` clamped to `[floor + 2, ceiling]`, with
/// a window of three on either side bounded by `[floor, ceiling]`.
pub fn suggest_l1_count_range(l2_count: usize, floor: usize, ceiling: usize) -> (usize, usize, usize) {
    let ceiling = ceiling.max(floor);
    let target_floor = (floor + 2).min(ceiling);
    if l2_count == 0 {
        let target = target_floor;
        return (floor, target, (floor + 4).min(ceiling).max(target));
    }
    let raw = ((l2_count as f64).sqrt() * 1.3).round() as usize;
    let target = raw.clamp(target_floor, ceiling);
    let min = target.saturating_sub(3).max(floor).min(ceiling);
    let max = (target + 3).min(ceiling).max(min);
    (min, target, max)
}

pub fn build_proposal_prompt(axis: Axis, items: &[L2Item], range: (usize, usize, usize)) -> String {
    let (min, target, max) = range;
    let payload: Vec<Value> = items
        .iter()
        .map(|item| serde_json::json!({ "l2_name": item.l2_name, "definition": item.definition }))
        .collect();
    let payload = Value::Array(payload).to_string();

    let axis_rule = match axis {
        Axis::Problem => {
            "- This is the problem axis: L1 names must describe problem domains, challenges or questions, not methods, models, or technical solutions.\n"
        }
        Axis::Method => {
            "- This is the method axis: L1 names must describe methodological families or technical approaches, not application problems or task domains.\n"
        }
    };

    format!(
        "Axis: {axis}\n\
         Group the following L2 categories into L1 categories.\n\
         L2 items JSON:\n{payload}\n\n\
         Return strict JSON:\n\
         {{\n  \"l1_categories\": [\n    {{\n      \"name\": string,\n      \"definition\": string,\n      \"aliases\": string[]\n    }}\n  ]\n}}\n\n\
         Rules:\n\
         - Target around {target} L1 categories (acceptable range: {min}-{max}).\n\
         - L1 names should be broad, stable, and concise.\n\
         - L1 names must be discriminative and stay below the field level.\n\
         - Prefer a scope that distinguishes categories from each other.\n\
         {axis_rule}\
         - definition should be one sentence.\n\
         - Keep output factual and concise.",
        axis = axis,
        payload = payload,
        target = target,
        min = min,
        max = max,
        axis_rule = axis_rule,
    )
}

/// Validate the proposal object: named entries only, first occurrence of a
/// name wins; an empty result becomes the single fallback bucket.
pub fn categories_from_proposal(object: &serde_json::Map<String, Value>) -> Vec<CategorySpec> {
    let mut seen = HashSet::new();
    let mut categories = Vec::new();

    if let Some(Value::Array(entries)) = object.get("l1_categories") {
        for entry in entries {
            let Value::Object(map) = entry else { continue };
            let name = map
                .get("name")
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or_default();
            if name.is_empty() || !seen.insert(name.to_lowercase()) {
                continue;
            }
            categories.push(CategorySpec {
                name: name.to_string(),
                definition: map
                    .get("definition")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .unwrap_or_default()
                    .to_string(),
                aliases: string_list(map.get("aliases")),
                children: Vec::new(),
            });
        }
    }

    if categories.is_empty() {
        warn!("Category proposal contained no usable categories, using fallback bucket");
        categories.push(CategorySpec::leaf(
            FALLBACK_CATEGORY,
            "Fine-grained categories that no proposed coarse category covers.",
        ));
    }
    categories
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProposalCacheDoc {
    version: u32,
    updated_at: String,
    items: BTreeMap<String, Vec<CategorySpec>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProposalSettings {
    pub completion: CompletionSettings,
    pub l1_min: usize,
    pub l1_max: usize,
}

/// Propose categories for `items`, reusing a cached proposal when the
/// inputs are unchanged.
pub async fn propose_categories(
    axis: Axis,
    items: &[L2Item],
    chat: &dyn ChatService,
    retry: &RetryPolicy,
    settings: ProposalSettings,
    axis_dir: &Path,
) -> BuildResult<Vec<CategorySpec>> {
    let range = suggest_l1_count_range(items.len(), settings.l1_min, settings.l1_max);
    let inputs: Vec<CategoryInput> = items
        .iter()
        .map(|item| CategoryInput {
            l2_name: item.l2_name.clone(),
            definition: item.definition.clone(),
        })
        .collect();
    let fingerprint = category_fingerprint(axis.as_str(), &inputs, range.1)?;

    let cache_path = axis_dir.join(PROPOSAL_CACHE_FILE);
    let mut cache: ProposalCacheDoc = match read_json_if_exists(&cache_path) {
        Ok(Some(doc)) => doc,
        Ok(None) => ProposalCacheDoc::default(),
        Err(dirtax_common::Error::Json(e)) => {
            warn!(error = %e, "Category proposal cache unreadable, starting empty");
            ProposalCacheDoc::default()
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(categories) = cache.items.get(&fingerprint) {
        info!(axis = %axis, categories = categories.len(), "Category proposal cache hit");
        return Ok(categories.clone());
    }

    info!(
        axis = %axis,
        l2_items = items.len(),
        target = range.1,
        "Requesting category proposal"
    );
    let prompt = build_proposal_prompt(axis, items, range);
    let object = request_json_object(
        chat,
        retry,
        &prompt,
        PROPOSAL_KEYS,
        settings.completion,
        "l1_grouping_direct",
    )
    .await
    .map_err(|e| BuildError::service("category proposal", e))?;

    let categories = categories_from_proposal(&object);
    cache.version = PROPOSAL_CACHE_VERSION;
    cache.updated_at = utc_now_string();
    cache.items.insert(fingerprint, categories.clone());
    write_json_atomic(&cache_path, &cache)?;

    Ok(categories)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{ChatRequest, ServiceError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[test]
    fn test_suggest_l1_count_range_defaults() {
        assert_eq!(suggest_l1_count_range(0, 6, 24), (6, 8, 10));
        // sqrt(4) * 1.3 = 2.6 → clamped to 8
        assert_eq!(suggest_l1_count_range(4, 6, 24), (6, 8, 11));
        // sqrt(100) * 1.3 = 13
        assert_eq!(suggest_l1_count_range(100, 6, 24), (10, 13, 16));
        // sqrt(1000) * 1.3 = 41.1 → clamped to 24
        assert_eq!(suggest_l1_count_range(1000, 6, 24), (21, 24, 24));
    }

    #[test]
    fn test_suggest_l1_count_range_narrow_bounds() {
        assert_eq!(suggest_l1_count_range(100, 4, 5), (4, 5, 5));
        assert_eq!(suggest_l1_count_range(100, 9, 3), (9, 9, 9));
    }

    #[test]
    fn test_categories_from_proposal() {
        let object = json!({"l1_categories": [
            {"name": "Sensing", "definition": " Sensors. ", "aliases": ["sensors", ""]},
            {"name": "sensing", "definition": "dup"},
            {"name": ""},
            "junk"
        ]});
        let categories = categories_from_proposal(object.as_object().unwrap());
        assert_eq!(categories.len(), 1);
        assert_eq!(categories[0].definition, "Sensors.");
        assert_eq!(categories[0].aliases, vec!["sensors".to_string()]);

        let empty = categories_from_proposal(json!({"l1_categories": []}).as_object().unwrap());
        assert_eq!(empty[0].name, FALLBACK_CATEGORY);
    }

    struct FixedChat {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatService for FixedChat {
        async fn complete(&self, _request: &ChatRequest, _log_name: &str) -> Result<String, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"l1_categories": [{"name": "Signal Processing", "definition": "d"}]}).to_string())
        }
    }

    #[tokio::test]
    async fn test_proposal_is_cached() {
        let dir = TempDir::new().unwrap();
        let items = vec![L2Item {
            l2_name: "EEG Artifact Removal".into(),
            definition: "Removing artifacts.".into(),
            aliases: vec![],
            topic_ids: vec![0],
            size: 12,
        }];
        let chat = FixedChat { calls: AtomicUsize::new(0) };
        let settings = ProposalSettings {
            completion: CompletionSettings { max_tokens: 1800, enable_thinking: true },
            l1_min: 6,
            l1_max: 24,
        };
        let retry = RetryPolicy::none();

        let first = propose_categories(Axis::Problem, &items, &chat, &retry, settings, dir.path())
            .await
            .unwrap();
        let second = propose_categories(Axis::Problem, &items, &chat, &retry, settings, dir.path())
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0].name, "Signal Processing");
        assert_eq!(chat.calls.load(Ordering::SeqCst), 1);
    }
}

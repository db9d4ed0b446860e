//! Fine-grained labeling
//!
//! Each topic candidate is named by the completion service. Results are
//! cached by topic fingerprint in `cache.labels.json`, so re-clustering
//! that renumbers topics, or reorders their keywords, reuses earlier labels.
//! The cache file is rewritten after every completion; an interrupted run
//! loses at most the requests still in flight.

pub mod json_extract;
pub mod prompt;

pub use json_extract::{parse_json_object, JsonObject};

use crate::error::{BuildError, BuildResult};
use crate::models::taxonomy::L2_EXAMPLES;
use crate::models::{Axis, L2Entry, TopicCandidate};
use crate::services::{ChatMessage, ChatRequest, ChatService, ServiceError};
use crate::utils::RetryPolicy;
use dirtax_common::atomic::{read_json_if_exists, write_json_atomic};
use dirtax_common::config::defaults;
use dirtax_common::fingerprint::topic_fingerprint;
use dirtax_common::time::utc_now_string;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const LABEL_CACHE_FILE: &str = "cache.labels.json";
const LABEL_CACHE_VERSION: u32 = 1;

// ============================================================================
// Label payload
// ============================================================================

/// Label fields as returned by the completion service, normalized
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelPayload {
    #[serde(default)]
    pub l2_name: String,
    #[serde(default)]
    pub definition: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

fn text_field(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string().trim().to_string(),
    }
}

/// Read a string list; a bare string counts as a one-element list
pub(crate) fn string_list(value: Option<&Value>) -> Vec<String> {
    let items: Vec<String> = match value {
        Some(Value::Array(items)) => items.iter().map(|v| text_field(Some(v))).collect(),
        Some(Value::String(s)) => vec![s.trim().to_string()],
        _ => Vec::new(),
    };
    items.into_iter().filter(|s| !s.is_empty()).collect()
}

impl LabelPayload {
    /// Validate a completion object. `name` is accepted when `l2_name` is
    /// absent or blank; blank aliases are dropped.
    pub fn from_object(object: &JsonObject) -> Self {
        let mut l2_name = text_field(object.get("l2_name"));
        if l2_name.is_empty() {
            l2_name = text_field(object.get("name"));
        }
        Self {
            l2_name,
            definition: text_field(object.get("definition")),
            aliases: string_list(object.get("aliases")),
        }
    }
}

/// Combine a candidate with its label into an output entry.
pub fn to_l2_entry(axis: Axis, candidate: &TopicCandidate, fingerprint: &str, label: &LabelPayload) -> L2Entry {
    let l2_name = if label.l2_name.trim().is_empty() {
        format!("{}_topic_{}", axis, candidate.topic_id)
    } else {
        label.l2_name.trim().to_string()
    };
    L2Entry {
        topic_id: candidate.topic_id,
        size: candidate.size,
        keywords: candidate.keywords.clone(),
        examples: candidate.examples.iter().take(L2_EXAMPLES).cloned().collect(),
        topic_fingerprint: fingerprint.to_string(),
        l2_name,
        definition: label.definition.trim().to_string(),
        aliases: label
            .aliases
            .iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect(),
    }
}

// ============================================================================
// Label cache
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LabelCacheDoc {
    version: u32,
    updated_at: String,
    items: BTreeMap<String, LabelPayload>,
}

/// Topic fingerprint → label, persisted atomically
#[derive(Debug)]
pub struct LabelCache {
    path: PathBuf,
    items: BTreeMap<String, LabelPayload>,
}

impl LabelCache {
    /// Load `dir/cache.labels.json`; an unreadable file starts empty.
    pub fn load(dir: &Path) -> dirtax_common::Result<Self> {
        let path = dir.join(LABEL_CACHE_FILE);
        let items = match read_json_if_exists::<LabelCacheDoc>(&path) {
            Ok(Some(doc)) => doc.items,
            Ok(None) => BTreeMap::new(),
            Err(dirtax_common::Error::Json(e)) => {
                warn!(path = %path.display(), error = %e, "Label cache unreadable, starting empty");
                BTreeMap::new()
            }
            Err(e) => return Err(e),
        };
        Ok(Self { path, items })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, fingerprint: &str) -> Option<&LabelPayload> {
        self.items.get(fingerprint)
    }

    pub fn insert(&mut self, fingerprint: String, label: LabelPayload) {
        self.items.insert(fingerprint, label);
    }

    pub fn save(&self) -> dirtax_common::Result<()> {
        write_json_atomic(
            &self.path,
            &LabelCacheDoc {
                version: LABEL_CACHE_VERSION,
                updated_at: utc_now_string(),
                items: self.items.clone(),
            },
        )
    }
}

// ============================================================================
// Completion requests
// ============================================================================

/// Settings for one JSON completion call site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionSettings {
    pub max_tokens: u32,
    /// Extended reasoning on the first attempt only
    pub enable_thinking: bool,
}

/// Ask for one JSON object, retrying transport and parse failures.
///
/// Attempt 0 uses `settings.enable_thinking`; later attempts disable it and
/// append stricter formatting rules naming `keys`.
pub async fn request_json_object(
    chat: &dyn ChatService,
    retry: &RetryPolicy,
    prompt: &str,
    keys: &[&str],
    settings: CompletionSettings,
    log_name: &str,
) -> Result<JsonObject, ServiceError> {
    retry
        .run(log_name, |attempt| async move {
            let request = ChatRequest {
                messages: vec![
                    ChatMessage::system(prompt::SYSTEM_PROMPT),
                    ChatMessage::user(format!("{}{}", prompt, prompt::retry_suffix(attempt, keys))),
                ],
                max_tokens: settings.max_tokens,
                enable_thinking: settings.enable_thinking && attempt == 0,
            };
            let attempt_name = format!("{}_try{}", log_name, attempt + 1);
            let text = chat.complete(&request, &attempt_name).await?;
            parse_json_object(&text)
        })
        .await
}

// ============================================================================
// Orchestrator
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelSettings {
    pub concurrency: usize,
    pub completion: CompletionSettings,
}

impl Default for LabelSettings {
    fn default() -> Self {
        Self {
            concurrency: defaults::CHAT_CONCURRENCY,
            completion: CompletionSettings {
                max_tokens: defaults::CHAT_MAX_TOKENS,
                enable_thinking: false,
            },
        }
    }
}

/// Per-run labeling counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LabelStats {
    pub hits: usize,
    pub requested: usize,
}

pub struct LabelOrchestrator<'a> {
    chat: &'a dyn ChatService,
    settings: LabelSettings,
    retry: RetryPolicy,
}

impl<'a> LabelOrchestrator<'a> {
    pub fn new(chat: &'a dyn ChatService, settings: LabelSettings, retry: RetryPolicy) -> Self {
        Self { chat, settings, retry }
    }

    /// Label every candidate, returning entries in candidate order.
    pub async fn label_topics(
        &self,
        axis: Axis,
        candidates: &[TopicCandidate],
        cache: &mut LabelCache,
    ) -> BuildResult<(Vec<L2Entry>, LabelStats)> {
        let fingerprints = candidates
            .iter()
            .map(|c| topic_fingerprint(axis.as_str(), &c.keywords, &c.examples))
            .collect::<dirtax_common::Result<Vec<String>>>()?;

        let total = candidates.len();
        let mut entries: Vec<Option<L2Entry>> = vec![None; total];
        let mut pending = Vec::new();
        let mut done = 0usize;

        for (index, candidate) in candidates.iter().enumerate() {
            match cache.get(&fingerprints[index]) {
                Some(label) => {
                    entries[index] = Some(to_l2_entry(axis, candidate, &fingerprints[index], label));
                    done += 1;
                }
                None => pending.push(index),
            }
        }
        let stats = LabelStats {
            hits: done,
            requested: pending.len(),
        };

        let workers = self.settings.concurrency.min(pending.len()).max(1);
        info!(
            axis = %axis,
            total,
            hits = stats.hits,
            misses = stats.requested,
            workers,
            "Starting topic labeling"
        );

        let mut completions = stream::iter(pending)
            .map(|index| {
                let candidate = &candidates[index];
                async move {
                    let prompt = prompt::build_label_prompt(axis, candidate);
                    let log_name = format!("l2_topic_{}", candidate.topic_id);
                    let result = request_json_object(
                        self.chat,
                        &self.retry,
                        &prompt,
                        prompt::LABEL_KEYS,
                        self.settings.completion,
                        &log_name,
                    )
                    .await;
                    (index, log_name, result)
                }
            })
            .buffer_unordered(workers);

        while let Some((index, log_name, result)) = completions.next().await {
            let object = result.map_err(|e| BuildError::service(log_name, e))?;
            let label = LabelPayload::from_object(&object);
            let candidate = &candidates[index];

            entries[index] = Some(to_l2_entry(axis, candidate, &fingerprints[index], &label));
            cache.insert(fingerprints[index].clone(), label);
            cache.save()?;

            done += 1;
            info!(
                axis = %axis,
                topic_id = candidate.topic_id,
                progress = format!("{}/{}", done, total),
                "Topic labeled"
            );
        }

        let entries = entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| {
                entry.ok_or_else(|| {
                    BuildError::integrity(format!(
                        "topic {} has no label",
                        candidates[index].topic_id
                    ))
                })
            })
            .collect::<BuildResult<Vec<L2Entry>>>()?;

        Ok((entries, stats))
    }
}

//! Configuration resolution for dirtax-build
//!
//! Each setting resolves CLI flag → environment variable → TOML → built-in
//! default. The CLI layer arrives as [`CliOverrides`]; environment variables
//! are read here so that a single place owns the `DIRTAX_*` names.

use crate::batch::BatchSettings;
use crate::clustering::ClusterSettings;
use crate::hierarchy::GroupingSettings;
use crate::labeling::{CompletionSettings, LabelSettings};
use crate::models::AxisSelection;
use crate::utils::RetryPolicy;
use dirtax_common::config::{defaults, parse_bool_flag, TomlConfig};
use dirtax_common::{Error, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

pub const ENV_API_KEY: &str = "DIRTAX_API_KEY";
pub const ENV_BASE_URL: &str = "DIRTAX_BASE_URL";
pub const ENV_EMBEDDING_MODEL: &str = "DIRTAX_EMBEDDING_MODEL";
pub const ENV_CHAT_MODEL: &str = "DIRTAX_CHAT_MODEL";
pub const ENV_EMBEDDING_MAX_BATCH: &str = "DIRTAX_EMBEDDING_MAX_BATCH";
pub const ENV_HTTP_TIMEOUT_SECS: &str = "DIRTAX_HTTP_TIMEOUT_SECS";
pub const ENV_ENABLE_THINKING: &str = "DIRTAX_ENABLE_THINKING";

/// Values supplied on the command line
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub axis: Option<AxisSelection>,
    pub researchers_root: Option<PathBuf>,
    pub out_dir: Option<PathBuf>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub embedding_model: Option<String>,
    pub chat_model: Option<String>,
    pub embedding_batch_size: Option<usize>,
    pub embedding_concurrency: Option<usize>,
    pub chat_concurrency: Option<usize>,
    pub min_cluster_size: Option<usize>,
    pub random_seed: Option<u64>,
    pub target_clusters: Option<i64>,
    pub categories_file: Option<PathBuf>,
    pub propose_categories: bool,
}

/// Fully resolved run configuration
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub axis: AxisSelection,
    pub researchers_root: PathBuf,
    pub out_dir: PathBuf,
    pub api_key: String,
    pub base_url: String,
    pub embedding_model: String,
    pub chat_model: String,
    pub http_timeout: Duration,
    pub retry: RetryPolicy,
    /// Hard per-request item limit of the embedding service
    pub embedding_max_batch: usize,
    pub batch: BatchSettings,
    pub labels: LabelSettings,
    pub category_max_tokens: u32,
    pub clustering: ClusterSettings,
    pub grouping: GroupingSettings,
    pub categories_file: Option<PathBuf>,
    pub propose_categories: bool,
    pub l1_min: usize,
    pub l1_max: usize,
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parsed<T: FromStr>(name: &str) -> Option<T> {
    let raw = env_string(name)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "Ignoring unparsable environment value");
            None
        }
    }
}

fn non_blank(value: Option<&String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Resolve the API key from CLI, environment and TOML.
///
/// Warns when more than one source supplies a key; the highest-priority
/// source wins.
pub fn resolve_api_key(cli: Option<&String>, toml_config: &TomlConfig) -> Result<String> {
    let cli_key = non_blank(cli);
    let env_key = env_string(ENV_API_KEY);
    let toml_key = non_blank(toml_config.api_key.as_ref());

    let sources: Vec<&str> = [
        cli_key.as_ref().map(|_| "command line"),
        env_key.as_ref().map(|_| "environment"),
        toml_key.as_ref().map(|_| "TOML"),
    ]
    .into_iter()
    .flatten()
    .collect();

    if sources.len() > 1 {
        warn!(
            "API key found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    if let Some(key) = cli_key {
        info!("API key loaded from command line");
        return Ok(key);
    }
    if let Some(key) = env_key {
        info!("API key loaded from environment variable");
        return Ok(key);
    }
    if let Some(key) = toml_key {
        info!("API key loaded from TOML config");
        return Ok(key);
    }

    Err(Error::Config(format!(
        "API key not configured. Please configure using one of:\n\
         1. Command line: --api-key <key>\n\
         2. Environment: {}=<key>\n\
         3. TOML config: api_key = \"<key>\" in dirtax.toml",
        ENV_API_KEY
    )))
}

impl BuildConfig {
    /// Resolve every setting.
    pub fn resolve(cli: &CliOverrides, toml_config: &TomlConfig) -> Result<Self> {
        let api_key = resolve_api_key(cli.api_key.as_ref(), toml_config)?;

        let base_url = non_blank(cli.base_url.as_ref())
            .or_else(|| env_string(ENV_BASE_URL))
            .or_else(|| non_blank(toml_config.base_url.as_ref()))
            .unwrap_or_else(|| defaults::BASE_URL.to_string());
        let embedding_model = non_blank(cli.embedding_model.as_ref())
            .or_else(|| env_string(ENV_EMBEDDING_MODEL))
            .or_else(|| non_blank(toml_config.embedding_model.as_ref()))
            .unwrap_or_else(|| defaults::EMBEDDING_MODEL.to_string());
        let chat_model = non_blank(cli.chat_model.as_ref())
            .or_else(|| env_string(ENV_CHAT_MODEL))
            .or_else(|| non_blank(toml_config.chat_model.as_ref()))
            .unwrap_or_else(|| defaults::CHAT_MODEL.to_string());

        let http = &toml_config.http;
        let timeout_secs = env_parsed(ENV_HTTP_TIMEOUT_SECS)
            .or(http.timeout_secs)
            .unwrap_or(defaults::HTTP_TIMEOUT_SECS);
        let retry = RetryPolicy {
            max_retries: http.max_retries.unwrap_or(defaults::MAX_RETRIES),
            base_delay: Duration::from_millis(http.base_delay_ms.unwrap_or(defaults::BASE_DELAY_MS)),
            max_delay: Duration::from_millis(http.max_delay_ms.unwrap_or(defaults::MAX_DELAY_MS)),
        };

        let embedding = &toml_config.embedding;
        let embedding_max_batch = env_parsed(ENV_EMBEDDING_MAX_BATCH)
            .or(embedding.max_batch)
            .unwrap_or(defaults::EMBEDDING_MAX_BATCH);
        let batch = BatchSettings {
            batch_size: cli
                .embedding_batch_size
                .or(embedding.batch_size)
                .unwrap_or(defaults::EMBEDDING_BATCH_SIZE),
            concurrency: cli
                .embedding_concurrency
                .or(embedding.concurrency)
                .unwrap_or(defaults::EMBEDDING_CONCURRENCY),
            checkpoint_every: embedding.checkpoint_every.unwrap_or(defaults::CHECKPOINT_EVERY),
        };

        let chat = &toml_config.chat;
        let enable_thinking = env_string(ENV_ENABLE_THINKING)
            .and_then(|v| parse_bool_flag(&v))
            .or(chat.enable_thinking)
            .unwrap_or(false);
        let labels = LabelSettings {
            concurrency: cli
                .chat_concurrency
                .or(chat.concurrency)
                .unwrap_or(defaults::CHAT_CONCURRENCY),
            completion: CompletionSettings {
                max_tokens: chat.max_tokens.unwrap_or(defaults::CHAT_MAX_TOKENS),
                enable_thinking,
            },
        };

        let clustering_section = &toml_config.clustering;
        let clustering = ClusterSettings {
            min_cluster_size: cli
                .min_cluster_size
                .or(clustering_section.min_cluster_size)
                .unwrap_or(defaults::MIN_CLUSTER_SIZE),
            random_seed: cli
                .random_seed
                .or(clustering_section.random_seed)
                .unwrap_or(defaults::RANDOM_SEED),
            target_clusters: cli
                .target_clusters
                .or(clustering_section.target_clusters)
                .unwrap_or(defaults::TARGET_CLUSTERS),
            join_threshold: clustering_section.join_threshold.unwrap_or(defaults::JOIN_THRESHOLD),
        };

        let hierarchy = &toml_config.hierarchy;
        let grouping = GroupingSettings {
            orphan_threshold: hierarchy.orphan_threshold.unwrap_or(defaults::ORPHAN_THRESHOLD),
        };
        let l1_min = hierarchy.l1_min.unwrap_or(defaults::L1_MIN);
        let l1_max = hierarchy.l1_max.unwrap_or(defaults::L1_MAX);
        if l1_min == 0 {
            return Err(Error::Config("hierarchy.l1_min must be at least 1".to_string()));
        }

        Ok(Self {
            axis: cli.axis.unwrap_or(AxisSelection::Both),
            researchers_root: cli
                .researchers_root
                .clone()
                .or_else(|| toml_config.researchers_root.clone())
                .unwrap_or_else(|| PathBuf::from(defaults::RESEARCHERS_ROOT)),
            out_dir: cli
                .out_dir
                .clone()
                .or_else(|| toml_config.out_dir.clone())
                .unwrap_or_else(|| PathBuf::from(defaults::OUT_DIR)),
            api_key,
            base_url,
            embedding_model,
            chat_model,
            http_timeout: Duration::from_secs(timeout_secs),
            retry,
            embedding_max_batch,
            batch,
            labels,
            category_max_tokens: defaults::CATEGORY_MAX_TOKENS,
            clustering,
            grouping,
            categories_file: cli.categories_file.clone().or_else(|| hierarchy.categories_file.clone()),
            propose_categories: cli.propose_categories || hierarchy.propose_categories.unwrap_or(false),
            l1_min,
            l1_max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clear_env() {
        for name in [
            ENV_API_KEY,
            ENV_BASE_URL,
            ENV_EMBEDDING_MODEL,
            ENV_CHAT_MODEL,
            ENV_EMBEDDING_MAX_BATCH,
            ENV_HTTP_TIMEOUT_SECS,
            ENV_ENABLE_THINKING,
        ] {
            env::remove_var(name);
        }
    }

    #[test]
    #[serial]
    fn test_missing_api_key_names_every_source() {
        clear_env();
        let err = resolve_api_key(None, &TomlConfig::default()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("--api-key"));
        assert!(message.contains(ENV_API_KEY));
        assert!(message.contains("dirtax.toml"));
    }

    #[test]
    #[serial]
    fn test_api_key_priority() {
        clear_env();
        let toml_config = TomlConfig {
            api_key: Some("from-toml".into()),
            ..Default::default()
        };
        assert_eq!(resolve_api_key(None, &toml_config).unwrap(), "from-toml");

        env::set_var(ENV_API_KEY, "from-env");
        assert_eq!(resolve_api_key(None, &toml_config).unwrap(), "from-env");
        assert_eq!(
            resolve_api_key(Some(&"from-cli".to_string()), &toml_config).unwrap(),
            "from-cli"
        );
        assert_eq!(
            resolve_api_key(Some(&"  ".to_string()), &toml_config).unwrap(),
            "from-env"
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn test_resolve_defaults() {
        clear_env();
        let cli = CliOverrides {
            api_key: Some("k".into()),
            ..Default::default()
        };
        let config = BuildConfig::resolve(&cli, &TomlConfig::default()).unwrap();
        assert_eq!(config.axis, AxisSelection::Both);
        assert_eq!(config.base_url, defaults::BASE_URL);
        assert_eq!(config.embedding_model, defaults::EMBEDDING_MODEL);
        assert_eq!(config.chat_model, defaults::CHAT_MODEL);
        assert_eq!(config.embedding_max_batch, 10);
        assert_eq!(config.batch, BatchSettings::default());
        assert_eq!(config.labels, LabelSettings::default());
        assert_eq!(config.http_timeout, Duration::from_secs(120));
        assert_eq!(config.retry, RetryPolicy::default());
        assert!(!config.propose_categories);
    }

    #[test]
    #[serial]
    fn test_cli_over_env_over_toml() {
        clear_env();
        let mut toml_config = TomlConfig {
            chat_model: Some("toml-chat".into()),
            embedding_model: Some("toml-embed".into()),
            ..Default::default()
        };
        toml_config.embedding.max_batch = Some(25);
        toml_config.chat.enable_thinking = Some(true);
        toml_config.embedding.batch_size = Some(7);

        env::set_var(ENV_CHAT_MODEL, "env-chat");
        env::set_var(ENV_EMBEDDING_MODEL, "env-embed");
        env::set_var(ENV_EMBEDDING_MAX_BATCH, "not-a-number");
        env::set_var(ENV_ENABLE_THINKING, "off");

        let cli = CliOverrides {
            api_key: Some("k".into()),
            chat_model: Some("cli-chat".into()),
            ..Default::default()
        };
        let config = BuildConfig::resolve(&cli, &toml_config).unwrap();
        clear_env();

        assert_eq!(config.chat_model, "cli-chat");
        assert_eq!(config.embedding_model, "env-embed");
        assert_eq!(config.embedding_max_batch, 25);
        assert!(!config.labels.completion.enable_thinking);
        assert_eq!(config.batch.batch_size, 7);
    }

    #[test]
    #[serial]
    fn test_unknown_thinking_flag_falls_through() {
        clear_env();
        let mut toml_config = TomlConfig::default();
        toml_config.chat.enable_thinking = Some(true);
        env::set_var(ENV_ENABLE_THINKING, "sometimes");
        let cli = CliOverrides {
            api_key: Some("k".into()),
            ..Default::default()
        };
        let config = BuildConfig::resolve(&cli, &toml_config).unwrap();
        clear_env();
        assert!(config.labels.completion.enable_thinking);
    }
}

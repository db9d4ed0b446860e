//! Configuration file model and loading
//!
//! The bootstrap file `dirtax.toml` is optional and every field has a
//! built-in default. Resolution of the file location follows a fixed
//! priority order:
//! 1. Command-line argument (highest priority)
//! 2. `DIRTAX_CONFIG` environment variable
//! 3. `./dirtax.toml` in the working directory
//! 4. `<config_dir>/dirtax/dirtax.toml` (platform config directory)
//!
//! A missing file is not an error: [`load_toml_config`] logs a warning and
//! returns defaults. A file that exists but does not parse is a
//! [`Error::Config`].

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "DIRTAX_CONFIG";

/// Default config file name
pub const CONFIG_FILE_NAME: &str = "dirtax.toml";

/// Built-in defaults (code constants)
pub mod defaults {
    pub const BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
    pub const EMBEDDING_MODEL: &str = "text-embedding-v4";
    pub const CHAT_MODEL: &str = "qwen3.5-plus";
    pub const RESEARCHERS_ROOT: &str = "data-repo/data/researchers";
    pub const OUT_DIR: &str = "data-repo/data/taxonomy";

    pub const EMBEDDING_BATCH_SIZE: usize = 10;
    pub const EMBEDDING_MAX_BATCH: usize = 10;
    pub const EMBEDDING_CONCURRENCY: usize = 4;
    pub const CHECKPOINT_EVERY: usize = 5;

    pub const CHAT_CONCURRENCY: usize = 4;
    pub const CHAT_MAX_TOKENS: u32 = 260;
    pub const CATEGORY_MAX_TOKENS: u32 = 1800;

    pub const MIN_CLUSTER_SIZE: usize = 10;
    pub const RANDOM_SEED: u64 = 42;
    pub const TARGET_CLUSTERS: i64 = -1;
    pub const JOIN_THRESHOLD: f32 = 0.75;

    pub const ORPHAN_THRESHOLD: f32 = 0.35;
    pub const L1_MIN: usize = 6;
    pub const L1_MAX: usize = 24;

    pub const HTTP_TIMEOUT_SECS: u64 = 120;
    pub const MAX_RETRIES: u32 = 2;
    pub const BASE_DELAY_MS: u64 = 800;
    pub const MAX_DELAY_MS: u64 = 6000;
}

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root containing `researchers.index.json` and `profiles/`
    #[serde(default)]
    pub researchers_root: Option<PathBuf>,

    /// Output root for taxonomy files, caches and API logs
    #[serde(default)]
    pub out_dir: Option<PathBuf>,

    /// OpenAI-compatible API base URL
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub embedding_model: Option<String>,

    #[serde(default)]
    pub chat_model: Option<String>,

    /// API key (environment variable preferred)
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub embedding: EmbeddingSection,

    #[serde(default)]
    pub chat: ChatSection,

    #[serde(default)]
    pub clustering: ClusteringSection,

    #[serde(default)]
    pub hierarchy: HierarchySection,

    #[serde(default)]
    pub http: HttpSection,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddingSection {
    /// Requested items per embedding request
    pub batch_size: Option<usize>,
    /// Hard per-request limit imposed by the embedding service
    pub max_batch: Option<usize>,
    pub concurrency: Option<usize>,
    /// Persist the cache every N completed batches
    pub checkpoint_every: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatSection {
    pub concurrency: Option<usize>,
    pub max_tokens: Option<u32>,
    /// Extended reasoning on the first attempt of each label request
    pub enable_thinking: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusteringSection {
    pub min_cluster_size: Option<usize>,
    pub random_seed: Option<u64>,
    /// Negative = derive from corpus size, zero = unbounded, positive = cap
    pub target_clusters: Option<i64>,
    /// Minimum cosine similarity for a record to join an existing cluster
    pub join_threshold: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HierarchySection {
    /// Best-match similarity below which a label is reported as an orphan
    pub orphan_threshold: Option<f32>,
    /// Explicit category mapping file (defaults to `<out>/categories.<axis>.json`)
    pub categories_file: Option<PathBuf>,
    /// Ask the completion service for a category list when no file exists
    pub propose_categories: Option<bool>,
    pub l1_min: Option<usize>,
    pub l1_max: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpSection {
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}

/// Locate the config file following the documented priority order.
///
/// Returns `None` when no candidate exists.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Working directory
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return Some(local);
    }

    // Priority 4: Platform config directory
    dirs::config_dir()
        .map(|d| d.join("dirtax").join(CONFIG_FILE_NAME))
        .filter(|p| p.exists())
}

/// Load the TOML config, falling back to defaults when the file is absent.
pub fn load_toml_config(path: Option<&Path>) -> Result<TomlConfig> {
    let Some(path) = path else {
        warn!("No config file found, using built-in defaults");
        return Ok(TomlConfig::default());
    };

    match std::fs::read_to_string(path) {
        Ok(content) => {
            let config: TomlConfig = toml::from_str(&content).map_err(|e| {
                Error::Config(format!("Parse TOML {} failed: {}", path.display(), e))
            })?;
            info!("Loaded config from {}", path.display());
            Ok(config)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(
                "Config file {} not found, using built-in defaults",
                path.display()
            );
            Ok(TomlConfig::default())
        }
        Err(e) => Err(Error::Config(format!(
            "Read TOML {} failed: {}",
            path.display(),
            e
        ))),
    }
}

/// Parse a boolean environment flag.
///
/// Accepts `1/true/yes/on` and `0/false/no/off` (case-insensitive); any
/// other value yields `None` so the next configuration tier applies.
pub fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_bool_flag() {
        assert_eq!(parse_bool_flag("TRUE"), Some(true));
        assert_eq!(parse_bool_flag(" on "), Some(true));
        assert_eq!(parse_bool_flag("0"), Some(false));
        assert_eq!(parse_bool_flag("Off"), Some(false));
        assert_eq!(parse_bool_flag("maybe"), None);
        assert_eq!(parse_bool_flag(""), None);
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_toml_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert!(config.base_url.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_none_returns_defaults() {
        let config = load_toml_config(None).unwrap();
        assert!(config.embedding.batch_size.is_none());
    }

    #[test]
    fn test_load_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dirtax.toml");
        std::fs::write(
            &path,
            r#"
chat_model = "qwen-max"

[logging]
level = "debug"

[embedding]
batch_size = 25
checkpoint_every = 2

[clustering]
target_clusters = 0
"#,
        )
        .unwrap();

        let config = load_toml_config(Some(&path)).unwrap();
        assert_eq!(config.chat_model.as_deref(), Some("qwen-max"));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.embedding.batch_size, Some(25));
        assert_eq!(config.embedding.checkpoint_every, Some(2));
        assert_eq!(config.clustering.target_clusters, Some(0));
        assert!(config.http.timeout_secs.is_none());
    }

    #[test]
    fn test_load_invalid_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dirtax.toml");
        std::fs::write(&path, "[embedding\nbatch_size = ").unwrap();
        assert!(matches!(
            load_toml_config(Some(&path)),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_resolve_config_path_cli_wins() {
        let explicit = PathBuf::from("/tmp/explicit-dirtax.toml");
        assert_eq!(resolve_config_path(Some(&explicit)), Some(explicit));
    }
}

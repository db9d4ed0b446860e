//! Direction taxonomy builder (dirtax-build) - Main entry point
//!
//! Builds `taxonomy.json` for the problem and/or method axis and prints a
//! one-line JSON summary on success.

use anyhow::{Context, Result};
use clap::Parser;
use dirtax_builder::clustering::CentroidClusterer;
use dirtax_builder::config::{BuildConfig, CliOverrides};
use dirtax_builder::models::{Axis, AxisSelection};
use dirtax_builder::services::{ApiLogger, ChatClient, EmbeddingClient, HttpSettings};
use dirtax_builder::workflow::{self, storage::API_LOG_DIR, Services};
use dirtax_common::config::{load_toml_config, resolve_config_path};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for dirtax-build
#[derive(Parser, Debug)]
#[command(name = "dirtax-build")]
#[command(about = "Build L1/L2 taxonomies from problem and method directions")]
#[command(version)]
struct Args {
    /// Config file (overrides DIRTAX_CONFIG and default locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Which axis to process
    #[arg(long, value_enum, env = "DIRTAX_AXIS")]
    axis: Option<AxisSelection>,

    /// Root containing researchers.index.json and profiles/
    #[arg(long, env = "DIRTAX_RESEARCHERS_ROOT")]
    researchers_root: Option<PathBuf>,

    /// Output root for taxonomy files, caches and API logs
    #[arg(long, env = "DIRTAX_OUT_DIR")]
    out_dir: Option<PathBuf>,

    /// API key for the embedding and completion services
    #[arg(long)]
    api_key: Option<String>,

    #[arg(long)]
    base_url: Option<String>,

    #[arg(long)]
    embedding_model: Option<String>,

    #[arg(long)]
    chat_model: Option<String>,

    #[arg(long)]
    embedding_batch_size: Option<usize>,

    #[arg(long)]
    embedding_concurrency: Option<usize>,

    #[arg(long)]
    chat_concurrency: Option<usize>,

    #[arg(long)]
    min_cluster_size: Option<usize>,

    #[arg(long)]
    random_seed: Option<u64>,

    /// Negative derives a cap from corpus size, zero is unbounded
    #[arg(long, allow_hyphen_values = true)]
    target_clusters: Option<i64>,

    /// Category mapping file; `{axis}` is replaced by the axis name
    #[arg(long)]
    categories_file: Option<PathBuf>,

    /// Ask the completion service for categories when no file exists
    #[arg(long)]
    propose_categories: bool,
}

impl Args {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            axis: self.axis,
            researchers_root: self.researchers_root.clone(),
            out_dir: self.out_dir.clone(),
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            embedding_model: self.embedding_model.clone(),
            chat_model: self.chat_model.clone(),
            embedding_batch_size: self.embedding_batch_size,
            embedding_concurrency: self.embedding_concurrency,
            chat_concurrency: self.chat_concurrency,
            min_cluster_size: self.min_cluster_size,
            random_seed: self.random_seed,
            target_clusters: self.target_clusters,
            categories_file: self.categories_file.clone(),
            propose_categories: self.propose_categories,
        }
    }
}

fn build_services(config: &BuildConfig, axis: Axis) -> Result<Services> {
    let logger = ApiLogger::new(config.out_dir.join(API_LOG_DIR).join(axis.as_str()));
    let http = HttpSettings {
        base_url: config.base_url.clone(),
        api_key: config.api_key.clone(),
        timeout: config.http_timeout,
    };
    let embedder = EmbeddingClient::new(
        &http,
        config.embedding_model.clone(),
        config.embedding_max_batch,
        Some(logger.clone()),
    )
    .context("Failed to build embedding client")?;
    let chat = ChatClient::new(&http, config.chat_model.clone(), Some(logger))
        .context("Failed to build chat client")?;

    Ok(Services {
        embedder: Box::new(embedder),
        chat: Box::new(chat),
        clusterer: Box::new(CentroidClusterer::new(config.clustering)),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref());
    let toml_config = load_toml_config(config_path.as_deref())?;

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&toml_config.logging.level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = BuildConfig::resolve(&args.overrides(), &toml_config)?;
    info!(
        researchers_root = %config.researchers_root.display(),
        out_dir = %config.out_dir.display(),
        embedding_model = %config.embedding_model,
        chat_model = %config.chat_model,
        "Starting taxonomy build"
    );

    let summary = workflow::run(&config, |axis| build_services(&config, axis)).await?;

    println!("{}", serde_json::json!({ "ok": true, "summary": summary }));
    Ok(())
}

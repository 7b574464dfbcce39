//! rtpf-load - build the Redis index from KGX JSON lines
//!
//! Usage:
//!   rtpf-load nodes.jsonl edges.jsonl --biolink-model biolink-model.yaml \
//!     [--redis-host HOST] [--redis-port PORT] [--redis-password PW]
//!
//! The store is expected to be empty; re-running appends to existing
//! adjacency lists.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use rtpf::config::{self, LoadConfig};
use rtpf::loader::load_files;
use rtpf::store::RedisStore;
use rtpf::taxonomy::BiolinkModel;
use rtpf::ClosureEngine;

/// Load KGX jsonl files into Redis
#[derive(Parser, Debug)]
#[command(name = "rtpf-load", version)]
struct Args {
    /// KGX jsonl node file
    nodes: PathBuf,

    /// KGX jsonl edge file
    edges: PathBuf,

    /// JSON config file; flags below override its fields
    #[arg(long)]
    config: Option<PathBuf>,

    /// Biolink model YAML
    #[arg(long)]
    biolink_model: Option<PathBuf>,

    #[arg(long)]
    redis_host: Option<String>,

    #[arg(long)]
    redis_port: Option<u16>,

    #[arg(long)]
    redis_password: Option<String>,

    /// Records between write flushes
    #[arg(long)]
    flush_interval: Option<usize>,

    /// Records between progress lines
    #[arg(long)]
    progress_interval: Option<usize>,
}

impl Args {
    fn load_config(&self) -> anyhow::Result<LoadConfig> {
        let mut cfg: LoadConfig = match &self.config {
            Some(path) => config::from_file(path)
                .with_context(|| format!("reading config {}", path.display()))?,
            None => LoadConfig::default(),
        };
        if let Some(model) = &self.biolink_model {
            cfg.biolink_model = Some(model.clone());
        }
        if let Some(host) = &self.redis_host {
            cfg.store.host = host.clone();
        }
        if let Some(port) = self.redis_port {
            cfg.store.port = port;
        }
        if let Some(password) = &self.redis_password {
            cfg.store.password = Some(password.clone());
        }
        if let Some(n) = self.flush_interval {
            cfg.flush_interval = n;
        }
        if let Some(n) = self.progress_interval {
            cfg.progress_interval = n;
        }
        Ok(cfg)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let cfg = args.load_config()?;

    let Some(model_path) = &cfg.biolink_model else {
        bail!("--biolink-model is required (or biolink_model in the config file)");
    };
    let model = BiolinkModel::from_path(model_path)
        .with_context(|| format!("reading biolink model {}", model_path.display()))?;
    let closures = ClosureEngine::build(&model).context("building closures")?;

    let store = RedisStore::connect(&cfg.store).await.context("connecting to redis")?;

    let start = Instant::now();
    let stats = load_files(&store, &closures, &args.nodes, &args.edges, &cfg)
        .await
        .context("loading")?;

    tracing::info!(
        nodes = stats.nodes,
        edges = stats.edges,
        subclass_edges = stats.subclass_edges,
        skipped_edges = stats.skipped_edges,
        categories = stats.categories,
        signatures = stats.signatures,
        elapsed_secs = start.elapsed().as_secs(),
        "load complete"
    );
    Ok(())
}

//! Chunkdex search node
//!
//! Run with: cargo run --bin chunkdex-node -- --config node.toml
//!
//! Every setting has a default, so the config file is optional. `RUST_LOG`
//! overrides `log_filter` from the config.

use std::path::PathBuf;
use std::sync::Arc;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use chunkdex::core::config::Config;
use chunkdex::core::entity::NoEntitySource;
use chunkdex::core::node::SearchNode;
use chunkdex::storage::fs_store::FsChunkStore;

#[derive(Parser)]
#[command(name = "chunkdex-node")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Full-text search node over a chunked file store")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides storage_path
    #[arg(long)]
    storage_path: Option<PathBuf>,

    /// Additional peer, host:port (repeatable)
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Remove write locks left by a node that crashed
    #[arg(long)]
    force_unlock: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(path) = args.storage_path {
        config.storage_path = path;
    }
    config.peer_addresses.extend(args.peers);
    config.force_unlock |= args.force_unlock;
    config.validate()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting chunkdex node v{}", env!("CARGO_PKG_VERSION"));

    let store = Arc::new(FsChunkStore::open(&config.storage_path)?);
    let node = SearchNode::start(config, store, Arc::new(NoEntitySource))?;
    if let Some(addr) = node.cluster_addr() {
        tracing::info!(address = %addr, peers = node.peers().len(), "replication enabled");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    tokio::task::spawn_blocking(move || node.shutdown()).await??;
    Ok(())
}

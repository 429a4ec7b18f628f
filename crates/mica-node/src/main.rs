//! The mica blockchain daemon.

use anyhow::Result;
use clap::Parser;
use mica_chain::{Chain, ChainConfig};
use mica_consensus::Checkpoints;
use mica_sync::{BlockRequest, PeerDirectory, SyncDriver};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::NodeConfig;

/// mica blockchain node.
#[derive(Parser, Debug)]
#[command(name = "mica-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "mica.toml")]
    config: PathBuf,

    /// Data directory (overrides the config file).
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Disable fast-sync mode (fsync on every commit).
    #[arg(long)]
    no_fast_sync: bool,

    /// Log filter, e.g. `info` or `mica_chain=debug`.
    #[arg(long, default_value = "info")]
    log: String,
}

/// Stand-in peer surface until the gossip layer is wired in. Every request
/// is reported undeliverable, which the driver tolerates.
struct NoPeers;

impl PeerDirectory for NoPeers {
    fn request_block(&self, _request: &BlockRequest) -> bool {
        false
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = NodeConfig::load(&args.config)?;
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if args.no_fast_sync {
        config.fast_sync = false;
    }

    info!(
        network = mica_consensus::params::NETWORK_NAME,
        data_dir = %config.data_dir.display(),
        "starting node"
    );

    let chain = Arc::new(Chain::open(ChainConfig {
        data_dir: config.data_dir.clone(),
        fast_sync: config.fast_sync,
        checkpoints: Checkpoints::mainnet(),
    })?);

    let driver = SyncDriver::new(
        Arc::clone(&chain),
        Arc::clone(chain.queue()),
        Arc::new(NoPeers),
    );
    let sync_handle = driver.spawn();

    if config.network.known_peers.is_empty() {
        warn!("no known peers configured; running standalone");
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    sync_handle.stop();
    chain.close()?;
    info!("mica daemon shutdown complete, bye");
    Ok(())
}

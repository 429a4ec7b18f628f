//! Node configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Directory holding the chain database.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Defer fsync during sync; flush every minute and on shutdown.
    #[serde(default = "default_true")]
    pub fast_sync: bool,
    /// Network configuration.
    #[serde(default)]
    pub network: NetworkConfig,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_true() -> bool {
    true
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            fast_sync: true,
            network: NetworkConfig::default(),
        }
    }
}

/// P2P settings, consumed by the gossip layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// P2P bind address.
    pub bind_address: String,
    /// Peers to dial on startup.
    pub known_peers: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:24816".to_string(),
            known_peers: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Load from a TOML file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }
}

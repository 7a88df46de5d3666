//! `vault.toml` repository configuration.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use vault_object::ChunkConfig;
use vault_store::FileStoreConfig;

pub const CONFIG_FILE: &str = "vault.toml";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub store: StoreSection,
    pub chunking: ChunkingSection,
    pub server: ServerSection,
    pub remote: RemoteSection,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub sync_on_commit: bool,
    pub verify_reads: bool,
}

impl Default for StoreSection {
    fn default() -> Self {
        let defaults = FileStoreConfig::default();
        Self {
            sync_on_commit: defaults.sync_on_commit,
            verify_reads: defaults.verify_reads,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSection {
    pub min_size: usize,
    pub avg_size: usize,
    pub max_size: usize,
}

impl Default for ChunkingSection {
    fn default() -> Self {
        let defaults = ChunkConfig::default();
        Self {
            min_size: defaults.min_size,
            avg_size: defaults.avg_size,
            max_size: defaults.max_size,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind_addr: SocketAddr,
    pub max_connections: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 9419)),
            max_connections: 64,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSection {
    pub addr: Option<String>,
    pub timeout_secs: u64,
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            addr: None,
            timeout_secs: 60,
        }
    }
}

impl VaultConfig {
    /// Read `vault.toml` from the repository root, or the defaults if absent.
    pub fn load(repo: &Path) -> anyhow::Result<Self> {
        let path = repo.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Write the configuration unless a file is already there.
    pub fn write_if_missing(&self, repo: &Path) -> anyhow::Result<bool> {
        let path = repo.join(CONFIG_FILE);
        if path.exists() {
            return Ok(false);
        }
        let text = toml::to_string_pretty(self)?;
        std::fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
        Ok(true)
    }

    pub fn store_config(&self) -> FileStoreConfig {
        FileStoreConfig {
            sync_on_commit: self.store.sync_on_commit,
            verify_reads: self.store.verify_reads,
        }
    }

    pub fn chunk_config(&self) -> anyhow::Result<ChunkConfig> {
        let config = ChunkConfig {
            min_size: self.chunking.min_size,
            avg_size: self.chunking.avg_size,
            max_size: self.chunking.max_size,
        };
        config.validate().context("invalid [chunking] section")?;
        Ok(config)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote.timeout_secs)
    }
}

//! surfsync configuration file parsing (surfsync.toml)

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chunker::{ChunkConfig, DEFAULT_BLOCK_SIZE};
use crate::error::{Error, Result};

/// Config file name looked up in the working directory
pub const CONFIG_FILE: &str = "surfsync.toml";

/// Top-level config file layout
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct SurfsyncConfig {
    pub client: ClientConfig,
    pub server: ServerConfig,
}

/// Settings used by the sync client
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Metadata store address
    pub meta_addr: String,
    /// Block size used for chunking; every client must agree on it
    pub block_size: usize,
    /// Deadline for each remote call
    pub timeout_ms: u64,
    /// Ask shards which blocks they lack before uploading
    pub skip_present_blocks: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            meta_addr: "127.0.0.1:8080".to_string(),
            block_size: DEFAULT_BLOCK_SIZE,
            timeout_ms: 1000,
            skip_present_blocks: true,
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// # Errors
    /// Returns `Error::Config` for an invalid block size
    pub fn chunk_config(&self) -> Result<ChunkConfig> {
        ChunkConfig::new(self.block_size)
    }
}

/// Settings used by `surfsync-server`
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on
    pub listen: Option<String>,
    /// Block store shard addresses (metadata server only)
    pub block_stores: Vec<String>,
    /// Directory for durable block storage (block server only)
    pub data_dir: Option<PathBuf>,
}

impl SurfsyncConfig {
    /// Load config from an explicit path, or from `surfsync.toml` in the
    /// working directory if it exists.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or if an
    /// explicit path does not exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = PathBuf::from(CONFIG_FILE);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };

        let content = std::fs::read_to_string(&config_path)?;
        Self::parse(&content)
    }

    /// # Errors
    /// Returns `Error::Config` on invalid TOML or invalid values
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.client.chunk_config()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[client]
meta_addr = "10.0.0.1:9000"
block_size = 1024
timeout_ms = 250
skip_present_blocks = false

[server]
listen = "0.0.0.0:9000"
block_stores = ["10.0.0.2:9001", "10.0.0.3:9001"]
data_dir = "/var/lib/surfsync"
"#;

        let config = SurfsyncConfig::parse(toml).unwrap();
        assert_eq!(config.client.meta_addr, "10.0.0.1:9000");
        assert_eq!(config.client.block_size, 1024);
        assert_eq!(config.client.timeout(), Duration::from_millis(250));
        assert!(!config.client.skip_present_blocks);
        assert_eq!(config.server.listen.as_deref(), Some("0.0.0.0:9000"));
        assert_eq!(config.server.block_stores.len(), 2);
        assert_eq!(
            config.server.data_dir,
            Some(PathBuf::from("/var/lib/surfsync"))
        );
    }

    #[test]
    fn test_parse_empty_config() {
        let config = SurfsyncConfig::parse("").unwrap();
        assert_eq!(config.client.block_size, DEFAULT_BLOCK_SIZE);
        assert_eq!(config.client.meta_addr, "127.0.0.1:8080");
        assert!(config.client.skip_present_blocks);
        assert!(config.server.block_stores.is_empty());
    }

    #[test]
    fn test_zero_block_size_rejected() {
        let result = SurfsyncConfig::parse("[client]\nblock_size = 0\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_block_size_above_frame_limit_rejected() {
        let result = SurfsyncConfig::parse("[client]\nblock_size = 134217728\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[client]\ntimeout_ms = 5000\n").unwrap();

        let config = SurfsyncConfig::load(Some(&path)).unwrap();
        assert_eq!(config.client.timeout_ms, 5000);
        assert!(SurfsyncConfig::load(Some(&dir.path().join("missing.toml"))).is_err());
    }
}

// quadlog-core/src/config.rs
// TOML configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::codec::CodecKind;
use crate::coordinator::{CoordinatorOptions, DEFAULT_MAX_BATCH_SIZE};
use crate::error::{QuadLogError, Result};
use crate::log::{ShardLayout, DEFAULT_CHAPTERS_PER_VOLUME, DEFAULT_CHAPTER_CAPACITY};

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "QUADLOG_CONFIG";

pub const DEFAULT_CONFIG_FILE: &str = "quadlog.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuadLogConfig {
    /// Live storage directory
    pub data_dir: PathBuf,
    /// Commit log root
    pub log_dir: PathBuf,
    pub codec: CodecKind,
    pub chapter_capacity: u64,
    pub chapters_per_volume: u64,
    pub max_batch_size: usize,
}

impl Default for QuadLogConfig {
    fn default() -> Self {
        QuadLogConfig {
            data_dir: PathBuf::from("data"),
            log_dir: PathBuf::from("txlog"),
            codec: CodecKind::Binary,
            chapter_capacity: DEFAULT_CHAPTER_CAPACITY,
            chapters_per_volume: DEFAULT_CHAPTERS_PER_VOLUME,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

impl QuadLogConfig {
    /// Both directories under `root`, everything else default
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        QuadLogConfig {
            data_dir: root.join("data"),
            log_dir: root.join("txlog"),
            ..QuadLogConfig::default()
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: QuadLogConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            QuadLogError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load the file named by `QUADLOG_CONFIG` (default `quadlog.toml`),
    /// falling back to defaults when it does not exist
    pub fn from_env() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        if Path::new(&path).exists() {
            Self::load(&path)
        } else {
            warn!(path = %path, "Config file not found, using defaults");
            Ok(QuadLogConfig::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.shard_layout().validate()?;
        if self.max_batch_size == 0 {
            return Err(QuadLogError::Config(
                "max_batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn shard_layout(&self) -> ShardLayout {
        ShardLayout {
            chapter_capacity: self.chapter_capacity,
            chapters_per_volume: self.chapters_per_volume,
        }
    }

    pub fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions {
            codec: self.codec,
            max_batch_size: self.max_batch_size,
        }
    }
}

//! Engine configuration
//!
//! Loaded from `~/.config/chartdex/config.yaml` when present; every field
//! has a default, so an empty or missing file is valid.

use chartdex_repo::DEFAULT_MAX_INDEX_SIZE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::credentials::SecretMode;
use crate::error::{KubeError, Result};
use crate::retry::RetryPolicy;
use crate::sequencer::SequencerConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Who owns repository secrets
    pub secret_mode: SecretMode,

    /// Global bound on concurrently running index fetches
    pub max_concurrent_fetches: usize,

    /// Per-repository event queue bound
    pub lane_queue_capacity: usize,

    /// Fetch timeout when the repository does not set one
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,

    /// Reject indexes larger than this many bytes (256 MiB by default)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_index_size: Option<u64>,

    /// Conflict retries for repository updates
    pub retry: RetryPolicy,

    /// SQLite index cache location; the user cache directory when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            secret_mode: SecretMode::default(),
            max_concurrent_fetches: 10,
            lane_queue_capacity: 64,
            fetch_timeout: Duration::from_secs(120),
            max_index_size: Some(DEFAULT_MAX_INDEX_SIZE),
            retry: RetryPolicy::default(),
            cache_path: None,
        }
    }
}

impl EngineConfig {
    /// Load from the default location, falling back to defaults if absent
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// Get default configuration path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            KubeError::InvalidConfig("could not determine config directory".to_string())
        })?;
        Ok(config_dir.join("chartdex").join("config.yaml"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_fetches == 0 {
            return Err(KubeError::InvalidConfig(
                "maxConcurrentFetches must be at least 1".to_string(),
            ));
        }
        if self.lane_queue_capacity == 0 {
            return Err(KubeError::InvalidConfig(
                "laneQueueCapacity must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(KubeError::InvalidConfig(
                "retry.maxAttempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn sequencer(&self) -> SequencerConfig {
        SequencerConfig {
            max_concurrent_fetches: self.max_concurrent_fetches,
            lane_queue_capacity: self.lane_queue_capacity,
            fetch_timeout: self.fetch_timeout,
            max_index_size: self.max_index_size,
            cleanup_retry: self.retry.clone(),
        }
    }
}

//! Simulator configuration, loaded from YAML.
//!
//! ```yaml
//! devices: 3
//! taps: 2
//! loss_rate: 0.1
//! sync:
//!   max_peers: 4
//!   effect_lifetime_ms: 250
//! ```

use ar_sync_core::SyncConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Number of simulated devices
    pub devices: usize,
    /// Effects placed by the first device
    pub taps: usize,
    /// Probability that a best-effort send is lost
    pub loss_rate: f64,
    pub sync: SyncConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            devices: 3,
            taps: 2,
            loss_rate: 0.0,
            sync: SyncConfig::default(),
        }
    }
}

impl SimConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.devices == 0 {
            return Err(ConfigError::Invalid("devices must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.loss_rate) {
            return Err(ConfigError::Invalid(format!(
                "loss_rate must be between 0 and 1, got {}",
                self.loss_rate
            )));
        }
        if self.sync.max_peers == 0 {
            return Err(ConfigError::Invalid("sync.max_peers must be at least 1".into()));
        }
        Ok(())
    }
}

//! Server configuration

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lexigrid_protocol::CheckpointPolicy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("min_players ({min}) must be between 2 and max_players ({max})")]
    PlayerBounds { min: u8, max: u8 },
}

/// Server configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the server
    pub bind_address: SocketAddr,
    /// Players needed before the session starts
    pub min_players: u8,
    /// Maximum players allowed
    pub max_players: u8,
    /// Seed for the tile bag; random when unset
    pub bag_seed: Option<u64>,
    /// Word list, one word per line
    pub dictionary: Option<PathBuf>,
    /// Checkpoint policy announced to participants at session start
    pub checkpoint_policy: CheckpointPolicy,
    /// Messages allowed per client per window
    pub rate_limit_messages: u32,
    /// Rate limit window in milliseconds
    pub rate_limit_window_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 7777)),
            min_players: 2,
            max_players: 4,
            bag_seed: None,
            dictionary: None,
            checkpoint_policy: CheckpointPolicy::default(),
            rate_limit_messages: 60,
            rate_limit_window_ms: 1000,
        }
    }
}

impl ServerConfig {
    /// Load a YAML config; missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_players < 2 || self.min_players > self.max_players {
            return Err(ConfigError::PlayerBounds {
                min: self.min_players,
                max: self.max_players,
            });
        }
        Ok(())
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }
}

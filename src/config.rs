//! Local configuration.
//!
//! Handles loading and saving `~/.kubegate/config.yaml`. The file holds the
//! account token (generated on first use), plus optional defaults for the
//! schema version and offline mode.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Environment variable overriding the stored token.
pub const TOKEN_ENV: &str = "KUBEGATE_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalConfig {
    #[serde(default)]
    pub token: String,

    /// Schema version used when `--schema-version` is not given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,

    /// Never contact the policy service
    #[serde(default)]
    pub offline: bool,
}

pub trait LocalConfigStore: Send + Sync {
    fn get_local_configuration(&self) -> Result<LocalConfig, ConfigError>;
}

/// Store backed by a YAML file.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileConfigStore { path: path.into() }
    }

    /// Store at the default location under the home directory.
    pub fn default_location() -> Self {
        Self::new(Self::config_dir().join("config.yaml"))
    }

    pub fn config_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".kubegate")
    }

    fn load(&self) -> Result<LocalConfig, ConfigError> {
        if !self.path.exists() {
            return Ok(LocalConfig::default());
        }
        let content = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Read {
            path: self.path.clone(),
            source,
        })?;
        if content.trim().is_empty() {
            return Ok(LocalConfig::default());
        }
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }

    fn save(&self, config: &LocalConfig) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let content = serde_yaml::to_string(config).map_err(|e| ConfigError::Parse {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        std::fs::write(&self.path, content).map_err(write_err)
    }
}

impl Default for FileConfigStore {
    fn default() -> Self {
        Self::default_location()
    }
}

impl LocalConfigStore for FileConfigStore {
    fn get_local_configuration(&self) -> Result<LocalConfig, ConfigError> {
        let mut config = self.load()?;

        if config.token.is_empty() {
            config.token = Uuid::new_v4().simple().to_string();
            self.save(&config)?;
            info!(path = %self.path.display(), "generated new account token");
        }

        if let Ok(token) = std::env::var(TOKEN_ENV) {
            if !token.is_empty() {
                debug!("token overridden from environment");
                config.token = token;
            }
        }

        Ok(config)
    }
}

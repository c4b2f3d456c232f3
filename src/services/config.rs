//! Application configuration.
//!
//! Settings load from a TOML file in the platform config directory, with
//! `BARAHOLKA_`-prefixed environment variables layered on top. A missing or
//! broken file falls back to defaults so the client always starts.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{BaraholkaError, Result};

/// Top-level configuration tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendSettings,
    pub chat: ChatSettings,
    pub fanout: FanoutSettings,
}

/// Connection settings for the hosted backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub base_url: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            api_key: String::new(),
            timeout_secs: 30,
        }
    }
}

/// Messaging behaviour knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    /// Seconds a typing indicator stays live without a fresh ping.
    pub typing_ttl_secs: u64,
    /// Maximum message content size in bytes.
    pub max_message_size: usize,
    /// Emit a UI event when a message arrives from another user.
    pub notify_on_message: bool,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            typing_ttl_secs: 4,
            max_message_size: 4096,
            notify_on_message: true,
        }
    }
}

/// Notification fan-out retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutSettings {
    pub max_retries: u32,
}

impl Default for FanoutSettings {
    fn default() -> Self {
        Self { max_retries: 5 }
    }
}

/// Loads, caches, and persists the application config.
pub struct ConfigService {
    config: AppConfig,
    path: PathBuf,
}

impl ConfigService {
    pub fn new() -> Self {
        Self::from_path(default_config_path())
    }

    pub fn from_path(path: PathBuf) -> Self {
        let config = match load_config(&path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Config load failed ({}), using defaults", e);
                AppConfig::default()
            }
        };
        Self { config, path }
    }

    pub fn get(&self) -> AppConfig {
        self.config.clone()
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Replace the active config and write it to disk.
    pub fn save(&mut self, config: AppConfig) -> Result<()> {
        let serialized = toml::to_string_pretty(&config)
            .map_err(|e| BaraholkaError::ConfigError(format!("Failed to serialize: {}", e)))?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| BaraholkaError::ConfigError(format!("Failed to create dir: {}", e)))?;
        }
        fs::write(&self.path, serialized)
            .map_err(|e| BaraholkaError::ConfigError(format!("Failed to write config: {}", e)))?;
        self.config = config;
        log::info!("Config saved to {}", self.path.display());
        Ok(())
    }
}

impl Default for ConfigService {
    fn default() -> Self {
        Self::new()
    }
}

fn load_config(path: &PathBuf) -> Result<AppConfig> {
    config::Config::builder()
        .add_source(config::File::from(path.clone()).required(false))
        .add_source(config::Environment::with_prefix("BARAHOLKA").separator("__"))
        .build()
        .map_err(|e| BaraholkaError::ConfigError(e.to_string()))?
        .try_deserialize()
        .map_err(|e| BaraholkaError::ConfigError(e.to_string()))
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("baraholka"))
        .unwrap_or_else(|| PathBuf::from(".baraholka"))
        .join("config.toml")
}

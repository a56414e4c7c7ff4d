//! Configuration management module.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::cache::DEFAULT_REFRESH_SECS;

/// Configuration load result.
#[derive(Debug)]
pub enum ConfigLoadResult {
    /// Config loaded successfully.
    Loaded(AppConfig),
    /// Config file missing (run on defaults).
    Missing,
    /// Config file exists but invalid.
    Invalid(ConfigError),
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Validation failed: {0}")]
    Validation(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub devices: DevicesConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Listener settings, one TCP port per protocol family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_address: String,
    /// GT06 listener port (default: 5023).
    #[serde(default = "default_gt06_port")]
    pub gt06_port: u16,
    /// Noran listener port (default: 5024).
    #[serde(default = "default_noran_port")]
    pub noran_port: u16,
}

fn default_gt06_port() -> u16 {
    5023
}

fn default_noran_port() -> u16 {
    5024
}

/// Device identity cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevicesConfig {
    /// Snapshot refresh delay in seconds (default: 300).
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,
}

fn default_refresh_secs() -> u64 {
    DEFAULT_REFRESH_SECS
}

/// Logging preferences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Write a daily-rolling log file instead of stderr.
    #[serde(default)]
    pub file_enabled: bool,
    /// Directory for rolling log files.
    #[serde(default = "default_log_dir")]
    pub dir: String,
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl AppConfig {
    /// Get config file path (same directory as executable).
    pub fn default_path() -> PathBuf {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }

    /// Attempt to load config with detailed result.
    pub fn try_load(path: &Path) -> ConfigLoadResult {
        if !path.exists() {
            return ConfigLoadResult::Missing;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<AppConfig>(&content) {
                Ok(config) => match config.validate() {
                    Ok(()) => ConfigLoadResult::Loaded(config),
                    Err(e) => ConfigLoadResult::Invalid(e),
                },
                Err(e) => ConfigLoadResult::Invalid(ConfigError::Parse(e)),
            },
            Err(e) => ConfigLoadResult::Invalid(ConfigError::Read(e)),
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind_address.trim().is_empty() {
            return Err(ConfigError::Validation("Bind address cannot be empty".to_string()));
        }
        if self.server.gt06_port == 0 {
            return Err(ConfigError::Validation(
                "GT06 port must be greater than 0".to_string(),
            ));
        }
        if self.server.noran_port == 0 {
            return Err(ConfigError::Validation(
                "Noran port must be greater than 0".to_string(),
            ));
        }
        if self.server.gt06_port == self.server.noran_port {
            return Err(ConfigError::Validation(
                "Protocol listeners cannot share a port".to_string(),
            ));
        }
        if self.devices.refresh_secs < 1 {
            return Err(ConfigError::Validation(
                "Device refresh delay must be at least 1 second".to_string(),
            ));
        }
        if self.log.file_enabled && self.log.dir.trim().is_empty() {
            return Err(ConfigError::Validation(
                "Log directory cannot be empty when file logging is enabled".to_string(),
            ));
        }
        Ok(())
    }

    /// Save configuration to file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            gt06_port: default_gt06_port(),
            noran_port: default_noran_port(),
        }
    }
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            refresh_secs: default_refresh_secs(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file_enabled: false,
            dir: default_log_dir(),
        }
    }
}

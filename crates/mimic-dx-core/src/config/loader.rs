//! Configuration loader for YAML files and environment overrides

use crate::config::types::*;
use crate::errors::SessionError;
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;

pub const ENV_SERVER_URL: &str = "MIMIC_DX_SERVER_URL";
pub const ENV_HISTORY_DIR: &str = "MIMIC_DX_HISTORY_DIR";
pub const ENV_LOG_LEVEL: &str = "MIMIC_DX_LOG_LEVEL";

const LOG_LEVELS: &[&str] = &["off", "error", "warn", "info", "debug", "trace"];

/// Configuration loader with environment resolution
pub struct ConfigLoader;

impl ConfigLoader {
    /// `<config dir>/mimic-dx/config.yaml`, when the platform has a config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("mimic-dx").join("config.yaml"))
    }

    /// Load `path` if given, else the default file if it exists, else defaults. Environment
    /// overrides are applied last, then the result is validated.
    pub async fn load(path: Option<&Path>) -> Result<DxConfig, SessionError> {
        let mut config = match path {
            Some(path) => Self::from_file(path).await?,
            None => match Self::default_path() {
                Some(default) if fs::try_exists(&default).await.unwrap_or(false) => {
                    Self::from_file(&default).await?
                }
                _ => {
                    log::debug!("No configuration file found, using defaults");
                    DxConfig::default()
                }
            },
        };

        Self::apply_overrides(&mut config, |key| env::var(key).ok());
        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<DxConfig, SessionError> {
        let path = path.as_ref();

        let content = fs::read_to_string(path).await.map_err(|e| {
            SessionError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        log::info!("Loaded configuration from {}", path.display());
        Self::from_str(&content)
    }

    /// Parse a YAML document. An empty document yields the defaults.
    pub fn from_str(content: &str) -> Result<DxConfig, SessionError> {
        if content.trim().is_empty() {
            return Ok(DxConfig::default());
        }
        serde_yaml::from_str(content)
            .map_err(|e| SessionError::Config(format!("Failed to parse YAML config: {}", e)))
    }

    /// Apply `MIMIC_DX_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(config: &mut DxConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_SERVER_URL).filter(|v| !v.is_empty()) {
            config.server.base_url = url;
        }
        if let Some(dir) = lookup(ENV_HISTORY_DIR).filter(|v| !v.is_empty()) {
            config.storage.path = Some(PathBuf::from(dir));
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|v| !v.is_empty()) {
            config.logging.level = level;
        }
    }

    pub fn validate(config: &DxConfig) -> Result<(), SessionError> {
        let url = config.server.base_url.trim();
        if url.is_empty() {
            return Err(SessionError::Config(
                "server.base_url must not be empty".to_string(),
            ));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(SessionError::Config(format!(
                "server.base_url must be an http(s) URL, got '{}'",
                url
            )));
        }
        if config.server.retry.max_attempts < 1 {
            return Err(SessionError::Config(
                "server.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if config.server.timeout_secs == 0 {
            return Err(SessionError::Config(
                "server.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if !LOG_LEVELS.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(SessionError::Config(format!(
                "logging.level must be one of {}, got '{}'",
                LOG_LEVELS.join(", "),
                config.logging.level
            )));
        }
        Ok(())
    }
}

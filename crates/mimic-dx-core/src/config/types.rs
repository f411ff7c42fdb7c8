use mimic_dx_client::http_client::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT};
use mimic_dx_client::retry::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY};
use mimic_dx_client::{ClientConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::conversation::{FileStore, KeyValueStore, MemoryStore};

/// Top-level configuration of the diagnostic client
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DxConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Deadline of each request/response call, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            retry: RetryConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(self.base_url.clone())
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_retry(self.retry.policy())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.delay_ms))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Directory of the file backend. Defaults to the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn history_dir(&self) -> PathBuf {
        match &self.path {
            Some(path) => path.clone(),
            None => dirs::data_dir()
                .map(|dir| dir.join("mimic-dx"))
                .unwrap_or_else(|| PathBuf::from(".mimic-dx")),
        }
    }

    pub fn build_store(&self) -> Arc<dyn KeyValueStore> {
        match self.backend {
            StorageBackend::File => Arc::new(FileStore::new(self.history_dir())),
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log to this file instead of stderr.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY.as_millis() as u64
}

fn default_log_level() -> String {
    "info".to_string()
}

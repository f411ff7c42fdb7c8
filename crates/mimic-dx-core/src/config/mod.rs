//! Configuration module for the diagnostic client
//!
//! Settings come from an optional YAML file, are overridden by `MIMIC_DX_*`
//! environment variables, and are validated before any client is built.

pub mod loader;
pub mod types;

pub use loader::*;
pub use types::*;


use crate::errors::SessionError;
use std::path::Path;

/// Load a configuration from a YAML file
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<DxConfig, SessionError> {
    let config = ConfigLoader::from_file(path).await?;
    ConfigLoader::validate(&config)?;
    Ok(config)
}

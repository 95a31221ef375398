//! Configuration management

use crate::error::{DhammaError, Result};
use crate::types::Config;
use crate::utils::paths::{ensure_dir, get_config_dir, get_config_path};
use std::path::Path;
use tokio::fs;
use tokio::process::Command;

/// Load configuration from the default location, merging with defaults
pub async fn load_config() -> Result<Config> {
    load_config_from(&get_config_path()).await
}

/// Load configuration from `path`. Missing file means all defaults; missing
/// fields take their default values.
pub async fn load_config_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(path).await?;
    let config: Config = serde_json::from_str(&content)?;
    validate(&config)?;
    Ok(config)
}

/// Reject settings the coordinator cannot run with
pub fn validate(config: &Config) -> Result<()> {
    if config.workers == 0 {
        return Err(DhammaError::InvalidConfig("workers must be at least 1".into()));
    }
    if config.max_queue == 0 {
        return Err(DhammaError::InvalidConfig("max_queue must be at least 1".into()));
    }
    if config.request_timeout_secs == 0 {
        return Err(DhammaError::InvalidConfig("request_timeout_secs must be at least 1".into()));
    }
    if config.cache_capacity == Some(0) {
        return Err(DhammaError::InvalidConfig("cache_capacity must be at least 1 when set".into()));
    }
    Ok(())
}

/// Save configuration to file
pub async fn save_config(config: &Config) -> Result<()> {
    ensure_dir(&get_config_dir()).await?;
    let content = serde_json::to_string_pretty(config)?;
    fs::write(get_config_path(), content).await?;
    Ok(())
}

/// Open config file in editor
pub async fn edit_config(editor: &str) -> Result<()> {
    let config_path = get_config_path();

    // Ensure config file exists
    if !config_path.exists() {
        save_config(&Config::default()).await?;
    }

    Command::new(editor)
        .arg(&config_path)
        .status()
        .await
        .map_err(|e| DhammaError::Spawn(format!("Failed to start {}: {}", editor, e)))?;

    Ok(())
}

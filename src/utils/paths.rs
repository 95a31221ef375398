//! Path utilities for dhamma-stream
//!
//! Respects XDG Base Directory Specification

use crate::error::Result;
use std::env;
use std::path::PathBuf;
use tokio::fs;

const APP_NAME: &str = "dhamma-stream";

/// Get config directory path
/// Respects XDG_CONFIG_HOME, defaults to ~/.config/dhamma-stream
pub fn get_config_dir() -> PathBuf {
    let base = env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(dirs::config_dir)
        .unwrap_or_else(|| PathBuf::from(env::var("HOME").unwrap_or_default()).join(".config"));

    base.join(APP_NAME)
}

/// Get config file path
pub fn get_config_path() -> PathBuf {
    get_config_dir().join("config.json")
}

/// Get the mpv IPC socket path for this process
pub fn get_ipc_socket_path() -> PathBuf {
    env::temp_dir().join(format!("{}-{}.sock", APP_NAME, std::process::id()))
}

/// Ensure a directory exists
pub async fn ensure_dir(path: &std::path::Path) -> Result<()> {
    fs::create_dir_all(path).await?;
    Ok(())
}

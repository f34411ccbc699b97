//! CLI configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via REBUF_CONFIG or --config)
//! 3. Environment variables
//! 4. Command-line flags

use rebuf_wal::RebufConfig;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {1}", .0.display())]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config file '{}': {1}", .0.display())]
    Parse(PathBuf, String),
}

/// Loads configuration from an optional YAML file, then applies environment
/// variable overrides.
pub fn load(path: Option<&Path>) -> Result<RebufConfig, ConfigError> {
    let mut config = match path {
        Some(path) => from_file(path)?,
        None => RebufConfig::default(),
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Loads configuration from a YAML file.
pub fn from_file(path: impl AsRef<Path>) -> Result<RebufConfig, ConfigError> {
    let path = path.as_ref();
    let content =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
    serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))
}

/// Applies `REBUF_*` overrides. Unparseable numbers are ignored.
fn apply_env_overrides(config: &mut RebufConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(dir) = var("REBUF_LOG_DIR") {
        config.log_dir = PathBuf::from(dir);
    }

    if let Some(size) = var("REBUF_MAX_SEGMENT_SIZE").and_then(|v| v.parse().ok()) {
        config.max_segment_size = size;
    }

    if let Some(count) = var("REBUF_MAX_SEGMENTS").and_then(|v| v.parse().ok()) {
        config.max_segments = count;
    }

    if let Some(ms) = var("REBUF_SYNC_INTERVAL_MS").and_then(|v| v.parse().ok()) {
        config.sync_interval_ms = ms;
    }
}

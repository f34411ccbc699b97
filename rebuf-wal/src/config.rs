//! Log configuration.

use crate::error::ConfigError;
use crate::{DEFAULT_MAX_SEGMENTS, DEFAULT_SEGMENT_SIZE, DEFAULT_SYNC_INTERVAL_MS};
use serde::{Deserialize, Serialize};
use std::path::{is_separator, PathBuf};
use std::time::Duration;

/// Log configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RebufConfig {
    /// Directory holding the staging and sealed segments.
    pub log_dir: PathBuf,
    /// Staging segment size (bytes) above which the next append rotates.
    pub max_segment_size: u64,
    /// Maximum number of sealed segments kept on disk.
    pub max_segments: usize,
    /// Background fsync interval in milliseconds (0 = disabled).
    pub sync_interval_ms: u64,
}

impl Default for RebufConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("./data"),
            max_segment_size: DEFAULT_SEGMENT_SIZE,
            max_segments: DEFAULT_MAX_SEGMENTS,
            sync_interval_ms: DEFAULT_SYNC_INTERVAL_MS,
        }
    }
}

impl RebufConfig {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_max_segment_size(mut self, size: u64) -> Self {
        self.max_segment_size = size;
        self
    }

    pub fn with_max_segments(mut self, count: usize) -> Self {
        self.max_segments = count;
        self
    }

    /// Sets the background sync interval. Intervals under a millisecond
    /// round up to one; only `Duration::ZERO` disables the loop.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        let ms = interval.as_millis().max(u128::from(!interval.is_zero()));
        self.sync_interval_ms = u64::try_from(ms).unwrap_or(u64::MAX);
        self
    }

    /// Returns the background sync interval, or `None` when the loop is disabled.
    pub fn sync_interval(&self) -> Option<Duration> {
        match self.sync_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let dir = self.log_dir.as_os_str().to_string_lossy();
        match dir.chars().last() {
            None => return Err(ConfigError::EmptyLogDir),
            Some(c) if is_separator(c) => {
                return Err(ConfigError::TrailingSeparator(self.log_dir.clone()))
            }
            Some(_) => {}
        }
        if self.max_segment_size == 0 {
            return Err(ConfigError::ZeroSegmentSize);
        }
        if self.max_segments == 0 {
            return Err(ConfigError::ZeroSegmentCount);
        }
        Ok(())
    }
}

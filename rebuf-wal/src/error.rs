//! Log error types.

use std::path::PathBuf;
use thiserror::Error;

/// Invalid engine configuration, rejected before anything touches disk.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("log directory must not be empty")]
    EmptyLogDir,

    #[error("log directory must not end with a path separator: {}", .0.display())]
    TrailingSeparator(PathBuf),

    #[error("max segment size must be greater than zero")]
    ZeroSegmentSize,

    #[error("max segment count must be at least one")]
    ZeroSegmentCount,
}

/// Errors that can occur during log operations.
#[derive(Debug, Error)]
pub enum RebufError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("cannot parse segment id from file name: {0}")]
    CorruptSegmentName(String),

    #[error("log is empty")]
    NotFound,

    #[error("log is closed")]
    Closed,

    #[error("log is unusable until reopened: {0}")]
    Poisoned(String),

    #[error("replay callback failed: {0}")]
    Callback(Box<dyn std::error::Error + Send + Sync>),
}

impl RebufError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RebufError::Io(_))
    }
}

//! # rebuf-wal
//!
//! A durable, segmented, append-only log used as an on-disk ring buffer.
//!
//! This crate provides:
//! - Synchronous, fsynced appends with monotonically increasing offsets
//! - Size-based segment rotation and oldest-first retention
//! - A background durability loop forcing periodic fsyncs
//! - Full sequential replay across sealed and staging segments
//! - Recovery from partial writes left behind by a crash
//!
//! ```no_run
//! use rebuf_wal::{Rebuf, RebufConfig};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), rebuf_wal::RebufError> {
//! let config = RebufConfig::new("./data")
//!     .with_max_segment_size(4096)
//!     .with_max_segments(5)
//!     .with_sync_interval(Duration::from_secs(5));
//! let log = Rebuf::open(config)?;
//!
//! let offset = log.append(b"hello world")?;
//! log.replay(|payload| {
//!     println!("{}", String::from_utf8_lossy(payload));
//!     Ok::<(), std::io::Error>(())
//! })?;
//! assert_eq!(log.latest_offset()?, offset);
//! log.close()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod record;
pub mod recovery;
pub mod replay;
pub mod segment;
pub mod sync;
pub mod wal;

pub use config::RebufConfig;
pub use error::{ConfigError, RebufError};
pub use record::{Decoded, Record};
pub use recovery::{verify_log, SegmentReport, VerifyReport};
pub use replay::{replay_dir, ReplaySnapshot, ReplayStats};
pub use segment::{SegmentId, SegmentScanner};
pub use wal::{Rebuf, RebufStats};

/// Default maximum segment size (64 MiB).
pub const DEFAULT_SEGMENT_SIZE: u64 = 64 * 1024 * 1024;

/// Default maximum number of sealed segments retained.
pub const DEFAULT_MAX_SEGMENTS: usize = 10;

/// Default background sync interval in milliseconds.
pub const DEFAULT_SYNC_INTERVAL_MS: u64 = 1000;

/// Record header size in bytes: offset (8) + payload length (8).
pub const RECORD_HEADER_SIZE: usize = 16;

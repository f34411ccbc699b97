//! Sequential replay of every record in the log.
//!
//! Sealed segments are walked in ascending id order, then the staging
//! segment. Each segment file is opened, scanned and closed before the next
//! one is touched.

use crate::error::RebufError;
use crate::record::{Decoded, Record, RecordReader};
use crate::segment::{open_reader, segment_path, staging_path, SegmentId, SegmentScanner};
use crate::wal::Rebuf;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

/// Summary of a replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Records handed to the callback.
    pub records: u64,
    /// Segments scanned (staging included).
    pub segments: u64,
    /// Segments whose scan stopped at an incomplete record.
    pub truncated_segments: u64,
}

/// The set of segments a replay walks, fixed when the replay starts.
pub struct ReplaySnapshot {
    pub(crate) dir: PathBuf,
    pub(crate) sealed: Vec<SegmentId>,
    pub(crate) staging: Option<(File, u64)>,
}

impl ReplaySnapshot {
    /// Captures a snapshot straight from a directory.
    ///
    /// An open log calls this under its writer lock; called directly it is
    /// only consistent when no writer is appending to the directory.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, RebufError> {
        let dir = dir.as_ref();
        let sealed = SegmentScanner::list_segments(dir)?;
        let staging = match File::open(staging_path(dir)) {
            Ok(file) => {
                let len = file.metadata()?.len();
                Some((file, len))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            dir: dir.to_path_buf(),
            sealed,
            staging,
        })
    }

    /// Walks every record, stopping at the first callback error.
    pub fn scan<F>(self, mut callback: F) -> Result<ReplayStats, RebufError>
    where
        F: FnMut(&Record) -> Result<(), RebufError>,
    {
        let mut stats = ReplayStats::default();

        for id in self.sealed {
            let path = segment_path(&self.dir, id);
            let reader = match open_reader(&path) {
                Ok(reader) => reader,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::debug!("segment {} evicted before replay reached it", id);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            scan_segment(&path, reader, &mut callback, &mut stats)?;
        }

        if let Some((file, len)) = self.staging {
            let path = staging_path(&self.dir);
            let reader = RecordReader::new(BufReader::new(file), len);
            scan_segment(&path, reader, &mut callback, &mut stats)?;
        }

        Ok(stats)
    }
}

fn scan_segment<R, F>(
    path: &Path,
    mut reader: RecordReader<R>,
    callback: &mut F,
    stats: &mut ReplayStats,
) -> Result<(), RebufError>
where
    R: Read,
    F: FnMut(&Record) -> Result<(), RebufError>,
{
    stats.segments += 1;
    let mut records = 0u64;

    loop {
        match reader.next_record()? {
            Decoded::Record(record) => {
                callback(&record)?;
                records += 1;
            }
            Decoded::EndOfSegment => {
                if reader.remaining() > 0 {
                    tracing::warn!(
                        "{}: ignoring {} trailing bytes (incomplete header)",
                        path.display(),
                        reader.remaining()
                    );
                }
                break;
            }
            Decoded::Truncated { offset, missing } => {
                tracing::warn!(
                    "{}: record {} truncated ({} bytes missing), skipping rest of segment",
                    path.display(),
                    offset,
                    missing
                );
                stats.truncated_segments += 1;
                break;
            }
        }
    }

    stats.records += records;
    tracing::debug!("replayed {} records from {}", records, path.display());
    Ok(())
}

impl Rebuf {
    /// Replays every record payload in offset order.
    ///
    /// Replay stops at the first callback error, which is returned as
    /// [`RebufError::Callback`]. Records appended after the replay starts
    /// are not visited.
    pub fn replay<F, E>(&self, mut callback: F) -> Result<ReplayStats, RebufError>
    where
        F: FnMut(&[u8]) -> Result<(), E>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        self.replay_records(|record| callback(&record.payload[..]))
    }

    /// Replays every record, offsets included, in offset order.
    pub fn replay_records<F, E>(&self, mut callback: F) -> Result<ReplayStats, RebufError>
    where
        F: FnMut(&Record) -> Result<(), E>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        self.snapshot()?
            .scan(|record| callback(record).map_err(|e| RebufError::Callback(e.into())))
    }
}

/// Replays a log directory without opening it for writing.
pub fn replay_dir<F, E>(
    dir: impl AsRef<Path>,
    mut callback: F,
) -> Result<ReplayStats, RebufError>
where
    F: FnMut(&Record) -> Result<(), E>,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    ReplaySnapshot::from_dir(dir)?
        .scan(|record| callback(record).map_err(|e| RebufError::Callback(e.into())))
}

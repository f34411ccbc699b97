//! Main log implementation.

use crate::config::RebufConfig;
use crate::error::RebufError;
use crate::record::{encode_into, entry_size};
use crate::recovery::repair_staging;
use crate::replay::ReplaySnapshot;
use crate::segment::{
    first_offset, last_offset, segment_path, staging_path, sync_dir, SegmentId, SegmentScanner,
    StagingSegment,
};
use crate::sync::SyncLoop;
use bytes::BytesMut;
use parking_lot::Mutex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// I/O statistics for the log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebufStats {
    /// Successful appends.
    pub appends: u64,
    /// Total bytes appended (headers included).
    pub bytes_written: u64,
    /// Explicit, periodic and close-time fsyncs (per-append syncs excluded).
    pub fsyncs: u64,
    /// Staging segments sealed.
    pub rotations: u64,
    /// Sealed segments deleted by retention.
    pub evicted_segments: u64,
}

#[derive(Default)]
struct Counters {
    appends: AtomicU64,
    bytes_written: AtomicU64,
    fsyncs: AtomicU64,
    rotations: AtomicU64,
    evicted_segments: AtomicU64,
}

/// Everything guarded by the writer lock.
struct WriterState {
    dir: PathBuf,
    staging: Option<StagingSegment>,
    current_segment_id: SegmentId,
    segment_count: usize,
    oldest_offset: u64,
    next_offset: u64,
    poisoned: Option<String>,
    closed: bool,
}

impl WriterState {
    /// Rebuilds the writer state from directory contents.
    fn recover(dir: &Path) -> Result<Self, RebufError> {
        let mut staging = StagingSegment::open(dir)?;
        let truncated = repair_staging(&mut staging)?;
        if truncated > 0 {
            tracing::warn!(
                "Truncated torn record at end of {} (removed {} bytes)",
                staging.path().display(),
                truncated
            );
        }

        let segments = SegmentScanner::list_segments(dir)?;
        let current_segment_id = segments.last().map_or(0, |&id| id + 1);

        let mut latest = last_offset(staging.path())?;
        if latest.is_none() {
            for &id in segments.iter().rev() {
                latest = last_offset(&segment_path(dir, id))?;
                if latest.is_some() {
                    break;
                }
            }
        }
        let next_offset = latest.map_or(0, |offset| offset + 1);
        let oldest_offset = first_present_offset(dir, &segments)?.unwrap_or(next_offset);

        Ok(Self {
            dir: dir.to_path_buf(),
            staging: Some(staging),
            current_segment_id,
            segment_count: segments.len(),
            oldest_offset,
            next_offset,
            poisoned: None,
            closed: false,
        })
    }

    fn is_empty(&self) -> bool {
        self.oldest_offset == self.next_offset
    }

    fn ensure_writable(&self) -> Result<(), RebufError> {
        if self.closed {
            return Err(RebufError::Closed);
        }
        if let Some(reason) = &self.poisoned {
            return Err(RebufError::Poisoned(reason.clone()));
        }
        Ok(())
    }

    fn poison(&mut self, reason: String) {
        tracing::warn!("log poisoned: {}", reason);
        self.staging = None;
        self.poisoned = Some(reason);
    }

    /// An empty staging segment is never sealed, so an oversized record
    /// lands alone in a fresh segment instead of leaving an empty one behind.
    fn needs_rotation(&self, entry_size: u64, max_segment_size: u64) -> bool {
        self.staging
            .as_ref()
            .is_some_and(|s| !s.is_empty() && !s.can_fit(entry_size, max_segment_size))
    }

    /// Seals the staging segment, opens a new one and applies retention.
    fn rotate(&mut self, max_segments: usize, stats: &Counters) -> Result<(), RebufError> {
        let staging = self
            .staging
            .take()
            .ok_or_else(|| RebufError::Poisoned("staging segment is not open".to_string()))?;
        let sealed_size = staging.size();

        let id = self.current_segment_id;
        staging.seal(id)?;
        self.current_segment_id += 1;
        self.segment_count += 1;
        stats.rotations.fetch_add(1, Ordering::Relaxed);

        self.staging = Some(StagingSegment::open(&self.dir)?);

        tracing::info!(
            "Sealed segment {} ({} bytes), {} sealed segments",
            id,
            sealed_size,
            self.segment_count
        );

        if self.segment_count > max_segments {
            self.enforce_retention(max_segments, stats)?;
        }
        Ok(())
    }

    /// Deletes oldest sealed segments until at most `max_segments` remain.
    fn enforce_retention(
        &mut self,
        max_segments: usize,
        stats: &Counters,
    ) -> Result<(), RebufError> {
        let segments = SegmentScanner::list_segments(&self.dir)?;
        self.segment_count = segments.len();

        let excess = segments.len().saturating_sub(max_segments);
        if excess == 0 {
            return Ok(());
        }

        for &id in &segments[..excess] {
            fs::remove_file(segment_path(&self.dir, id))?;
            self.segment_count -= 1;
            stats.evicted_segments.fetch_add(1, Ordering::Relaxed);
            tracing::info!("Evicted segment {} (max_segments={})", id, max_segments);
        }
        sync_dir(&self.dir)?;

        self.oldest_offset =
            first_present_offset(&self.dir, &segments[excess..])?.unwrap_or(self.next_offset);
        Ok(())
    }

    /// Appends one encoded record, rolling the file back on failure.
    fn write(&mut self, encoded: &[u8]) -> Result<(), RebufError> {
        let (before, result) = match self.staging.as_mut() {
            Some(staging) => (staging.size(), staging.append(encoded)),
            None => {
                return Err(RebufError::Poisoned(
                    "staging segment is not open".to_string(),
                ))
            }
        };

        if let Err(e) = result {
            let rollback = self.staging.as_mut().map(|s| s.truncate_to(before));
            if let Some(Err(rollback)) = rollback {
                self.poison(format!(
                    "could not roll back partial append ({}): {}",
                    e, rollback
                ));
            }
            return Err(e.into());
        }
        Ok(())
    }
}

/// Offset of the first record in the given sealed segments, then staging.
fn first_present_offset(dir: &Path, sealed: &[SegmentId]) -> io::Result<Option<u64>> {
    for &id in sealed {
        if let Some(offset) = first_offset(&segment_path(dir, id))? {
            return Ok(Some(offset));
        }
    }
    first_offset(&staging_path(dir))
}

/// State shared with the background sync thread.
struct Shared {
    state: Mutex<WriterState>,
    stats: Counters,
}

impl Shared {
    fn sync(&self) -> Result<(), RebufError> {
        let mut state = self.state.lock();
        if let Some(staging) = state.staging.as_mut() {
            staging.sync()?;
            self.stats.fsyncs.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

/// Segmented, durable, append-only log.
pub struct Rebuf {
    config: RebufConfig,
    shared: Arc<Shared>,
    sync_loop: Mutex<Option<SyncLoop>>,
}

impl Rebuf {
    /// Opens or creates a log at the configured directory.
    pub fn open(config: RebufConfig) -> Result<Self, RebufError> {
        config.validate()?;

        // Create directory if it doesn't exist
        fs::create_dir_all(&config.log_dir)?;

        let stats = Counters::default();
        let mut state = WriterState::recover(&config.log_dir)?;
        if state.segment_count > config.max_segments {
            state.enforce_retention(config.max_segments, &stats)?;
        }

        tracing::info!(
            "Log opened at {}: {} sealed segments, staging={} bytes, offsets={}..{}",
            config.log_dir.display(),
            state.segment_count,
            state.staging.as_ref().map_or(0, |s| s.size()),
            state.oldest_offset,
            state.next_offset
        );

        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            stats,
        });

        let sync_loop = match config.sync_interval() {
            Some(interval) => {
                let shared = shared.clone();
                Some(SyncLoop::spawn(interval, move || shared.sync())?)
            }
            None => None,
        };

        Ok(Self {
            config,
            shared,
            sync_loop: Mutex::new(sync_loop),
        })
    }

    /// Appends a record and returns its offset.
    ///
    /// The record is on stable storage when this returns. If the staging
    /// segment cannot take the record it is sealed first, and retention
    /// evicts the oldest sealed segment when too many remain.
    pub fn append(&self, payload: &[u8]) -> Result<u64, RebufError> {
        let entry_size = entry_size(payload.len());
        let mut state = self.shared.state.lock();
        state.ensure_writable()?;

        if state.needs_rotation(entry_size, self.config.max_segment_size) {
            if let Err(e) = state.rotate(self.config.max_segments, &self.shared.stats) {
                state.poison(format!("rotation failed: {}", e));
                return Err(e);
            }
        }

        let offset = state.next_offset;
        let mut encoded = BytesMut::with_capacity(entry_size as usize);
        encode_into(offset, payload, &mut encoded);
        state.write(&encoded)?;
        state.next_offset += 1;

        self.shared.stats.appends.fetch_add(1, Ordering::Relaxed);
        self.shared
            .stats
            .bytes_written
            .fetch_add(entry_size, Ordering::Relaxed);

        Ok(offset)
    }

    /// Forces a sync to disk.
    pub fn sync(&self) -> Result<(), RebufError> {
        self.shared.sync()
    }

    /// Returns the offset of the oldest record still on disk.
    pub fn oldest_offset(&self) -> Result<u64, RebufError> {
        let state = self.shared.state.lock();
        if state.is_empty() {
            return Err(RebufError::NotFound);
        }
        Ok(state.oldest_offset)
    }

    /// Returns the offset of the most recently appended record.
    pub fn latest_offset(&self) -> Result<u64, RebufError> {
        let state = self.shared.state.lock();
        if state.is_empty() {
            return Err(RebufError::NotFound);
        }
        Ok(state.next_offset - 1)
    }

    /// Returns the configuration the log was opened with.
    pub fn config(&self) -> &RebufConfig {
        &self.config
    }

    /// Returns the log directory.
    pub fn dir(&self) -> &Path {
        &self.config.log_dir
    }

    /// Returns the id the staging segment will get when sealed.
    pub fn current_segment_id(&self) -> SegmentId {
        self.shared.state.lock().current_segment_id
    }

    /// Returns the number of sealed segments.
    pub fn segment_count(&self) -> usize {
        self.shared.state.lock().segment_count
    }

    /// Returns the size of the staging segment in bytes.
    pub fn staging_size(&self) -> u64 {
        self.shared
            .state
            .lock()
            .staging
            .as_ref()
            .map_or(0, |s| s.size())
    }

    /// Returns the list of sealed segment IDs, read from disk.
    pub fn segment_ids(&self) -> Result<Vec<SegmentId>, RebufError> {
        let state = self.shared.state.lock();
        SegmentScanner::list_segments(&state.dir)
    }

    /// Returns the current I/O statistics.
    pub fn stats(&self) -> RebufStats {
        let stats = &self.shared.stats;
        RebufStats {
            appends: stats.appends.load(Ordering::Relaxed),
            bytes_written: stats.bytes_written.load(Ordering::Relaxed),
            fsyncs: stats.fsyncs.load(Ordering::Relaxed),
            rotations: stats.rotations.load(Ordering::Relaxed),
            evicted_segments: stats.evicted_segments.load(Ordering::Relaxed),
        }
    }

    /// Captures the segments a replay will walk.
    ///
    /// Taken under the writer lock; the staging file is opened here and its
    /// length recorded so the scan sees exactly what was durable at this point.
    pub(crate) fn snapshot(&self) -> Result<ReplaySnapshot, RebufError> {
        let state = self.shared.state.lock();
        ReplaySnapshot::from_dir(&state.dir)
    }

    /// Closes the log: stops the sync loop, syncs and releases the staging
    /// segment. Calling it again is a no-op.
    pub fn close(&self) -> Result<(), RebufError> {
        if let Some(mut sync_loop) = self.sync_loop.lock().take() {
            sync_loop.stop();
        }

        let mut state = self.shared.state.lock();
        if state.closed {
            return Ok(());
        }
        state.closed = true;

        if let Some(mut staging) = state.staging.take() {
            staging.sync()?;
            self.shared.stats.fsyncs.fetch_add(1, Ordering::Relaxed);
        }

        tracing::info!(
            "Log closed at {} (next_offset={})",
            state.dir.display(),
            state.next_offset
        );
        Ok(())
    }
}

impl Drop for Rebuf {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("failed to close log: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use crate::segment::segment_filename;
    use crate::RECORD_HEADER_SIZE;
    use proptest::prelude::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config(dir: &Path) -> RebufConfig {
        RebufConfig::new(dir.join("log"))
            .with_max_segment_size(4096)
            .with_max_segments(10)
            .with_sync_interval(Duration::ZERO)
    }

    fn replayed(log: &Rebuf) -> Vec<Record> {
        let mut records = Vec::new();
        log.replay_records(|record| {
            records.push(record.clone());
            Ok::<(), RebufError>(())
        })
        .unwrap();
        records
    }

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_append_and_replay() {
        let dir = TempDir::new().unwrap();
        let log = Rebuf::open(test_config(dir.path())).unwrap();

        for i in 0..5u64 {
            let offset = log.append(format!("entry-{}", i).as_bytes()).unwrap();
            assert_eq!(offset, i);
        }

        let records = replayed(&log);
        assert_eq!(records.len(), 5);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.offset, i as u64);
            assert_eq!(record.payload, format!("entry-{}", i).as_bytes());
        }
        assert_eq!(log.oldest_offset().unwrap(), 0);
        assert_eq!(log.latest_offset().unwrap(), 4);
        assert_eq!(log.stats().appends, 5);
    }

    #[test]
    fn test_empty_log_offsets_not_found() {
        let dir = TempDir::new().unwrap();
        let log = Rebuf::open(test_config(dir.path())).unwrap();

        assert!(matches!(log.oldest_offset(), Err(RebufError::NotFound)));
        assert!(matches!(log.latest_offset(), Err(RebufError::NotFound)));
        assert_eq!(files_in(log.dir()), vec!["rebuf.tmp"]);
    }

    #[test]
    fn test_single_record_offsets_equal() {
        let dir = TempDir::new().unwrap();
        let log = Rebuf::open(test_config(dir.path())).unwrap();
        log.append(b"only").unwrap();
        assert_eq!(log.oldest_offset().unwrap(), 0);
        assert_eq!(log.latest_offset().unwrap(), 0);
    }

    #[test]
    fn test_rotation_before_overflowing_write() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path()).with_max_segment_size(40);
        let log = Rebuf::open(config).unwrap();

        // 8-byte payload: 24-byte entries.
        log.append(b"aaaaaaaa").unwrap();
        assert_eq!(log.segment_count(), 0);
        assert_eq!(log.staging_size(), 24);

        // 24 + 24 > 40: the staging segment is sealed first.
        log.append(b"bbbbbbbb").unwrap();
        assert_eq!(log.segment_count(), 1);
        assert_eq!(log.staging_size(), 24);
        assert_eq!(files_in(log.dir()), vec!["rebuf-0", "rebuf.tmp"]);
        assert_eq!(
            fs::metadata(log.dir().join("rebuf-0")).unwrap().len(),
            24,
            "sealed segment holds exactly the first record"
        );

        log.append(b"cccccccc").unwrap();
        assert_eq!(log.segment_count(), 2);
        assert_eq!(log.current_segment_id(), 2);

        let payloads: Vec<_> = replayed(&log).into_iter().map(|r| r.payload).collect();
        assert_eq!(payloads, vec![&b"aaaaaaaa"[..], b"bbbbbbbb", b"cccccccc"]);
    }

    #[test]
    fn test_entry_exactly_filling_segment_does_not_rotate() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path()).with_max_segment_size(48);
        let log = Rebuf::open(config).unwrap();

        log.append(b"aaaaaaaa").unwrap();
        log.append(b"bbbbbbbb").unwrap();
        assert_eq!(log.segment_count(), 0);
        assert_eq!(log.staging_size(), 48);
    }

    #[test]
    fn test_rotation_count_matches_size() {
        let dir = TempDir::new().unwrap();
        let entry = (RECORD_HEADER_SIZE + 84) as u64;
        let config = test_config(dir.path()).with_max_segment_size(entry * 4);
        let log = Rebuf::open(config).unwrap();

        // Four entries fill a segment exactly; the fifth rotates.
        for _ in 0..13 {
            log.append(&[7u8; 84]).unwrap();
        }
        assert_eq!(log.segment_count(), 3);
        assert_eq!(log.segment_ids().unwrap(), vec![0, 1, 2]);
        assert_eq!(log.staging_size(), entry);
        assert_eq!(log.stats().rotations, 3);
    }

    #[test]
    fn test_oversized_record_written_alone() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path()).with_max_segment_size(32);
        let log = Rebuf::open(config).unwrap();

        log.append(&[1u8; 100]).unwrap();
        assert_eq!(log.segment_count(), 0, "empty staging is never sealed");
        log.append(&[2u8; 100]).unwrap();
        assert_eq!(log.segment_count(), 1);

        let records = replayed(&log);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].payload.len(), 100);
    }

    #[test]
    fn test_retention_evicts_oldest() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path())
            .with_max_segment_size(24)
            .with_max_segments(2);
        let log = Rebuf::open(config).unwrap();

        // One 24-byte record per segment: every append after the first rotates.
        for i in 0..5u64 {
            log.append(format!("rec-{:04}", i).as_bytes()).unwrap();
            assert!(log.segment_count() <= 2);
        }

        // Four rotations sealed ids 0..=3; retention kept the newest two.
        assert_eq!(log.segment_ids().unwrap(), vec![2, 3]);
        assert!(!log.dir().join(segment_filename(0)).exists());
        assert!(!log.dir().join(segment_filename(1)).exists());
        assert_eq!(log.stats().evicted_segments, 2);

        assert_eq!(log.oldest_offset().unwrap(), 2);
        assert_eq!(log.latest_offset().unwrap(), 4);
        let offsets: Vec<_> = replayed(&log).iter().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![2, 3, 4]);
    }

    #[test]
    fn test_recovery_restart() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path())
            .with_max_segment_size(64)
            .with_max_segments(3);

        let (oldest, latest, before) = {
            let log = Rebuf::open(config.clone()).unwrap();
            for i in 0..20 {
                log.append(format!("payload-{}", i).as_bytes()).unwrap();
            }
            let snapshot = (
                log.oldest_offset().unwrap(),
                log.latest_offset().unwrap(),
                replayed(&log),
            );
            log.close().unwrap();
            snapshot
        };

        let log = Rebuf::open(config).unwrap();
        assert_eq!(log.oldest_offset().unwrap(), oldest);
        assert_eq!(log.latest_offset().unwrap(), latest);
        assert_eq!(replayed(&log), before);
        assert_eq!(latest, 19);

        // Appending resumes the sequence and never reuses a sealed id.
        let ids_before = log.segment_ids().unwrap();
        assert_eq!(log.current_segment_id(), ids_before.last().unwrap() + 1);
        assert_eq!(log.append(b"after-restart").unwrap(), 20);
    }

    #[test]
    fn test_reopen_staging_only() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        {
            let log = Rebuf::open(config.clone()).unwrap();
            log.append(b"a").unwrap();
            log.append(b"b").unwrap();
        }
        let log = Rebuf::open(config).unwrap();
        assert_eq!(log.segment_count(), 0);
        assert_eq!(log.current_segment_id(), 0);
        assert_eq!(log.oldest_offset().unwrap(), 0);
        assert_eq!(log.latest_offset().unwrap(), 1);
        assert_eq!(log.staging_size(), 2 * 17);
    }

    #[test]
    fn test_retention_applied_on_open() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path()).with_max_segment_size(20);
        {
            let log = Rebuf::open(config.clone()).unwrap();
            for _ in 0..6 {
                log.append(b"xxxx").unwrap();
            }
            assert_eq!(log.segment_count(), 5);
        }

        let log = Rebuf::open(config.with_max_segments(2)).unwrap();
        assert_eq!(log.segment_ids().unwrap(), vec![3, 4]);
        assert_eq!(log.oldest_offset().unwrap(), 3);
        assert_eq!(log.latest_offset().unwrap(), 5);
    }

    #[test]
    fn test_torn_tail_repaired_on_open() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        {
            let log = Rebuf::open(config.clone()).unwrap();
            log.append(b"complete").unwrap();
        }

        // Simulate a crash halfway through the second record.
        let staging = config.log_dir.join("rebuf.tmp");
        let torn = Record::new(1, &b"never finished"[..]).encode();
        let mut bytes = fs::read(&staging).unwrap();
        bytes.extend_from_slice(&torn[..RECORD_HEADER_SIZE + 3]);
        fs::write(&staging, &bytes).unwrap();

        let log = Rebuf::open(config).unwrap();
        assert_eq!(log.staging_size(), 24);
        assert_eq!(log.append(b"next").unwrap(), 1);

        let payloads: Vec<_> = replayed(&log).into_iter().map(|r| r.payload).collect();
        assert_eq!(payloads, vec![&b"complete"[..], b"next"]);
    }

    #[test]
    fn test_close_is_idempotent_and_final() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path()).with_sync_interval(Duration::from_millis(10));
        let log = Rebuf::open(config).unwrap();
        log.append(b"x").unwrap();

        log.close().unwrap();
        log.close().unwrap();
        assert!(matches!(log.append(b"y"), Err(RebufError::Closed)));

        // Offsets and replay still answer from disk.
        assert_eq!(log.latest_offset().unwrap(), 0);
        assert_eq!(replayed(&log).len(), 1);
    }

    #[test]
    fn test_background_sync_ticks() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path()).with_sync_interval(Duration::from_millis(5));
        let log = Rebuf::open(config).unwrap();
        log.append(b"tick").unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while log.stats().fsyncs < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(log.stats().fsyncs >= 2);

        log.close().unwrap();
        let after_close = log.stats().fsyncs;
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(log.stats().fsyncs, after_close);
    }

    #[test]
    fn test_concurrent_appends_get_unique_offsets() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path()).with_max_segment_size(256);
        let log = Arc::new(Rebuf::open(config).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let log = log.clone();
                std::thread::spawn(move || {
                    (0..25)
                        .map(|i| log.append(format!("t{}-{}", t, i).as_bytes()).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut offsets: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        offsets.sort_unstable();
        assert_eq!(offsets, (0..100).collect::<Vec<_>>());

        let replayed: Vec<_> = replayed(&log).iter().map(|r| r.offset).collect();
        assert_eq!(replayed, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_failed_write_rolls_back_without_consuming_offset() {
        let dir = TempDir::new().unwrap();
        let log = Rebuf::open(test_config(dir.path())).unwrap();
        log.append(b"first").unwrap();
        let staging = log.dir().join("rebuf.tmp");

        log.shared
            .state
            .lock()
            .staging
            .as_mut()
            .unwrap()
            .fail_next_append_after(10);
        assert!(matches!(log.append(b"second"), Err(RebufError::Io(_))));

        // Partial bytes are gone and the log stays writable.
        assert_eq!(fs::metadata(&staging).unwrap().len(), 21);
        assert_eq!(log.staging_size(), 21);
        assert_eq!(log.latest_offset().unwrap(), 0);
        assert_eq!(log.append(b"third").unwrap(), 1);
        assert_eq!(log.stats().appends, 2);

        let payloads: Vec<_> = replayed(&log).into_iter().map(|r| r.payload).collect();
        assert_eq!(payloads, vec![&b"first"[..], b"third"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_rotation_poisons_log() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path()).with_max_segment_size(20);
        let log = Rebuf::open(config).unwrap();
        log.append(b"first").unwrap();

        // A directory squatting on the next sealed name makes the rename fail.
        fs::create_dir(log.dir().join(segment_filename(0))).unwrap();

        assert!(matches!(log.append(b"second"), Err(RebufError::Io(_))));
        assert!(matches!(log.append(b"third"), Err(RebufError::Poisoned(_))));
        assert_eq!(log.latest_offset().unwrap(), 0);
    }

    #[test]
    fn test_open_rejects_bad_config() {
        let dir = TempDir::new().unwrap();
        let mut path = dir.path().as_os_str().to_os_string();
        path.push("/");
        let config = RebufConfig::new(PathBuf::from(path));
        assert!(matches!(
            Rebuf::open(config),
            Err(RebufError::Config(crate::ConfigError::TrailingSeparator(_)))
        ));
    }

    #[test]
    fn test_open_rejects_foreign_file() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        fs::create_dir_all(&config.log_dir).unwrap();
        fs::write(config.log_dir.join("rebuf-x"), b"").unwrap();
        assert!(matches!(
            Rebuf::open(config),
            Err(RebufError::CorruptSegmentName(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_offsets_gapless_and_retention_bounded(
            sizes in proptest::collection::vec(0usize..48, 1..40),
            max_segments in 1usize..4,
        ) {
            let dir = TempDir::new().unwrap();
            let config = test_config(dir.path())
                .with_max_segment_size(64)
                .with_max_segments(max_segments);
            let log = Rebuf::open(config).unwrap();

            for (i, size) in sizes.iter().enumerate() {
                prop_assert_eq!(log.append(&vec![i as u8; *size]).unwrap(), i as u64);
                prop_assert!(log.segment_count() <= max_segments);
                prop_assert!(log.oldest_offset().unwrap() <= log.latest_offset().unwrap());
            }

            let offsets: Vec<u64> = replayed(&log).iter().map(|r| r.offset).collect();
            let oldest = log.oldest_offset().unwrap();
            let latest = log.latest_offset().unwrap();
            prop_assert_eq!(latest, sizes.len() as u64 - 1);
            prop_assert_eq!(offsets, (oldest..=latest).collect::<Vec<_>>());
        }
    }
}

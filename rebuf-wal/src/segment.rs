//! Segment naming, enumeration and the writable staging segment.
//!
//! A log directory holds one staging segment (`rebuf.tmp`) that receives all
//! appends, plus any number of sealed segments (`rebuf-<id>`). Sealing renames
//! the staging file to the next id; sealed files are never written again.

use crate::error::RebufError;
use crate::record::{Decoded, RecordReader};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Segment identifier (monotonically increasing, never reused).
pub type SegmentId = u64;

/// File name of the staging segment.
pub const STAGING_FILENAME: &str = "rebuf.tmp";

const SEGMENT_PREFIX: &str = "rebuf-";
const TEMP_SUFFIX: &str = ".tmp";

/// Sealed segment file name format: rebuf-N (decimal, unpadded)
pub fn segment_filename(id: SegmentId) -> String {
    format!("{}{}", SEGMENT_PREFIX, id)
}

/// Parse segment ID from filename.
pub fn parse_segment_filename(name: &str) -> Option<SegmentId> {
    let digits = name.strip_prefix(SEGMENT_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let id: SegmentId = digits.parse().ok()?;
    // Reject non-canonical spellings such as "rebuf-007".
    (segment_filename(id) == name).then_some(id)
}

/// Returns whether a file name denotes a temporary (staging) file.
pub fn is_temporary(name: &str) -> bool {
    name.ends_with(TEMP_SUFFIX)
}

/// Returns the path of a sealed segment.
pub fn segment_path(dir: &Path, id: SegmentId) -> PathBuf {
    dir.join(segment_filename(id))
}

/// Returns the path of the staging segment.
pub fn staging_path(dir: &Path) -> PathBuf {
    dir.join(STAGING_FILENAME)
}

/// Segment directory scanner.
pub struct SegmentScanner;

impl SegmentScanner {
    /// Lists all sealed segment IDs in a directory, sorted ascending.
    pub fn list_segments(dir: &Path) -> Result<Vec<SegmentId>, RebufError> {
        let mut segments = Vec::new();

        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if is_temporary(&name) {
                continue;
            }
            match parse_segment_filename(&name) {
                Some(id) => segments.push(id),
                None => return Err(RebufError::CorruptSegmentName(name.into_owned())),
            }
        }

        segments.sort_unstable();
        Ok(segments)
    }

    /// Lists sealed segment file names, ascending by id.
    pub fn segment_files(dir: &Path) -> Result<Vec<String>, RebufError> {
        Ok(Self::list_segments(dir)?
            .into_iter()
            .map(segment_filename)
            .collect())
    }

    /// Returns whether the directory holds no sealed segments.
    pub fn is_fresh(dir: &Path) -> Result<bool, RebufError> {
        Ok(Self::list_segments(dir)?.is_empty())
    }

    /// Returns the oldest segment ID, or None if no segments exist.
    pub fn oldest_segment(dir: &Path) -> Result<Option<SegmentId>, RebufError> {
        Ok(Self::list_segments(dir)?.first().copied())
    }

    /// Returns the latest segment ID, or None if no segments exist.
    pub fn latest_segment(dir: &Path) -> Result<Option<SegmentId>, RebufError> {
        Ok(Self::list_segments(dir)?.last().copied())
    }

    /// Returns the number of sealed segments.
    pub fn count_segments(dir: &Path) -> Result<usize, RebufError> {
        Ok(Self::list_segments(dir)?.len())
    }
}

/// Opens a segment file for sequential record reads.
pub fn open_reader(path: &Path) -> io::Result<RecordReader<BufReader<File>>> {
    let file = File::open(path)?;
    let len = file.metadata()?.len();
    Ok(RecordReader::new(BufReader::new(file), len))
}

/// Returns the offset of the first complete record in a segment.
pub fn first_offset(path: &Path) -> io::Result<Option<u64>> {
    match open_reader(path)?.next_record()? {
        Decoded::Record(record) => Ok(Some(record.offset)),
        _ => Ok(None),
    }
}

/// Returns the offset of the last complete record in a segment.
pub fn last_offset(path: &Path) -> io::Result<Option<u64>> {
    let mut reader = open_reader(path)?;
    let mut last = None;
    while let Decoded::Record(record) = reader.next_record()? {
        last = Some(record.offset);
    }
    Ok(last)
}

/// Fsyncs a directory so renames and unlinks inside it are durable.
pub fn sync_dir(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    File::open(dir)?.sync_all()?;
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

/// The single writable segment.
pub struct StagingSegment {
    path: PathBuf,
    file: File,
    size: u64,
    #[cfg(test)]
    fail_after: Option<usize>,
}

impl StagingSegment {
    /// Opens the staging segment in `dir`, creating it if absent.
    pub fn open(dir: &Path) -> Result<Self, RebufError> {
        let path = staging_path(dir);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;

        let size = file.metadata()?.len();

        Ok(Self {
            path,
            file,
            size,
            #[cfg(test)]
            fail_after: None,
        })
    }

    /// Returns the staging file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current size of the segment.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns whether no record has been written yet.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Returns whether an entry of `entry_size` bytes fits under `max_size`.
    pub fn can_fit(&self, entry_size: u64, max_size: u64) -> bool {
        self.size + entry_size <= max_size
    }

    /// Appends encoded bytes and syncs them to disk.
    ///
    /// On error the size is left unchanged; the caller decides whether to
    /// roll the file back with [`truncate_to`](Self::truncate_to).
    pub fn append(&mut self, encoded: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::End(0))?;
        #[cfg(test)]
        self.write_partial_if_armed(encoded)?;
        self.file.write_all(encoded)?;
        self.file.flush()?;
        self.file.sync_data()?;
        self.size += encoded.len() as u64;
        Ok(())
    }

    /// Makes the next append write only `bytes` bytes and then fail.
    #[cfg(test)]
    pub(crate) fn fail_next_append_after(&mut self, bytes: usize) {
        self.fail_after = Some(bytes);
    }

    #[cfg(test)]
    fn write_partial_if_armed(&mut self, encoded: &[u8]) -> io::Result<()> {
        match self.fail_after.take() {
            Some(bytes) => {
                self.file.write_all(&encoded[..bytes.min(encoded.len())])?;
                self.file.flush()?;
                Err(io::Error::other("simulated short write"))
            }
            None => Ok(()),
        }
    }

    /// Syncs the segment to disk.
    pub fn sync(&mut self) -> io::Result<()> {
        self.file.sync_data()
    }

    /// Truncates the segment to `len` bytes.
    pub fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.file.set_len(len)?;
        self.file.sync_all()?;
        self.size = len;
        Ok(())
    }

    /// Flushes, closes and renames the staging file to sealed segment `id`.
    pub fn seal(self, id: SegmentId) -> io::Result<PathBuf> {
        let Self { path, file, .. } = self;
        file.sync_all()?;
        drop(file);

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let sealed = segment_path(dir, id);
        fs::rename(&path, &sealed)?;
        sync_dir(dir)?;
        Ok(sealed)
    }
}

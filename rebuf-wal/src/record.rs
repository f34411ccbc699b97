//! Record codec.
//!
//! Each record has the following on-disk format (integers big-endian):
//!
//! ```text
//! +---------------------+---------------------+------------------------+
//! | offset              | length              | payload                |
//! | 8 bytes             | 8 bytes             | length bytes           |
//! +---------------------+---------------------+------------------------+
//! ```
//!
//! Offsets are assigned by the writer; the codec only carries them.

use crate::RECORD_HEADER_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::{self, Read};

/// A single logged record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub offset: u64,
    pub payload: Bytes,
}

/// Outcome of decoding the next record from a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete record.
    Record(Record),
    /// Fewer than a full header remains. Normal end of a segment.
    EndOfSegment,
    /// A header was read but its payload is cut short (crash mid-append).
    Truncated { offset: u64, missing: u64 },
}

/// Returns the on-disk size of a record carrying `payload_len` bytes.
pub fn entry_size(payload_len: usize) -> u64 {
    (RECORD_HEADER_SIZE + payload_len) as u64
}

fn parse_header(header: &[u8; RECORD_HEADER_SIZE]) -> (u64, u64) {
    let mut buf = &header[..];
    (buf.get_u64(), buf.get_u64())
}

impl Record {
    pub fn new(offset: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            offset,
            payload: payload.into(),
        }
    }

    /// Encodes the record into bytes.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.disk_size());
        encode_into(self.offset, &self.payload, &mut buf);
        buf
    }

    /// Decodes a record from the front of `buf`.
    ///
    /// Nothing is consumed unless a complete record is returned.
    pub fn decode(buf: &mut BytesMut) -> Decoded {
        if buf.len() < RECORD_HEADER_SIZE {
            return Decoded::EndOfSegment;
        }

        let mut header = [0u8; RECORD_HEADER_SIZE];
        header.copy_from_slice(&buf[..RECORD_HEADER_SIZE]);
        let (offset, len) = parse_header(&header);

        let available = (buf.len() - RECORD_HEADER_SIZE) as u64;
        if available < len {
            return Decoded::Truncated {
                offset,
                missing: len - available,
            };
        }

        buf.advance(RECORD_HEADER_SIZE);
        let payload = buf.split_to(len as usize).freeze();
        Decoded::Record(Record { offset, payload })
    }

    /// Returns the total size of this record on disk.
    pub fn disk_size(&self) -> usize {
        RECORD_HEADER_SIZE + self.payload.len()
    }
}

/// Appends the encoding of one record to `buf`.
pub fn encode_into(offset: u64, payload: &[u8], buf: &mut BytesMut) {
    buf.reserve(RECORD_HEADER_SIZE + payload.len());
    buf.put_u64(offset);
    buf.put_u64(payload.len() as u64);
    buf.put_slice(payload);
}

/// Sequential record reader over a byte stream of known length.
///
/// The length bound keeps a garbage length field from driving a huge
/// allocation: a payload longer than what is left is reported as truncated
/// before anything is read.
pub struct RecordReader<R> {
    inner: R,
    len: u64,
    position: u64,
}

impl<R: Read> RecordReader<R> {
    pub fn new(inner: R, len: u64) -> Self {
        Self {
            inner,
            len,
            position: 0,
        }
    }

    /// Byte position just past the last complete record returned.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Bytes left after the last complete record.
    pub fn remaining(&self) -> u64 {
        self.len - self.position
    }

    /// Reads the next record.
    pub fn next_record(&mut self) -> io::Result<Decoded> {
        let remaining = self.remaining();
        if remaining < RECORD_HEADER_SIZE as u64 {
            return Ok(Decoded::EndOfSegment);
        }

        let mut header = [0u8; RECORD_HEADER_SIZE];
        self.inner.read_exact(&mut header)?;
        let (offset, len) = parse_header(&header);

        let available = remaining - RECORD_HEADER_SIZE as u64;
        if available < len {
            return Ok(Decoded::Truncated {
                offset,
                missing: len - available,
            });
        }

        let mut payload = BytesMut::zeroed(len as usize);
        self.inner.read_exact(&mut payload)?;
        self.position += RECORD_HEADER_SIZE as u64 + len;

        Ok(Decoded::Record(Record {
            offset,
            payload: payload.freeze(),
        }))
    }
}

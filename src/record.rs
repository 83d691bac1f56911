//! Record framing for length-prefixed binary streams.
//!
//! Every record starts with a 5-byte ASCII decimal prefix holding the
//! *total* record length, prefix included. [`RecordScanner`] walks those
//! prefixes without reading record bodies, and [`plan_partitions`] groups
//! whole records into [`PartitionRange`]s according to a [`SplitPolicy`].
//!
//! # Notes
//! - An empty stream yields no records and no partitions.
//! - A stream that ends inside a prefix, or a record whose declared length
//!   runs past the end of the stream, is a [`FramingError`]; nothing is
//!   silently truncated.
//! - Partitions never cut a record: a range closes only after a whole record
//!   has pushed it to (or past) the policy's bound.

use crate::error::FramingError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FormatResult};
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

/// Width of the ASCII decimal length prefix.
pub const PREFIX_LEN: usize = 5;

/// Default byte target for a partition.
pub const DEFAULT_PARTITION_BYTES: u64 = 1_000_000;

/// How the scanner decides that a partition is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitPolicy {
    /// Close a partition once its byte length reaches or exceeds the target.
    Bytes(u64),
    /// Close a partition after this many records.
    Records(u64),
}

impl Default for SplitPolicy {
    fn default() -> Self {
        Self::Bytes(DEFAULT_PARTITION_BYTES)
    }
}

impl SplitPolicy {
    /// True once a partition holding `bytes` across `records` must close.
    #[must_use]
    pub fn is_full(self, bytes: u64, records: u64) -> bool {
        match self {
            Self::Bytes(size) => bytes >= size,
            Self::Records(n) => records >= n,
        }
    }

    /// The bound itself, whatever its unit.
    #[must_use]
    pub fn bound(self) -> u64 {
        match self {
            Self::Bytes(n) | Self::Records(n) => n,
        }
    }
}

/// Rendered into partition and manifest names: `1000000` or `r500`.
impl Display for SplitPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self {
            Self::Bytes(size) => write!(f, "{size}"),
            Self::Records(n) => write!(f, "r{n}"),
        }
    }
}

/// One record located in the stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordSpan {
    /// Offset of the first prefix byte.
    pub offset: u64,
    /// Total length, prefix included.
    pub len: u64,
}

/// A contiguous run of whole records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionRange {
    /// 0-based sequence number; defines merge order.
    pub index: usize,
    pub offset: u64,
    pub len: u64,
    pub records: u64,
}

impl PartitionRange {
    fn starting_at(index: usize, offset: u64) -> Self {
        Self {
            index,
            offset,
            len: 0,
            records: 0,
        }
    }

    /// Offset one past the last byte of the range.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }
}

/// Record and byte totals of a stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RecordStats {
    pub records: u64,
    pub bytes: u64,
}

/// Walks the length prefixes of a record stream, seeking over record bodies.
///
/// The scanner reads from the start of the stream regardless of the
/// reader's initial position.
pub struct RecordScanner<R: Read + Seek> {
    reader: BufReader<R>,
    cursor: u64,
    end: u64,
    done: bool,
}

impl<R: Read + Seek> RecordScanner<R> {
    /// Wrap `inner`, measuring the stream length up front.
    ///
    /// # Errors
    /// Returns an error if the stream cannot be seeked.
    pub fn new(mut inner: R) -> Result<Self, FramingError> {
        let end = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self {
            reader: BufReader::new(inner),
            cursor: 0,
            end,
            done: false,
        })
    }

    /// Total length of the underlying stream.
    #[must_use]
    pub fn stream_len(&self) -> u64 {
        self.end
    }

    /// Locate the next record, or `None` at a clean end of stream.
    ///
    /// # Errors
    /// Returns a [`FramingError`] for a truncated or malformed prefix, or a
    /// declared length that overruns the stream.
    pub fn next_record(&mut self) -> Result<Option<RecordSpan>, FramingError> {
        let offset = self.cursor;
        let mut prefix = [0u8; PREFIX_LEN];
        let read = read_up_to(&mut self.reader, &mut prefix)?;
        if read == 0 {
            return Ok(None);
        }
        if read < PREFIX_LEN {
            return Err(FramingError::TruncatedPrefix { offset, read });
        }
        let declared = parse_prefix(&prefix).ok_or_else(|| FramingError::InvalidPrefix {
            offset,
            prefix: String::from_utf8_lossy(&prefix).into_owned(),
        })?;
        if declared < PREFIX_LEN as u64 {
            return Err(FramingError::ShortRecord { offset, declared });
        }
        let remaining = self.end.saturating_sub(offset);
        if declared > remaining {
            return Err(FramingError::Overrun {
                offset,
                declared,
                remaining,
            });
        }
        // Bounded by `remaining`, which came from a seek offset, so it fits in i64.
        let skip = i64::try_from(declared - PREFIX_LEN as u64)
            .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;
        self.reader.seek_relative(skip)?;
        self.cursor = offset + declared;
        Ok(Some(RecordSpan {
            offset,
            len: declared,
        }))
    }
}

impl<R: Read + Seek> Iterator for RecordScanner<R> {
    type Item = Result<RecordSpan, FramingError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.next_record().transpose();
        if !matches!(item, Some(Ok(_))) {
            self.done = true;
        }
        item
    }
}

/// Read until `buf` is full or the stream ends; returns the byte count.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Decode a left-padded ASCII decimal prefix. Leading spaces are padding.
fn parse_prefix(prefix: &[u8; PREFIX_LEN]) -> Option<u64> {
    let digits = prefix.iter().skip_while(|b| **b == b' ');
    let mut value: u64 = 0;
    let mut seen = false;
    for b in digits {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value * 10 + u64::from(b - b'0');
        seen = true;
    }
    seen.then_some(value)
}

/// Group the records of `reader` into partitions according to `policy`.
///
/// The ranges cover the whole stream in order. An empty stream yields an
/// empty vector.
///
/// # Errors
/// Returns a [`FramingError`] if the stream cannot be framed. No ranges are
/// returned in that case, even for the records framed before the fault.
pub fn plan_partitions<R: Read + Seek>(
    reader: R,
    policy: SplitPolicy,
) -> Result<Vec<PartitionRange>, FramingError> {
    let mut ranges = Vec::new();
    let mut current = PartitionRange::starting_at(0, 0);
    for span in RecordScanner::new(reader)? {
        let span = span?;
        current.len += span.len;
        current.records += 1;
        if policy.is_full(current.len, current.records) {
            let next = PartitionRange::starting_at(current.index + 1, current.end());
            ranges.push(current);
            current = next;
        }
    }
    if current.records > 0 {
        ranges.push(current);
    }
    Ok(ranges)
}

/// Count the records in the file at `path`.
///
/// # Errors
/// Returns an error if the file cannot be opened or is not a well-framed
/// record stream.
pub fn count_records(path: impl AsRef<Path>) -> Result<RecordStats> {
    let path = path.as_ref();
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut stats = RecordStats::default();
    for span in RecordScanner::new(f)? {
        let span = span.with_context(|| format!("frame records in {}", path.display()))?;
        stats.records += 1;
        stats.bytes += span.len;
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_accepts_zero_and_space_padding() {
        assert_eq!(parse_prefix(b"00123"), Some(123));
        assert_eq!(parse_prefix(b"  123"), Some(123));
        assert_eq!(parse_prefix(b"99999"), Some(99_999));
    }

    #[test]
    fn prefix_rejects_non_digits() {
        assert_eq!(parse_prefix(b"12a45"), None);
        assert_eq!(parse_prefix(b"     "), None);
        assert_eq!(parse_prefix(b"123  "), None);
        assert_eq!(parse_prefix(b"-1234"), None);
    }

    #[test]
    fn policy_display_is_name_safe() {
        assert_eq!(SplitPolicy::Bytes(300).to_string(), "300");
        assert_eq!(SplitPolicy::Records(7).to_string(), "r7");
        assert_eq!(SplitPolicy::default(), SplitPolicy::Bytes(1_000_000));
    }
}

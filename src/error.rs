//! Error taxonomy for splitting and pipeline runs.
//!
//! Lower layers return `anyhow::Result` with file-level context. The two
//! enums here are the errors callers are expected to match on:
//! [`FramingError`] for malformed record streams and [`PipelineError`] for
//! the stage or unit that stopped a run.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A record stream that cannot be framed into whole records.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("truncated length prefix at offset {offset}: expected 5 bytes, read {read}")]
    TruncatedPrefix { offset: u64, read: usize },
    #[error("invalid length prefix {prefix:?} at offset {offset}")]
    InvalidPrefix { offset: u64, prefix: String },
    #[error("record at offset {offset} declares length {declared}, shorter than its 5-byte prefix")]
    ShortRecord { offset: u64, declared: u64 },
    #[error("record at offset {offset} declares {declared} bytes but only {remaining} remain")]
    Overrun {
        offset: u64,
        declared: u64,
        remaining: u64,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The stage (or unit) that stopped a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("split stage failed for {}", .source_path.display())]
    Split {
        source_path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("source {} contains no records", .0.display())]
    EmptySource(PathBuf),
    #[error("convert unit #{index} failed for partition {}", .partition.display())]
    Convert {
        index: usize,
        partition: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("merge stage failed for {}", .output.display())]
    Merge {
        output: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

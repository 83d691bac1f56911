//! # Ironsplit
//!
//! Batch conversion of large files of **length-prefixed binary records**
//! (each record starts with a 5-byte ASCII decimal total length, as in
//! MARC 21). A file is split into size-bounded partitions on record
//! boundaries, each partition is converted independently, possibly in
//! parallel and usually by an external program, and the converted
//! partitions are merged back in their original order.
//!
//! ## Key Features
//!
//! - **Record-aligned splitting** - partitions always hold whole records;
//!   framing errors are fatal, never silently truncated
//! - **Idempotent stages** - every stage output has a deterministic name
//!   derived from its inputs; an existing output means the stage is done
//! - **Atomic publication** - outputs are written to private temporary files
//!   and renamed into place, so a target is either absent or complete
//! - **Bounded fan-out** - convert units run on a fixed-size worker pool
//! - **Ordered fan-in** - the merge follows manifest order, whatever order
//!   the conversions finished in
//! - **Resumable** - a failed run leaves its published artifacts behind and
//!   a rerun only redoes what is missing
//!
//! ## Quick Start
//!
//! ```no_run
//! use ironsplit::{PipelineConfig, Runner, SplitPolicy};
//! use std::path::Path;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = PipelineConfig {
//!     work_root: "/var/tmp/conversion".into(),
//!     policy: SplitPolicy::Bytes(50_000_000),
//!     workers: 4,
//!     ..PipelineConfig::new("catalog.mrc")
//! };
//!
//! // Any `Fn(&Path, &Path) -> anyhow::Result<()>` is a converter.
//! let upper = |input: &Path, output: &Path| -> anyhow::Result<()> {
//!     let data = std::fs::read(input)?;
//!     std::fs::write(output, data.to_ascii_uppercase())?;
//!     Ok(())
//! };
//!
//! let report = Runner::from_config(&config).run(&config, &upper)?;
//! println!("merged {} bytes into {}", report.bytes_merged, report.output.display());
//! # Ok(())
//! # }
//! ```
//!
//! ## Stages
//!
//! | stage   | target                                  | module       |
//! |---------|-----------------------------------------|--------------|
//! | split   | manifest + partition files              | [`split`]    |
//! | convert | one converted file per partition        | [`convert`]  |
//! | merge   | the final output                        | [`merge`]    |
//!
//! Target names come from [`layout`]; coordination lives in [`runner`].

pub mod config;
pub mod convert;
pub mod error;
pub mod layout;
pub mod manifest;
pub mod merge;
pub mod publish;
pub mod record;
pub mod runner;
pub mod split;

pub use config::{CommandSpec, EmptySourcePolicy, PipelineConfig};
pub use convert::{CommandConverter, ConvertUnit, Converter};
pub use error::{FramingError, PipelineError};
pub use layout::{SourceIdentity, StageLayout, StageStatus};
pub use manifest::{Manifest, PartitionEntry};
pub use record::{PartitionRange, RecordScanner, RecordStats, SplitPolicy, count_records, plan_partitions};
pub use runner::{ExecMode, Plan, RunReport, Runner, UnitReport, UnitStatus};
pub use split::{run_split, split_to_directory};

/// Milliseconds since `started`, saturating at `u64::MAX`.
pub(crate) fn elapsed_ms(started: std::time::Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

//! Partition writing and the split stage.
//!
//! The split stage frames the whole source first and only then writes
//! anything, so a framing error publishes no partitions and no manifest.
//! Partitions are copied straight from the source by seeking to each range;
//! the source is never buffered whole.

use crate::elapsed_ms;
use crate::layout::{SourceIdentity, StageLayout, StageStatus};
use crate::manifest::{Manifest, PartitionEntry};
use crate::publish::StagedFile;
use crate::record::{PartitionRange, SplitPolicy, plan_partitions};
use anyhow::{Context, Result, bail};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Result of running (or skipping) the split stage.
#[derive(Clone, Debug)]
pub struct SplitOutcome {
    pub manifest: Manifest,
    pub status: StageStatus,
    pub elapsed: Duration,
}

/// Copy each range of `source` into its own atomically published file.
///
/// `target_for` names the file for a range. Returns the published paths in
/// range order.
///
/// # Errors
/// Returns an error if the source cannot be read, if it is shorter than a
/// range claims, or if a partition cannot be published. Partitions published
/// before the failure stay in place.
pub fn write_partitions(
    source: &Path,
    ranges: &[PartitionRange],
    mut target_for: impl FnMut(&PartitionRange) -> PathBuf,
    temp_prefix: &str,
) -> Result<Vec<PathBuf>> {
    let mut src = File::open(source).with_context(|| format!("open {}", source.display()))?;
    let mut written = Vec::with_capacity(ranges.len());
    for range in ranges {
        let mut staged = StagedFile::create(target_for(range), temp_prefix)?;
        src.seek(SeekFrom::Start(range.offset))
            .with_context(|| format!("seek {} to {}", source.display(), range.offset))?;
        let copied = io::copy(&mut (&mut src).take(range.len), &mut staged)
            .with_context(|| format!("copy partition #{} to {}", range.index, staged.path().display()))?;
        if copied != range.len {
            bail!(
                "source {} ended early: partition #{} expected {} bytes, got {copied}",
                source.display(),
                range.index,
                range.len
            );
        }
        let path = staged.commit()?;
        debug!(index = range.index, bytes = range.len, records = range.records, path = %path.display(), "partition written");
        written.push(path);
    }
    Ok(written)
}

/// Run the split stage for `id`, or reuse its published manifest.
///
/// # Errors
/// Returns an error (a [`FramingError`](crate::FramingError) underneath the
/// context) if the source is malformed, or any I/O error while writing
/// partitions or the manifest.
pub fn run_split(layout: &StageLayout, id: &SourceIdentity) -> Result<SplitOutcome> {
    let started = Instant::now();
    let manifest_path = layout.manifest_path(id);
    if manifest_path.exists() {
        let manifest = Manifest::load(&manifest_path)?;
        if manifest.source != id.path() || manifest.policy != id.policy() {
            bail!(
                "manifest {} belongs to {} ({}), not {} ({})",
                manifest_path.display(),
                manifest.source.display(),
                manifest.policy,
                id.path().display(),
                id.policy()
            );
        }
        debug!(manifest = %manifest_path.display(), partitions = manifest.len(), "split target exists, skipping");
        return Ok(SplitOutcome {
            manifest,
            status: StageStatus::Skipped,
            elapsed: started.elapsed(),
        });
    }

    let source = id.path();
    let f = File::open(source).with_context(|| format!("open {}", source.display()))?;
    let source_len = f
        .metadata()
        .with_context(|| format!("stat {}", source.display()))?
        .len();
    let ranges = plan_partitions(f, id.policy())
        .with_context(|| format!("frame records in {}", source.display()))?;

    let temp_prefix = layout.temp_prefix(id);
    let names: Vec<String> = ranges
        .iter()
        .map(|r| layout.partition_name(id, r.index))
        .collect();
    write_partitions(
        source,
        &ranges,
        |r| layout.partition_path(&names[r.index]),
        &temp_prefix,
    )?;

    let manifest = Manifest {
        source: source.to_path_buf(),
        policy: id.policy(),
        source_len,
        partitions: names
            .into_iter()
            .zip(ranges)
            .map(|(name, range)| PartitionEntry { name, range })
            .collect(),
    };
    manifest.save(&manifest_path, &temp_prefix)?;

    let elapsed = started.elapsed();
    info!(
        source = %source.display(),
        policy = %id.policy(),
        partitions = manifest.len(),
        elapsed_ms = elapsed_ms(started),
        "split complete"
    );
    Ok(SplitOutcome {
        manifest,
        status: StageStatus::Completed,
        elapsed,
    })
}

/// Split `source` into `<dir>/<prefix><NNNNNNNN>` files, without staging.
///
/// Returns the written paths in sequence order.
///
/// # Errors
/// Returns an error if `dir` is not an existing directory, if the source is
/// malformed, or if a partition cannot be written.
pub fn split_to_directory(
    source: impl AsRef<Path>,
    dir: impl AsRef<Path>,
    prefix: &str,
    policy: SplitPolicy,
) -> Result<Vec<PathBuf>> {
    let source = source.as_ref();
    let dir = dir.as_ref();
    if !dir.is_dir() {
        bail!("not a directory: {}", dir.display());
    }
    let f = File::open(source).with_context(|| format!("open {}", source.display()))?;
    let ranges = plan_partitions(f, policy)
        .with_context(|| format!("frame records in {}", source.display()))?;
    write_partitions(
        source,
        &ranges,
        |r| dir.join(format!("{prefix}{:08}", r.index)),
        &format!(".{prefix}"),
    )
}

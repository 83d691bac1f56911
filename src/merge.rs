//! Fan-in: concatenation of converted partitions and post-merge cleanup.

use crate::elapsed_ms;
use crate::layout::StageStatus;
use crate::publish::StagedFile;
use anyhow::{Context, Result};
use std::fs::{File, remove_file};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Clone, Debug)]
pub struct MergeOutcome {
    pub output: PathBuf,
    pub status: StageStatus,
    /// Bytes written; zero when skipped.
    pub bytes: u64,
    pub elapsed: Duration,
}

/// Concatenate `inputs`, in the given order, into `output`.
///
/// The output is published atomically once every input has been copied. An
/// existing `output` is left untouched and reported as skipped.
///
/// # Errors
/// Returns an error if any input cannot be read or the output cannot be
/// published. Nothing is published and no input is modified in that case.
pub fn merge_outputs(inputs: &[PathBuf], output: &Path, temp_prefix: &str) -> Result<MergeOutcome> {
    let started = Instant::now();
    if output.exists() {
        return Ok(MergeOutcome {
            output: output.to_path_buf(),
            status: StageStatus::Skipped,
            bytes: 0,
            elapsed: started.elapsed(),
        });
    }
    let mut staged = StagedFile::create(output, temp_prefix)?;
    let mut bytes = 0u64;
    for input in inputs {
        let mut f = File::open(input).with_context(|| format!("open {}", input.display()))?;
        bytes += io::copy(&mut f, staged.file_mut())
            .with_context(|| format!("append {} to {}", input.display(), output.display()))?;
    }
    let output = staged.commit()?;
    let elapsed = started.elapsed();
    info!(
        output = %output.display(),
        parts = inputs.len(),
        bytes,
        elapsed_ms = elapsed_ms(started),
        "merge complete"
    );
    Ok(MergeOutcome {
        output,
        status: StageStatus::Completed,
        bytes,
        elapsed,
    })
}

/// Best-effort removal of intermediate files.
///
/// Files that are already gone count as removed. Returns the paths that
/// could not be removed; each failure is logged.
pub fn remove_intermediates<'a>(paths: impl IntoIterator<Item = &'a Path>) -> Vec<PathBuf> {
    let mut failed = Vec::new();
    for path in paths {
        match remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not remove intermediate file");
                failed.push(path.to_path_buf());
            }
        }
    }
    failed
}

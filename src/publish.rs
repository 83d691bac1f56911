//! Atomic publication of stage outputs.
//!
//! Outputs are written into a private temporary file next to their target and
//! renamed into place only after a flush and `fsync`. A target path therefore
//! either does not exist or holds complete data. Dropping a [`StagedFile`]
//! without committing removes the temporary file.

use anyhow::{Context, Result};
use glob::{Pattern, glob};
use std::fs::{File, create_dir_all, remove_file};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::{Builder, NamedTempFile};

/// Suffix shared by every private temporary file.
pub const TEMP_SUFFIX: &str = ".tmp";

/// A file being written for later atomic publication at `target`.
pub struct StagedFile {
    tmp: NamedTempFile,
    target: PathBuf,
}

impl StagedFile {
    /// Create a private temporary file beside `target`, named `<prefix>*.tmp`.
    ///
    /// # Errors
    /// Returns an error if the target directory or the temporary file cannot
    /// be created.
    pub fn create(target: impl Into<PathBuf>, prefix: &str) -> Result<Self> {
        let target = target.into();
        let dir = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        create_dir_all(&dir).with_context(|| format!("mkdir -p {}", dir.display()))?;
        let tmp = Builder::new()
            .prefix(prefix)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&dir)
            .with_context(|| format!("create temporary file in {}", dir.display()))?;
        Ok(Self { tmp, target })
    }

    /// Where the data is being written until [`commit`](Self::commit).
    #[must_use]
    pub fn path(&self) -> &Path {
        self.tmp.path()
    }

    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn file_mut(&mut self) -> &mut File {
        self.tmp.as_file_mut()
    }

    /// Flush, sync and rename into the target path.
    ///
    /// # Errors
    /// Returns an error if syncing or renaming fails; the temporary file is
    /// removed in that case.
    pub fn commit(mut self) -> Result<PathBuf> {
        self.tmp
            .flush()
            .with_context(|| format!("flush {}", self.tmp.path().display()))?;
        self.tmp
            .as_file()
            .sync_all()
            .with_context(|| format!("sync {}", self.tmp.path().display()))?;
        let target = self.target;
        self.tmp
            .persist(&target)
            .map_err(|e| e.error)
            .with_context(|| format!("publish {}", target.display()))?;
        Ok(target)
    }
}

impl Write for StagedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tmp.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.tmp.flush()
    }
}

/// Atomically publish `data` at `target`.
///
/// # Errors
/// Returns an error if staging, writing or publishing fails.
pub fn write_atomic(target: impl Into<PathBuf>, prefix: &str, data: &[u8]) -> Result<PathBuf> {
    let mut staged = StagedFile::create(target, prefix)?;
    staged
        .write_all(data)
        .with_context(|| format!("write {}", staged.path().display()))?;
    staged.commit()
}

/// Remove temporary files named `<prefix>*.tmp` directly under `dir`.
///
/// Leftovers only exist when an earlier process died mid-write. Returns the
/// number of files removed.
///
/// # Errors
/// Returns an error if the glob pattern is invalid. Individual removal
/// failures are skipped.
pub fn sweep_stale(dir: &Path, prefix: &str) -> Result<usize> {
    let pattern = format!(
        "{}/{}*{TEMP_SUFFIX}",
        Pattern::escape(&dir.to_string_lossy()),
        Pattern::escape(prefix)
    );
    let mut removed = 0;
    for entry in glob(&pattern).with_context(|| format!("invalid glob pattern: {pattern}"))? {
        let Ok(path) = entry else { continue };
        if remove_file(&path).is_ok() {
            tracing::debug!(path = %path.display(), "removed stale temporary file");
            removed += 1;
        }
    }
    Ok(removed)
}

//! The split stage's published target.
//!
//! A manifest lists partition files in sequence order; that order is the
//! merge order. It is stored as pretty-printed JSON and published atomically,
//! so its presence alone marks the split as done.

use crate::publish::write_atomic;
use crate::record::{PartitionRange, SplitPolicy};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// One partition file produced by the split.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionEntry {
    /// File name relative to the work root.
    pub name: String,
    #[serde(flatten)]
    pub range: PartitionRange,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub source: PathBuf,
    pub policy: SplitPolicy,
    pub source_len: u64,
    pub partitions: Vec<PartitionEntry>,
}

impl Manifest {
    /// Read and check a published manifest.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or if its
    /// partitions are not numbered `0..n` in order.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
        let manifest: Self = serde_json::from_reader(BufReader::new(f))
            .with_context(|| format!("parse manifest {}", path.display()))?;
        for (expected, entry) in manifest.partitions.iter().enumerate() {
            if entry.range.index != expected {
                bail!(
                    "manifest {} out of order: entry {expected} has index {}",
                    path.display(),
                    entry.range.index
                );
            }
        }
        Ok(manifest)
    }

    /// Atomically publish this manifest at `target`.
    ///
    /// # Errors
    /// Returns an error if serialization or publication fails.
    pub fn save(&self, target: impl Into<PathBuf>, temp_prefix: &str) -> Result<PathBuf> {
        let target = target.into();
        let data = serde_json::to_vec_pretty(self)
            .with_context(|| format!("serialize manifest for {}", target.display()))?;
        write_atomic(target, temp_prefix, &data)
    }

    /// Partition file names in merge order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.partitions.iter().map(|p| p.name.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }
}

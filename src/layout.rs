//! Stage target resolution.
//!
//! Every stage output lives under one work root and is named purely from the
//! stage's logical inputs, so a rerun with the same inputs lands on the same
//! paths and can tell finished work apart from missing work by existence
//! alone. Nothing here touches the filesystem except [`SourceIdentity::resolve`].
//!
//! | stage     | target                                              |
//! |-----------|-----------------------------------------------------|
//! | split     | `<root>/<prefix>-<policy>-<digest>.manifest.json`   |
//! | partition | `<root>/<prefix>-<policy>-<digest>-<NNNNNNNN>`      |
//! | convert   | `<root>/convert-<digest(partition path)>.<ext>`     |
//! | merge     | `<root>/<source stem>.<ext>` unless overridden      |

use crate::record::SplitPolicy;
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Whether a stage did its work or found its target already published.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Skipped,
}

/// Hex characters kept from a SHA-256 digest (128 bits).
const DIGEST_HEX_LEN: usize = 32;

/// SHA-256 of `parts`, each terminated by a NUL, truncated to [`DIGEST_HEX_LEN`].
#[must_use]
pub fn digest_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
        hasher.update([0u8]);
    }
    let mut hex: String = hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();
    hex.truncate(DIGEST_HEX_LEN);
    hex
}

/// The logical identity of one split: absolute source path plus policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceIdentity {
    path: PathBuf,
    policy: SplitPolicy,
    digest: String,
}

impl SourceIdentity {
    /// Build an identity from an already-absolute source path.
    #[must_use]
    pub fn new(path: PathBuf, policy: SplitPolicy) -> Self {
        let label = policy.to_string();
        let digest = digest_hex(&[path.as_os_str().as_encoded_bytes(), label.as_bytes()]);
        Self {
            path,
            policy,
            digest,
        }
    }

    /// Canonicalize `source` and build its identity.
    ///
    /// # Errors
    /// Returns an error if the source does not exist or cannot be resolved.
    pub fn resolve(source: impl AsRef<Path>, policy: SplitPolicy) -> Result<Self> {
        let source = source.as_ref();
        let path = source
            .canonicalize()
            .with_context(|| format!("resolve source {}", source.display()))?;
        Ok(Self::new(path, policy))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn policy(&self) -> SplitPolicy {
        self.policy
    }

    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

/// Resolves stage targets under a single work root.
#[derive(Clone, Debug)]
pub struct StageLayout {
    root: PathBuf,
    prefix: String,
    extension: String,
}

impl StageLayout {
    /// `root` should be absolute; relative roots make every target relative
    /// to whatever directory the process happens to run in.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into(),
            extension: extension.into(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn stem(&self, id: &SourceIdentity) -> String {
        format!("{}-{}-{}", self.prefix, id.policy(), id.digest())
    }

    /// Split stage target; its existence means the split is done.
    #[must_use]
    pub fn manifest_path(&self, id: &SourceIdentity) -> PathBuf {
        self.root.join(format!("{}.manifest.json", self.stem(id)))
    }

    /// File name of partition `index`; stored in the manifest.
    #[must_use]
    pub fn partition_name(&self, id: &SourceIdentity, index: usize) -> String {
        format!("{}-{index:08}", self.stem(id))
    }

    #[must_use]
    pub fn partition_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Convert stage target for the partition at `partition`.
    #[must_use]
    pub fn converted_path(&self, partition: &Path) -> PathBuf {
        let digest = digest_hex(&[partition.as_os_str().as_encoded_bytes()]);
        self.root.join(format!("convert-{digest}.{}", self.extension))
    }

    /// Merge target used when no explicit output is configured.
    ///
    /// Named after the source file, not the digest, so the final artifact
    /// has a predictable name.
    #[must_use]
    pub fn default_output(&self, source: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .map_or_else(|| "output".into(), |s| s.to_string_lossy().into_owned());
        self.root.join(format!("{stem}.{}", self.extension))
    }

    /// File-name prefix for this pipeline's private temporary files.
    #[must_use]
    pub fn temp_prefix(&self, id: &SourceIdentity) -> String {
        format!(".{}.", self.stem(id))
    }
}

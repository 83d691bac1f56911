//! Pipeline configuration.
//!
//! [`PipelineConfig`] carries everything a run needs, including the work
//! root, so no component looks at the process's current directory on its
//! own. Configs can be built in code (all fields have defaults except the
//! source) or loaded from a JSON file with [`PipelineConfig::from_json_file`].
//!
//! ```no_run
//! use ironsplit::config::PipelineConfig;
//! use ironsplit::SplitPolicy;
//!
//! let config = PipelineConfig {
//!     work_root: "/var/tmp/work".into(),
//!     policy: SplitPolicy::Bytes(50_000_000),
//!     workers: 8,
//!     ..PipelineConfig::new("dump.mrc")
//! };
//! ```

use crate::error::PipelineError;
use crate::record::SplitPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// What to do with a source that holds no records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptySourcePolicy {
    /// Publish an empty output.
    #[default]
    EmptyOutput,
    /// Fail the run with [`PipelineError::EmptySource`].
    Reject,
}

/// External converter invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    /// May contain `{input}` and `{output}` placeholders.
    #[serde(default)]
    pub args: Vec<String>,
    /// Kill and fail a conversion running longer than this.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl CommandSpec {
    /// # Errors
    /// Returns [`PipelineError::Config`] if no program is set or the timeout is zero.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.program.trim().is_empty() {
            return Err(PipelineError::Config("converter program is empty".into()));
        }
        if self.timeout_secs == Some(0) {
            return Err(PipelineError::Config("converter timeout must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub source: PathBuf,
    /// Directory holding every intermediate and (by default) final artifact.
    pub work_root: PathBuf,
    pub policy: SplitPolicy,
    /// Maximum number of concurrent convert units.
    pub workers: usize,
    /// Final output; defaults to `<work_root>/<source stem>.<output_extension>`.
    pub output: Option<PathBuf>,
    pub output_extension: String,
    /// Leading component of partition and manifest names.
    pub prefix: String,
    pub empty_source: EmptySourcePolicy,
    /// Abandon not-yet-started convert units after the first failure.
    pub fail_fast: bool,
    pub converter: CommandSpec,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::new(),
            work_root: PathBuf::from("."),
            policy: SplitPolicy::default(),
            workers: default_workers(),
            output: None,
            output_extension: "out".into(),
            prefix: "split".into(),
            empty_source: EmptySourcePolicy::default(),
            fail_fast: false,
            converter: CommandSpec::default(),
        }
    }
}

/// A small worker count: the number of CPUs, capped at four.
#[must_use]
pub fn default_workers() -> usize {
    num_cpus::get().clamp(1, 4)
}

impl PipelineConfig {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    /// Load a config from a JSON file. Missing fields take their defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
        serde_json::from_reader(BufReader::new(f))
            .with_context(|| format!("parse config {}", path.display()))
    }

    /// # Errors
    /// Returns [`PipelineError::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.source.as_os_str().is_empty() {
            return Err(PipelineError::Config("source path is required".into()));
        }
        if self.policy.bound() == 0 {
            return Err(PipelineError::Config(format!(
                "partition bound must be positive, got {:?}",
                self.policy
            )));
        }
        if self.workers == 0 {
            return Err(PipelineError::Config("workers must be at least 1".into()));
        }
        if self.output_extension.is_empty() || self.output_extension.contains(['/', '\\']) {
            return Err(PipelineError::Config(format!(
                "invalid output extension {:?}",
                self.output_extension
            )));
        }
        if self.prefix.is_empty() || self.prefix.contains(['/', '\\']) {
            return Err(PipelineError::Config(format!("invalid prefix {:?}", self.prefix)));
        }
        Ok(())
    }

    /// The work root as an absolute path.
    ///
    /// # Errors
    /// Returns an error if the current directory is needed and unavailable.
    pub fn resolved_work_root(&self) -> Result<PathBuf> {
        std::path::absolute(&self.work_root)
            .with_context(|| format!("resolve work root {}", self.work_root.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid_once_source_is_set() {
        assert!(PipelineConfig::default().validate().is_err());
        let config = PipelineConfig::new("a.mrc");
        assert!(config.validate().is_ok());
        assert_eq!(config.policy, SplitPolicy::Bytes(1_000_000));
        assert!((1..=4).contains(&config.workers));
    }

    #[test]
    fn rejects_zero_bounds_and_workers() {
        let zero_size = PipelineConfig {
            policy: SplitPolicy::Bytes(0),
            ..PipelineConfig::new("a.mrc")
        };
        assert!(matches!(zero_size.validate(), Err(PipelineError::Config(_))));

        let zero_workers = PipelineConfig {
            workers: 0,
            ..PipelineConfig::new("a.mrc")
        };
        assert!(matches!(zero_workers.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn json_fields_fall_back_to_defaults() -> Result<()> {
        let config: PipelineConfig = serde_json::from_str(
            r#"{"source": "a.mrc", "policy": {"records": 100}, "converter": {"program": "cat"}}"#,
        )?;
        assert_eq!(config.policy, SplitPolicy::Records(100));
        assert_eq!(config.output_extension, "out");
        assert_eq!(config.converter.args, Vec::<String>::new());
        assert!(config.converter.validate().is_ok());
        Ok(())
    }
}

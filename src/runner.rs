//! Pipeline coordination: split → convert (fan-out) → merge (fan-in).
//!
//! A run is planned in two phases. The split stage runs (or is skipped)
//! first as a hard barrier; its manifest then fixes the number of convert
//! units, and the static fan-out/fan-in plan is built from it. Every stage
//! checks its own target before doing work, so a rerun with the same inputs
//! resumes from the last published stage.
//!
//! ```no_run
//! use ironsplit::{CommandConverter, PipelineConfig, Runner};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = PipelineConfig::new("dump.mrc");
//! let converter = CommandConverter::new("marctojson", vec![]);
//! let report = Runner::from_config(&config).run(&config, &converter)?;
//! println!("{} partitions -> {}", report.partitions, report.output.display());
//! # Ok(())
//! # }
//! ```

use crate::config::{EmptySourcePolicy, PipelineConfig};
use crate::convert::{ConvertUnit, Converter, invoke};
use crate::elapsed_ms;
use crate::error::PipelineError;
use crate::layout::{SourceIdentity, StageLayout, StageStatus};
use crate::manifest::Manifest;
use crate::merge::{merge_outputs, remove_intermediates};
use crate::publish::sweep_stale;
use crate::split::run_split;
use anyhow::anyhow;
use rayon::prelude::*;
use serde::Serialize;
use std::fs::{canonicalize, create_dir_all};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecMode {
    Sequential,
    /// Convert units on a dedicated pool; `None` uses one thread per CPU.
    Parallel { threads: Option<usize> },
}

pub struct Runner {
    pub mode: ExecMode,
}

impl Default for Runner {
    fn default() -> Self {
        Self {
            mode: ExecMode::Parallel { threads: None },
        }
    }
}

/// Terminal state of one convert unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Converted,
    Skipped,
    Failed,
    /// Not started because another unit failed first (fail-fast only).
    Abandoned,
}

#[derive(Clone, Debug, Serialize)]
pub struct UnitReport {
    pub index: usize,
    pub partition: PathBuf,
    pub target: PathBuf,
    pub status: UnitStatus,
    pub elapsed_ms: u64,
}

/// Summary of a successful run.
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub source: PathBuf,
    pub output: PathBuf,
    /// `None` when the output already existed and nothing ran.
    pub split: Option<StageStatus>,
    pub partitions: usize,
    pub units: Vec<UnitReport>,
    pub merge: StageStatus,
    pub bytes_merged: u64,
    /// Intermediate files that could not be removed after the merge.
    pub cleanup_failures: Vec<PathBuf>,
    pub elapsed_ms: u64,
}

impl RunReport {
    /// Number of units whose status is `status`.
    #[must_use]
    pub fn count(&self, status: UnitStatus) -> usize {
        self.units.iter().filter(|u| u.status == status).count()
    }
}

/// The static fan-out/fan-in plan derived from a manifest.
#[derive(Clone, Debug)]
pub struct Plan {
    pub manifest_path: PathBuf,
    /// One unit per manifest entry, in manifest order.
    pub units: Vec<ConvertUnit>,
    pub output: PathBuf,
}

impl Plan {
    #[must_use]
    pub fn build(layout: &StageLayout, manifest_path: PathBuf, manifest: &Manifest, output: PathBuf) -> Self {
        let units = manifest
            .partitions
            .iter()
            .map(|entry| {
                let partition = layout.partition_path(&entry.name);
                let target = layout.converted_path(&partition);
                ConvertUnit {
                    index: entry.range.index,
                    partition,
                    target,
                }
            })
            .collect();
        Self {
            manifest_path,
            units,
            output,
        }
    }

    /// Convert targets in merge order.
    #[must_use]
    pub fn targets(&self) -> Vec<PathBuf> {
        self.units.iter().map(|u| u.target.clone()).collect()
    }

    /// Everything the merge makes obsolete, manifest last.
    fn intermediates(&self) -> impl Iterator<Item = &Path> {
        self.units
            .iter()
            .map(|u| u.target.as_path())
            .chain(self.units.iter().map(|u| u.partition.as_path()))
            .chain(std::iter::once(self.manifest_path.as_path()))
    }
}

struct UnitResult {
    report: UnitReport,
    error: Option<anyhow::Error>,
}

/// Remove intermediates a crash may have left between publishing `output`
/// and cleaning up after it.
fn finish_cleanup(layout: &StageLayout, id: &SourceIdentity, output: &Path) -> Vec<PathBuf> {
    let manifest_path = layout.manifest_path(id);
    if !manifest_path.exists() {
        return Vec::new();
    }
    let manifest = match Manifest::load(&manifest_path) {
        Ok(manifest) => manifest,
        Err(e) => {
            let message = format!("{e:#}");
            warn!(manifest = %manifest_path.display(), error = %message, "cannot read leftover manifest");
            return vec![manifest_path];
        }
    };
    let plan = Plan::build(layout, manifest_path, &manifest, output.to_path_buf());
    info!(partitions = plan.units.len(), "removing intermediates of an interrupted cleanup");
    let failures = remove_intermediates(plan.intermediates());
    if !failures.is_empty() {
        warn!(count = failures.len(), "some intermediate files were left behind");
    }
    failures
}

impl Runner {
    /// Parallel with `config.workers` threads, or sequential for one worker.
    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        let mode = if config.workers <= 1 {
            ExecMode::Sequential
        } else {
            ExecMode::Parallel {
                threads: Some(config.workers),
            }
        };
        Self { mode }
    }

    /// Run the whole pipeline for `config`, converting with `converter`.
    ///
    /// # Errors
    /// Returns the [`PipelineError`] of the first stage or unit that failed.
    /// Artifacts published before the failure stay on disk so that a rerun
    /// only redoes what is missing.
    pub fn run(&self, config: &PipelineConfig, converter: &dyn Converter) -> Result<RunReport, PipelineError> {
        let started = Instant::now();
        config.validate()?;
        let split_err = |source: anyhow::Error| PipelineError::Split {
            source_path: config.source.clone(),
            source,
        };

        let root = config.resolved_work_root().map_err(split_err)?;
        create_dir_all(&root)
            .map_err(|e| split_err(anyhow!(e).context(format!("mkdir -p {}", root.display()))))?;
        let layout = StageLayout::new(&root, config.prefix.as_str(), config.output_extension.as_str());
        let id = SourceIdentity::resolve(&config.source, config.policy).map_err(split_err)?;
        let output = match &config.output {
            Some(path) => root.join(path),
            None => layout.default_output(id.path()),
        };

        if canonicalize(&output).is_ok_and(|p| p == id.path()) {
            return Err(PipelineError::Config(format!(
                "output {} would overwrite the source",
                output.display()
            )));
        }

        if output.exists() {
            info!(output = %output.display(), "output already published, nothing to do");
            let cleanup_failures = finish_cleanup(&layout, &id, &output);
            return Ok(RunReport {
                source: id.path().to_path_buf(),
                output,
                split: None,
                partitions: 0,
                units: Vec::new(),
                merge: StageStatus::Skipped,
                bytes_merged: 0,
                cleanup_failures,
                elapsed_ms: elapsed_ms(started),
            });
        }

        let temp_prefix = layout.temp_prefix(&id);
        let mut sweep_dirs = vec![root.as_path()];
        if let Some(parent) = output.parent()
            && parent != root.as_path()
        {
            sweep_dirs.push(parent);
        }
        for dir in sweep_dirs {
            match sweep_stale(dir, &temp_prefix) {
                Ok(0) => {}
                Ok(n) => info!(removed = n, dir = %dir.display(), "removed temporary files left by an earlier run"),
                Err(e) => warn!(error = %e, dir = %dir.display(), "could not sweep stale temporary files"),
            }
        }

        let split = run_split(&layout, &id).map_err(split_err)?;
        if split.manifest.is_empty() && config.empty_source == EmptySourcePolicy::Reject {
            return Err(PipelineError::EmptySource(id.path().to_path_buf()));
        }

        let plan = Plan::build(&layout, layout.manifest_path(&id), &split.manifest, output);
        let results = self.fan_out(&plan, converter, &temp_prefix, config.fail_fast)?;

        let mut first_failure = None;
        let mut units = Vec::with_capacity(results.len());
        for result in results {
            if let Some(e) = result.error
                && first_failure.is_none()
            {
                first_failure = Some((result.report.index, result.report.partition.clone(), e));
            }
            units.push(result.report);
        }
        if let Some((index, partition, source)) = first_failure {
            let failed = units.iter().filter(|u| u.status == UnitStatus::Failed).count();
            error!(failed, total = units.len(), "convert stage failed, not merging");
            return Err(PipelineError::Convert {
                index,
                partition,
                source,
            });
        }

        let merge_err = |source: anyhow::Error| PipelineError::Merge {
            output: plan.output.clone(),
            source,
        };
        if let Some(missing) = plan.units.iter().find(|u| !u.target.exists()) {
            return Err(merge_err(anyhow!(
                "converted partition #{} missing at {}",
                missing.index,
                missing.target.display()
            )));
        }
        let merged = merge_outputs(&plan.targets(), &plan.output, &temp_prefix).map_err(merge_err)?;

        let cleanup_failures = remove_intermediates(plan.intermediates());
        if !cleanup_failures.is_empty() {
            warn!(count = cleanup_failures.len(), "some intermediate files were left behind");
        }

        let report = RunReport {
            source: id.path().to_path_buf(),
            output: merged.output,
            split: Some(split.status),
            partitions: plan.units.len(),
            units,
            merge: merged.status,
            bytes_merged: merged.bytes,
            cleanup_failures,
            elapsed_ms: elapsed_ms(started),
        };
        info!(
            output = %report.output.display(),
            partitions = report.partitions,
            converted = report.count(UnitStatus::Converted),
            reused = report.count(UnitStatus::Skipped),
            elapsed_ms = report.elapsed_ms,
            "pipeline complete"
        );
        Ok(report)
    }

    /// Run every convert unit to a terminal state; results keep plan order.
    fn fan_out(
        &self,
        plan: &Plan,
        converter: &dyn Converter,
        temp_prefix: &str,
        fail_fast: bool,
    ) -> Result<Vec<UnitResult>, PipelineError> {
        let abort = AtomicBool::new(false);
        let run_unit = |unit: &ConvertUnit| -> UnitResult {
            let started = Instant::now();
            let report = |status| UnitReport {
                index: unit.index,
                partition: unit.partition.clone(),
                target: unit.target.clone(),
                status,
                elapsed_ms: elapsed_ms(started),
            };
            if fail_fast && abort.load(Ordering::Relaxed) {
                debug!(index = unit.index, "abandoned after an earlier failure");
                return UnitResult {
                    report: report(UnitStatus::Abandoned),
                    error: None,
                };
            }
            match invoke(converter, unit, temp_prefix) {
                Ok(status) => {
                    let status = match status {
                        StageStatus::Completed => UnitStatus::Converted,
                        StageStatus::Skipped => UnitStatus::Skipped,
                    };
                    debug!(index = unit.index, ?status, "convert unit finished");
                    UnitResult {
                        report: report(status),
                        error: None,
                    }
                }
                Err(e) => {
                    abort.store(true, Ordering::Relaxed);
                    let message = format!("{e:#}");
                    error!(index = unit.index, partition = %unit.partition.display(), error = %message, "convert unit failed");
                    UnitResult {
                        report: report(UnitStatus::Failed),
                        error: Some(e),
                    }
                }
            }
        };

        match self.mode {
            ExecMode::Sequential => Ok(plan.units.iter().map(&run_unit).collect()),
            ExecMode::Parallel { threads } => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads.unwrap_or(0))
                    .thread_name(|i| format!("ironsplit-convert-{i}"))
                    .build()
                    .map_err(|e| PipelineError::Config(format!("cannot build worker pool: {e}")))?;
                Ok(pool.install(|| plan.units.par_iter().map(&run_unit).collect()))
            }
        }
    }
}

//! Per-partition conversion.
//!
//! The conversion itself is opaque: a [`Converter`] turns one partition file
//! into one output file and reports success or failure. [`invoke`] wraps a
//! converter with the stage contract: skip when the target exists, otherwise
//! convert into a private temporary file and publish it only on success.
//!
//! [`CommandConverter`] runs an external program directly (no shell), with
//! `{input}` / `{output}` argument placeholders and an optional timeout.

use crate::config::CommandSpec;
use crate::layout::StageStatus;
use crate::publish::StagedFile;
use anyhow::{Context, Result, bail};
use std::ffi::OsString;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Replaced by the partition path in command arguments.
pub const INPUT_PLACEHOLDER: &str = "{input}";
/// Replaced by the private output path in command arguments.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Turns one partition file into one converted file.
///
/// `output` exists and is empty when `convert` is called. Implementations
/// may leave partial data there on failure; the caller discards it.
pub trait Converter: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str {
        "converter"
    }

    /// Convert `input`, writing the result to `output`.
    ///
    /// # Errors
    /// Any error marks the conversion as failed.
    fn convert(&self, input: &Path, output: &Path) -> Result<()>;
}

impl<F> Converter for F
where
    F: Fn(&Path, &Path) -> Result<()> + Send + Sync,
{
    fn convert(&self, input: &Path, output: &Path) -> Result<()> {
        self(input, output)
    }
}

/// One convert stage unit: a partition and its resolved target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConvertUnit {
    /// Position in the manifest.
    pub index: usize,
    pub partition: PathBuf,
    pub target: PathBuf,
}

/// Run `converter` for `unit` unless its target is already published.
///
/// # Errors
/// Returns an error if the partition is missing, the converter fails, or the
/// output cannot be published. No file exists at the target afterwards.
pub fn invoke(converter: &dyn Converter, unit: &ConvertUnit, temp_prefix: &str) -> Result<StageStatus> {
    if unit.target.exists() {
        debug!(index = unit.index, target = %unit.target.display(), "convert target exists, skipping");
        return Ok(StageStatus::Skipped);
    }
    if !unit.partition.is_file() {
        bail!("partition {} is missing", unit.partition.display());
    }
    let staged = StagedFile::create(&unit.target, temp_prefix)?;
    converter
        .convert(&unit.partition, staged.path())
        .with_context(|| format!("{} failed on {}", converter.name(), unit.partition.display()))?;
    staged.commit()?;
    Ok(StageStatus::Completed)
}

/// An external program invoked once per partition.
#[derive(Clone, Debug)]
pub struct CommandConverter {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
    name: String,
}

impl CommandConverter {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        let program = program.into();
        let name = program
            .file_name()
            .map_or_else(|| program.to_string_lossy().into_owned(), |n| n.to_string_lossy().into_owned());
        Self {
            program,
            args,
            timeout: None,
            name,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn from_spec(spec: &CommandSpec) -> Self {
        Self::new(&spec.program, spec.args.clone()).with_timeout(spec.timeout_secs.map(Duration::from_secs))
    }

    /// The argument vector for one invocation.
    fn argv(&self, input: &Path, output: &Path) -> Vec<OsString> {
        let mut argv: Vec<OsString> = self
            .args
            .iter()
            .map(|arg| substitute(arg, input, output))
            .collect();
        if !self.args.iter().any(|a| a.contains(INPUT_PLACEHOLDER)) {
            argv.push(input.as_os_str().to_owned());
        }
        argv
    }

    fn writes_output_itself(&self) -> bool {
        self.args.iter().any(|a| a.contains(OUTPUT_PLACEHOLDER))
    }
}

impl Converter for CommandConverter {
    fn name(&self) -> &str {
        &self.name
    }

    fn convert(&self, input: &Path, output: &Path) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.argv(input, output))
            .stdin(Stdio::null())
            .stderr(Stdio::inherit());
        if self.writes_output_itself() {
            cmd.stdout(Stdio::null());
        } else {
            let out = OpenOptions::new()
                .write(true)
                .truncate(true)
                .open(output)
                .with_context(|| format!("open {}", output.display()))?;
            cmd.stdout(Stdio::from(out));
        }
        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawn {}", self.program.display()))?;
        let status = wait_bounded(&mut child, self.timeout)
            .with_context(|| format!("wait for {}", self.program.display()))?;
        if !status.success() {
            bail!("{} exited with {status}", self.program.display());
        }
        Ok(())
    }
}

/// An exact placeholder argument keeps the path as-is (it may not be UTF-8).
fn substitute(arg: &str, input: &Path, output: &Path) -> OsString {
    match arg {
        INPUT_PLACEHOLDER => input.as_os_str().to_owned(),
        OUTPUT_PLACEHOLDER => output.as_os_str().to_owned(),
        _ => arg
            .replace(INPUT_PLACEHOLDER, &input.to_string_lossy())
            .replace(OUTPUT_PLACEHOLDER, &output.to_string_lossy())
            .into(),
    }
}

/// Wait for `child`, killing it once `timeout` has passed.
fn wait_bounded(child: &mut Child, timeout: Option<Duration>) -> Result<ExitStatus> {
    let Some(limit) = timeout else {
        return Ok(child.wait()?);
    };
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        let now = Instant::now();
        if now >= deadline {
            // The process may exit between try_wait and kill; either way it is reaped below.
            let _ = child.kill();
            let _ = child.wait();
            bail!("timed out after {limit:?}");
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

//! `ironsplit`: split, convert and merge length-prefixed record files.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ironsplit::{
    CommandConverter, EmptySourcePolicy, PipelineConfig, Runner, SplitPolicy, count_records,
    split_to_directory,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ironsplit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Split, convert every partition and merge the results.
    Run(RunArgs),
    /// Split a file into `<prefix><NNNNNNNN>` files in a directory.
    Split {
        source: PathBuf,
        #[arg(short, long, default_value = ".")]
        directory: PathBuf,
        #[arg(short, long, default_value = "split-")]
        prefix: String,
        #[command(flatten)]
        bound: BoundArgs,
    },
    /// Count the records in a file.
    Count { source: PathBuf },
}

#[derive(Args, Debug)]
#[group(multiple = false)]
struct BoundArgs {
    /// Target partition size in bytes.
    #[arg(long)]
    size: Option<u64>,
    /// Records per partition.
    #[arg(long)]
    records: Option<u64>,
}

impl BoundArgs {
    fn policy(&self) -> Option<SplitPolicy> {
        self.records
            .map(SplitPolicy::Records)
            .or(self.size.map(SplitPolicy::Bytes))
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    source: PathBuf,
    /// JSON config file; flags given here override its values.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Converter program, run once per partition without a shell.
    #[arg(long)]
    converter: Option<String>,
    /// Converter argument; may contain {input} and {output}. Repeatable.
    #[arg(long = "arg", allow_hyphen_values = true)]
    args: Vec<String>,
    /// Seconds before a conversion is killed and fails.
    #[arg(long)]
    timeout: Option<u64>,
    #[command(flatten)]
    bound: BoundArgs,
    #[arg(short, long)]
    workers: Option<usize>,
    #[arg(long)]
    work_root: Option<PathBuf>,
    /// Final output path (relative paths are under the work root).
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Extension of converted partitions and the default output.
    #[arg(long)]
    extension: Option<String>,
    /// Fail on a source without records instead of writing an empty output.
    #[arg(long)]
    reject_empty: bool,
    /// Do not start further conversions after the first failure.
    #[arg(long)]
    fail_fast: bool,
}

impl RunArgs {
    fn into_config(self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)?,
            None => PipelineConfig::default(),
        };
        config.source = self.source;
        if let Some(policy) = self.bound.policy() {
            config.policy = policy;
        }
        if let Some(program) = self.converter {
            config.converter.program = program;
        }
        if !self.args.is_empty() {
            config.converter.args = self.args;
        }
        if self.timeout.is_some() {
            config.converter.timeout_secs = self.timeout;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(root) = self.work_root {
            config.work_root = root;
        }
        if self.output.is_some() {
            config.output = self.output;
        }
        if let Some(ext) = self.extension {
            config.output_extension = ext;
        }
        if self.reject_empty {
            config.empty_source = EmptySourcePolicy::Reject;
        }
        config.fail_fast |= self.fail_fast;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => {
            let config = args.into_config()?;
            config.validate()?;
            config.converter.validate()?;
            let converter = CommandConverter::from_spec(&config.converter);
            let report = Runner::from_config(&config).run(&config, &converter)?;
            println!("{}", report.output.display());
        }
        Commands::Split {
            source,
            directory,
            prefix,
            bound,
        } => {
            let policy = bound.policy().unwrap_or_default();
            let written = split_to_directory(&source, &directory, &prefix, policy)
                .with_context(|| format!("split {}", source.display()))?;
            info!(files = written.len(), directory = %directory.display(), "split done");
        }
        Commands::Count { source } => {
            let stats = count_records(&source)?;
            println!("{}", stats.records);
        }
    }
    Ok(())
}

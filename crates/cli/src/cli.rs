//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Scan Aggregator - build cache performance records from build scans
#[derive(Parser, Debug)]
#[command(
    name = "scan-aggregator",
    author,
    version,
    about = "Aggregate build cache timings from build scan event streams",
    long_about = "Listens to a build scan server's live build stream (or takes pasted\n\
                  build scan links), streams each build's timeline events and emits\n\
                  one record per build with execution, GC and cache pack/unpack times."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "SCAN_AGGREGATOR_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "compact",
        global = true,
        env = "SCAN_AGGREGATOR_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Listen to the server's live build stream
    Listen(ListenArgs),

    /// Process build scan links read from a file or stdin
    Process(ProcessArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),
}

/// Options shared by `listen` and `process`
#[derive(Args, Debug, Clone)]
pub struct ProcessingArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, env = "SCAN_AGGREGATOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Builds processed at one time
    #[arg(long, env = "SCAN_AGGREGATOR_MAX_CONCURRENT")]
    pub max_concurrent: Option<usize>,

    /// Finalize a build whose event stream has not ended after this many seconds
    #[arg(long, env = "SCAN_AGGREGATOR_BUILD_TIMEOUT")]
    pub build_timeout: Option<u64>,

    /// Bearer token sent with stream requests
    #[arg(long, env = "SCAN_AGGREGATOR_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Do not send credentials with stream requests
    #[arg(long)]
    pub no_credentials: bool,

    /// Also append records as JSON lines to this file
    #[arg(short, long, env = "SCAN_AGGREGATOR_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "SCAN_AGGREGATOR_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `listen` command
#[derive(Parser, Debug, Clone)]
pub struct ListenArgs {
    /// Server base URL, overrides the configuration file
    #[arg(short, long, env = "SCAN_AGGREGATOR_SERVER")]
    pub server: Option<String>,

    /// Stream builds since `now` or an epoch-millis timestamp
    #[arg(long, env = "SCAN_AGGREGATOR_SINCE")]
    pub since: Option<String>,

    /// Validate configuration and exit without listening
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub processing: ProcessingArgs,
}

/// Arguments for the `process` command
#[derive(Parser, Debug, Clone)]
pub struct ProcessArgs {
    /// File containing build scan links (reads stdin when omitted)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Print each record as a JSON line on stdout
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub processing: ProcessingArgs,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "scan-aggregator.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    Pretty,
    /// Compact single-line format
    #[default]
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => observability::LogFormat::Json,
            LogFormat::Pretty => observability::LogFormat::Pretty,
            LogFormat::Compact => observability::LogFormat::Compact,
        }
    }
}

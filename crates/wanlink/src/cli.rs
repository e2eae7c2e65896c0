//! Command-line definitions.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    name = "wanlink",
    version,
    about = "Reconcile WAN circuit telemetry against the authoritative circuit extract",
    propagate_version = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    /// Defaults to `run`
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (default: platform config dir)
    #[arg(long, short = 'c', global = true, env = "WANLINK_CONFIG")]
    pub config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace); RUST_LOG overrides
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one reconciliation pass
    Run(RunArgs),

    /// Import a circuit extract into the circuit store without reconciling
    Import(ImportArgs),

    /// Resolve public IPs to their registry organization
    Resolve(ResolveArgs),

    /// Inspect configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Default, Args)]
pub struct RunArgs {
    /// Circuit extract CSV to import first (overrides run.extract_path)
    #[arg(long)]
    pub extract: Option<PathBuf>,

    /// Directory for the JSON stores (overrides run.store_dir)
    #[arg(long)]
    pub store_dir: Option<PathBuf>,

    /// Sites reconciled at once
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Whole-run timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Keep enriched rows for sites missing from telemetry
    #[arg(long)]
    pub no_prune: bool,

    /// Replay a saved telemetry snapshot (JSON) instead of calling the dashboard
    #[arg(long, value_name = "FILE")]
    pub snapshot: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Circuit extract CSV
    pub path: PathBuf,

    /// Directory for the JSON stores (overrides run.store_dir)
    #[arg(long)]
    pub store_dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ResolveArgs {
    /// Addresses to resolve
    #[arg(required = true)]
    pub ips: Vec<IpAddr>,

    /// Directory for the JSON stores (overrides run.store_dir)
    #[arg(long)]
    pub store_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration as TOML (API key redacted)
    Show,

    /// Print the config file location
    Path,
}

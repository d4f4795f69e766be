use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

const BUILD_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "gpumon")]
#[command(version = BUILD_VERSION)]
#[command(about = "gpumon - Supervised GPU telemetry collector host")]
#[command(long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[arg(short, long, global = true, value_name = "FILE", env = "GPUMON_CONFIG", help = "Path to config file")]
    pub config: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::Count, global = true, help = "Increase verbosity (-v, -vv, -vvv)")]
    pub verbose: u8,

    #[arg(short, long, global = true, help = "Suppress non-error output")]
    pub quiet: bool,

    #[arg(long, global = true, value_name = "FILE", help = "Write logs to file")]
    pub log_file: Option<PathBuf>,

    #[arg(long, global = true, default_value = "text", help = "Output format")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run the collector under supervision")]
    #[command(long_about = "Launch the configured collector, keep it alive with backoff and a circuit breaker, and periodically report device metrics.\n\nStops on SIGINT or SIGTERM.")]
    Run {
        #[arg(short, long, value_name = "MS", help = "Sampling interval (defaults to telemetry.default_interval_ms)")]
        interval_ms: Option<u64>,
        #[arg(long, default_value_t = 5, value_name = "SECS", help = "Seconds between status reports")]
        report_secs: u64,
        #[arg(long, value_name = "SECS", help = "Stop after this many seconds")]
        duration_secs: Option<u64>,
    },

    #[command(about = "Manage configuration")]
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    #[command(about = "Decode collector protocol lines from stdin")]
    Decode {
        #[arg(long, help = "Exit with an error if any line is malformed")]
        strict: bool,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    #[command(about = "Print the effective configuration")]
    Show,
    #[command(about = "Validate the configuration file")]
    Validate,
    #[command(about = "Write a default configuration file")]
    Init {
        #[arg(short, long, help = "Overwrite an existing file")]
        force: bool,
    },
    #[command(about = "Print the configuration file path")]
    Path,
}

use anyhow::Context;
use clap::Parser;
use gpumon_daemon::{run_simulator, SimOptions, SimOutcome};
use gpumon_types::Vendor;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "gpumon-sim")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Synthetic GPU collector speaking the gpumon line protocol")]
#[command(long_about = "Reads the sampling interval from stdin, then writes one sample line per device per interval to stdout.\n\nExits when stdin closes, or with --exit-code after --crash-after ticks.")]
struct SimArgs {
    #[arg(long, default_value_t = 1, help = "Number of simulated devices")]
    devices: u32,

    #[arg(long, default_value = "NVIDIA", help = "Vendor token (NVIDIA, AMD, INTEL)")]
    vendor: String,

    #[arg(long, value_name = "NAME", help = "Device name override")]
    name: Option<String>,

    #[arg(long, value_name = "TICKS", help = "Exit after this many ticks")]
    crash_after: Option<u64>,

    #[arg(long, default_value_t = 1, help = "Exit code used with --crash-after")]
    exit_code: i32,

    #[arg(long, value_name = "TICKS", help = "Emit a heartbeat every N ticks")]
    heartbeat_every: Option<u64>,

    #[arg(long, value_name = "TICKS", help = "Emit an undecodable line every N ticks")]
    garbage_every: Option<u64>,

    #[arg(long, help = "Seed for reproducible values")]
    seed: Option<u64>,
}

impl From<SimArgs> for SimOptions {
    fn from(args: SimArgs) -> Self {
        Self {
            devices: args.devices,
            vendor: Vendor::from_token(&args.vendor),
            name: args.name,
            crash_after: args.crash_after,
            exit_code: args.exit_code,
            heartbeat_every: args.heartbeat_every,
            garbage_every: args.garbage_every,
            seed: args.seed,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // stdout carries the protocol; diagnostics go to stderr.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr).with_ansi(false))
        .try_init()
        .context("failed to install logger")?;

    let options = SimOptions::from(SimArgs::parse());

    let outcome = run_simulator(tokio::io::stdin(), tokio::io::stdout(), &options)
        .await
        .context("simulated collector failed")?;

    match outcome {
        SimOutcome::StdinClosed => Ok(()),
        SimOutcome::Crashed { exit_code } => std::process::exit(exit_code),
    }
}

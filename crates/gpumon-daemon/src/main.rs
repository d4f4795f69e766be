mod cli;

use clap::Parser;
use cli::{decode_stdin, handle_config, init_logging, run_monitor, Cli, Commands};
use gpumon_daemon::DaemonConfig;
use gpumon_types::GpumonResult;

#[tokio::main]
async fn main() -> GpumonResult<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(DaemonConfig::default_path);

    // A broken config file must not stop `config validate` from reporting it.
    let config = DaemonConfig::load(&config_path);
    let logging = config
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_default();
    init_logging(&cli, &logging)?;

    match cli.command {
        Commands::Run {
            interval_ms,
            report_secs,
            duration_secs,
        } => {
            run_monitor(config?, interval_ms, report_secs, duration_secs, &cli.format).await?;
        }
        Commands::Config { action } => {
            handle_config(&config_path, action, &cli.format)?;
        }
        Commands::Decode { strict } => {
            decode_stdin(strict, &cli.format).await?;
        }
    }

    Ok(())
}

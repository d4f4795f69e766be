use super::commands::{Cli, OutputFormat};
use gpumon_daemon::LoggingConfig;
use gpumon_types::{GpumonError, GpumonResult, MetricKey, MetricSample};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn log_filter(cli: &Cli, logging: &LoggingConfig) -> String {
    if cli.quiet {
        return "warn".to_string();
    }
    match cli.verbose {
        0 => logging.level.to_string(),
        1 => "info,gpumon_telemetry=debug,gpumon_daemon=debug,gpumon=debug".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

/// Logs go to stderr (or the log file) so stdout stays free for reports.
pub fn init_logging(cli: &Cli, logging: &LoggingConfig) -> GpumonResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_filter(cli, logging)));

    let log_file = cli.log_file.clone().or_else(|| logging.file.clone());
    let to_file = log_file.is_some();
    let writer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| GpumonError::Config(format!("Failed to open log file {:?}: {}", path, e)))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match (logging.json, logging.timestamps) {
        (true, _) => registry
            .with(fmt::layer().json().with_writer(writer))
            .try_init(),
        (false, true) => registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(!to_file)
                    .with_target(cli.verbose >= 2),
            )
            .try_init(),
        (false, false) => registry
            .with(
                fmt::layer()
                    .without_time()
                    .with_writer(writer)
                    .with_ansi(!to_file)
                    .with_target(cli.verbose >= 2),
            )
            .try_init(),
    };

    result.map_err(|e| GpumonError::Internal(format!("Failed to install logger: {}", e)))
}

pub fn print_json<T: serde::Serialize>(value: &T) -> GpumonResult<()> {
    let json = serde_json::to_string(value)
        .map_err(|e| GpumonError::Internal(format!("Failed to encode JSON: {}", e)))?;
    println!("{}", json);
    Ok(())
}

pub fn is_json(format: &OutputFormat) -> bool {
    *format == OutputFormat::Json
}

pub fn format_sample(sample: &MetricSample) -> String {
    let mut line = format!(
        "GPU {} [{}] {}",
        sample.device_index,
        sample.vendor,
        if sample.name.is_empty() { "(unnamed)" } else { sample.name.as_str() }
    );

    let mut push = |label: &str, key: MetricKey, unit: &str| {
        if let Some(value) = sample.field(key) {
            line.push_str(&format!("  {} {}{}", label, value, unit));
        }
    };
    push("usage", MetricKey::UsagePercent, "%");
    push("temp", MetricKey::TempC, "C");
    push("power", MetricKey::PowerW, "W");
    push("mem", MetricKey::MemUsedMb, "MB");
    push("core", MetricKey::ClockCoreMhz, "MHz");
    push("fan", MetricKey::FanPercent, "%");

    line
}

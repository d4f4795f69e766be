use super::commands::OutputFormat;
use super::utils::{format_sample, is_json, print_json};
use gpumon_daemon::DaemonConfig;
use gpumon_telemetry::{SupervisorStats, TelemetrySupervisor};
use gpumon_types::{GpumonError, GpumonResult, MetricSample, SupervisorStatus};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

#[derive(Serialize)]
struct Report {
    stats: SupervisorStats,
    devices: Vec<MetricSample>,
}

pub async fn run_monitor(
    config: DaemonConfig,
    interval_ms: Option<u64>,
    report_secs: u64,
    duration_secs: Option<u64>,
    format: &OutputFormat,
) -> GpumonResult<()> {
    info!("Starting gpumon v{}", env!("CARGO_PKG_VERSION"));

    let supervisor = Arc::new(TelemetrySupervisor::with_command_launcher(config.telemetry)?);
    info!(
        "Collector: {:?} {:?}",
        supervisor.config().collector_command,
        supervisor.config().collector_args
    );

    match interval_ms {
        Some(interval_ms) => supervisor.start(interval_ms).await?,
        None => supervisor.start_default().await?,
    }

    let mut status_rx = supervisor.subscribe_status();
    let mut report = tokio::time::interval(Duration::from_secs(report_secs.max(1)));
    report.set_missed_tick_behavior(MissedTickBehavior::Delay);
    report.tick().await;

    let deadline = duration_secs.map(|secs| Instant::now() + Duration::from_secs(secs));
    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    let outcome = loop {
        tokio::select! {
            result = &mut shutdown => break result,
            _ = sleep_until_opt(deadline), if deadline.is_some() => {
                info!("Run duration elapsed");
                break Ok(());
            }
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let status = *status_rx.borrow_and_update();
                match status {
                    SupervisorStatus::BreakerOpen => {
                        error!("Collector disabled by circuit breaker");
                        if let Err(e) = print_report(&supervisor, format) {
                            warn!("Failed to print report: {}", e);
                        }
                        break Err(GpumonError::BreakerOpen);
                    }
                    SupervisorStatus::Degraded => warn!("Supervisor status: {}", status),
                    _ => info!("Supervisor status: {}", status),
                }
            }
            _ = report.tick() => {
                if let Err(e) = print_report(&supervisor, format) {
                    break Err(e);
                }
            }
        }
    };

    info!("Shutting down...");
    supervisor.stop().await;
    if outcome.is_ok() {
        print_report(&supervisor, format)?;
    }
    info!("Shutdown complete");
    outcome
}

fn print_report(supervisor: &TelemetrySupervisor, format: &OutputFormat) -> GpumonResult<()> {
    let stats = supervisor.stats();
    let devices: Vec<MetricSample> = supervisor
        .device_indices()
        .into_iter()
        .filter_map(|index| supervisor.latest_snapshot(index))
        .collect();

    if is_json(format) {
        return print_json(&Report { stats, devices });
    }

    println!(
        "[{}] status={} devices={} samples={} restarts={} failures={} breaker={}",
        chrono::Local::now().format("%H:%M:%S"),
        stats.status,
        stats.devices,
        stats.samples_recorded,
        stats.total_restarts,
        stats.total_failures,
        stats.breaker_state
    );
    if let (Some(reason), Some(at)) = (&stats.last_failure, stats.last_failure_at) {
        println!(
            "  last failure: {} at {}",
            reason,
            at.with_timezone(&chrono::Local).format("%H:%M:%S")
        );
    }
    for sample in &devices {
        println!("  {}", format_sample(sample));
    }
    Ok(())
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn wait_for_shutdown() -> GpumonResult<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => { info!("Received SIGTERM"); }
            _ = sigint.recv() => { info!("Received SIGINT"); }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
        Ok(())
    }
}

//! Drives the real `gpumon-sim` binary through the command launcher.

use gpumon_telemetry::{BreakerConfig, TelemetryConfig, TelemetrySupervisor};
use gpumon_types::{BreakerState, GpumonError, MetricKey, SupervisorStatus, Vendor};
use std::time::Duration;

const SIM: &str = env!("CARGO_BIN_EXE_gpumon-sim");

fn sim_config(args: &[&str]) -> TelemetryConfig {
    TelemetryConfig::default()
        .with_collector(SIM, args.iter().map(|a| a.to_string()).collect())
        .with_interval_bounds(10, 60_000)
        .with_terminate_grace_ms(1_000)
        .with_breaker(BreakerConfig {
            failure_threshold: 3,
            window_secs: 60,
            base_backoff_ms: 50,
            max_backoff_ms: 200,
        })
}

async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

#[tokio::test]
async fn test_supervisor_streams_from_simulator() {
    let supervisor =
        TelemetrySupervisor::with_command_launcher(sim_config(&["--devices", "2", "--vendor", "amd"]))
            .unwrap();

    supervisor.start(50).await.unwrap();
    assert!(
        wait_until(Duration::from_secs(10), || {
            supervisor.device_count() == 2
                && supervisor.history(1, MetricKey::UsagePercent).len() >= 3
        })
        .await
    );
    assert_eq!(supervisor.status(), SupervisorStatus::Running);

    let latest = supervisor.latest_snapshot(0).unwrap();
    assert_eq!(latest.vendor, Vendor::Amd);
    assert!(latest.field(MetricKey::TempC).is_some());

    let history = supervisor.history(1, MetricKey::UsagePercent);
    assert!(history.windows(2).all(|w| w[0].timestamp_ms <= w[1].timestamp_ms));
    assert!(supervisor.stats().worker_pid.is_some());

    supervisor.stop().await;
    assert_eq!(supervisor.status(), SupervisorStatus::Stopped);
    assert_eq!(supervisor.stats().total_failures, 0);
}

#[tokio::test]
async fn test_tolerates_heartbeats_and_garbage() {
    let supervisor = TelemetrySupervisor::with_command_launcher(sim_config(&[
        "--heartbeat-every",
        "2",
        "--garbage-every",
        "5",
    ]))
    .unwrap();

    supervisor.start(20).await.unwrap();
    assert!(
        wait_until(Duration::from_secs(10), || supervisor.stats().malformed_lines >= 2).await
    );

    let stats = supervisor.stats();
    assert!(stats.heartbeats >= 2);
    assert_eq!(stats.total_failures, 0);
    assert_eq!(supervisor.status(), SupervisorStatus::Running);
    supervisor.stop().await;
}

#[tokio::test]
async fn test_crashing_simulator_opens_breaker() {
    let supervisor = TelemetrySupervisor::with_command_launcher(sim_config(&[
        "--crash-after",
        "2",
        "--exit-code",
        "1",
    ]))
    .unwrap();

    supervisor.start(20).await.unwrap();
    assert!(
        wait_until(Duration::from_secs(15), || {
            supervisor.status() == SupervisorStatus::BreakerOpen
        })
        .await
    );

    let stats = supervisor.stats();
    assert_eq!(stats.breaker_state, BreakerState::Open);
    assert_eq!(stats.total_failures, 3);
    assert_eq!(stats.total_spawns, 3);
    assert!(stats.last_failure.unwrap().contains("Some(1)"));

    let result = supervisor.start(20).await;
    assert!(matches!(result, Err(GpumonError::BreakerOpen)));

    supervisor.reset_breaker().await.unwrap();
    assert_eq!(supervisor.status(), SupervisorStatus::Stopped);
}

#[tokio::test]
async fn test_missing_collector_is_a_spawn_error() {
    let config = sim_config(&[]).with_collector("/nonexistent/gpumon-collector", Vec::new());
    let supervisor = TelemetrySupervisor::with_command_launcher(config).unwrap();

    let result = supervisor.start(100).await;
    assert!(matches!(result, Err(GpumonError::Spawn(_))));
    assert_eq!(supervisor.status(), SupervisorStatus::Stopped);
    assert_eq!(supervisor.stats().consecutive_failures, 1);
}

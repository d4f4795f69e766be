use super::*;
use crate::breaker::BreakerConfig;
use crate::config::TelemetryConfig;
use crate::testing::{eventually, FakeLauncher};
use gpumon_types::{BreakerState, GpumonError, MetricKey, SupervisorStatus};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn test_config(base_backoff_ms: u64) -> TelemetryConfig {
    TelemetryConfig::default()
        .with_interval_bounds(10, 60_000)
        .with_stale_timeout(10, 30_000)
        .with_terminate_grace_ms(100)
        .with_breaker(BreakerConfig {
            failure_threshold: 5,
            window_secs: 60,
            base_backoff_ms,
            max_backoff_ms: base_backoff_ms * 4,
        })
}

fn supervisor(launcher: &Arc<FakeLauncher>, base_backoff_ms: u64) -> TelemetrySupervisor {
    TelemetrySupervisor::new(test_config(base_backoff_ms), launcher.clone()).unwrap()
}

fn sample_line(device: u32, usage: f64, timestamp_ms: u64) -> String {
    format!(
        "{}|NVIDIA|RTX 4090|usage_percent={}|temp_c=61.5|{}",
        device, usage, timestamp_ms
    )
}

async fn wait_status(supervisor: &TelemetrySupervisor, status: SupervisorStatus) -> bool {
    eventually(WAIT, || supervisor.status() == status).await
}

#[tokio::test]
async fn test_three_samples_reach_running() {
    let launcher = FakeLauncher::new();
    let supervisor = supervisor(&launcher, 20);

    supervisor.start(100).await.unwrap();
    assert_eq!(supervisor.status(), SupervisorStatus::Starting);

    let mut collector = launcher.next_collector().await;
    assert_eq!(collector.interval_ms, 100);

    collector.send_line(&sample_line(0, 10.0, 0)).await;
    collector.send_line(&sample_line(0, 20.0, 100)).await;
    collector.send_line(&sample_line(0, 30.0, 200)).await;

    assert!(eventually(WAIT, || supervisor.history(0, MetricKey::UsagePercent).len() == 3).await);
    assert_eq!(supervisor.status(), SupervisorStatus::Running);

    let history = supervisor.history(0, MetricKey::UsagePercent);
    let timestamps: Vec<u64> = history.iter().map(|p| p.timestamp_ms).collect();
    let values: Vec<f64> = history.iter().map(|p| p.value).collect();
    assert_eq!(timestamps, vec![0, 100, 200]);
    assert_eq!(values, vec![10.0, 20.0, 30.0]);

    assert_eq!(supervisor.device_count(), 1);
    let latest = supervisor.latest_snapshot(0).unwrap();
    assert_eq!(latest.timestamp_ms, 200);
    assert_eq!(latest.field(MetricKey::TempC), Some(61.5));

    let stats = supervisor.stats();
    assert_eq!(stats.samples_recorded, 3);
    assert_eq!(stats.total_spawns, 1);
    assert_eq!(stats.worker_pid, Some(collector.pid));
    assert_eq!(stats.total_failures, 0);

    supervisor.stop().await;
}

#[tokio::test]
async fn test_start_while_running_is_noop() {
    let launcher = FakeLauncher::new();
    let supervisor = supervisor(&launcher, 20);

    supervisor.start(100).await.unwrap();
    let mut collector = launcher.next_collector().await;
    collector.send_line(&sample_line(0, 5.0, 0)).await;
    assert!(wait_status(&supervisor, SupervisorStatus::Running).await);

    supervisor.start(500).await.unwrap();

    assert_eq!(launcher.attempts(), 1);
    assert_eq!(supervisor.interval_ms(), 100);
    assert_eq!(supervisor.status(), SupervisorStatus::Running);
    supervisor.stop().await;
}

#[tokio::test]
async fn test_exit_code_one_degrades_then_respawns() {
    let launcher = FakeLauncher::new();
    let supervisor = supervisor(&launcher, 300);

    supervisor.start(100).await.unwrap();
    let mut first = launcher.next_collector().await;
    first.send_line(&sample_line(0, 40.0, 0)).await;
    assert!(wait_status(&supervisor, SupervisorStatus::Running).await);

    first.exit(1);

    assert!(wait_status(&supervisor, SupervisorStatus::Degraded).await);
    let stats = supervisor.stats();
    assert_eq!(stats.consecutive_failures, 1);
    assert_eq!(stats.breaker_state, BreakerState::Closed);
    assert!(stats.last_failure.unwrap().contains("exited"));
    assert!(stats.last_failure_at.is_some());

    let mut second = launcher.next_collector().await;
    assert_ne!(second.pid, first.pid);
    assert_eq!(second.interval_ms, 100);
    assert_eq!(supervisor.status(), SupervisorStatus::Starting);
    assert!(supervisor.history(0, MetricKey::UsagePercent).is_empty());

    second.send_line(&sample_line(0, 50.0, 0)).await;
    assert!(wait_status(&supervisor, SupervisorStatus::Running).await);

    let stats = supervisor.stats();
    assert_eq!(stats.total_spawns, 2);
    assert_eq!(stats.total_restarts, 1);
    assert_eq!(stats.consecutive_failures, 0);
    supervisor.stop().await;
}

#[tokio::test]
async fn test_repeated_failures_open_breaker() {
    let launcher = FakeLauncher::new();
    let supervisor = supervisor(&launcher, 10);

    supervisor.start(100).await.unwrap();
    for _ in 0..5 {
        let collector = launcher.next_collector().await;
        collector.exit(1);
    }

    assert!(wait_status(&supervisor, SupervisorStatus::BreakerOpen).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(launcher.spawn_count(), 5);

    let result = supervisor.start(100).await;
    assert!(matches!(result, Err(GpumonError::BreakerOpen)));
    assert_eq!(launcher.attempts(), 5);

    let stats = supervisor.stats();
    assert_eq!(stats.breaker_state, BreakerState::Open);
    assert_eq!(stats.total_failures, 5);
    assert_eq!(stats.worker_pid, None);

    supervisor.reset_breaker().await.unwrap();
    assert_eq!(supervisor.status(), SupervisorStatus::Stopped);

    supervisor.start(100).await.unwrap();
    assert_eq!(launcher.spawn_count(), 6);
    supervisor.stop().await;
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let launcher = FakeLauncher::new();
    let supervisor = supervisor(&launcher, 20);

    supervisor.stop().await;
    assert_eq!(supervisor.status(), SupervisorStatus::Stopped);

    supervisor.start(100).await.unwrap();
    let mut collector = launcher.next_collector().await;
    collector.send_line(&sample_line(1, 12.0, 0)).await;
    assert!(wait_status(&supervisor, SupervisorStatus::Running).await);

    supervisor.stop().await;
    assert_eq!(supervisor.status(), SupervisorStatus::Stopped);
    assert!(collector.has_exited());
    assert_eq!(launcher.kills(), 0);

    supervisor.stop().await;
    assert_eq!(supervisor.status(), SupervisorStatus::Stopped);

    // History survives a stop.
    assert_eq!(supervisor.history(1, MetricKey::UsagePercent).len(), 1);
    assert_eq!(supervisor.stats().worker_pid, None);
}

#[tokio::test]
async fn test_stop_cancels_pending_respawn() {
    let launcher = FakeLauncher::new();
    let supervisor = supervisor(&launcher, 200);

    supervisor.start(100).await.unwrap();
    let collector = launcher.next_collector().await;
    collector.exit(1);
    assert!(wait_status(&supervisor, SupervisorStatus::Degraded).await);

    supervisor.stop().await;
    assert_eq!(supervisor.status(), SupervisorStatus::Stopped);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(launcher.attempts(), 1);
    assert_eq!(supervisor.status(), SupervisorStatus::Stopped);
}

#[tokio::test]
async fn test_malformed_lines_are_tolerated() {
    let launcher = FakeLauncher::new();
    let supervisor = supervisor(&launcher, 20);

    supervisor.start(100).await.unwrap();
    let mut collector = launcher.next_collector().await;

    collector.send_line(&sample_line(0, 10.0, 0)).await;
    collector.send_line("garbage").await;
    collector.send_line("0|NVIDIA|RTX|usage_percent=150|50").await;
    collector.send_line(&sample_line(0, 11.0, 100)).await;

    assert!(eventually(WAIT, || supervisor.history(0, MetricKey::UsagePercent).len() == 2).await);

    let stats = supervisor.stats();
    assert_eq!(stats.malformed_lines, 2);
    assert_eq!(stats.total_failures, 0);
    assert_eq!(supervisor.status(), SupervisorStatus::Running);
    assert_eq!(launcher.attempts(), 1);
    supervisor.stop().await;
}

#[tokio::test]
async fn test_protocol_desync_restarts_collector() {
    let launcher = FakeLauncher::new();
    let supervisor = supervisor(&launcher, 10);

    supervisor.start(100).await.unwrap();
    let mut first = launcher.next_collector().await;
    for _ in 0..3 {
        first.send_line("not|a|sample").await;
    }

    let second = launcher.next_collector().await;
    assert_ne!(second.pid, first.pid);

    let stats = supervisor.stats();
    assert_eq!(stats.total_failures, 1);
    assert!(stats.last_failure.unwrap().contains("desync"));
    supervisor.stop().await;
}

#[tokio::test]
async fn test_start_default_uses_configured_interval() {
    let launcher = FakeLauncher::new();
    let mut config = test_config(10);
    config.default_interval_ms = 250;
    let supervisor = TelemetrySupervisor::new(config, launcher.clone()).unwrap();

    supervisor.start_default().await.unwrap();
    let collector = launcher.next_collector().await;
    assert_eq!(collector.interval_ms, 250);
    assert_eq!(supervisor.interval_ms(), 250);
    supervisor.stop().await;
}

#[tokio::test]
async fn test_desync_threshold_is_configurable() {
    let launcher = FakeLauncher::new();
    let config = test_config(10).with_malformed_threshold(2);
    let supervisor = TelemetrySupervisor::new(config, launcher.clone()).unwrap();

    supervisor.start(100).await.unwrap();
    let mut first = launcher.next_collector().await;
    first.send_line("garbage").await;
    first.send_line(&sample_line(0, 10.0, 1_000)).await;
    first.send_line("garbage").await;
    assert!(wait_status(&supervisor, SupervisorStatus::Running).await);
    assert_eq!(supervisor.stats().total_failures, 0);

    first.send_line("garbage").await;
    let second = launcher.next_collector().await;
    assert_ne!(second.pid, first.pid);
    assert!(supervisor.stats().last_failure.unwrap().contains("desync"));
    supervisor.stop().await;
}

#[tokio::test]
async fn test_stale_collector_is_restarted() {
    let launcher = FakeLauncher::new();
    let config = test_config(10).with_stale_timeout(1, 150);
    let supervisor = TelemetrySupervisor::new(config, launcher.clone()).unwrap();

    supervisor.start(100).await.unwrap();
    let _silent = launcher.next_collector().await;
    let mut second = launcher.next_collector().await;

    second.send_line(&sample_line(0, 1.0, 0)).await;
    assert!(wait_status(&supervisor, SupervisorStatus::Running).await);
    assert!(supervisor.stats().last_failure.unwrap().contains("silent"));
    supervisor.stop().await;
}

#[tokio::test]
async fn test_invalid_interval_is_rejected() {
    let launcher = FakeLauncher::new();
    let supervisor = supervisor(&launcher, 20);

    let result = supervisor.start(5).await;
    assert!(matches!(
        result,
        Err(GpumonError::InvalidInterval {
            interval_ms: 5,
            min_ms: 10,
            max_ms: 60_000
        })
    ));

    let result = supervisor.start(120_000).await;
    assert!(matches!(result, Err(GpumonError::InvalidInterval { .. })));

    assert_eq!(launcher.attempts(), 0);
    assert_eq!(supervisor.status(), SupervisorStatus::Stopped);
    assert_eq!(supervisor.stats().consecutive_failures, 0);
}

#[tokio::test]
async fn test_launch_failure_counts_against_breaker() {
    let launcher = FakeLauncher::new();
    launcher.set_failing(true);
    let supervisor = supervisor(&launcher, 20);

    for attempt in 1..=4u32 {
        let result = supervisor.start(100).await;
        assert!(matches!(result, Err(GpumonError::Spawn(_))));
        assert_eq!(supervisor.status(), SupervisorStatus::Stopped);
        assert_eq!(supervisor.stats().consecutive_failures, attempt);
    }

    let result = supervisor.start(100).await;
    assert!(matches!(result, Err(GpumonError::Spawn(_))));
    assert_eq!(supervisor.status(), SupervisorStatus::BreakerOpen);

    let result = supervisor.start(100).await;
    assert!(matches!(result, Err(GpumonError::BreakerOpen)));
    assert_eq!(launcher.attempts(), 5);
}

#[tokio::test]
async fn test_respawn_failures_open_breaker() {
    let launcher = FakeLauncher::new();
    let supervisor = supervisor(&launcher, 10);

    supervisor.start(100).await.unwrap();
    let collector = launcher.next_collector().await;
    launcher.set_failing(true);
    collector.exit(1);

    assert!(wait_status(&supervisor, SupervisorStatus::BreakerOpen).await);
    assert_eq!(launcher.attempts(), 5);
    assert_eq!(launcher.spawn_count(), 1);
    assert_eq!(supervisor.stats().total_failures, 5);
}

#[tokio::test]
async fn test_store_cleared_on_start() {
    let launcher = FakeLauncher::new();
    let supervisor = supervisor(&launcher, 20);

    supervisor.start(100).await.unwrap();
    let mut collector = launcher.next_collector().await;
    collector.send_line(&sample_line(0, 1.0, 0)).await;
    collector.send_line(&sample_line(1, 2.0, 0)).await;
    assert!(eventually(WAIT, || supervisor.device_count() == 2).await);

    supervisor.stop().await;
    assert_eq!(supervisor.device_count(), 2);

    supervisor.start(100).await.unwrap();
    assert_eq!(supervisor.device_count(), 0);
    assert!(supervisor.latest_snapshot(0).is_none());
    supervisor.stop().await;
}

#[tokio::test]
async fn test_reset_breaker_requires_idle_supervisor() {
    let launcher = FakeLauncher::new();
    let supervisor = supervisor(&launcher, 20);

    supervisor.start(100).await.unwrap();
    let _collector = launcher.next_collector().await;

    let result = supervisor.reset_breaker().await;
    assert!(matches!(result, Err(GpumonError::InvalidState(_))));

    supervisor.stop().await;
    supervisor.reset_breaker().await.unwrap();
    assert_eq!(supervisor.status(), SupervisorStatus::Stopped);
}

#[tokio::test]
async fn test_status_subscription_sees_transitions() {
    let launcher = FakeLauncher::new();
    let supervisor = supervisor(&launcher, 20);
    let mut status = supervisor.subscribe_status();
    assert_eq!(*status.borrow(), SupervisorStatus::Stopped);

    supervisor.start(100).await.unwrap();
    let mut collector = launcher.next_collector().await;
    collector.send_line(&sample_line(0, 3.0, 0)).await;

    tokio::time::timeout(WAIT, status.wait_for(|s| *s == SupervisorStatus::Running))
        .await
        .unwrap()
        .unwrap();

    supervisor.stop().await;
    tokio::time::timeout(WAIT, status.wait_for(|s| *s == SupervisorStatus::Stopped))
        .await
        .unwrap()
        .unwrap();
}

#[test]
fn test_invalid_config_is_rejected() {
    let launcher = FakeLauncher::new();
    let config = TelemetryConfig::default().with_history_capacity(0);

    let result = TelemetrySupervisor::new(config, launcher);
    assert!(matches!(result, Err(GpumonError::Config(_))));
}

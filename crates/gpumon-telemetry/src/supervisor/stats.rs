use chrono::{DateTime, Utc};
use gpumon_types::{BreakerState, SupervisorStatus};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Clone, Debug, serde::Serialize)]
pub struct SupervisorStats {
    pub status: SupervisorStatus,
    pub breaker_state: BreakerState,
    pub consecutive_failures: u32,
    pub failures_in_window: u32,
    pub interval_ms: u64,
    pub devices: usize,
    pub total_spawns: u64,
    pub total_restarts: u64,
    pub samples_recorded: u64,
    /// Points older than the newest point already in their series.
    pub points_dropped: u64,
    pub heartbeats: u64,
    pub malformed_lines: u64,
    pub total_failures: u64,
    pub worker_pid: Option<u32>,
    pub worker_uptime_secs: Option<u64>,
    pub last_failure: Option<String>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub uptime_secs: u64,
}

#[derive(Default)]
pub(crate) struct Counters {
    pub spawns: AtomicU64,
    pub restarts: AtomicU64,
    pub samples: AtomicU64,
    pub points_dropped: AtomicU64,
    pub heartbeats: AtomicU64,
    pub malformed: AtomicU64,
    pub failures: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct WorkerInfo {
    pub pid: Option<u32>,
    pub started_at: Instant,
}

#[derive(Clone, Debug)]
pub(crate) struct FailureRecord {
    pub reason: String,
    pub at: DateTime<Utc>,
}

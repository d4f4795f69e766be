use crate::codec::DecodeError;
use crate::config::TelemetryConfig;
use gpumon_types::MetricSample;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum WorkerFailure {
    #[error("collector exited unexpectedly (code {code:?})")]
    ProcessExited { code: Option<i32> },

    #[error("collector closed its output stream")]
    StreamClosed,

    #[error("collector silent for {silent_for:?}")]
    Stale { silent_for: Duration },

    #[error("protocol desync after {consecutive} malformed lines")]
    ProtocolDesync { consecutive: u32 },

    #[error("collector launch failed: {0}")]
    Spawn(String),
}

#[derive(Debug)]
pub enum WorkerEvent {
    Sample(MetricSample),
    Heartbeat,
    Malformed(DecodeError),
    Failure(WorkerFailure),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CollectorExit {
    pub code: Option<i32>,
}

#[derive(Clone, Debug)]
pub struct WorkerOptions {
    pub interval_ms: u64,
    pub stale_timeout: Duration,
    pub malformed_threshold: u32,
    pub terminate_grace: Duration,
}

impl WorkerOptions {
    pub fn from_config(config: &TelemetryConfig, interval_ms: u64) -> Self {
        Self {
            interval_ms,
            stale_timeout: config.stale_timeout(interval_ms),
            malformed_threshold: config.malformed_threshold,
            terminate_grace: config.terminate_grace(),
        }
    }

    pub(crate) fn liveness_tick(&self) -> Duration {
        (self.stale_timeout / 4).clamp(Duration::from_millis(10), Duration::from_secs(1))
    }
}

/// Last sample-or-heartbeat time, readable without a lock.
pub struct ActivityClock {
    origin: Instant,
    last_ms: AtomicU64,
}

impl ActivityClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    pub fn touch(&self) {
        let elapsed = self.origin.elapsed().as_millis() as u64;
        self.last_ms.fetch_max(elapsed, Ordering::Relaxed);
    }

    pub fn last_activity_at(&self) -> Instant {
        self.origin + Duration::from_millis(self.last_ms.load(Ordering::Relaxed))
    }

    pub fn silent_for(&self) -> Duration {
        self.last_activity_at().elapsed()
    }
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

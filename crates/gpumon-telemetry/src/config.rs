use crate::breaker::BreakerConfig;
use gpumon_types::{
    GpumonError, GpumonResult, DEFAULT_HISTORY_CAPACITY, DEFAULT_INTERVAL_MS,
    DEFAULT_MALFORMED_THRESHOLD, DEFAULT_STALE_FLOOR_MS, DEFAULT_STALE_MULTIPLIER,
    DEFAULT_TERMINATE_GRACE_MS, MAX_INTERVAL_MS, MIN_INTERVAL_MS,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub collector_command: PathBuf,

    pub collector_args: Vec<String>,

    pub default_interval_ms: u64,

    pub min_interval_ms: u64,

    pub max_interval_ms: u64,

    pub history_capacity: usize,

    /// Stale timeout is `stale_multiplier * interval`, never below `stale_floor_ms`.
    pub stale_multiplier: u32,

    pub stale_floor_ms: u64,

    /// Consecutive malformed lines treated as protocol desync.
    pub malformed_threshold: u32,

    pub terminate_grace_ms: u64,

    pub breaker: BreakerConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            collector_command: PathBuf::from("gpumon-collector"),
            collector_args: Vec::new(),
            default_interval_ms: DEFAULT_INTERVAL_MS,
            min_interval_ms: MIN_INTERVAL_MS,
            max_interval_ms: MAX_INTERVAL_MS,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            stale_multiplier: DEFAULT_STALE_MULTIPLIER,
            stale_floor_ms: DEFAULT_STALE_FLOOR_MS,
            malformed_threshold: DEFAULT_MALFORMED_THRESHOLD,
            terminate_grace_ms: DEFAULT_TERMINATE_GRACE_MS,
            breaker: BreakerConfig::default(),
        }
    }
}

impl TelemetryConfig {
    pub fn with_collector(mut self, command: impl Into<PathBuf>, args: Vec<String>) -> Self {
        self.collector_command = command.into();
        self.collector_args = args;
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn with_interval_bounds(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.min_interval_ms = min_ms;
        self.max_interval_ms = max_ms;
        self
    }

    pub fn with_stale_timeout(mut self, multiplier: u32, floor_ms: u64) -> Self {
        self.stale_multiplier = multiplier;
        self.stale_floor_ms = floor_ms;
        self
    }

    pub fn with_terminate_grace_ms(mut self, grace_ms: u64) -> Self {
        self.terminate_grace_ms = grace_ms;
        self
    }

    pub fn with_malformed_threshold(mut self, threshold: u32) -> Self {
        self.malformed_threshold = threshold;
        self
    }

    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn validate(&self) -> GpumonResult<()> {
        if self.collector_command.as_os_str().is_empty() {
            return Err(GpumonError::Config("collector_command cannot be empty".into()));
        }

        if self.min_interval_ms == 0 || self.min_interval_ms > self.max_interval_ms {
            return Err(GpumonError::Config(format!(
                "Invalid interval bounds {}..={}ms",
                self.min_interval_ms, self.max_interval_ms
            )));
        }

        self.check_interval(self.default_interval_ms)
            .map_err(|e| GpumonError::Config(format!("default_interval_ms: {}", e)))?;

        if self.history_capacity == 0 {
            return Err(GpumonError::Config("history_capacity must be at least 1".into()));
        }

        if self.stale_multiplier == 0 {
            return Err(GpumonError::Config("stale_multiplier must be at least 1".into()));
        }

        if self.malformed_threshold == 0 {
            return Err(GpumonError::Config("malformed_threshold must be at least 1".into()));
        }

        self.breaker.validate().map_err(GpumonError::Config)?;

        Ok(())
    }

    pub fn check_interval(&self, interval_ms: u64) -> GpumonResult<()> {
        if interval_ms < self.min_interval_ms || interval_ms > self.max_interval_ms {
            return Err(GpumonError::InvalidInterval {
                interval_ms,
                min_ms: self.min_interval_ms,
                max_ms: self.max_interval_ms,
            });
        }
        Ok(())
    }

    pub fn stale_timeout(&self, interval_ms: u64) -> Duration {
        let scaled = interval_ms.saturating_mul(self.stale_multiplier as u64);
        Duration::from_millis(scaled.max(self.stale_floor_ms))
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }
}

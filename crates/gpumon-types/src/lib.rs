#![forbid(unsafe_code)]
#![warn(clippy::all)]

mod error;
mod sample;
mod status;

pub use error::{GpumonError, GpumonResult};
pub use sample::{MetricKey, MetricSample, SeriesPoint, UnknownMetricKey, Vendor};
pub use status::{BreakerState, SupervisorStatus};

pub const DEFAULT_INTERVAL_MS: u64 = 1000;

pub const MIN_INTERVAL_MS: u64 = 100;

pub const MAX_INTERVAL_MS: u64 = 60_000;

pub const DEFAULT_HISTORY_CAPACITY: usize = 120;

pub const DEFAULT_STALE_MULTIPLIER: u32 = 10;

pub const DEFAULT_STALE_FLOOR_MS: u64 = 5_000;

pub const DEFAULT_MALFORMED_THRESHOLD: u32 = 3;

pub const DEFAULT_TERMINATE_GRACE_MS: u64 = 2_000;

pub const BREAKER_FAILURE_THRESHOLD: u32 = 5;

pub const BREAKER_WINDOW_SECS: u64 = 60;

pub const RESTART_BACKOFF_BASE_MS: u64 = 1_000;

pub const RESTART_BACKOFF_MAX_MS: u64 = 60_000;

pub const HEARTBEAT_MARKER: &str = "HEARTBEAT";

pub const FIELD_DELIMITER: char = '|';

use gpumon_types::{
    BreakerState, BREAKER_FAILURE_THRESHOLD, BREAKER_WINDOW_SECS, RESTART_BACKOFF_BASE_MS,
    RESTART_BACKOFF_MAX_MS,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Failures inside any sliding window that open the breaker.
    pub failure_threshold: u32,
    pub window_secs: u64,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: BREAKER_FAILURE_THRESHOLD,
            window_secs: BREAKER_WINDOW_SECS,
            base_backoff_ms: RESTART_BACKOFF_BASE_MS,
            max_backoff_ms: RESTART_BACKOFF_MAX_MS,
        }
    }
}

impl BreakerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("breaker.failure_threshold must be at least 1".into());
        }
        if self.window_secs == 0 {
            return Err("breaker.window_secs must be at least 1".into());
        }
        if self.max_backoff_ms < self.base_backoff_ms {
            return Err("breaker.max_backoff_ms must not be below base_backoff_ms".into());
        }
        Ok(())
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakerDecision {
    Retry { attempt: u32, delay: Duration },
    Open,
}

#[derive(Clone, Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: BreakerState,
    consecutive_failures: u32,
    /// Failure instants from the last `window`, oldest first.
    recent_failures: VecDeque<Instant>,
    total_failures: u64,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::Closed,
            consecutive_failures: 0,
            recent_failures: VecDeque::new(),
            total_failures: 0,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == BreakerState::Open
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn failures_in_window(&self) -> u32 {
        self.recent_failures.len() as u32
    }

    pub fn total_failures(&self) -> u64 {
        self.total_failures
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn record_failure(&mut self) -> BreakerDecision {
        self.record_failure_at(Instant::now())
    }

    pub fn record_failure_at(&mut self, now: Instant) -> BreakerDecision {
        self.total_failures += 1;

        if self.state == BreakerState::Open {
            return BreakerDecision::Open;
        }

        self.expire(now);
        self.recent_failures.push_back(now);
        self.consecutive_failures += 1;

        if self.failures_in_window() >= self.config.failure_threshold {
            self.state = BreakerState::Open;
            warn!(
                "Circuit breaker opened: {} failures within {}s",
                self.failures_in_window(), self.config.window_secs
            );
            return BreakerDecision::Open;
        }

        let delay = self.backoff_delay();
        debug!(
            "Breaker failure {}/{} in window, retry in {:?}",
            self.failures_in_window(), self.config.failure_threshold, delay
        );
        BreakerDecision::Retry {
            attempt: self.consecutive_failures,
            delay,
        }
    }

    /// Forgets failures that happened `window` or longer before `now`.
    fn expire(&mut self, now: Instant) {
        let window = self.config.window();
        while let Some(&oldest) = self.recent_failures.front() {
            if now.saturating_duration_since(oldest) < window {
                break;
            }
            self.recent_failures.pop_front();
        }
    }

    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 {
            debug!(
                "Breaker success after {} consecutive failure(s)",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
    }

    /// `min(max, base * 2^(consecutive_failures - 1))`
    pub fn backoff_delay(&self) -> Duration {
        let exponent = self.consecutive_failures.saturating_sub(1).min(32);
        let delay = self
            .config
            .base_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.config.max_backoff_ms);
        Duration::from_millis(delay)
    }

    pub fn reset(&mut self) {
        self.state = BreakerState::Closed;
        self.consecutive_failures = 0;
        self.recent_failures.clear();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

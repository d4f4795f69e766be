use thiserror::Error;

#[derive(Error, Debug)]
pub enum GpumonError {
    #[error("Collector spawn failed: {0}")]
    Spawn(String),

    #[error("Circuit breaker is open: collector disabled until reset")]
    BreakerOpen,

    #[error("Invalid sampling interval {interval_ms}ms (allowed {min_ms}..={max_ms}ms)")]
    InvalidInterval {
        interval_ms: u64,
        min_ms: u64,
        max_ms: u64,
    },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type GpumonResult<T> = Result<T, GpumonError>;

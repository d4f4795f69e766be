#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod breaker;
pub mod codec;
pub mod config;
pub mod store;
pub mod supervisor;
pub mod worker;

#[cfg(test)]
mod testing;

pub use breaker::{BreakerConfig, BreakerDecision, CircuitBreaker};
pub use codec::{
    decode_line, decode_start_command, encode_heartbeat, encode_sample, encode_start_command,
    CollectorMessage, DecodeError,
};
pub use config::TelemetryConfig;
pub use store::{TimeSeriesBuffer, TimeSeriesStore};
pub use supervisor::{SupervisorStats, TelemetrySupervisor};
pub use worker::{
    CollectorLauncher, CollectorProcess, CommandLauncher, LaunchedCollector, WorkerEvent,
    WorkerFailure, WorkerHandle, WorkerOptions,
};

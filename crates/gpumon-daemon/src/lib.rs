#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod config;
pub mod sim;

pub use config::{DaemonConfig, LogLevel, LoggingConfig};
pub use sim::{run_simulator, SimOptions, SimOutcome};

mod daemon;
mod logging;
mod types;

pub use daemon::{DaemonConfig, ENV_COLLECTOR, ENV_INTERVAL_MS, ENV_LOG_JSON, ENV_LOG_LEVEL};
pub use logging::LoggingConfig;
pub use types::LogLevel;

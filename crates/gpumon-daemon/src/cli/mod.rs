mod commands;
mod config_cmd;
mod decode;
mod run;
mod utils;

pub use commands::{Cli, Commands};
pub use config_cmd::handle_config;
pub use decode::decode_stdin;
pub use run::run_monitor;
pub use utils::init_logging;

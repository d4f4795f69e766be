mod core;
mod stats;

pub use core::TelemetrySupervisor;
pub use stats::SupervisorStats;

#[cfg(test)]
mod tests;

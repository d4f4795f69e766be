use serde::{Deserialize, Serialize};
use std::fmt;

/// Caller-facing view of the telemetry pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SupervisorStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    /// Temporary trouble; a respawn is pending.
    Degraded,
    /// Disabled until the breaker is reset.
    BreakerOpen,
}

impl SupervisorStatus {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SupervisorStatus::Starting | SupervisorStatus::Running | SupervisorStatus::Degraded
        )
    }
}

impl fmt::Display for SupervisorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorStatus::Stopped => write!(f, "stopped"),
            SupervisorStatus::Starting => write!(f, "starting"),
            SupervisorStatus::Running => write!(f, "running"),
            SupervisorStatus::Degraded => write!(f, "degraded"),
            SupervisorStatus::BreakerOpen => write!(f, "breaker-open"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    #[default]
    Closed,
    Open,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
        }
    }
}

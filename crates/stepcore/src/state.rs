use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state shared by steps and flows.
///
/// `Stopped` is both the initial state and the state a step settles back to
/// after a successful (or compensated) stop. `Removed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Removed,
}

impl StepState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepState::Stopped => "stopped",
            StepState::Starting => "starting",
            StepState::Running => "running",
            StepState::Stopping => "stopping",
            StepState::Removed => "removed",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, StepState::Running)
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

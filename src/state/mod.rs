
use std::fmt;

use serde::Serialize;

/// The overall processing state of an agent. Legal transitions:
/// Waiting → Running on the start of connectivity establishment,
/// Running → Completed once every check list completed,
/// Running → Failed once every check list ended without a single success,
/// Completed → Terminated after the termination delay, and
/// anything → Terminated on `free`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum IceProcessingState {
    /// The agent has streams but connectivity establishment has not
    /// started yet.
    #[serde(rename = "waiting")]
    Waiting = 0,

    /// Connectivity checks are running.
    #[serde(rename = "running")]
    Running = 1,

    /// Every check list completed with a nominated pair per component.
    #[serde(rename = "completed")]
    Completed = 2,

    /// Every check list ended and none of them succeeded.
    #[serde(rename = "failed")]
    Failed = 3,

    /// The agent released its resources; no further state changes occur.
    #[serde(rename = "terminated")]
    Terminated = 4,
}

impl From<u8> for IceProcessingState {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::Running,
            2 => Self::Completed,
            3 => Self::Failed,
            4 => Self::Terminated,
            _ => Self::Waiting,
        }
    }
}

impl Default for IceProcessingState {
    fn default() -> Self {
        Self::Waiting
    }
}

impl fmt::Display for IceProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Waiting => "Waiting",
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Terminated => "Terminated",
        };
        write!(f, "{s}")
    }
}

impl IceProcessingState {
    /// True once processing has ended, successfully or not.
    #[must_use]
    pub fn is_over(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Terminated)
    }

    /// True when processing ended with established connectivity.
    #[must_use]
    pub fn is_established(self) -> bool {
        matches!(self, Self::Completed | Self::Terminated)
    }
}

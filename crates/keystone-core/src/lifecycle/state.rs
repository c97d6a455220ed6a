use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a component or configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum State {
    /// Initial and final state
    Stopped,
    /// Start hook running
    Starting,
    Running,
    /// Stop hook running
    Stopping,
    /// A hook failed; only an explicit retry or a stop leaves this state
    Failed,
}

impl State {
    /// Whether the direct transition `self -> to` is part of the state machine.
    ///
    /// Force-stop is not listed: it may move any state to STOPPED.
    pub fn can_transition_to(&self, to: State) -> bool {
        matches!(
            (self, to),
            (State::Stopped, State::Starting)
                | (State::Starting, State::Running)
                | (State::Starting, State::Failed)
                | (State::Running, State::Stopping)
                | (State::Stopping, State::Stopped)
                | (State::Stopping, State::Failed)
                | (State::Failed, State::Starting)
                | (State::Failed, State::Stopped)
        )
    }

    pub fn is_running(&self) -> bool {
        *self == State::Running
    }

    /// STARTING or STOPPING
    pub fn is_transitional(&self) -> bool {
        matches!(self, State::Starting | State::Stopping)
    }
}

impl Default for State {
    fn default() -> Self {
        State::Stopped
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Stopped => "STOPPED",
            State::Starting => "STARTING",
            State::Running => "RUNNING",
            State::Stopping => "STOPPING",
            State::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

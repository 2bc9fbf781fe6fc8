//! Capture lifecycle state machine.
//!
//! Readiness, data, and termination signals for the external process arrive
//! asynchronously on two uncorrelated streams. Every transition here is a
//! pure function of (current state, signal) so the machine is testable
//! without spawning real processes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of one capture session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// No session started yet.
    #[default]
    Idle,
    /// Process spawned, waiting for the first `stream_start` record.
    Starting,
    /// Capture confirmed running by the binary itself.
    Running,
    /// Termination requested or signalled, waiting for process exit.
    Stopping,
    /// Process exited cleanly. Terminal.
    Stopped,
    /// Spawn failure, abnormal exit, or fatal denial. Terminal.
    Errored,
}

impl LifecycleState {
    /// Returns true for `Stopped` and `Errored`; no further transitions
    /// occur afterwards for this session.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Errored)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Inputs that can drive a lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// Caller requested a start.
    StartRequested,
    /// First `stream_start` record decoded.
    StreamStarted,
    /// Caller requested a stop.
    StopRequested,
    /// `stream_stop` record decoded while the session was live.
    StreamStopped,
    /// Process exited without an error condition.
    ExitedClean,
    /// Process exited abnormally.
    ExitedError,
    /// Process could not be spawned.
    SpawnFailed,
}

impl LifecycleState {
    /// Pure transition function: next state for a signal, or `None` if the
    /// signal is not meaningful in this state.
    #[must_use]
    pub fn on(self, signal: LifecycleSignal) -> Option<Self> {
        use LifecycleSignal as S;

        match (self, signal) {
            (Self::Idle, S::StartRequested) => Some(Self::Starting),
            (Self::Starting, S::StreamStarted) => Some(Self::Running),
            (Self::Starting | Self::Running, S::StopRequested)
            | (Self::Running, S::StreamStopped) => Some(Self::Stopping),
            (Self::Starting | Self::Running | Self::Stopping, S::ExitedClean) => {
                Some(Self::Stopped)
            }
            (state, S::ExitedError | S::SpawnFailed) if !state.is_terminal() => {
                Some(Self::Errored)
            }
            _ => None,
        }
    }
}

/// State machine wrapper that applies signals and logs transitions.
#[derive(Debug, Clone, Default)]
pub struct LifecycleStateMachine {
    state: LifecycleState,
}

impl LifecycleStateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Apply a signal, returning the new state if it caused a transition.
    pub fn apply(&mut self, signal: LifecycleSignal) -> Option<LifecycleState> {
        match self.state.on(signal) {
            Some(next) => {
                tracing::debug!(from = %self.state, to = %next, ?signal, "State transition");
                self.state = next;
                Some(next)
            }
            None => {
                tracing::debug!(state = %self.state, ?signal, "Signal ignored");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::LifecycleSignal as S;
    use super::LifecycleState as L;
    use super::LifecycleStateMachine;

    #[test]
    fn happy_path_transitions() {
        assert_eq!(L::Idle.on(S::StartRequested), Some(L::Starting));
        assert_eq!(L::Starting.on(S::StreamStarted), Some(L::Running));
        assert_eq!(L::Running.on(S::StopRequested), Some(L::Stopping));
        assert_eq!(L::Stopping.on(S::ExitedClean), Some(L::Stopped));
    }

    #[test]
    fn start_rejected_outside_idle() {
        for state in [L::Starting, L::Running, L::Stopping, L::Stopped, L::Errored] {
            assert_eq!(state.on(S::StartRequested), None);
        }
    }

    #[test]
    fn external_stream_stop_moves_running_to_stopping() {
        assert_eq!(L::Running.on(S::StreamStopped), Some(L::Stopping));
        assert_eq!(L::Starting.on(S::StreamStopped), None);
    }

    #[test]
    fn stop_allowed_while_starting() {
        assert_eq!(L::Starting.on(S::StopRequested), Some(L::Stopping));
    }

    #[test]
    fn terminal_states_accept_nothing() {
        for state in [L::Stopped, L::Errored] {
            for signal in [
                S::StartRequested,
                S::StreamStarted,
                S::StopRequested,
                S::StreamStopped,
                S::ExitedClean,
                S::ExitedError,
                S::SpawnFailed,
            ] {
                assert_eq!(state.on(signal), None);
            }
        }
    }

    #[test]
    fn exit_reachable_from_any_live_session_state() {
        for state in [L::Starting, L::Running, L::Stopping] {
            assert_eq!(state.on(S::ExitedClean), Some(L::Stopped));
            assert_eq!(state.on(S::ExitedError), Some(L::Errored));
        }
        // No session exists in idle, so only failure signals apply there.
        assert_eq!(L::Idle.on(S::ExitedClean), None);
        assert_eq!(L::Idle.on(S::SpawnFailed), Some(L::Errored));
    }

    #[test]
    fn machine_applies_and_ignores() {
        let mut machine = LifecycleStateMachine::new();
        assert_eq!(machine.apply(S::StreamStarted), None);
        assert_eq!(machine.apply(S::StartRequested), Some(L::Starting));
        assert_eq!(machine.apply(S::StreamStarted), Some(L::Running));
        assert_eq!(machine.state(), L::Running);
    }
}

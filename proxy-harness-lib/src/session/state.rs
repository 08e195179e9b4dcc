use std::fmt;

/// Lifecycle of a [`Session`](super::Session)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unstarted,
    Starting,
    Running,
    StoppingUpstream,
    StoppingHost,
    Stopped,
    /// Startup failed; teardown keeps this state
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Unstarted => "unstarted",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::StoppingUpstream => "stopping-upstream",
            SessionState::StoppingHost => "stopping-host",
            SessionState::Stopped => "stopped",
            SessionState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

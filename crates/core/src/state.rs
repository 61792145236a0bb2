use serde::Serialize;
use std::fmt;

/// The lifecycle state of a voice session, as shown to the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No session, nothing acquired.
    #[default]
    Idle,
    /// An establishment attempt is in flight.
    Initializing,
    /// Negotiation completed; microphone and transport are live.
    Ready,
    /// The last attempt failed and everything it acquired was released.
    Error,
}

impl SessionState {
    /// Whether a new establishment attempt may begin from this state.
    pub fn accepts_start(self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Initializing => "initializing",
            SessionState::Ready => "ready",
            SessionState::Error => "error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures of a session establishment attempt.
///
/// Collaborators report plain `anyhow` errors; the controller files them under
/// the step that failed so logs say which part of the pipeline broke.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("credential acquisition failed: {0:#}")]
    Credential(anyhow::Error),
    #[error("media acquisition failed: {0:#}")]
    MediaAcquisition(anyhow::Error),
    #[error("signaling exchange failed: {0:#}")]
    Signaling(anyhow::Error),
    #[error("transport error: {0:#}")]
    Transport(anyhow::Error),
    #[error("session is not ready")]
    NotReady,
}

impl SessionError {
    /// Short, stable name of the failure kind for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Credential(_) => "credential",
            SessionError::MediaAcquisition(_) => "media_acquisition",
            SessionError::Signaling(_) => "signaling",
            SessionError::Transport(_) => "transport",
            SessionError::NotReady => "not_ready",
        }
    }
}

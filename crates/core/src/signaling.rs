use crate::{credential::EphemeralCredential, transport::SessionDescription};
use async_trait::async_trait;

/// Everything the signaling endpoint needs for one offer/answer exchange.
#[derive(Debug, Clone, Copy)]
pub struct SignalingRequest<'a> {
    /// Identifier of the remote voice model to connect to.
    pub model: &'a str,
    /// The committed local offer.
    pub offer: &'a SessionDescription,
    /// Bearer credential fetched in the same attempt.
    pub credential: &'a EphemeralCredential,
}

/// Posts a local offer to the remote endpoint and returns its answer.
#[async_trait]
pub trait SignalingClient: Send + Sync {
    async fn exchange(&self, request: SignalingRequest<'_>) -> anyhow::Result<SessionDescription>;
}

//! The peer-connection capability the controller negotiates over.

use crate::media::{AudioTrack, RemoteStream};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpType {
    Offer,
    Answer,
}

/// An SDP payload together with its role in the negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A bidirectional side-channel for discrete application events.
#[derive(Debug)]
pub struct EventChannel {
    pub label: String,
    /// Messages received from the remote peer.
    pub inbound: mpsc::Receiver<String>,
    /// Messages to deliver to the remote peer once the channel is open.
    pub outbound: mpsc::Sender<String>,
}

/// Factory for peer connections. Creating one performs no network activity.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn create_connection(&self) -> anyhow::Result<Box<dyn PeerConnection>>;
}

/// One peer connection. Dropping it without `close` discards it.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Subscribes to remote streams as they arrive. Must be called before
    /// negotiation so that no stream is missed.
    fn subscribe_remote_streams(&self) -> mpsc::Receiver<RemoteStream>;

    async fn add_track(&self, track: Arc<dyn AudioTrack>) -> anyhow::Result<()>;

    async fn create_event_channel(&self, label: &str) -> anyhow::Result<EventChannel>;

    async fn create_offer(&self) -> anyhow::Result<SessionDescription>;

    /// Commits `offer` as the local description and returns the description
    /// that should be sent to the remote side.
    async fn set_local_description(
        &self,
        offer: SessionDescription,
    ) -> anyhow::Result<SessionDescription>;

    async fn set_remote_description(&self, answer: SessionDescription) -> anyhow::Result<()>;

    async fn close(&self) -> anyhow::Result<()>;
}

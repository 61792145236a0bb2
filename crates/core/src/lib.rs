//! Voice Session Core
//!
//! Establishes and tears down a realtime voice session with a remote model:
//! a short-lived credential is fetched, the microphone is captured, a peer
//! connection is negotiated through an offer/answer exchange, and the remote
//! audio is played back. Every collaborator sits behind a trait so the
//! lifecycle can run against real devices or against test doubles.

pub mod controller;
pub mod credential;
pub mod error;
pub mod media;
pub mod signaling;
pub mod state;
pub mod transport;

pub use controller::{
    Collaborators, RealtimeEvent, SessionConfig, SessionController, StartOutcome,
};
pub use credential::{CredentialService, EphemeralCredential};
pub use error::SessionError;
pub use media::{
    AudioFrame, AudioOutput, AudioTrack, LocalMedia, MediaCapture, RemoteAudioSink, RemoteStream,
};
pub use signaling::{SignalingClient, SignalingRequest};
pub use state::SessionState;
pub use transport::{
    EventChannel, PeerConnection, RealtimeTransport, SdpType, SessionDescription,
};

//! OpenAI Realtime adapters
//!
//! Concrete implementations of the voice-session collaborator traits: the
//! backend token endpoint, the Realtime SDP exchange, a WebRTC transport and
//! the audio devices feeding it.

pub mod audio;
pub mod credential;
pub mod devices;
#[cfg(feature = "native-audio")]
pub mod native;
pub mod signaling;
pub mod track;
pub mod webrtc_transport;

pub use credential::SessionTokenClient;
pub use devices::{DiscardingOutput, SilentMicrophone};
#[cfg(feature = "native-audio")]
pub use native::{CpalMicrophone, CpalSpeaker};
pub use signaling::{HttpSignalingClient, OPENAI_REALTIME_URL};
pub use webrtc_transport::WebRtcTransport;

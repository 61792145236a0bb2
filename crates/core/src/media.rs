//! Local capture and remote playback seams.

use async_trait::async_trait;
use bytes::Bytes;
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::sync::mpsc;

/// One encoded chunk of audio, moving between a track and the transport.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub payload: Bytes,
    pub duration: Duration,
}

pub type FrameReceiver = mpsc::Receiver<AudioFrame>;

/// A live local audio source, such as a microphone.
///
/// `stop` must be idempotent: a track may be stopped by failure cleanup,
/// by disposal and again when its owning [`LocalMedia`] is dropped.
pub trait AudioTrack: Send + Sync {
    fn id(&self) -> &str;
    /// MIME type of the frames this track produces, e.g. `audio/PCMU`.
    fn mime_type(&self) -> &str;
    /// Hands the encoded frame stream to the transport. Only the first call
    /// gets the receiver.
    fn take_frames(&self) -> Option<FrameReceiver>;
    fn stop(&self);
    fn is_live(&self) -> bool;
}

/// The set of local tracks captured for one session. Tracks are stopped
/// once, either explicitly or when the set is dropped.
pub struct LocalMedia {
    tracks: Vec<Arc<dyn AudioTrack>>,
    released: AtomicBool,
}

impl LocalMedia {
    pub fn new(tracks: Vec<Arc<dyn AudioTrack>>) -> Self {
        Self {
            tracks,
            released: AtomicBool::new(false),
        }
    }

    pub fn tracks(&self) -> &[Arc<dyn AudioTrack>] {
        &self.tracks
    }

    pub fn live_tracks(&self) -> usize {
        self.tracks.iter().filter(|track| track.is_live()).count()
    }

    pub fn stop_all(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        for track in &self.tracks {
            track.stop();
        }
    }
}

impl Drop for LocalMedia {
    fn drop(&mut self) {
        self.stop_all();
    }
}

impl fmt::Debug for LocalMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMedia")
            .field("tracks", &self.tracks.iter().map(|t| t.id()).collect::<Vec<_>>())
            .finish()
    }
}

/// Microphone access.
#[async_trait]
pub trait MediaCapture: Send + Sync {
    /// Requests audio-only capture. May wait on a permission prompt.
    async fn acquire_audio(&self) -> anyhow::Result<LocalMedia>;
}

/// A remote media stream delivered by the transport.
pub struct RemoteStream {
    pub id: String,
    pub mime_type: String,
    pub frames: FrameReceiver,
}

impl fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStream")
            .field("id", &self.id)
            .field("mime_type", &self.mime_type)
            .finish_non_exhaustive()
    }
}

/// Playback bound to a single remote stream. Implementations stop playing
/// when dropped.
pub trait RemoteAudioSink: Send + Sync {
    fn stream_id(&self) -> &str;
    fn stop(&self);
}

/// Creates playback sinks for remote streams.
pub trait AudioOutput: Send + Sync {
    /// Binds `stream` to a new sink that starts playing immediately.
    fn bind(&self, stream: RemoteStream) -> anyhow::Result<Box<dyn RemoteAudioSink>>;
}

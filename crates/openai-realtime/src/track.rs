//! A local audio track fed by an encoder running elsewhere.

use std::sync::{
    Mutex,
    atomic::{AtomicBool, Ordering},
};
use tracing::debug;
use voice_session_core::{AudioTrack, media::FrameReceiver};
use webrtc::api::media_engine::MIME_TYPE_PCMU;

type StopHook = Box<dyn FnOnce() + Send>;

/// A PCMU track whose frames arrive on a channel. Stopping it runs the
/// producer's stop hook exactly once.
pub struct PcmuTrack {
    id: String,
    frames: Mutex<Option<FrameReceiver>>,
    live: AtomicBool,
    on_stop: Mutex<Option<StopHook>>,
}

impl PcmuTrack {
    pub fn new(
        id: impl Into<String>,
        frames: FrameReceiver,
        on_stop: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            frames: Mutex::new(Some(frames)),
            live: AtomicBool::new(true),
            on_stop: Mutex::new(Some(Box::new(on_stop))),
        }
    }
}

impl AudioTrack for PcmuTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn mime_type(&self) -> &str {
        MIME_TYPE_PCMU
    }

    fn take_frames(&self) -> Option<FrameReceiver> {
        self.frames.lock().ok()?.take()
    }

    fn stop(&self) {
        if !self.live.swap(false, Ordering::SeqCst) {
            return;
        }
        let hook = self.on_stop.lock().ok().and_then(|mut hook| hook.take());
        if let Some(hook) = hook {
            hook();
        }
        debug!(track = %self.id, "Local track stopped");
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

//! Portable capture and output used when no sound hardware is wired in.

use crate::{
    audio::{FRAME_DURATION, PCMU_FRAME_SAMPLES, encode_pcmu},
    track::PcmuTrack,
};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};
use tokio::{sync::mpsc, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, info};
use voice_session_core::{
    AudioFrame, AudioOutput, LocalMedia, MediaCapture, RemoteAudioSink, RemoteStream,
};

const FRAME_BUFFER: usize = 50;

/// A microphone that only ever hears silence, for listen-only sessions.
#[derive(Debug, Default)]
pub struct SilentMicrophone;

#[async_trait]
impl MediaCapture for SilentMicrophone {
    async fn acquire_audio(&self) -> Result<LocalMedia> {
        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        let silence = AudioFrame {
            payload: Bytes::from(encode_pcmu(&[0.0; PCMU_FRAME_SAMPLES])),
            duration: FRAME_DURATION,
        };
        let generator = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FRAME_DURATION);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match tx.try_send(silence.clone()) {
                    Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
        });
        info!("Using silent microphone");
        let track = PcmuTrack::new("silence", rx, move || generator.abort());
        Ok(LocalMedia::new(vec![Arc::new(track)]))
    }
}

/// Drains remote audio without playing it, counting what arrived.
#[derive(Debug, Default)]
pub struct DiscardingOutput {
    received: Arc<AtomicU64>,
}

impl DiscardingOutput {
    /// Frames drained across every stream bound to this output.
    pub fn frames_received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

struct DiscardingSink {
    stream_id: String,
    task: Mutex<Option<JoinHandle<()>>>,
    frames: Arc<AtomicU64>,
}

impl AudioOutput for DiscardingOutput {
    fn bind(&self, mut stream: RemoteStream) -> Result<Box<dyn RemoteAudioSink>> {
        let frames = Arc::new(AtomicU64::new(0));
        let counter = frames.clone();
        let received = self.received.clone();
        let stream_id = stream.id.clone();
        let task = tokio::spawn(async move {
            while stream.frames.recv().await.is_some() {
                received.fetch_add(1, Ordering::Relaxed);
                let seen = counter.fetch_add(1, Ordering::Relaxed) + 1;
                if seen % 250 == 0 {
                    debug!(stream = %stream.id, frames = seen, "Remote audio flowing");
                }
            }
        });
        Ok(Box::new(DiscardingSink {
            stream_id,
            task: Mutex::new(Some(task)),
            frames,
        }))
    }
}

impl RemoteAudioSink for DiscardingSink {
    fn stream_id(&self) -> &str {
        &self.stream_id
    }

    fn stop(&self) {
        if let Some(task) = self.task.lock().ok().and_then(|mut task| task.take()) {
            task.abort();
            debug!(
                stream = %self.stream_id,
                frames = self.frames.load(Ordering::Relaxed),
                "Discarding sink stopped"
            );
        }
    }
}

impl Drop for DiscardingSink {
    fn drop(&mut self) {
        self.stop();
    }
}

//! Sound-card capture and playback through cpal.
//!
//! cpal streams are not `Send`, so each one lives on a dedicated thread that
//! keeps it alive until a running flag is cleared. Samples cross between the
//! device callback and the codec side through a lock-free ring buffer.

use crate::{
    audio::{
        FRAME_DURATION, PCMU_FRAME_SAMPLES, PCMU_SAMPLE_RATE, create_resampler, decode_pcmu,
        encode_pcmu,
    },
    track::PcmuTrack,
};
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use bytes::Bytes;
use cpal::{
    SampleFormat,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use ringbuf::{
    HeapRb,
    traits::{Consumer, Observer, Producer, Split},
};
use rubato::Resampler;
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};
use voice_session_core::{
    AudioFrame, AudioOutput, LocalMedia, MediaCapture, RemoteAudioSink, RemoteStream,
};

const FRAME_BUFFER: usize = 50;
const RING_SECONDS: usize = 2;
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Captures the default input device and encodes it to PCMU.
#[derive(Debug, Default)]
pub struct CpalMicrophone;

#[async_trait]
impl MediaCapture for CpalMicrophone {
    async fn acquire_audio(&self) -> Result<LocalMedia> {
        let (frames_tx, frames) = mpsc::channel(FRAME_BUFFER);
        let (ready_tx, ready_rx) = oneshot::channel();
        let running = Arc::new(AtomicBool::new(true));

        let flag = running.clone();
        std::thread::Builder::new()
            .name("voice-capture".into())
            .spawn(move || run_capture(flag, frames_tx, ready_tx))
            .context("Failed to spawn capture thread")?;

        ready_rx
            .await
            .map_err(|_| anyhow!("capture thread exited before the device opened"))??;

        let track = PcmuTrack::new("microphone", frames, move || {
            running.store(false, Ordering::SeqCst)
        });
        Ok(LocalMedia::new(vec![Arc::new(track)]))
    }
}

fn run_capture(
    running: Arc<AtomicBool>,
    frames: mpsc::Sender<AudioFrame>,
    ready: oneshot::Sender<Result<()>>,
) {
    let opened = (|| -> Result<_> {
        let device = cpal::default_host()
            .default_input_device()
            .context("no default input device")?;
        let supported = device.default_input_config()?;
        if supported.sample_format() != SampleFormat::F32 {
            bail!("unsupported input sample format {}", supported.sample_format());
        }
        let config = supported.config();
        let channels = config.channels as usize;
        let device_rate = config.sample_rate.0 as usize;

        let (mut producer, consumer) = HeapRb::<f32>::new(device_rate * RING_SECONDS).split();
        let stream = device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // Keep the first channel only.
                for sample in data.iter().step_by(channels) {
                    let _ = producer.try_push(*sample);
                }
            },
            |err| error!(error = %err, "Audio capture error"),
            None,
        )?;
        stream.play()?;
        info!(rate = device_rate, channels, "Microphone opened");
        Ok((stream, consumer, device_rate))
    })();

    let (stream, mut consumer, device_rate) = match opened {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let chunk = device_rate * FRAME_DURATION.as_millis() as usize / 1000;
    let mut resampler = match create_resampler(device_rate as f64, PCMU_SAMPLE_RATE, chunk) {
        Ok(resampler) => resampler,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        return;
    }

    let mut input = vec![0.0f32; chunk];
    'capture: while running.load(Ordering::SeqCst) {
        while consumer.occupied_len() >= chunk {
            consumer.pop_slice(&mut input);
            let pcm = match resampler.process(&[&input], None) {
                Ok(mut out) => out.remove(0),
                Err(e) => {
                    warn!(error = %e, "Resampling failed; dropping frame");
                    continue;
                }
            };
            let frame = AudioFrame {
                duration: FRAME_DURATION,
                payload: Bytes::from(encode_pcmu(&pcm)),
            };
            match frames.try_send(frame) {
                Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
                Err(mpsc::error::TrySendError::Closed(_)) => break 'capture,
            }
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    drop(stream);
    debug!("Microphone closed");
}

/// Plays remote PCMU audio on the default output device.
#[derive(Debug, Default)]
pub struct CpalSpeaker;

struct CpalSpeakerSink {
    stream_id: String,
    running: Arc<AtomicBool>,
    decoder: Mutex<Option<JoinHandle<()>>>,
}

impl AudioOutput for CpalSpeaker {
    fn bind(&self, stream: RemoteStream) -> Result<Box<dyn RemoteAudioSink>> {
        let device = cpal::default_host()
            .default_output_device()
            .context("no default output device")?;
        let supported = device.default_output_config()?;
        if supported.sample_format() != SampleFormat::F32 {
            bail!("unsupported output sample format {}", supported.sample_format());
        }
        let config = supported.config();
        let device_rate = config.sample_rate.0 as usize;
        let mut resampler =
            create_resampler(PCMU_SAMPLE_RATE, device_rate as f64, PCMU_FRAME_SAMPLES)?;

        let (mut producer, mut consumer) = HeapRb::<f32>::new(device_rate * RING_SECONDS).split();
        let running = Arc::new(AtomicBool::new(true));

        let flag = running.clone();
        std::thread::Builder::new()
            .name("voice-playback".into())
            .spawn(move || {
                let channels = config.channels as usize;
                let built = device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        for frame in data.chunks_mut(channels) {
                            let sample = consumer.try_pop().unwrap_or(0.0);
                            frame.fill(sample);
                        }
                    },
                    |err| error!(error = %err, "Audio playback error"),
                    None,
                );
                let stream = match built.map_err(anyhow::Error::from).and_then(|s| {
                    s.play()?;
                    Ok(s)
                }) {
                    Ok(stream) => stream,
                    Err(e) => {
                        error!(error = %e, "Failed to open output device");
                        return;
                    }
                };
                while flag.load(Ordering::SeqCst) {
                    std::thread::sleep(POLL_INTERVAL * 10);
                }
                drop(stream);
                debug!("Speaker closed");
            })
            .context("Failed to spawn playback thread")?;

        let RemoteStream { id, mut frames, .. } = stream;
        let decoder = tokio::spawn(async move {
            let mut pending: Vec<f32> = Vec::with_capacity(PCMU_FRAME_SAMPLES * 2);
            while let Some(frame) = frames.recv().await {
                pending.extend(decode_pcmu(&frame.payload));
                while pending.len() >= PCMU_FRAME_SAMPLES {
                    let chunk: Vec<f32> = pending.drain(..PCMU_FRAME_SAMPLES).collect();
                    match resampler.process(&[&chunk], None) {
                        Ok(out) => {
                            producer.push_slice(&out[0]);
                        }
                        Err(e) => warn!(error = %e, "Resampling failed; dropping frame"),
                    }
                }
            }
        });

        info!(stream = %id, rate = device_rate, "Playing remote audio");
        Ok(Box::new(CpalSpeakerSink {
            stream_id: id,
            running,
            decoder: Mutex::new(Some(decoder)),
        }))
    }
}

impl RemoteAudioSink for CpalSpeakerSink {
    fn stream_id(&self) -> &str {
        &self.stream_id
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(decoder) = self.decoder.lock().ok().and_then(|mut d| d.take()) {
            decoder.abort();
        }
    }
}

impl Drop for CpalSpeakerSink {
    fn drop(&mut self) {
        self.stop();
    }
}

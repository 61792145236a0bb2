//! Real-time transport over webrtc-rs.
//!
//! PCMU is the only audio codec registered, so both directions carry G.711
//! mu-law frames that the device adapters can encode and decode themselves.
//! The Realtime endpoint does not accept trickled ICE candidates: committing
//! the local description waits for gathering to finish and returns the
//! description with every candidate inlined.

use crate::audio::pcmu_duration;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::{
    sync::{Mutex, Notify, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use voice_session_core::{
    AudioFrame, AudioTrack, EventChannel, PeerConnection, RealtimeTransport, RemoteStream,
    SdpType, SessionDescription,
};
use webrtc::{
    api::{
        API, APIBuilder,
        interceptor_registry::register_default_interceptors,
        media_engine::{MIME_TYPE_PCMU, MediaEngine},
    },
    data_channel::data_channel_message::DataChannelMessage,
    ice_transport::ice_server::RTCIceServer,
    interceptor::registry::Registry,
    media::Sample,
    peer_connection::{
        RTCPeerConnection, configuration::RTCConfiguration,
        sdp::session_description::RTCSessionDescription,
    },
    rtp_transceiver::{
        RTCRtpTransceiver,
        rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType},
        rtp_receiver::RTCRtpReceiver,
    },
    track::{
        track_local::{TrackLocal, track_local_static_sample::TrackLocalStaticSample},
        track_remote::TrackRemote,
    },
};

const PCMU_PAYLOAD_TYPE: u8 = 0;
const STREAM_BUFFER: usize = 4;
const FRAME_BUFFER: usize = 100;
const EVENT_BUFFER: usize = 64;
const ICE_GATHERING_TIMEOUT: Duration = Duration::from_secs(10);

fn pcmu_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_PCMU.to_owned(),
        clock_rate: 8000,
        channels: 1,
        sdp_fmtp_line: String::new(),
        rtcp_feedback: vec![],
    }
}

/// Creates [`WebRtcPeer`] connections sharing one configured API instance.
pub struct WebRtcTransport {
    api: API,
    ice_servers: Vec<String>,
}

impl WebRtcTransport {
    /// `ice_servers` holds STUN/TURN URLs; an empty list relies on host
    /// candidates only.
    pub fn new(ice_servers: Vec<String>) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_codec(
            RTCRtpCodecParameters {
                capability: pcmu_capability(),
                payload_type: PCMU_PAYLOAD_TYPE,
                ..Default::default()
            },
            RTPCodecType::Audio,
        )?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();
        Ok(Self { api, ice_servers })
    }
}

#[async_trait]
impl RealtimeTransport for WebRtcTransport {
    async fn create_connection(&self) -> Result<Box<dyn PeerConnection>> {
        let ice_servers = if self.ice_servers.is_empty() {
            vec![]
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };
        let peer = self
            .api
            .new_peer_connection(config)
            .await
            .context("Failed to create peer connection")?;
        Ok(Box::new(WebRtcPeer {
            pc: Arc::new(peer),
            tasks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }))
    }
}

/// One webrtc-rs peer connection plus the tasks pumping its media.
pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Drop for WebRtcPeer {
    /// A peer dropped without `close` (one that never finished negotiating)
    /// still stops its pumps and tears down the underlying connection.
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let pc = Arc::clone(&self.pc);
            handle.spawn(async move {
                if let Err(e) = pc.close().await {
                    debug!(error = %e, "Failed to close discarded peer connection");
                }
            });
        }
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    fn subscribe_remote_streams(&self) -> mpsc::Receiver<RemoteStream> {
        let (streams_tx, streams) = mpsc::channel(STREAM_BUFFER);
        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let streams_tx = streams_tx.clone();
                Box::pin(async move {
                    let (frames_tx, frames) = mpsc::channel(FRAME_BUFFER);
                    let stream = RemoteStream {
                        id: track.stream_id(),
                        mime_type: MIME_TYPE_PCMU.to_owned(),
                        frames,
                    };
                    info!(stream = %stream.id, track = %track.id(), "Remote track arrived");
                    if streams_tx.send(stream).await.is_ok() {
                        tokio::spawn(pump_remote_track(track, frames_tx));
                    }
                })
            },
        ));
        streams
    }

    async fn add_track(&self, track: Arc<dyn AudioTrack>) -> Result<()> {
        if !track.mime_type().eq_ignore_ascii_case(MIME_TYPE_PCMU) {
            bail!("unsupported track codec {}", track.mime_type());
        }
        let local = Arc::new(TrackLocalStaticSample::new(
            pcmu_capability(),
            track.id().to_owned(),
            "voice-session".to_owned(),
        ));
        let sender = self
            .pc
            .add_track(Arc::clone(&local) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .context("Failed to add local track")?;

        let mut tasks = self.tasks.lock().await;
        // RTCP has to be read for the interceptors to do their work.
        tasks.push(tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
        }));
        match track.take_frames() {
            Some(frames) => tasks.push(tokio::spawn(pump_local_track(local, frames))),
            None => warn!(track = %track.id(), "Track has no frame source; sending nothing"),
        }
        Ok(())
    }

    async fn create_event_channel(&self, label: &str) -> Result<EventChannel> {
        let channel = self
            .pc
            .create_data_channel(label, None)
            .await
            .context("Failed to create data channel")?;

        let (inbound_tx, inbound) = mpsc::channel(EVENT_BUFFER);
        channel.on_message(Box::new(move |msg: DataChannelMessage| {
            let inbound_tx = inbound_tx.clone();
            Box::pin(async move {
                match String::from_utf8(msg.data.to_vec()) {
                    Ok(text) => {
                        let _ = inbound_tx.send(text).await;
                    }
                    Err(_) => warn!("Dropping non UTF-8 event message"),
                }
            })
        }));

        let opened = Arc::new(Notify::new());
        let signal = opened.clone();
        channel.on_open(Box::new(move || {
            signal.notify_one();
            Box::pin(async {})
        }));

        let (outbound, mut outbound_rx) = mpsc::channel::<String>(EVENT_BUFFER);
        let sender = Arc::clone(&channel);
        let label_owned = label.to_owned();
        self.tasks.lock().await.push(tokio::spawn(async move {
            opened.notified().await;
            debug!(channel = %label_owned, "Event channel open");
            while let Some(text) = outbound_rx.recv().await {
                if let Err(e) = sender.send_text(text).await {
                    warn!(channel = %label_owned, error = %e, "Failed to send event");
                    break;
                }
            }
        }));

        Ok(EventChannel {
            label: label.to_owned(),
            inbound,
            outbound,
        })
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .context("Failed to create offer")?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn set_local_description(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription> {
        let description = RTCSessionDescription::offer(offer.sdp)?;
        let mut gathering = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(description)
            .await
            .context("Failed to set local description")?;

        if tokio::time::timeout(ICE_GATHERING_TIMEOUT, gathering.recv())
            .await
            .is_err()
        {
            warn!("ICE gathering did not finish in time; sending partial candidates");
        }

        let local = self
            .pc
            .local_description()
            .await
            .context("Local description missing after commit")?;
        Ok(SessionDescription::offer(local.sdp))
    }

    async fn set_remote_description(&self, answer: SessionDescription) -> Result<()> {
        let description = match answer.sdp_type {
            SdpType::Answer => RTCSessionDescription::answer(answer.sdp)?,
            SdpType::Offer => bail!("expected an SDP answer from the remote side"),
        };
        self.pc
            .set_remote_description(description)
            .await
            .context("Failed to set remote description")?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        self.closed.store(true, Ordering::SeqCst);
        self.pc.close().await.context("Failed to close peer connection")?;
        debug!("Peer connection closed");
        Ok(())
    }
}

async fn pump_local_track(
    local: Arc<TrackLocalStaticSample>,
    mut frames: mpsc::Receiver<AudioFrame>,
) {
    while let Some(frame) = frames.recv().await {
        let sample = Sample {
            data: frame.payload,
            duration: frame.duration,
            ..Default::default()
        };
        if let Err(e) = local.write_sample(&sample).await {
            debug!(error = %e, "Local track closed");
            break;
        }
    }
}

async fn pump_remote_track(track: Arc<TrackRemote>, frames: mpsc::Sender<AudioFrame>) {
    loop {
        match track.read_rtp().await {
            Ok((packet, _)) => {
                let frame = AudioFrame {
                    duration: pcmu_duration(packet.payload.len()),
                    payload: packet.payload,
                };
                if frames.send(frame).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "Remote track ended");
                break;
            }
        }
    }
}

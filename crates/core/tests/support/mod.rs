//! Scripted collaborators that record every call into a shared journal.

#![allow(dead_code)]

use async_trait::async_trait;
use anyhow::{Result, anyhow};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use tokio::sync::{Notify, mpsc};
use voice_session_core::{
    AudioOutput, AudioTrack, Collaborators, CredentialService, EphemeralCredential, EventChannel,
    LocalMedia, MediaCapture, PeerConnection, RealtimeTransport, RemoteAudioSink, RemoteStream,
    SessionConfig, SessionController, SessionDescription, SignalingClient, SignalingRequest,
    media::FrameReceiver,
};

#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.position(entry).is_some()
    }
}

// --- Credentials ---

pub struct FakeCredentials {
    pub journal: Journal,
    pub token: Option<&'static str>,
    pub expires_at: Option<u64>,
}

#[async_trait]
impl CredentialService for FakeCredentials {
    async fn fetch(&self) -> Result<EphemeralCredential> {
        self.journal.record("credentials.fetch");
        match self.token {
            Some(token) => Ok(EphemeralCredential::new(token, self.expires_at)),
            None => Err(anyhow!("session endpoint returned 500")),
        }
    }
}

// --- Media ---

#[derive(Default)]
pub struct FakeTrack {
    pub id: String,
    stopped: AtomicBool,
    pub stops: AtomicUsize,
}

impl FakeTrack {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Default::default()
        }
    }
}

impl AudioTrack for FakeTrack {
    fn id(&self) -> &str {
        &self.id
    }
    fn mime_type(&self) -> &str {
        "audio/PCMU"
    }
    fn take_frames(&self) -> Option<FrameReceiver> {
        None
    }
    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
    fn is_live(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }
}

/// Pauses a collaborator call until released, to hold an attempt in flight.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

pub struct FakeMedia {
    pub journal: Journal,
    pub deny: bool,
    pub tracks: Mutex<Vec<Arc<FakeTrack>>>,
    pub gate: Option<Arc<Gate>>,
}

impl FakeMedia {
    pub fn acquired(&self) -> Vec<Arc<FakeTrack>> {
        self.tracks.lock().unwrap().clone()
    }

    pub fn live_tracks(&self) -> usize {
        self.acquired().iter().filter(|t| t.is_live()).count()
    }
}

#[async_trait]
impl MediaCapture for FakeMedia {
    async fn acquire_audio(&self) -> Result<LocalMedia> {
        self.journal.record("media.acquire");
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if self.deny {
            return Err(anyhow!("permission denied"));
        }
        let mut tracks = self.tracks.lock().unwrap();
        let track = Arc::new(FakeTrack::new(&format!("mic-{}", tracks.len() + 1)));
        tracks.push(track.clone());
        Ok(LocalMedia::new(vec![track]))
    }
}

// --- Transport ---

#[derive(Default)]
pub struct ConnectionProbe {
    pub added_tracks: Mutex<Vec<String>>,
    pub closes: AtomicUsize,
    pub local_description: Mutex<Option<SessionDescription>>,
    pub remote_description: Mutex<Option<SessionDescription>>,
    remote_tx: Mutex<Option<mpsc::Sender<RemoteStream>>>,
    inbound_tx: Mutex<Option<mpsc::Sender<String>>>,
    outbound_rx: tokio::sync::Mutex<Option<mpsc::Receiver<String>>>,
}

impl ConnectionProbe {
    /// Simulates the transport delivering a remote stream.
    pub async fn deliver_remote_stream(&self, id: &str) {
        let tx = self.remote_tx.lock().unwrap().clone().expect("not subscribed");
        let (_frames_tx, frames) = mpsc::channel(1);
        tx.send(RemoteStream {
            id: id.to_string(),
            mime_type: "audio/PCMU".to_string(),
            frames,
        })
        .await
        .expect("remote stream receiver dropped");
    }

    /// Simulates the remote model sending an event.
    pub async fn deliver_event(&self, raw: &str) {
        let tx = self.inbound_tx.lock().unwrap().clone().expect("no channel");
        tx.send(raw.to_string()).await.expect("event receiver dropped");
    }

    /// Whether the controller stopped listening for remote streams.
    pub fn remote_streams_closed(&self) -> bool {
        self.remote_tx
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|tx| tx.is_closed())
    }

    pub async fn next_outbound(&self) -> Option<String> {
        let mut guard = self.outbound_rx.lock().await;
        guard.as_mut()?.recv().await
    }
}

pub struct FakeConnection {
    journal: Journal,
    probe: Arc<ConnectionProbe>,
    fail_remote_description: bool,
    answer_gate: Option<Arc<Gate>>,
}

#[async_trait]
impl PeerConnection for FakeConnection {
    fn subscribe_remote_streams(&self) -> mpsc::Receiver<RemoteStream> {
        self.journal.record("connection.subscribe_remote_streams");
        let (tx, rx) = mpsc::channel(4);
        *self.probe.remote_tx.lock().unwrap() = Some(tx);
        rx
    }

    async fn add_track(&self, track: Arc<dyn AudioTrack>) -> Result<()> {
        self.journal.record(format!("connection.add_track:{}", track.id()));
        self.probe.added_tracks.lock().unwrap().push(track.id().to_string());
        Ok(())
    }

    async fn create_event_channel(&self, label: &str) -> Result<EventChannel> {
        self.journal.record(format!("connection.create_event_channel:{}", label));
        let (inbound_tx, inbound) = mpsc::channel(8);
        let (outbound, outbound_rx) = mpsc::channel(8);
        *self.probe.inbound_tx.lock().unwrap() = Some(inbound_tx);
        *self.probe.outbound_rx.lock().await = Some(outbound_rx);
        Ok(EventChannel {
            label: label.to_string(),
            inbound,
            outbound,
        })
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.journal.record("connection.create_offer");
        Ok(SessionDescription::offer("v=0\r\no=- offer\r\n"))
    }

    async fn set_local_description(&self, offer: SessionDescription) -> Result<SessionDescription> {
        self.journal.record("connection.set_local_description");
        let committed = SessionDescription::offer(format!("{}a=candidate:1\r\n", offer.sdp));
        *self.probe.local_description.lock().unwrap() = Some(committed.clone());
        Ok(committed)
    }

    async fn set_remote_description(&self, answer: SessionDescription) -> Result<()> {
        self.journal.record("connection.set_remote_description");
        if let Some(gate) = &self.answer_gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if self.fail_remote_description {
            return Err(anyhow!("malformed answer"));
        }
        *self.probe.remote_description.lock().unwrap() = Some(answer);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.journal.record("connection.close");
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeTransport {
    pub journal: Journal,
    pub fail_remote_description: bool,
    pub answer_gate: Option<Arc<Gate>>,
    pub connections: Mutex<Vec<Arc<ConnectionProbe>>>,
}

impl FakeTransport {
    pub fn created(&self) -> Vec<Arc<ConnectionProbe>> {
        self.connections.lock().unwrap().clone()
    }
}

#[async_trait]
impl RealtimeTransport for FakeTransport {
    async fn create_connection(&self) -> Result<Box<dyn PeerConnection>> {
        self.journal.record("transport.create_connection");
        let probe = Arc::new(ConnectionProbe::default());
        self.connections.lock().unwrap().push(probe.clone());
        Ok(Box::new(FakeConnection {
            journal: self.journal.clone(),
            probe,
            fail_remote_description: self.fail_remote_description,
            answer_gate: self.answer_gate.clone(),
        }))
    }
}

// --- Signaling ---

pub struct FakeSignaling {
    pub journal: Journal,
    pub reject: bool,
    pub seen: Mutex<Vec<(String, String, String)>>,
}

#[async_trait]
impl SignalingClient for FakeSignaling {
    async fn exchange(&self, request: SignalingRequest<'_>) -> Result<SessionDescription> {
        self.journal.record("signaling.exchange");
        self.seen.lock().unwrap().push((
            request.model.to_string(),
            request.credential.bearer().to_string(),
            request.offer.sdp.clone(),
        ));
        if self.reject {
            return Err(anyhow!("endpoint returned 401 Unauthorized"));
        }
        Ok(SessionDescription::answer("v=0\r\no=- answer\r\n"))
    }
}

// --- Output ---

pub struct FakeSink {
    stream_id: String,
    pub stopped: Arc<AtomicBool>,
}

impl RemoteAudioSink for FakeSink {
    fn stream_id(&self) -> &str {
        &self.stream_id
    }
    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

pub struct FakeOutput {
    pub bound: mpsc::UnboundedSender<(String, Arc<AtomicBool>)>,
}

impl AudioOutput for FakeOutput {
    fn bind(&self, stream: RemoteStream) -> Result<Box<dyn RemoteAudioSink>> {
        let stopped = Arc::new(AtomicBool::new(false));
        let _ = self.bound.send((stream.id.clone(), stopped.clone()));
        Ok(Box::new(FakeSink {
            stream_id: stream.id,
            stopped,
        }))
    }
}

// --- Harness ---

/// Which collaborator should misbehave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fault {
    #[default]
    None,
    Credential,
    ExpiredCredential,
    Media,
    Signaling,
    RemoteDescription,
}

pub struct Harness {
    pub journal: Journal,
    pub credentials: Arc<FakeCredentials>,
    pub media: Arc<FakeMedia>,
    pub transport: Arc<FakeTransport>,
    pub signaling: Arc<FakeSignaling>,
    pub bound: mpsc::UnboundedReceiver<(String, Arc<AtomicBool>)>,
    pub controller: Arc<SessionController>,
}

impl Harness {
    pub fn new(fault: Fault) -> Self {
        Self::build(fault, None, None)
    }

    /// Holds the attempt inside `acquire_audio`.
    pub fn gated(gate: Arc<Gate>) -> Self {
        Self::build(Fault::None, Some(gate), None)
    }

    /// Holds the attempt inside `set_remote_description`, after signaling.
    pub fn gated_at_answer(gate: Arc<Gate>) -> Self {
        Self::build(Fault::None, None, Some(gate))
    }

    fn build(fault: Fault, gate: Option<Arc<Gate>>, answer_gate: Option<Arc<Gate>>) -> Self {
        let journal = Journal::default();
        let credentials = Arc::new(FakeCredentials {
            journal: journal.clone(),
            token: (fault != Fault::Credential).then_some("abc123"),
            expires_at: if fault == Fault::ExpiredCredential {
                Some(1_700_000_060)
            } else {
                Some(4_102_444_800)
            },
        });
        let media = Arc::new(FakeMedia {
            journal: journal.clone(),
            deny: fault == Fault::Media,
            tracks: Mutex::new(Vec::new()),
            gate,
        });
        let transport = Arc::new(FakeTransport {
            journal: journal.clone(),
            fail_remote_description: fault == Fault::RemoteDescription,
            answer_gate,
            connections: Mutex::new(Vec::new()),
        });
        let signaling = Arc::new(FakeSignaling {
            journal: journal.clone(),
            reject: fault == Fault::Signaling,
            seen: Mutex::new(Vec::new()),
        });
        let (bound_tx, bound) = mpsc::unbounded_channel();
        let collaborators = Collaborators {
            credentials: credentials.clone(),
            media: media.clone(),
            transport: transport.clone(),
            signaling: signaling.clone(),
            audio_output: Arc::new(FakeOutput { bound: bound_tx }),
        };
        let controller = Arc::new(SessionController::new(
            collaborators,
            SessionConfig::default(),
        ));
        Self {
            journal,
            credentials,
            media,
            transport,
            signaling,
            bound,
            controller,
        }
    }
}

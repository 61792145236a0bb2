//! The session controller.
//!
//! `start` runs the establishment pipeline as a strict sequence of fallible
//! steps. Every resource the attempt acquires is parked in a
//! [`SessionResources`] value that is either committed as the live session or
//! released on failure. `dispose` releases the live session and supersedes any
//! attempt still in flight.

use crate::{
    credential::CredentialService,
    error::SessionError,
    media::{AudioOutput, LocalMedia, MediaCapture, RemoteAudioSink, RemoteStream},
    signaling::{SignalingClient, SignalingRequest},
    state::SessionState,
    transport::{PeerConnection, RealtimeTransport},
};
use anyhow::anyhow;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::{
    sync::{Mutex, broadcast, mpsc, watch},
    task::JoinHandle,
};
use tracing::{Instrument, debug, error, info, instrument, warn};

pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";
pub const EVENT_CHANNEL_LABEL: &str = "oai-events";

/// Tunables for a [`SessionController`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Remote model identifier sent with the offer.
    pub model: String,
    /// Label of the data channel carrying realtime events.
    pub event_channel_label: String,
    /// Capacity of the broadcast buffer for inbound events.
    pub event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            event_channel_label: EVENT_CHANNEL_LABEL.to_string(),
            event_buffer: 64,
        }
    }
}

/// The external capabilities a session is assembled from.
#[derive(Clone)]
pub struct Collaborators {
    pub credentials: Arc<dyn CredentialService>,
    pub media: Arc<dyn MediaCapture>,
    pub transport: Arc<dyn RealtimeTransport>,
    pub signaling: Arc<dyn SignalingClient>,
    pub audio_output: Arc<dyn AudioOutput>,
}

/// How a call to [`SessionController::start`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Ready,
    /// The attempt failed; state is `error` and `last_error` says why.
    Failed,
    /// Another attempt is running or a session is already live.
    Rejected(SessionState),
    /// `dispose` ran while the attempt was in flight.
    Cancelled,
}

/// A message received on the event side-channel. The payload is opaque to
/// the controller.
#[derive(Debug, Clone)]
pub struct RealtimeEvent {
    raw: String,
}

impl RealtimeEvent {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The `type` field, when the payload is a JSON object carrying one.
    pub fn event_type(&self) -> Option<String> {
        let value: serde_json::Value = serde_json::from_str(&self.raw).ok()?;
        value.get("type")?.as_str().map(str::to_owned)
    }
}

type SinkSlot = Arc<Mutex<Option<Box<dyn RemoteAudioSink>>>>;

/// Everything one establishment attempt has acquired so far. Once committed
/// it is the live session.
#[derive(Default)]
struct SessionResources {
    connection: Option<Box<dyn PeerConnection>>,
    media: Option<LocalMedia>,
    sink: SinkSlot,
    outbound: Option<mpsc::Sender<String>>,
    tasks: Vec<JoinHandle<()>>,
}

impl SessionResources {
    /// Stops background tasks, playback and capture. The connection is
    /// closed only if it finished negotiating; otherwise it is discarded.
    async fn release(mut self, negotiated: bool) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(sink) = self.sink.lock().await.take() {
            sink.stop();
        }
        if let Some(media) = self.media.take() {
            media.stop_all();
        }
        if let Some(connection) = self.connection.take() {
            if negotiated {
                if let Err(e) = connection.close().await {
                    warn!(error = %e, "Failed to close peer connection");
                }
            } else {
                debug!("Discarding peer connection that never finished negotiating");
            }
        }
    }

    /// Synchronous variant for when the owner is gone. The close is handed
    /// to the current runtime when there is one.
    fn release_detached(mut self, negotiated: bool) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        if !negotiated {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = connection.close().await {
                        warn!(error = %e, "Failed to close peer connection");
                    }
                });
            }
            Err(_) => warn!("No runtime available; dropping peer connection without close"),
        }
    }
}

impl Drop for SessionResources {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Ok(mut slot) = self.sink.try_lock() {
            if let Some(sink) = slot.take() {
                sink.stop();
            }
        }
        if let Some(media) = self.media.take() {
            media.stop_all();
        }
    }
}

/// Why the pipeline stopped before reaching `ready`.
enum Abort {
    Failed(SessionError),
    Superseded,
}

impl From<SessionError> for Abort {
    fn from(error: SessionError) -> Self {
        Abort::Failed(error)
    }
}

/// An accepted `start` call. Until it settles, no other attempt may begin,
/// even after `dispose` has reset the visible state. Dropping an unsettled
/// attempt (the caller abandoned the future) releases what it holds.
struct Attempt<'a> {
    controller: &'a SessionController,
    generation: u64,
    resources: SessionResources,
    settled: bool,
}

impl Attempt<'_> {
    /// Moves to `next` and reopens `start`, unless a dispose superseded the
    /// attempt. Returns whether the state was published.
    fn publish(&mut self, next: SessionState) -> bool {
        let controller = self.controller;
        let generation = self.generation;
        let published = controller.state_tx.send_if_modified(|state| {
            if controller.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            controller.attempt_in_flight.store(false, Ordering::SeqCst);
            *state = next;
            true
        });
        self.settled |= published;
        published
    }

    /// Reopens `start` without touching the state. Only for superseded
    /// attempts, once their resources are released.
    fn retire(&mut self) {
        let controller = self.controller;
        controller.state_tx.send_if_modified(|_| {
            controller.attempt_in_flight.store(false, Ordering::SeqCst);
            false
        });
        self.settled = true;
    }
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        warn!("Session start abandoned before it settled; releasing");
        drop(std::mem::take(&mut self.resources));
        if !self.publish(SessionState::Idle) {
            self.retire();
        }
    }
}

#[derive(Default)]
struct Inner {
    live: Option<SessionResources>,
    last_error: Option<String>,
}

/// Owns one voice session: its state, its transport and its microphone.
pub struct SessionController {
    collaborators: Collaborators,
    config: SessionConfig,
    state_tx: watch::Sender<SessionState>,
    events_tx: broadcast::Sender<RealtimeEvent>,
    /// Bumped by every dispose; an attempt only commits if it still matches.
    generation: AtomicU64,
    attempt_in_flight: AtomicBool,
    inner: Mutex<Inner>,
}

impl SessionController {
    pub fn new(collaborators: Collaborators, config: SessionConfig) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (events_tx, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            collaborators,
            config,
            state_tx,
            events_tx,
            generation: AtomicU64::new(0),
            attempt_in_flight: AtomicBool::new(false),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Inbound side-channel messages of the live session.
    pub fn subscribe_events(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.events_tx.subscribe()
    }

    /// Diagnostic message of the most recent failed attempt.
    pub async fn last_error(&self) -> Option<String> {
        self.inner.lock().await.last_error.clone()
    }

    /// Sends a message to the remote model over the event side-channel.
    pub async fn send_event(&self, event: &serde_json::Value) -> Result<(), SessionError> {
        let outbound = {
            let inner = self.inner.lock().await;
            inner
                .live
                .as_ref()
                .and_then(|live| live.outbound.clone())
                .ok_or(SessionError::NotReady)?
        };
        outbound
            .send(event.to_string())
            .await
            .map_err(|_| SessionError::Transport(anyhow!("event channel closed")))
    }

    /// Establishes a session. Failures never escape: they leave the state at
    /// `error` with every partially acquired resource released. Dropping the
    /// returned future before it resolves releases the attempt and leaves the
    /// state at `idle`.
    #[instrument(name = "session_start", skip(self), fields(model = %self.config.model))]
    pub async fn start(&self) -> StartOutcome {
        let mut generation = 0;
        let mut rejected = None;
        self.state_tx.send_if_modified(|state| {
            if self.attempt_in_flight.load(Ordering::SeqCst) {
                // A superseded attempt is still releasing its resources.
                rejected = Some(SessionState::Initializing);
                false
            } else if state.accepts_start() {
                self.attempt_in_flight.store(true, Ordering::SeqCst);
                generation = self.generation.load(Ordering::SeqCst);
                *state = SessionState::Initializing;
                true
            } else {
                rejected = Some(*state);
                false
            }
        });
        if let Some(current) = rejected {
            warn!(state = %current, "Ignoring start request");
            return StartOutcome::Rejected(current);
        }

        info!("Starting voice session");
        let mut attempt = Attempt {
            controller: self,
            generation,
            resources: SessionResources::default(),
            settled: false,
        };
        match self.establish(generation, &mut attempt.resources).await {
            Ok(()) => self.commit(&mut attempt).await,
            Err(Abort::Failed(e)) => self.fail(&mut attempt, e).await,
            Err(Abort::Superseded) => {
                std::mem::take(&mut attempt.resources).release(false).await;
                attempt.retire();
                info!("Session attempt superseded by dispose");
                StartOutcome::Cancelled
            }
        }
    }

    /// Releases the live session, if any, and supersedes an in-flight
    /// attempt. Safe to call in any state and any number of times.
    #[instrument(name = "session_dispose", skip(self))]
    pub async fn dispose(&self) {
        self.state_tx.send_modify(|state| {
            self.generation.fetch_add(1, Ordering::SeqCst);
            *state = SessionState::Idle;
        });
        let live = self.inner.lock().await.live.take();
        match live {
            Some(resources) => {
                info!("Releasing voice session");
                resources.release(true).await;
            }
            None => debug!("No live session to release"),
        }
    }

    async fn establish(
        &self,
        generation: u64,
        resources: &mut SessionResources,
    ) -> Result<(), Abort> {
        let collaborators = &self.collaborators;

        let credential = collaborators
            .credentials
            .fetch()
            .await
            .map_err(SessionError::Credential)?;
        debug!(expires_at = ?credential.expires_at(), "Ephemeral credential acquired");
        self.ensure_current(generation)?;

        let connection = collaborators
            .transport
            .create_connection()
            .await
            .map_err(SessionError::Transport)?;
        let connection = resources.connection.insert(connection);

        // The remote stream may arrive at any point once negotiation begins.
        let streams = connection.subscribe_remote_streams();
        resources.tasks.push(spawn_remote_audio(
            streams,
            collaborators.audio_output.clone(),
            resources.sink.clone(),
        ));

        let media = collaborators
            .media
            .acquire_audio()
            .await
            .map_err(SessionError::MediaAcquisition)?;
        let media = resources.media.insert(media);
        info!(tracks = media.tracks().len(), "Microphone acquired");
        self.ensure_current(generation)?;

        for track in media.tracks() {
            connection
                .add_track(Arc::clone(track))
                .await
                .map_err(SessionError::Transport)?;
        }

        let channel = connection
            .create_event_channel(&self.config.event_channel_label)
            .await
            .map_err(SessionError::Transport)?;
        resources.outbound = Some(channel.outbound);
        resources.tasks.push(spawn_event_forwarder(
            channel.label,
            channel.inbound,
            self.events_tx.clone(),
        ));

        let offer = connection
            .create_offer()
            .await
            .map_err(SessionError::Transport)?;
        let local = connection
            .set_local_description(offer)
            .await
            .map_err(SessionError::Transport)?;
        self.ensure_current(generation)?;

        // ICE gathering can be slow; the token must still be good.
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();
        if credential.is_expired_at(now) {
            return Err(SessionError::Credential(anyhow!(
                "ephemeral credential expired before the offer was sent"
            ))
            .into());
        }

        let answer = collaborators
            .signaling
            .exchange(SignalingRequest {
                model: &self.config.model,
                offer: &local,
                credential: &credential,
            })
            .await
            .map_err(SessionError::Signaling)?;
        drop(credential);
        self.ensure_current(generation)?;

        connection
            .set_remote_description(answer)
            .await
            .map_err(SessionError::Transport)?;
        Ok(())
    }

    async fn commit(&self, attempt: &mut Attempt<'_>) -> StartOutcome {
        let mut inner = self.inner.lock().await;
        if attempt.publish(SessionState::Ready) {
            inner.live = Some(std::mem::take(&mut attempt.resources));
            inner.last_error = None;
            info!("Voice session ready");
            return StartOutcome::Ready;
        }
        drop(inner);
        std::mem::take(&mut attempt.resources).release(true).await;
        attempt.retire();
        info!("Session negotiated after dispose; released immediately");
        StartOutcome::Cancelled
    }

    async fn fail(&self, attempt: &mut Attempt<'_>, error: SessionError) -> StartOutcome {
        error!(kind = error.kind(), error = %error, "Voice session failed to start");
        std::mem::take(&mut attempt.resources).release(false).await;

        let mut inner = self.inner.lock().await;
        if attempt.publish(SessionState::Error) {
            inner.last_error = Some(error.to_string());
            StartOutcome::Failed
        } else {
            drop(inner);
            attempt.retire();
            StartOutcome::Cancelled
        }
    }

    fn ensure_current(&self, generation: u64) -> Result<(), Abort> {
        if self.generation.load(Ordering::SeqCst) == generation {
            Ok(())
        } else {
            Err(Abort::Superseded)
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(resources) = self.inner.get_mut().live.take() {
            debug!("Controller dropped with a live session; releasing");
            resources.release_detached(true);
        }
    }
}

/// Binds the first remote stream to a playback sink. Later streams are
/// drained and ignored.
fn spawn_remote_audio(
    mut streams: mpsc::Receiver<RemoteStream>,
    output: Arc<dyn AudioOutput>,
    slot: SinkSlot,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            let Some(stream) = streams.recv().await else {
                return;
            };
            let stream_id = stream.id.clone();
            match output.bind(stream) {
                Ok(sink) => {
                    info!(stream = %stream_id, "Remote audio playing");
                    *slot.lock().await = Some(sink);
                }
                Err(e) => error!(stream = %stream_id, error = %e, "Failed to bind remote audio"),
            }
            while let Some(extra) = streams.recv().await {
                debug!(stream = %extra.id, "Ignoring additional remote stream");
            }
        }
        .in_current_span(),
    )
}

fn spawn_event_forwarder(
    label: String,
    mut inbound: mpsc::Receiver<String>,
    events: broadcast::Sender<RealtimeEvent>,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            while let Some(raw) = inbound.recv().await {
                let event = RealtimeEvent::new(raw);
                debug!(
                    channel = %label,
                    event_type = event.event_type().as_deref().unwrap_or("unknown"),
                    "Received realtime event"
                );
                // Nobody listening is fine.
                let _ = events.send(event);
            }
            debug!(channel = %label, "Event channel closed");
        }
        .in_current_span(),
    )
}

//! Wires the OpenAI Realtime adapters into a session controller and drives
//! one session until shutdown.

use crate::config::Config;
use anyhow::{Context, bail};
use openai_realtime::{
    DiscardingOutput, HttpSignalingClient, SessionTokenClient, SilentMicrophone, WebRtcTransport,
};
use serde_json::{Value, json};
use std::{future::Future, sync::Arc};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use voice_session_core::{
    AudioOutput, Collaborators, MediaCapture, RealtimeEvent, SessionConfig, SessionController,
    StartOutcome,
};

/// Where local audio comes from and remote audio goes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AudioMode {
    /// Default sound devices; needs the `native-audio` feature.
    Native,
    /// Silence upstream, remote audio discarded.
    ListenOnly,
}

fn audio_devices(mode: AudioMode) -> (Arc<dyn MediaCapture>, Arc<dyn AudioOutput>) {
    match mode {
        #[cfg(feature = "native-audio")]
        AudioMode::Native => (
            Arc::new(openai_realtime::CpalMicrophone),
            Arc::new(openai_realtime::CpalSpeaker),
        ),
        #[cfg(not(feature = "native-audio"))]
        AudioMode::Native => {
            warn!("Built without native-audio; falling back to listen-only");
            (Arc::new(SilentMicrophone), Arc::new(DiscardingOutput::default()))
        }
        AudioMode::ListenOnly => (
            Arc::new(SilentMicrophone),
            Arc::new(DiscardingOutput::default()),
        ),
    }
}

/// Builds a controller from the loaded configuration.
pub fn build_controller(config: &Config, mode: AudioMode) -> anyhow::Result<SessionController> {
    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()
        .context("Failed to build HTTP client")?;
    let transport =
        WebRtcTransport::new(config.ice_servers.clone()).context("Failed to set up WebRTC")?;
    let (media, audio_output) = audio_devices(mode);

    let collaborators = Collaborators {
        credentials: Arc::new(SessionTokenClient::new(http.clone(), config.session_url.clone())),
        media,
        transport: Arc::new(transport),
        signaling: Arc::new(HttpSignalingClient::new(http, config.realtime_url.clone())),
        audio_output,
    };
    let session_config = SessionConfig {
        model: config.model.clone(),
        ..SessionConfig::default()
    };
    Ok(SessionController::new(collaborators, session_config))
}

/// The event asking the model to speak first with the given instructions.
pub fn greeting_event(instructions: &str) -> Value {
    json!({
        "type": "response.create",
        "response": { "instructions": instructions },
    })
}

fn log_event(event: &RealtimeEvent) {
    match event.event_type().as_deref() {
        Some("error") => warn!(event = %event.raw(), "Realtime error event"),
        Some(kind) => debug!(kind, "Realtime event"),
        None => debug!(raw = %event.raw(), "Unrecognised realtime message"),
    }
}

/// Starts a session, optionally sends a greeting, and logs events until
/// `shutdown` resolves. The session is always disposed before returning.
pub async fn run(
    controller: &SessionController,
    greeting: Option<&str>,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    let mut events = controller.subscribe_events();

    let outcome = controller.start().await;
    if outcome != StartOutcome::Ready {
        let reason = controller
            .last_error()
            .await
            .unwrap_or_else(|| "no error recorded".to_string());
        controller.dispose().await;
        bail!("session did not start ({outcome:?}): {reason}");
    }
    info!("Voice session ready. Press Ctrl+C to hang up.");

    if let Some(instructions) = greeting {
        if let Err(e) = controller.send_event(&greeting_event(instructions)).await {
            controller.dispose().await;
            return Err(e).context("Failed to send greeting");
        }
    }

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event log fell behind"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    controller.dispose().await;
    info!("Voice session closed.");
    Ok(())
}

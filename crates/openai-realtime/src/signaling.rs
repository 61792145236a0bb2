//! SDP offer/answer exchange with the OpenAI Realtime endpoint.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::{Url, header::CONTENT_TYPE};
use tracing::{debug, instrument};
use voice_session_core::{SessionDescription, SignalingClient, SignalingRequest};

pub const OPENAI_REALTIME_URL: &str = "https://api.openai.com/v1/realtime";

const SDP_CONTENT_TYPE: &str = "application/sdp";

/// Posts the local offer as `application/sdp` and reads the raw answer SDP
/// from the response body.
pub struct HttpSignalingClient {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpSignalingClient {
    pub fn new(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }
}

#[async_trait]
impl SignalingClient for HttpSignalingClient {
    #[instrument(name = "sdp_exchange", skip_all, fields(model = %request.model))]
    async fn exchange(&self, request: SignalingRequest<'_>) -> Result<SessionDescription> {
        let response = self
            .http
            .post(self.base_url.clone())
            .query(&[("model", request.model)])
            .bearer_auth(request.credential.bearer())
            .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
            .body(request.offer.sdp.clone())
            .send()
            .await
            .context("Failed to reach signaling endpoint")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            bail!("signaling endpoint returned {}: {}", status, detail.trim());
        }

        let sdp = response
            .text()
            .await
            .context("Failed to read SDP answer")?;
        if sdp.trim().is_empty() {
            bail!("signaling endpoint returned an empty answer");
        }
        debug!(bytes = sdp.len(), "SDP answer received");
        Ok(SessionDescription::answer(sdp))
    }
}

//! Fetches ephemeral Realtime credentials from the application backend.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, instrument};
use voice_session_core::{CredentialService, EphemeralCredential};

/// Body returned by the backend when it mints a Realtime session.
#[derive(Deserialize)]
struct SessionResponse {
    client_secret: ClientSecret,
}

#[derive(Deserialize)]
struct ClientSecret {
    value: String,
    #[serde(default)]
    expires_at: Option<u64>,
}

/// A [`CredentialService`] backed by an HTTP endpoint that mints Realtime
/// sessions server-side and hands out their client secret.
pub struct SessionTokenClient {
    http: reqwest::Client,
    url: Url,
}

impl SessionTokenClient {
    pub fn new(http: reqwest::Client, url: Url) -> Self {
        Self { http, url }
    }
}

#[async_trait]
impl CredentialService for SessionTokenClient {
    #[instrument(name = "fetch_credential", skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> Result<EphemeralCredential> {
        let response = self
            .http
            .get(self.url.clone())
            .send()
            .await
            .context("Failed to reach session endpoint")?;

        let status = response.status();
        if !status.is_success() {
            bail!("session endpoint returned {}", status);
        }

        let body: SessionResponse = response
            .json()
            .await
            .context("Session response did not contain a client secret")?;
        if body.client_secret.value.is_empty() {
            bail!("session endpoint returned an empty client secret");
        }
        debug!(expires_at = ?body.client_secret.expires_at, "Session token received");
        Ok(EphemeralCredential::new(
            body.client_secret.value,
            body.client_secret.expires_at,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    async fn client_for(server: &MockServer) -> SessionTokenClient {
        let url = Url::parse(&format!("{}/api/session", server.uri())).unwrap();
        SessionTokenClient::new(reqwest::Client::new(), url)
    }

    #[tokio::test]
    async fn test_fetch_reads_client_secret() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "sess_001",
                "object": "realtime.session",
                "model": "gpt-4o-realtime-preview-2024-12-17",
                "client_secret": { "value": "ek_abc123", "expires_at": 1735689600 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let credential = client_for(&server).await.fetch().await.unwrap();
        assert_eq!(credential.bearer(), "ek_abc123");
        assert_eq!(credential.expires_at(), Some(1735689600));
    }

    #[tokio::test]
    async fn test_fetch_accepts_missing_expiry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "client_secret": { "value": "ek_1" } })),
            )
            .mount(&server)
            .await;

        let credential = client_for(&server).await.fetch().await.unwrap();
        assert_eq!(credential.expires_at(), None);
    }

    #[tokio::test]
    async fn test_fetch_fails_on_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = client_for(&server).await.fetch().await.unwrap_err();
        assert!(err.to_string().contains("500"), "{err}");
    }

    #[tokio::test]
    async fn test_fetch_fails_on_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "error": "nope" })))
            .mount(&server)
            .await;

        assert!(client_for(&server).await.fetch().await.is_err());
    }

    #[tokio::test]
    async fn test_fetch_rejects_empty_secret() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "client_secret": { "value": "" } })),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).await.fetch().await.unwrap_err();
        assert!(err.to_string().contains("empty client secret"));
    }
}

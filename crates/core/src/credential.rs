use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

/// A short-lived bearer token that authorizes exactly one signaling exchange.
#[derive(Debug)]
pub struct EphemeralCredential {
    token: SecretString,
    /// Unix timestamp (seconds) after which the token is rejected, if known.
    expires_at: Option<u64>,
}

impl EphemeralCredential {
    pub fn new(token: impl Into<String>, expires_at: Option<u64>) -> Self {
        Self {
            token: SecretString::from(token.into()),
            expires_at,
        }
    }

    /// The raw token, for use as an `Authorization: Bearer` value.
    pub fn bearer(&self) -> &str {
        self.token.expose_secret()
    }

    pub fn expires_at(&self) -> Option<u64> {
        self.expires_at
    }

    /// Tokens without an expiry never report as expired.
    pub fn is_expired_at(&self, unix_secs: u64) -> bool {
        self.expires_at.is_some_and(|expiry| unix_secs >= expiry)
    }
}

/// Source of ephemeral credentials, typically a backend that mints them.
#[async_trait]
pub trait CredentialService: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<EphemeralCredential>;
}

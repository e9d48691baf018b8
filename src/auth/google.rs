use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::GoogleConfig;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity provider rejected the token: {0}")]
    InvalidExternalToken(String),
    #[error("identity provider unavailable: {0}")]
    UpstreamUnavailable(String),
}

/// Identity asserted by a third-party provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    pub email: String,
    pub name: String,
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<ExternalIdentity, IdentityError>;
}

/// Subset of Google's tokeninfo response this service reads.
#[derive(Debug, Deserialize)]
struct TokenInfo {
    email: Option<String>,
    name: Option<String>,
    aud: Option<String>,
    /// Google sends the string "true" or "false".
    email_verified: Option<String>,
}

/// Validates Google ID tokens against the tokeninfo endpoint.
pub struct GoogleVerifier {
    client: reqwest::Client,
    tokeninfo_url: String,
    client_id: Option<String>,
}

impl GoogleVerifier {
    pub fn new(cfg: &GoogleConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("build google http client")?;
        Ok(Self {
            client,
            tokeninfo_url: cfg.tokeninfo_url.clone(),
            client_id: cfg.client_id.clone(),
        })
    }

    /// False when no client id is configured and any `aud` is accepted.
    pub fn checks_audience(&self) -> bool {
        self.client_id.is_some()
    }
}

#[async_trait]
impl IdentityVerifier for GoogleVerifier {
    async fn verify(&self, token: &str) -> Result<ExternalIdentity, IdentityError> {
        let res = self
            .client
            .get(&self.tokeninfo_url)
            .query(&[("id_token", token)])
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "google tokeninfo request failed");
                IdentityError::UpstreamUnavailable(e.to_string())
            })?;

        let status = res.status();
        if !status.is_success() {
            debug!(%status, "google rejected token");
            return Err(IdentityError::InvalidExternalToken(format!("status {status}")));
        }

        let info: TokenInfo = res
            .json()
            .await
            .map_err(|e| IdentityError::InvalidExternalToken(format!("bad body: {e}")))?;

        if let Some(expected) = &self.client_id {
            if info.aud.as_deref() != Some(expected.as_str()) {
                return Err(IdentityError::InvalidExternalToken(
                    "audience mismatch".into(),
                ));
            }
        }

        if info.email_verified.as_deref() != Some("true") {
            return Err(IdentityError::InvalidExternalToken(
                "email not verified".into(),
            ));
        }

        let email = info
            .email
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .ok_or_else(|| IdentityError::InvalidExternalToken("no email claim".into()))?;
        let name = info
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| email.clone());

        Ok(ExternalIdentity { email, name })
    }
}

//! Credential Cache
//!
//! Obtains the two KIS secrets over HTTPS and caches them until shortly
//! before they expire:
//!
//! - the streaming approval key (`POST /oauth2/Approval`), sent in every
//!   subscription frame
//! - the REST access token (`POST /oauth2/tokenP`)
//!
//! Each credential has its own async mutex which is held across the fetch,
//! so concurrent callers wait for a single refresh instead of racing. A
//! failed fetch is returned to the caller as is; retrying is the caller's
//! business.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::application::ports::{CredentialError, CredentialProvider};
use crate::infrastructure::config::BridgeConfig;
use crate::infrastructure::metrics::{self, CredentialKind};

/// Lowest allowed safety margin.
pub const MIN_SAFETY_MARGIN: Duration = Duration::from_secs(60);

/// Approval key lifetime when the vendor gives no hint.
pub const DEFAULT_APPROVAL_KEY_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Access token lifetime when the vendor gives no hint.
pub const DEFAULT_ACCESS_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

const APPROVAL_PATH: &str = "/oauth2/Approval";
const TOKEN_PATH: &str = "/oauth2/tokenP";
const GRANT_TYPE: &str = "client_credentials";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Configuration
// =============================================================================

/// Settings for [`CredentialCache`].
#[derive(Clone)]
pub struct CredentialCacheConfig {
    /// Vendor application key.
    pub app_key: String,
    /// Vendor application secret.
    pub app_secret: String,
    /// Base URL of the approval endpoint.
    pub approval_base_url: String,
    /// Base URL of the token endpoint.
    pub rest_base_url: String,
    /// Time before expiry at which a credential is refreshed.
    pub safety_margin: Duration,
}

impl std::fmt::Debug for CredentialCacheConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCacheConfig")
            .field("app_key", &"[REDACTED]")
            .field("app_secret", &"[REDACTED]")
            .field("approval_base_url", &self.approval_base_url)
            .field("rest_base_url", &self.rest_base_url)
            .field("safety_margin", &self.safety_margin)
            .finish()
    }
}

impl CredentialCacheConfig {
    /// Build from the service configuration.
    #[must_use]
    pub fn from_bridge_config(config: &BridgeConfig) -> Self {
        Self {
            app_key: config.credentials.app_key().to_string(),
            app_secret: config.credentials.app_secret().to_string(),
            approval_base_url: config.endpoints.approval_base_url.clone(),
            rest_base_url: config.endpoints.rest_base_url.clone(),
            safety_margin: config.upstream.credential_safety_margin,
        }
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Serialize)]
struct ApprovalRequest<'a> {
    grant_type: &'static str,
    appkey: &'a str,
    secretkey: &'a str,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    grant_type: &'static str,
    appkey: &'a str,
    appsecret: &'a str,
}

#[derive(Deserialize)]
struct ApprovalResponse {
    approval_key: Option<String>,
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
}

// =============================================================================
// Cache
// =============================================================================

#[derive(Debug, Clone)]
struct CachedCredential {
    value: String,
    expires_at: Instant,
}

impl CachedCredential {
    fn fresh(&self) -> Option<&str> {
        (Instant::now() < self.expires_at).then_some(self.value.as_str())
    }
}

/// Caching [`CredentialProvider`] backed by the KIS OAuth endpoints.
pub struct CredentialCache {
    client: Client,
    config: CredentialCacheConfig,
    approval_key: Mutex<Option<CachedCredential>>,
    access_token: Mutex<Option<CachedCredential>>,
}

impl CredentialCache {
    /// Create a new cache. The safety margin is raised to at least
    /// [`MIN_SAFETY_MARGIN`].
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(mut config: CredentialCacheConfig) -> Result<Self, CredentialError> {
        config.safety_margin = config.safety_margin.max(MIN_SAFETY_MARGIN);

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CredentialError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            config,
            approval_key: Mutex::new(None),
            access_token: Mutex::new(None),
        })
    }

    fn expires_at(&self, lifetime: Duration) -> Instant {
        Instant::now() + lifetime.saturating_sub(self.config.safety_margin)
    }

    async fn fetch_approval_key(&self) -> Result<CachedCredential, CredentialError> {
        let url = format!("{}{APPROVAL_PATH}", self.config.approval_base_url);
        let body = ApprovalRequest {
            grant_type: GRANT_TYPE,
            appkey: &self.config.app_key,
            secretkey: &self.config.app_secret,
        };

        let response: ApprovalResponse = self.post(&url, &body).await?;
        let value =
            non_blank(response.approval_key).ok_or(CredentialError::MissingField("approval_key"))?;
        let lifetime = response
            .expires_in
            .map_or(DEFAULT_APPROVAL_KEY_LIFETIME, Duration::from_secs);

        Ok(CachedCredential {
            value,
            expires_at: self.expires_at(lifetime),
        })
    }

    async fn fetch_access_token(&self) -> Result<CachedCredential, CredentialError> {
        let url = format!("{}{TOKEN_PATH}", self.config.rest_base_url);
        let body = TokenRequest {
            grant_type: GRANT_TYPE,
            appkey: &self.config.app_key,
            appsecret: &self.config.app_secret,
        };

        let response: TokenResponse = self.post(&url, &body).await?;
        let value =
            non_blank(response.access_token).ok_or(CredentialError::MissingField("access_token"))?;
        let lifetime = response
            .expires_in
            .map_or(DEFAULT_ACCESS_TOKEN_LIFETIME, Duration::from_secs);

        Ok(CachedCredential {
            value,
            expires_at: self.expires_at(lifetime),
        })
    }

    async fn post<B, T>(&self, url: &str, body: &B) -> Result<T, CredentialError>
    where
        B: Serialize + Sync,
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| CredentialError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CredentialError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(CredentialError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(|e| CredentialError::MalformedBody(e.to_string()))
    }

    async fn refresh(
        &self,
        kind: CredentialKind,
        slot: &mut Option<CachedCredential>,
    ) -> Result<String, CredentialError> {
        let fetched = match kind {
            CredentialKind::ApprovalKey => self.fetch_approval_key().await,
            CredentialKind::AccessToken => self.fetch_access_token().await,
        };

        match fetched {
            Ok(credential) => {
                metrics::record_credential_refresh(kind, true);
                tracing::info!(kind = kind.as_str(), "Credential refreshed");
                let value = credential.value.clone();
                *slot = Some(credential);
                Ok(value)
            }
            Err(e) => {
                metrics::record_credential_refresh(kind, false);
                tracing::warn!(kind = kind.as_str(), error = %e, "Credential refresh failed");
                Err(e)
            }
        }
    }
}

#[async_trait]
impl CredentialProvider for CredentialCache {
    async fn approval_key(&self) -> Result<String, CredentialError> {
        let mut slot = self.approval_key.lock().await;
        if let Some(value) = slot.as_ref().and_then(CachedCredential::fresh) {
            return Ok(value.to_string());
        }
        self.refresh(CredentialKind::ApprovalKey, &mut slot).await
    }

    async fn access_token(&self) -> Result<String, CredentialError> {
        let mut slot = self.access_token.lock().await;
        if let Some(value) = slot.as_ref().and_then(CachedCredential::fresh) {
            return Ok(value.to_string());
        }
        self.refresh(CredentialKind::AccessToken, &mut slot).await
    }

    async fn invalidate_approval_key(&self) {
        if self.approval_key.lock().await.take().is_some() {
            tracing::info!(
                kind = CredentialKind::ApprovalKey.as_str(),
                "Cached credential invalidated"
            );
        }
    }
}

impl std::fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCache")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// =============================================================================
// Static Credentials
// =============================================================================

/// Fixed credentials, for tests and local tooling.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    approval_key: String,
    access_token: String,
}

impl StaticCredentials {
    /// Create a provider that always returns the given values.
    #[must_use]
    pub fn new(approval_key: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            approval_key: approval_key.into(),
            access_token: access_token.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn approval_key(&self) -> Result<String, CredentialError> {
        Ok(self.approval_key.clone())
    }

    async fn access_token(&self) -> Result<String, CredentialError> {
        Ok(self.access_token.clone())
    }

    async fn invalidate_approval_key(&self) {}
}

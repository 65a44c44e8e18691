//! Port Interfaces
//!
//! Contracts between the domain and the infrastructure adapters.
//!
//! ## Driven Ports (Outbound)
//!
//! - `UpstreamControl`: commands the registry issues to the single vendor
//!   connection (connect, subscribe, unsubscribe)
//! - `CredentialProvider`: vendor secrets needed to talk to the stream

use async_trait::async_trait;
use thiserror::Error;

/// Upstream commands raised by subscription count transitions.
///
/// Implementations must not block: the registry calls these while holding
/// its lock so that commands are observed in transition order.
#[cfg_attr(test, mockall::automock)]
pub trait UpstreamControl: Send + Sync {
    /// Make sure a connection exists or is being established.
    fn ensure_connected(&self);

    /// A symbol gained its first listener.
    fn subscribe(&self, symbol: &str);

    /// A symbol lost its last listener.
    fn unsubscribe(&self, symbol: &str);
}

/// Source of the vendor credentials.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Streaming approval key, sent in every subscription frame.
    async fn approval_key(&self) -> Result<String, CredentialError>;

    /// REST access token.
    async fn access_token(&self) -> Result<String, CredentialError>;

    /// Forget the approval key after the vendor refused it, so the next
    /// call fetches a new one.
    async fn invalidate_approval_key(&self);
}

/// Credential exchange failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialError {
    /// The HTTP request could not be completed.
    #[error("credential request failed: {0}")]
    Transport(String),

    /// The endpoint answered with a non-success status.
    #[error("credential endpoint returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The response body was not the expected JSON.
    #[error("malformed credential response: {0}")]
    MalformedBody(String),

    /// The response body lacked the secret.
    #[error("credential response missing field `{0}`")]
    MissingField(&'static str),
}

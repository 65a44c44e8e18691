//! KIS Real-time Stream Adapters
//!
//! Everything that talks to Korea Investment & Securities:
//!
//! - **auth**: approval key and access token exchange, cached
//! - **codec** / **messages**: control JSON, heartbeats and `|`/`^` data frames
//! - **upstream**: the single stream connection and its worker
//! - **reconnect** / **heartbeat**: backoff and liveness

pub mod auth;
pub mod codec;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;
pub mod upstream;

pub use auth::{CredentialCache, CredentialCacheConfig, StaticCredentials};
pub use codec::{CodecError, FrameCodec, UpstreamFrame};
pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatMonitor, HeartbeatState};
pub use messages::{ControlFrame, TrType};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use upstream::{
    ConnectionState, UpstreamCommand, UpstreamConfig, UpstreamConnectionManager, UpstreamError,
    UpstreamHandle, UpstreamSnapshot, UpstreamStatus,
};

#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! KIS Stream Bridge - Real-time Price Multiplexer
//!
//! Maintains one WebSocket connection to the Korea Investment & Securities
//! real-time feed and fans trade prices out to many browser sessions, each
//! following a single symbol.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Price types and subscription bookkeeping
//!   - `market`: Symbols and price ticks
//!   - `subscription`: Per-symbol listeners and upstream transitions
//!
//! - **Application**: Port definitions
//!   - `ports`: Upstream control and credential provider seams
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `kis`: Credential exchange, frame codec, upstream connection worker
//!   - `downstream`: Browser WebSocket server and session router
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                    ┌──────────────┐     ┌──────────────┐
//! KIS stream WS ◄───►│   Upstream   │────►│ Subscription │
//!                    │    worker    │◄────│   registry   │
//!                    └──────────────┘     └──────┬───────┘
//!                                                │ per-session callbacks
//!                                         ┌──────▼───────┐
//!                                         │   Session    │──► Browser 1
//!                                         │    router    │──► Browser 2
//!                                         └──────────────┘──► Browser N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Price types and subscription bookkeeping with no I/O.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market::{PriceTick, Symbol};
pub use domain::subscription::{
    ListenerHandle, ListenerId, RegistryStats, SubscriptionRegistry, Transition,
};

// Ports
pub use application::ports::{CredentialError, CredentialProvider, UpstreamControl};

// Infrastructure config
pub use infrastructure::config::{
    BridgeConfig, ConfigError, DownstreamSettings, KisEnvironment, ServerSettings,
    UpstreamSettings, VendorCredentials, VendorEndpoints,
};

// KIS adapters
pub use infrastructure::kis::{
    ConnectionState, CredentialCache, CredentialCacheConfig, StaticCredentials, UpstreamConfig,
    UpstreamConnectionManager, UpstreamError, UpstreamHandle, UpstreamStatus,
};

// Downstream sessions
pub use infrastructure::downstream::{
    DownstreamServer, DownstreamServerError, SessionRouter, STOCK_STREAM_PATH,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};

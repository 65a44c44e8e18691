//! Prometheus Metrics Module
//!
//! Exposes bridge metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Upstream**: frames received by kind, connection state, subscriptions,
//!   errors, reconnects, handshake latency
//! - **Credentials**: refreshes by credential and outcome
//! - **Downstream**: open sessions, prices delivered and dropped
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Later calls return the handle created by the first one.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Upstream
    describe_counter!(
        "kis_bridge_upstream_frames_total",
        "Frames received from the KIS stream by kind"
    );
    describe_gauge!(
        "kis_bridge_upstream_connected",
        "1 while the KIS stream connection is up"
    );
    describe_gauge!(
        "kis_bridge_upstream_subscriptions",
        "Symbols subscribed on the current KIS connection"
    );
    describe_counter!(
        "kis_bridge_upstream_errors_total",
        "Upstream connection errors by type"
    );
    describe_counter!(
        "kis_bridge_reconnects_total",
        "Scheduled upstream reconnection attempts"
    );
    describe_histogram!(
        "kis_bridge_handshake_seconds",
        "Upstream WebSocket handshake duration"
    );

    // Credentials
    describe_counter!(
        "kis_bridge_credential_refreshes_total",
        "Credential fetches by credential and outcome"
    );

    // Downstream
    describe_gauge!(
        "kis_bridge_downstream_sessions",
        "Open downstream WebSocket sessions"
    );
    describe_counter!(
        "kis_bridge_prices_delivered_total",
        "PRICE notifications queued for downstream sessions"
    );
    describe_counter!(
        "kis_bridge_prices_dropped_total",
        "PRICE notifications dropped because a session queue was full"
    );
}

// =============================================================================
// Labels
// =============================================================================

/// Kind of upstream frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Vendor `PINGPONG`.
    Heartbeat,
    /// JSON control frame.
    Control,
    /// Trade data frame.
    Data,
    /// Frame this service does not consume.
    Ignored,
    /// Frame that failed to decode.
    Malformed,
}

impl FrameKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Heartbeat => "heartbeat",
            Self::Control => "control",
            Self::Data => "data",
            Self::Ignored => "ignored",
            Self::Malformed => "malformed",
        }
    }
}

/// Vendor credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    /// Streaming approval key.
    ApprovalKey,
    /// REST access token.
    AccessToken,
}

impl CredentialKind {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ApprovalKey => "approval_key",
            Self::AccessToken => "access_token",
        }
    }
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a frame received from the KIS stream.
pub fn record_upstream_frame(kind: FrameKind) {
    counter!("kis_bridge_upstream_frames_total", "kind" => kind.as_str()).increment(1);
}

/// Update the upstream connection gauge.
pub fn set_upstream_connected(connected: bool) {
    gauge!("kis_bridge_upstream_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Update the upstream subscription gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_upstream_subscriptions(count: usize) {
    gauge!("kis_bridge_upstream_subscriptions").set(count as f64);
}

/// Record an upstream connection error.
pub fn record_upstream_error(error_type: &'static str) {
    counter!("kis_bridge_upstream_errors_total", "error_type" => error_type).increment(1);
}

/// Record a scheduled reconnection.
pub fn record_reconnect() {
    counter!("kis_bridge_reconnects_total").increment(1);
}

/// Record how long a successful handshake took.
pub fn record_handshake_duration(duration: Duration) {
    histogram!("kis_bridge_handshake_seconds").record(duration.as_secs_f64());
}

/// Record a credential fetch.
pub fn record_credential_refresh(kind: CredentialKind, success: bool) {
    counter!(
        "kis_bridge_credential_refreshes_total",
        "credential" => kind.as_str(),
        "outcome" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

/// Update the downstream session gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_downstream_sessions(count: usize) {
    gauge!("kis_bridge_downstream_sessions").set(count as f64);
}

/// Record a PRICE queued for a session.
pub fn record_price_delivered() {
    counter!("kis_bridge_prices_delivered_total").increment(1);
}

/// Record a PRICE dropped on a full session queue.
pub fn record_price_dropped() {
    counter!("kis_bridge_prices_dropped_total").increment(1);
}

// =============================================================================
// Tests
// =============================================================================

//! Heartbeat Monitor
//!
//! Keeps the upstream transport alive and detects dead connections.
//!
//! The vendor sends its own application-level `PINGPONG` frames, which the
//! connection manager answers directly. This monitor adds a transport-level
//! safety net: it asks for a WebSocket ping every `ping_interval` and reports
//! a timeout when nothing at all has arrived for `idle_timeout`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between transport pings.
    pub ping_interval: Duration,
    /// Inbound silence after which the connection is considered dead.
    pub idle_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(120),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, idle_timeout: Duration) -> Self {
        Self {
            ping_interval,
            idle_timeout,
        }
    }

    /// Create configuration from `UpstreamSettings`.
    #[must_use]
    pub const fn from_upstream_settings(settings: &crate::UpstreamSettings) -> Self {
        Self {
            ping_interval: settings.heartbeat_interval,
            idle_timeout: settings.idle_timeout,
        }
    }
}

/// Events emitted by the heartbeat monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send a transport ping.
    SendPing,
    /// Nothing received for longer than the idle timeout.
    Timeout,
}

/// Inbound activity clock shared between the monitor and the reader.
#[derive(Debug)]
pub struct HeartbeatState {
    last_activity: RwLock<Instant>,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Create new heartbeat state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_activity: RwLock::new(Instant::now()),
        }
    }

    /// Record that a frame of any kind arrived.
    pub fn record_activity(&self) {
        *self.last_activity.write() = Instant::now();
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_activity.read().elapsed()
    }

    /// Reset state for a new connection.
    pub fn reset(&self) {
        self.record_activity();
    }
}

/// Periodic liveness check for one connection.
///
/// Runs until cancelled, until the event receiver is dropped, or until it
/// has reported a timeout.
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatMonitor {
    /// Create a new heartbeat monitor.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run the monitoring loop.
    pub async fn run(self) {
        let start = tokio::time::Instant::now() + self.config.ping_interval;
        let mut interval = tokio::time::interval_at(start, self.config.ping_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat monitor cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if !self.tick().await {
                        break;
                    }
                }
            }
        }
    }

    /// Returns `false` when the loop should exit.
    async fn tick(&self) -> bool {
        let idle = self.state.idle_for();
        if idle > self.config.idle_timeout {
            tracing::warn!(
                idle_secs = idle.as_secs(),
                timeout_secs = self.config.idle_timeout.as_secs(),
                "Upstream idle timeout detected"
            );
            let _ = self.event_tx.send(HeartbeatEvent::Timeout).await;
            return false;
        }

        if self.event_tx.send(HeartbeatEvent::SendPing).await.is_err() {
            tracing::debug!("Heartbeat channel closed, stopping monitor");
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.ping_interval, Duration::from_secs(30));
        assert_eq!(config.idle_timeout, Duration::from_secs(120));
    }

    #[test]
    fn activity_resets_idle_clock() {
        let state = HeartbeatState::new();
        *state.last_activity.write() = Instant::now()
            .checked_sub(Duration::from_secs(5))
            .unwrap();
        assert!(state.idle_for() >= Duration::from_secs(5));

        state.record_activity();
        assert!(state.idle_for() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn monitor_requests_pings() {
        let config = HeartbeatConfig::new(Duration::from_millis(30), Duration::from_secs(5));
        let state = Arc::new(HeartbeatState::new());
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(
            HeartbeatMonitor::new(config, state, event_tx, cancel.clone()).run(),
        );

        let event = tokio::time::timeout(Duration::from_millis(500), event_rx.recv())
            .await
            .expect("should receive event")
            .expect("channel should not close");
        assert_eq!(event, HeartbeatEvent::SendPing);

        cancel.cancel();
        handle.await.expect("task should complete");
    }

    #[tokio::test]
    async fn monitor_reports_idle_timeout() {
        let config = HeartbeatConfig::new(Duration::from_millis(20), Duration::from_millis(50));
        let state = Arc::new(HeartbeatState::new());
        *state.last_activity.write() = Instant::now()
            .checked_sub(Duration::from_millis(200))
            .unwrap();
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(
            HeartbeatMonitor::new(config, state, event_tx, cancel.clone()).run(),
        );

        let event = tokio::time::timeout(Duration::from_millis(500), event_rx.recv())
            .await
            .expect("should receive event")
            .expect("channel should not close");
        assert_eq!(event, HeartbeatEvent::Timeout);

        // Monitor exits on its own after a timeout
        tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .expect("monitor should exit")
            .expect("task should complete");
    }

    #[tokio::test]
    async fn monitor_cancellation() {
        let config = HeartbeatConfig::new(Duration::from_secs(10), Duration::from_secs(10));
        let state = Arc::new(HeartbeatState::new());
        let (event_tx, _event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(
            HeartbeatMonitor::new(config, state, event_tx, cancel.clone()).run(),
        );
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_millis(100), handle).await;
        assert!(result.is_ok(), "monitor should shut down on cancellation");
    }
}

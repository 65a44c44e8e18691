//! KIS Stream Bridge Binary
//!
//! Starts the real-time price bridge.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin kis-stream-bridge
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `KIS_APP_KEY`: KIS application key
//! - `KIS_APP_SECRET`: KIS application secret
//!
//! ## Optional
//! - `KIS_ENV`: REAL | VIRTUAL (default: REAL)
//! - `KIS_WS_URL`, `KIS_APPROVAL_BASE_URL`, `KIS_REST_BASE_URL`: endpoint overrides
//! - `BRIDGE_WS_PORT`: Downstream WebSocket port (default: 8080)
//! - `BRIDGE_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: kis-stream-bridge)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use kis_stream_bridge::infrastructure::downstream::{DownstreamServer, SessionRouter};
use kis_stream_bridge::infrastructure::health::{HealthServer, HealthServerState};
use kis_stream_bridge::infrastructure::kis::{
    CredentialCache, CredentialCacheConfig, UpstreamConfig, UpstreamConnectionManager,
    UpstreamHandle, UpstreamStatus,
};
use kis_stream_bridge::infrastructure::telemetry;
use kis_stream_bridge::{BridgeConfig, SubscriptionRegistry, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// How long the upstream worker gets to close its socket after shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    // Initialize telemetry (tracing + optional OpenTelemetry)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting KIS Stream Bridge");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = BridgeConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Credentials are fetched lazily on the first connection attempt
    let credentials = Arc::new(CredentialCache::new(
        CredentialCacheConfig::from_bridge_config(&config),
    )?);

    // Upstream handle and registry are wired through the command channel
    let upstream_status = Arc::new(UpstreamStatus::new());
    let (upstream_handle, commands) = UpstreamHandle::channel(Arc::clone(&upstream_status));
    let registry = Arc::new(SubscriptionRegistry::new(Arc::new(upstream_handle)));

    let manager = UpstreamConnectionManager::new(
        UpstreamConfig::from_bridge_config(&config),
        credentials,
        Arc::clone(&registry),
        commands,
        Arc::clone(&upstream_status),
        shutdown_token.clone(),
    );
    let upstream_worker = tokio::spawn(manager.run());

    // Downstream sessions
    let router = Arc::new(SessionRouter::new(
        Arc::clone(&registry),
        config.downstream.ack_on_connect,
    ));
    let downstream_server = DownstreamServer::new(
        config.server.ws_port,
        Arc::clone(&router),
        config.downstream.session_queue_capacity,
        shutdown_token.clone(),
    );

    // Initialize health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        upstream_status,
        registry,
        router,
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );

    // Spawn health server
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Spawn downstream server
    let downstream_shutdown = shutdown_token.clone();
    tokio::spawn(async move {
        if let Err(e) = downstream_server.run().await {
            tracing::error!(error = %e, "Downstream server error");
            downstream_shutdown.cancel();
        }
    });

    tracing::info!("Stream bridge ready");

    await_shutdown(shutdown_token).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, upstream_worker)
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Upstream worker did not stop in time"
        );
    }

    tracing::info!("Stream bridge stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &BridgeConfig) {
    tracing::info!(
        environment = config.environment.as_str(),
        ws_port = config.server.ws_port,
        health_port = config.server.health_port,
        session_queue_capacity = config.downstream.session_queue_capacity,
        "Configuration loaded"
    );
    tracing::debug!(
        stream_url = %config.endpoints.stream_url,
        approval_base_url = %config.endpoints.approval_base_url,
        rest_base_url = %config.endpoints.rest_base_url,
        "KIS endpoints"
    );
}

/// Load .env file from any ancestor directory.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {
            tracing::warn!("Shutdown requested internally");
        }
    }

    shutdown_token.cancel();

    tracing::info!("Graceful shutdown started");
}

//! Bridge Configuration Settings
//!
//! Configuration types for the price bridge, loaded from environment
//! variables.

use std::time::Duration;

/// KIS account environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KisEnvironment {
    /// Production (real account).
    #[default]
    Real,
    /// Simulated trading account.
    Virtual,
}

impl KisEnvironment {
    /// Parse environment from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "VIRTUAL" | "VTS" | "PAPER" => Self::Virtual,
            _ => Self::Real,
        }
    }

    /// Get the environment name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Real => "real",
            Self::Virtual => "virtual",
        }
    }

    /// REST host (approval and token endpoints).
    #[must_use]
    pub const fn rest_base_url(&self) -> &'static str {
        match self {
            Self::Real => "https://openapi.koreainvestment.com:9443",
            Self::Virtual => "https://openapivts.koreainvestment.com:29443",
        }
    }

    /// Real-time stream URL.
    #[must_use]
    pub const fn stream_url(&self) -> &'static str {
        match self {
            Self::Real => "ws://ops.koreainvestment.com:21000",
            Self::Virtual => "ws://ops.koreainvestment.com:31000",
        }
    }
}

/// KIS application credentials.
#[derive(Clone)]
pub struct VendorCredentials {
    app_key: String,
    app_secret: String,
}

impl VendorCredentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(app_key: String, app_secret: String) -> Self {
        Self {
            app_key,
            app_secret,
        }
    }

    /// Application key.
    #[must_use]
    pub fn app_key(&self) -> &str {
        &self.app_key
    }

    /// Application secret.
    #[must_use]
    pub fn app_secret(&self) -> &str {
        &self.app_secret
    }
}

impl std::fmt::Debug for VendorCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VendorCredentials")
            .field("app_key", &"[REDACTED]")
            .field("app_secret", &"[REDACTED]")
            .finish()
    }
}

/// Vendor endpoint URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorEndpoints {
    /// Base URL of `/oauth2/Approval`.
    pub approval_base_url: String,
    /// Base URL of `/oauth2/tokenP`.
    pub rest_base_url: String,
    /// Real-time stream URL.
    pub stream_url: String,
}

impl VendorEndpoints {
    /// Default endpoints of an environment.
    #[must_use]
    pub fn for_environment(environment: KisEnvironment) -> Self {
        Self {
            approval_base_url: environment.rest_base_url().to_string(),
            rest_base_url: environment.rest_base_url().to_string(),
            stream_url: environment.stream_url().to_string(),
        }
    }
}

/// Upstream connection settings.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// WebSocket handshake timeout.
    pub handshake_timeout: Duration,
    /// Initial reconnection delay (backoff floor).
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay (backoff ceiling).
    pub reconnect_delay_max: Duration,
    /// Transport ping interval.
    pub heartbeat_interval: Duration,
    /// Inbound silence that counts as a dead connection.
    pub idle_timeout: Duration,
    /// Refresh credentials this long before they expire.
    pub credential_safety_margin: Duration,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            reconnect_delay_initial: Duration::from_secs(1),
            reconnect_delay_max: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(120),
            credential_safety_margin: Duration::from_secs(60),
        }
    }
}

/// Downstream session settings.
#[derive(Debug, Clone)]
pub struct DownstreamSettings {
    /// Outbound queue capacity per session.
    pub session_queue_capacity: usize,
    /// Send `{"type":"ACK","session":..}` when a session opens.
    pub ack_on_connect: bool,
}

impl Default for DownstreamSettings {
    fn default() -> Self {
        Self {
            session_queue_capacity: 256,
            ack_on_connect: true,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Downstream WebSocket port.
    pub ws_port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            ws_port: 8080,
            health_port: 8082,
        }
    }
}

/// Complete bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// KIS account environment.
    pub environment: KisEnvironment,
    /// Application credentials.
    pub credentials: VendorCredentials,
    /// Vendor URLs.
    pub endpoints: VendorEndpoints,
    /// Upstream connection settings.
    pub upstream: UpstreamSettings,
    /// Downstream session settings.
    pub downstream: DownstreamSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl BridgeConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if `KIS_APP_KEY` or `KIS_APP_SECRET` is missing or
    /// empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let app_key = required(&lookup, "KIS_APP_KEY")?;
        let app_secret = required(&lookup, "KIS_APP_SECRET")?;

        let environment = lookup("KIS_ENV")
            .map(|s| KisEnvironment::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let defaults = VendorEndpoints::for_environment(environment);
        let approval_base_url =
            optional(&lookup, "KIS_APPROVAL_BASE_URL").unwrap_or(defaults.approval_base_url);
        let endpoints = VendorEndpoints {
            rest_base_url: optional(&lookup, "KIS_REST_BASE_URL")
                .unwrap_or_else(|| approval_base_url.clone()),
            stream_url: optional(&lookup, "KIS_WS_URL").unwrap_or(defaults.stream_url),
            approval_base_url,
        };

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            ws_port: parse_u16(&lookup, "BRIDGE_WS_PORT", server_defaults.ws_port),
            health_port: parse_u16(&lookup, "BRIDGE_HEALTH_PORT", server_defaults.health_port),
        };

        let upstream_defaults = UpstreamSettings::default();
        let upstream = UpstreamSettings {
            handshake_timeout: parse_duration_secs(
                &lookup,
                "BRIDGE_HANDSHAKE_TIMEOUT_SECS",
                upstream_defaults.handshake_timeout,
            ),
            reconnect_delay_initial: parse_duration_millis(
                &lookup,
                "BRIDGE_RECONNECT_DELAY_INITIAL_MS",
                upstream_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_duration_secs(
                &lookup,
                "BRIDGE_RECONNECT_DELAY_MAX_SECS",
                upstream_defaults.reconnect_delay_max,
            ),
            heartbeat_interval: parse_duration_secs(
                &lookup,
                "BRIDGE_HEARTBEAT_INTERVAL_SECS",
                upstream_defaults.heartbeat_interval,
            ),
            idle_timeout: parse_duration_secs(
                &lookup,
                "BRIDGE_IDLE_TIMEOUT_SECS",
                upstream_defaults.idle_timeout,
            ),
            credential_safety_margin: parse_duration_secs(
                &lookup,
                "BRIDGE_CREDENTIAL_SAFETY_MARGIN_SECS",
                upstream_defaults.credential_safety_margin,
            )
            .max(upstream_defaults.credential_safety_margin),
        };

        let downstream_defaults = DownstreamSettings::default();
        let downstream = DownstreamSettings {
            session_queue_capacity: parse_usize(
                &lookup,
                "BRIDGE_SESSION_QUEUE_CAPACITY",
                downstream_defaults.session_queue_capacity,
            )
            .max(1),
            ack_on_connect: parse_bool(
                &lookup,
                "BRIDGE_ACK_ON_CONNECT",
                downstream_defaults.ack_on_connect,
            ),
        };

        Ok(Self {
            environment,
            credentials: VendorCredentials::new(app_key, app_secret),
            endpoints,
            upstream,
            downstream,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.trim().is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value)
}

fn optional<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).filter(|v| !v.trim().is_empty())
}

fn parse_u16<F>(lookup: &F, key: &str, default: u16) -> u16
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_usize<F>(lookup: &F, key: &str, default: usize) -> usize
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).map_or(default, |v| {
        matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes")
    })
}

fn parse_duration_secs<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_duration_millis<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

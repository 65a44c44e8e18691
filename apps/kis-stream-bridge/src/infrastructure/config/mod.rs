//! Configuration Module
//!
//! Configuration loading for the bridge service.

mod settings;

pub use settings::{
    BridgeConfig, ConfigError, DownstreamSettings, KisEnvironment, ServerSettings,
    UpstreamSettings, VendorCredentials, VendorEndpoints,
};

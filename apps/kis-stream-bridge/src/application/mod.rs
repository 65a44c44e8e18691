//! Application Layer - Port definitions.
//!
//! The traits here are the seams between the subscription domain and the
//! vendor-facing adapters.

/// Port interfaces for external systems (upstream feed, credentials).
pub mod ports;

//! Domain Layer - Core price types and subscription bookkeeping.
//!
//! This layer contains the core domain types for the price bridge with
//! no I/O. Everything here is usable from tests without a runtime.

/// Market data types (symbols, price ticks).
pub mod market;

/// Per-symbol listener tracking and upstream transition decisions.
pub mod subscription;

//! # Configuration Modules
//!
//! This module aggregates the configuration providers of the gateway.

/// Gateway configuration: listener, cache, channels, device maps and driver selection.
pub mod config_meters;

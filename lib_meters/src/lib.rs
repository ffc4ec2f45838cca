//! # lib_meters
//!
//! Shared library behind the meter gateway. Every top-level module is gated by a
//! cargo feature of the same name so that small tools only pull what they use.
//!
//! - **`configs`**: gateway configuration, loaded from JSON5 and validated.
//! - **`loggers`**: `tracing` setup with console and rolling JSON file output.
//! - **`meters`**: the core. Device directory, per-channel execution lanes,
//!   single-flight coalescing, TTL cache and the request handler that composes them.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

#[cfg(feature = "configs")]
pub mod configs;
#[cfg(feature = "loggers")]
pub mod loggers;
#[cfg(feature = "meters")]
pub mod meters;

// Re-export the entry points the binaries reach for.
#[cfg(feature = "configs")]
pub use configs::config_meters::{ConfigError, MetersConfig};
#[cfg(feature = "loggers")]
pub use loggers::loggerlocal::{LoggerError, init_logging};
#[cfg(feature = "meters")]
pub use meters::service::MeterService;

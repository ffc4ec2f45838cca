//! # Meter Access Core
//!
//! Mediates between many concurrent HTTP requests and a handful of serial buses that
//! can only run one transaction at a time each.
//!
//! ```text
//!  request ─► MeterService ─► DeviceDirectory (key -> address, channel)
//!                 │
//!                 ├─► TtlCache (power_cached only)
//!                 │
//!                 └─► SingleFlight (one fetch per key) ─► ChannelExecutorPool
//!                                                          │ one lane per channel
//!                                                          ▼
//!                                                    ChannelDriver (blocking)
//! ```
//!
//! - **`directory`**: static lookup from client key to device location.
//! - **`channels`**: per-channel serialized lanes over the blocking thread pool.
//! - **`singleflight`**: collapses concurrent fetches for the same key.
//! - **`cache`**: last good reading per key with a freshness window.
//! - **`driver`**: the blocking bus collaborator and its implementations.
//! - **`service`**: the request handler that composes all of the above.

pub mod cache;
pub mod channels;
pub mod directory;
pub mod driver;
pub mod error;
pub mod model;
pub mod service;
pub mod singleflight;

pub use crate::configs::config_meters::ChannelId;
pub use cache::{CacheEntry, TtlCache};
pub use channels::ChannelExecutorPool;
pub use directory::{DeviceDirectory, DeviceKind, DeviceLocation};
pub use driver::{ChannelDriver, CommandDriver, SimulatedDriver, build_drivers};
pub use error::MeterError;
pub use model::{EnvironmentReading, EnvironmentResponse, PowerResponse};
pub use service::{CacheMode, MeterService};
pub use singleflight::{FlightStats, SingleFlight};

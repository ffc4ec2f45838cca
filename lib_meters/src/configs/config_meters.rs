//! # Gateway Configuration
//!
//! The gateway is described by a single JSON5 document. Every field has a default, so
//! a file only needs to carry what differs, typically the channel list and the two
//! device maps:
//!
//! ```json5
//! {
//!   listenPort: 8000,
//!   cacheTtlSecs: 10,
//!   driver: { kind: "command", program: "/usr/local/bin/busctl" },
//!   channels: [ { id: 0, port: "/dev/ttyUSB0" } ],
//!   meters:   { "10.0.0.5": { address: "7", channel: 0 } },
//!   sensors:  { "rack-a": { address: "1", channel: 0 } },
//! }
//! ```
//!
//! Validation guarantees that every device refers to a configured channel, which is
//! what lets the executor pool treat an unknown channel as unreachable.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of a physical communication channel (one serial bus).
pub type ChannelId = u32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {origin}: {message}")]
    Parse { origin: String, message: String },

    #[error("channel {0} is declared more than once")]
    DuplicateChannel(ChannelId),

    #[error("{kind} '{key}' refers to channel {channel}, which is not configured")]
    UnknownChannel {
        kind: &'static str,
        key: String,
        channel: ChannelId,
    },

    #[error("invalid driver configuration: {0}")]
    InvalidDriver(String),
}

/// One serial bus the gateway owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub id: ChannelId,
    /// Device path or bus name handed to the driver, e.g. `/dev/ttyUSB0`.
    pub port: String,
}

/// Where a device lives: its bus address (or serial number) and its channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub address: String,
    pub channel: ChannelId,
}

/// Which `ChannelDriver` implementation backs the channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DriverConfig {
    /// Random readings with an artificial per-call latency.
    #[serde(rename_all = "camelCase")]
    Simulated {
        #[serde(default = "default_simulated_latency_ms")]
        latency_ms: u64,
        #[serde(default)]
        failure_rate: f64,
    },
    /// An external program that performs one bus transaction per invocation.
    #[serde(rename_all = "camelCase")]
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

fn default_simulated_latency_ms() -> u64 {
    50
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig::Simulated {
            latency_ms: default_simulated_latency_ms(),
            failure_rate: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetersConfig {
    pub listen_ip: String,
    pub listen_port: u16,
    /// Value of the `version` field in every API response.
    pub api_version: String,
    pub cache_ttl_secs: u64,
    /// Pool-wide cap on concurrently running driver calls. Defaults to twice the
    /// channel count.
    pub max_workers: Option<usize>,
    /// How long a request waits for a driver call before giving up. The call itself
    /// is never interrupted.
    pub channel_timeout_ms: Option<u64>,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub driver: DriverConfig,
    pub channels: Vec<ChannelConfig>,
    /// Power meters keyed by the client IP address they are billed to.
    pub meters: BTreeMap<String, DeviceEntry>,
    /// Temperature/humidity sensors keyed by name.
    pub sensors: BTreeMap<String, DeviceEntry>,
}

impl Default for MetersConfig {
    fn default() -> Self {
        Self {
            listen_ip: "0.0.0.0".to_string(),
            listen_port: 8000,
            api_version: "0.0".to_string(),
            cache_ttl_secs: 10,
            max_workers: None,
            channel_timeout_ms: None,
            log_dir: PathBuf::from("logs"),
            log_level: "info".to_string(),
            driver: DriverConfig::default(),
            channels: Vec::new(),
            meters: BTreeMap::new(),
            sensors: BTreeMap::new(),
        }
    }
}

impl MetersConfig {
    /// Reads, parses and validates a JSON5 config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_json5(&content, &path.display().to_string())
    }

    /// Parses and validates a JSON5 document. `origin` only shows up in error messages.
    pub fn parse_json5(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: MetersConfig =
            serde_json5::from_str(content).map_err(|e| ConfigError::Parse {
                origin: origin.to_string(),
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for channel in &self.channels {
            if !seen.insert(channel.id) {
                return Err(ConfigError::DuplicateChannel(channel.id));
            }
        }

        let devices = self
            .meters
            .iter()
            .map(|entry| ("meter", entry))
            .chain(self.sensors.iter().map(|entry| ("sensor", entry)));
        for (kind, (key, entry)) in devices {
            if !seen.contains(&entry.channel) {
                return Err(ConfigError::UnknownChannel {
                    kind,
                    key: key.clone(),
                    channel: entry.channel,
                });
            }
        }

        match &self.driver {
            DriverConfig::Command { program, .. } if program.trim().is_empty() => Err(
                ConfigError::InvalidDriver("command driver needs a program".to_string()),
            ),
            DriverConfig::Simulated { failure_rate, .. }
                if !(0.0..=1.0).contains(failure_rate) =>
            {
                Err(ConfigError::InvalidDriver(format!(
                    "failure rate {} is outside 0.0..=1.0",
                    failure_rate
                )))
            }
            _ => Ok(()),
        }
    }

    pub fn worker_budget(&self) -> usize {
        self.max_workers
            .unwrap_or(self.channels.len() * 2)
            .max(1)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn channel_timeout(&self) -> Option<Duration> {
        self.channel_timeout_ms.map(Duration::from_millis)
    }
}

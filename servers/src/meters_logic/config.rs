use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use lib_meters::MetersConfig;

/// Config file picked up from the working directory when `--config-path` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "server_meters.conf";

#[derive(Parser, Debug, Clone, Default)]
#[clap(about = "Power meter and environment sensor gateway", version)]
pub struct Cli {
    #[clap(long, env = "METERS_CONFIG_PATH", help = "Path to the JSON5 configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "METERS_LISTEN_IP", help = "Address to listen on for HTTP requests.")]
    pub listen_ip: Option<String>,

    #[clap(long, env = "METERS_PORT", help = "Port to listen on for HTTP requests.")]
    pub port: Option<u16>,

    #[clap(long, env = "METERS_API_VERSION", help = "Value of the version field in responses.")]
    pub api_version: Option<String>,

    #[clap(long, env = "METERS_CACHE_TTL_SECS", help = "Seconds a power reading is served from cache.")]
    pub cache_ttl_secs: Option<u64>,

    #[clap(long, env = "METERS_MAX_WORKERS", help = "Cap on driver calls running at once across all channels.")]
    pub max_workers: Option<usize>,

    #[clap(long, env = "METERS_CHANNEL_TIMEOUT_MS", help = "Milliseconds a request waits for a driver call.")]
    pub channel_timeout_ms: Option<u64>,

    #[clap(long, env = "METERS_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "METERS_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,
}

impl Cli {
    // Values given on the command line or in the environment override the file
    fn merge_into(self, config: MetersConfig) -> MetersConfig {
        MetersConfig {
            listen_ip: self.listen_ip.unwrap_or(config.listen_ip),
            listen_port: self.port.unwrap_or(config.listen_port),
            api_version: self.api_version.unwrap_or(config.api_version),
            cache_ttl_secs: self.cache_ttl_secs.unwrap_or(config.cache_ttl_secs),
            max_workers: self.max_workers.or(config.max_workers),
            channel_timeout_ms: self.channel_timeout_ms.or(config.channel_timeout_ms),
            log_dir: self.log_dir.unwrap_or(config.log_dir),
            log_level: self.log_level.unwrap_or(config.log_level),
            ..config
        }
    }
}

/// Builds the effective configuration: defaults, then the config file, then
/// environment and CLI. Returns the file that was read, if any.
///
/// A missing default file is fine; a missing file named explicitly is an error.
pub fn load_config(cli: Cli) -> Result<(MetersConfig, Option<PathBuf>)> {
    let path = match &cli.config_path {
        Some(path) => Some(path.clone()),
        None => {
            let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
            fallback.exists().then_some(fallback)
        }
    };

    let file_config = match &path {
        Some(path) => MetersConfig::load(path)?,
        None => MetersConfig::default(),
    };

    let config = cli.merge_into(file_config);
    config
        .validate()
        .context("configuration is invalid after applying overrides")?;
    Ok((config, path))
}

//! # Meter Gateway Server
//!
//! HTTP front end for a set of power meters and temperature/humidity sensors that
//! hang off a few serial buses. Clients ask for readings over JSON endpoints; the
//! gateway resolves the device, coalesces concurrent requests for it, serves fresh
//! power readings from cache and otherwise runs one bus transaction per channel at
//! a time.
//!
//! ## Functionality:
//! - **Configuration**: JSON5 file (`server_meters.conf` by default) overridden by
//!   `METERS_*` environment variables and CLI flags.
//! - **Endpoints**: `/api/v1/power`, `/api/v1/power_cached`, `/api/v1/environment`
//!   and the `/ra9` liveness check.
//! - **Logging**: console plus daily rolling JSON files via `lib_meters::loggers`.
//! - **Graceful Shutdown**: `tokio-graceful` drains in-flight requests on signal.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use static_init::dynamic;
use tokio::net::TcpListener;
use tokio_graceful::Shutdown;
use tracing::{error, info};

use lib_meters::meters::build_drivers;
use lib_meters::{MeterService, init_logging};

mod meters_logic;
use meters_logic::{config, routes};

// load .env files before anything else
#[dynamic]
static DOTENV_INIT: () = {
    let dotenv_os: &str = if cfg!(target_os = "windows") {
        ".env.windows"
    } else {
        ".env.linux"
    };

    dotenvy::dotenv().ok();
    dotenvy::from_filename(dotenv_os).ok();
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = config::Cli::parse();
    let (config, config_path) = config::load_config(cli)?;

    let _log_guard = init_logging("server_meters", &config.log_dir, &config.log_level)?;
    match &config_path {
        Some(path) => info!("Configuration loaded from {}", path.display()),
        None => info!(
            "Config file {} not found. Using defaults and environment/CLI variables.",
            config::DEFAULT_CONFIG_FILE
        ),
    }
    info!(
        channels = config.channels.len(),
        meters = config.meters.len(),
        sensors = config.sensors.len(),
        workers = config.worker_budget(),
        cache_ttl_secs = config.cache_ttl_secs,
        driver = ?config.driver,
        "Gateway configured"
    );

    let service = Arc::new(MeterService::from_config(&config, build_drivers(&config)));

    let ip: IpAddr = config
        .listen_ip
        .parse()
        .with_context(|| format!("invalid listen address {}", config.listen_ip))?;
    let listener = TcpListener::bind(SocketAddr::new(ip, config.listen_port)).await?;
    info!("server_meters listening on {}", listener.local_addr()?);

    let shutdown: Shutdown = Shutdown::default();

    let app = routes::router(Arc::clone(&service));
    shutdown.spawn_task_fn(move |shutdown_guard| async move {
        let signal = shutdown_guard.clone();
        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { signal.cancelled().await })
        .await;
        if let Err(e) = served {
            error!("HTTP server stopped with error: {}", e);
        }
    });

    match shutdown.shutdown_with_limit(Duration::from_secs(10)).await {
        Ok(elapsed) => {
            info!(
                "shutdown: gracefully {}s after shutdown signal received",
                elapsed.as_secs_f64()
            );
        }
        Err(e) => {
            info!("shutdown: forcefully due to timeout: {}", e);
        }
    }

    let power = service.power_flight_stats();
    let environment = service.environment_flight_stats();
    info!(
        power_requests = power.total,
        power_coalesced = power.coalesced,
        environment_requests = environment.total,
        environment_coalesced = environment.coalesced,
        "Bye!"
    );

    Ok(())
}

//! # Meter Service
//!
//! The request handler behind every reading endpoint. One instance is built at
//! startup and shared by all requests.
//!
//! Power readings (cached or not) go through one cache and one single-flight group,
//! so an uncached request joins a cached refresh already in flight for the same IP
//! and the other way round. Environment readings have their own group and are
//! never cached.
//!
//! A request deadline, when configured, bounds how long a request waits. The fetch it
//! was waiting on is not cancelled: it still finishes and still fills the cache.
//!
//! Every outcome, failure included, is rendered into a well-formed payload.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::configs::config_meters::MetersConfig;

use super::ChannelId;
use super::cache::TtlCache;
use super::channels::ChannelExecutorPool;
use super::directory::{DeviceDirectory, DeviceKind};
use super::driver::ChannelDriver;
use super::error::MeterError;
use super::model::{
    EnvValue, EnvironmentReading, EnvironmentResponse, INVALID_POWER, PowerResponse, PowerValue,
    epoch_seconds, round_millis,
};
use super::singleflight::{FlightStats, SingleFlight};

/// Whether a power request may be answered from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Always read the meter. The result still refreshes the cache.
    Bypass,
    /// Serve a fresh cached value when there is one.
    PreferCached,
}

pub struct MeterService {
    meters: DeviceDirectory,
    sensors: DeviceDirectory,
    pool: Arc<ChannelExecutorPool>,
    power_flights: SingleFlight<String, f64>,
    environment_flights: SingleFlight<String, EnvironmentReading>,
    power_cache: Arc<TtlCache<String, f64>>,
    call_timeout: Option<Duration>,
    version: String,
}

impl MeterService {
    pub fn new(
        meters: DeviceDirectory,
        sensors: DeviceDirectory,
        pool: ChannelExecutorPool,
        cache_ttl: Duration,
        version: &str,
    ) -> Self {
        Self {
            meters,
            sensors,
            pool: Arc::new(pool),
            power_flights: SingleFlight::new(),
            environment_flights: SingleFlight::new(),
            power_cache: Arc::new(TtlCache::new(cache_ttl)),
            call_timeout: None,
            version: version.to_string(),
        }
    }

    /// Caps how long a request waits for its reading. `None` waits as long as the
    /// bus takes.
    pub fn with_call_timeout(mut self, call_timeout: Option<Duration>) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Builds the directories and the executor pool described by `config` around
    /// the given per-channel drivers.
    pub fn from_config<I>(config: &MetersConfig, drivers: I) -> Self
    where
        I: IntoIterator<Item = (ChannelId, Box<dyn ChannelDriver>)>,
    {
        let pool = ChannelExecutorPool::new(drivers, config.worker_budget());
        Self::new(
            DeviceDirectory::from_entries(DeviceKind::Meter, &config.meters),
            DeviceDirectory::from_entries(DeviceKind::Sensor, &config.sensors),
            pool,
            config.cache_ttl(),
            &config.api_version,
        )
        .with_call_timeout(config.channel_timeout())
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn power_flight_stats(&self) -> FlightStats {
        self.power_flights.stats()
    }

    pub fn environment_flight_stats(&self) -> FlightStats {
        self.environment_flights.stats()
    }

    /// Power reading for the meter registered under `ip`.
    pub async fn power(&self, ip: &str, mode: CacheMode) -> PowerResponse {
        let started = Instant::now();
        let outcome = self.read_power(ip, mode).await;
        let elapsed = started.elapsed();

        let (power, error, msg) = match outcome {
            Ok(watts) => {
                debug!(ip, ?mode, watts, cost_ms = elapsed.as_millis() as u64, "Power request served");
                (PowerValue::Watts(watts), false, "success".to_string())
            }
            Err(e) => {
                warn!(ip, ?mode, error = %e, cost_ms = elapsed.as_millis() as u64, "Power request failed");
                (PowerValue::Invalid(INVALID_POWER), true, e.client_message())
            }
        };

        PowerResponse {
            time: epoch_seconds(),
            version: self.version.clone(),
            power,
            error,
            msg,
            ipaddr: ip.to_string(),
            elapsed: round_millis(elapsed.as_secs_f64()),
        }
    }

    /// Temperature and humidity from the sensor registered under `name`.
    pub async fn environment(&self, name: Option<&str>) -> EnvironmentResponse {
        let Some(name) = name else {
            debug!("Environment request without a sensor name");
            return self.environment_response(Err(MeterError::MissingArgument("name")), 0.0);
        };

        let started = Instant::now();
        let outcome = self.read_environment(name).await;
        let elapsed = started.elapsed();

        match &outcome {
            Ok(reading) => debug!(
                name,
                temperature = ?reading.temperature,
                humidity = ?reading.humidity,
                cost_ms = elapsed.as_millis() as u64,
                "Environment request served"
            ),
            Err(e) => warn!(name, error = %e, cost_ms = elapsed.as_millis() as u64, "Environment request failed"),
        }

        self.environment_response(outcome, round_millis(elapsed.as_secs_f64()))
    }

    async fn read_power(&self, ip: &str, mode: CacheMode) -> Result<f64, MeterError> {
        let location = self.meters.resolve(ip)?;
        let key = ip.to_string();

        let fetch = {
            let pool = Arc::clone(&self.pool);
            let cache = Arc::clone(&self.power_cache);
            let channel = location.channel;
            let serial = location.address.clone();
            let key = key.clone();
            move || fetch_power(pool, cache, channel, serial, key)
        };
        // Checked under the registry lock, so a flight that just finished is seen.
        let reuse = || match mode {
            CacheMode::PreferCached => self.power_cache.get_fresh(&key),
            CacheMode::Bypass => None,
        };

        let flight = self.power_flights.run_or_reuse(key.clone(), reuse, fetch);
        self.within_deadline(location.channel, flight).await
    }

    async fn read_environment(&self, name: &str) -> Result<EnvironmentReading, MeterError> {
        let location = self.sensors.resolve(name)?;

        let pool = Arc::clone(&self.pool);
        let channel = location.channel;
        let address = location.address.clone();
        let key = name.to_string();
        let flight = self
            .environment_flights
            .run(key.clone(), move || fetch_environment(pool, channel, address, key));
        self.within_deadline(channel, flight).await
    }

    /// Waits for `flight` for at most the configured call timeout. Giving up here
    /// leaves the fetch running.
    async fn within_deadline<T>(
        &self,
        channel: ChannelId,
        flight: impl Future<Output = Result<T, MeterError>>,
    ) -> Result<T, MeterError> {
        let Some(limit) = self.call_timeout else {
            return flight.await;
        };
        match tokio::time::timeout(limit, flight).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(channel, ?limit, "Gave up waiting; the fetch keeps its lane until it returns");
                Err(MeterError::Channel(format!(
                    "channel {} timed out after {} ms",
                    channel,
                    limit.as_millis()
                )))
            }
        }
    }

    fn environment_response(
        &self,
        outcome: Result<EnvironmentReading, MeterError>,
        elapsed: f64,
    ) -> EnvironmentResponse {
        let (temperature, humidity, error, msg) = match outcome {
            Ok(reading) => (
                EnvValue::from(reading.temperature),
                EnvValue::from(reading.humidity),
                false,
                String::new(),
            ),
            Err(e) => (EnvValue::from(None), EnvValue::from(None), true, e.client_message()),
        };

        EnvironmentResponse {
            time: epoch_seconds(),
            version: self.version.clone(),
            temperature,
            humidity,
            error,
            msg,
            elapsed,
        }
    }
}

/// One power fetch epoch. Runs detached from the requests waiting on it, so the
/// cache is written even if they have all gone away.
async fn fetch_power(
    pool: Arc<ChannelExecutorPool>,
    cache: Arc<TtlCache<String, f64>>,
    channel: ChannelId,
    serial: String,
    key: String,
) -> Result<f64, MeterError> {
    let reading = pool
        .submit(channel, move |driver| driver.read_power(&serial))
        .await?;
    let watts = reading.ok_or_else(|| MeterError::BrokenData {
        kind: DeviceKind::Meter,
        key: key.clone(),
    })?;
    cache.put(key, watts);
    Ok(watts)
}

async fn fetch_environment(
    pool: Arc<ChannelExecutorPool>,
    channel: ChannelId,
    address: String,
    key: String,
) -> Result<EnvironmentReading, MeterError> {
    let reading = pool
        .submit(channel, move |driver| driver.read_environment(&address))
        .await?;
    if reading.is_empty() {
        return Err(MeterError::BrokenData {
            kind: DeviceKind::Sensor,
            key,
        });
    }
    Ok(reading)
}

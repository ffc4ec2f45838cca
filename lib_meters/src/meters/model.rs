//! Readings and the JSON payloads rendered from them.

use serde::Serialize;

/// Power value reported when no reading is available.
pub const INVALID_POWER: i64 = -1;
/// Temperature/humidity value reported when a component is absent.
pub const NULL_MARKER: &str = "NULL";

/// One temperature/humidity sample. Either component may be missing.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EnvironmentReading {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
}

impl EnvironmentReading {
    pub fn new(temperature: Option<f64>, humidity: Option<f64>) -> Self {
        Self {
            temperature: temperature.filter(|v| v.is_finite()),
            humidity: humidity.filter(|v| v.is_finite()),
        }
    }

    /// Nothing usable came back from the sensor.
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.humidity.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PowerValue {
    Watts(f64),
    Invalid(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EnvValue {
    Value(f64),
    Null(&'static str),
}

impl From<Option<f64>> for EnvValue {
    fn from(value: Option<f64>) -> Self {
        match value {
            Some(v) => EnvValue::Value(v),
            None => EnvValue::Null(NULL_MARKER),
        }
    }
}

/// Body of `/api/v1/power` and `/api/v1/power_cached`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PowerResponse {
    pub time: f64,
    pub version: String,
    pub power: PowerValue,
    pub error: bool,
    pub msg: String,
    pub ipaddr: String,
    pub elapsed: f64,
}

/// Body of `/api/v1/environment`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvironmentResponse {
    pub time: f64,
    pub version: String,
    pub temperature: EnvValue,
    pub humidity: EnvValue,
    pub error: bool,
    pub msg: String,
    pub elapsed: f64,
}

/// Wall-clock time as fractional epoch seconds.
pub fn epoch_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Seconds rounded to millisecond precision.
pub fn round_millis(seconds: f64) -> f64 {
    (seconds * 1000.0).round() / 1000.0
}

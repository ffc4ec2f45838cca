//! # Channel Drivers
//!
//! The `ChannelDriver` trait is the boundary to the hardware: one instance per
//! channel, every method blocking, called only from inside a `ChannelExecutorPool`
//! lane. `&mut self` on every method is the compile-time side of the one-transaction-
//! per-bus rule; the lane mutex is the runtime side.
//!
//! Two implementations ship with the gateway:
//! - `CommandDriver` shells out to an external bus tool, one process per transaction.
//! - `SimulatedDriver` produces random readings after an artificial delay.

use std::process::Command;
use std::thread;
use std::time::Duration;

use anyhow::{Context, bail};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::configs::config_meters::{DriverConfig, MetersConfig};

use super::ChannelId;
use super::model::EnvironmentReading;

pub trait ChannelDriver: Send + 'static {
    /// Reads instantaneous power from the meter with the given serial number.
    /// `Ok(None)` means the meter answered without a usable value.
    fn read_power(&mut self, serial: &str) -> anyhow::Result<Option<f64>>;

    /// Reads temperature and humidity from the sensor at the given bus address.
    fn read_environment(&mut self, address: &str) -> anyhow::Result<EnvironmentReading>;
}

/// Builds one driver per configured channel.
pub fn build_drivers(config: &MetersConfig) -> Vec<(ChannelId, Box<dyn ChannelDriver>)> {
    config
        .channels
        .iter()
        .map(|channel| {
            let driver: Box<dyn ChannelDriver> = match &config.driver {
                DriverConfig::Simulated {
                    latency_ms,
                    failure_rate,
                } => Box::new(SimulatedDriver::new(
                    &channel.port,
                    Duration::from_millis(*latency_ms),
                    *failure_rate,
                )),
                DriverConfig::Command { program, args } => {
                    Box::new(CommandDriver::new(program, args.clone(), &channel.port))
                }
            };
            (channel.id, driver)
        })
        .collect()
}

/// Runs `<program> [args..] <power|environment> <port> <address>` per transaction.
///
/// The program prints one number for power, or two whitespace-separated tokens
/// (temperature, humidity) for environment. `NULL`, `None` or a missing token
/// means the value is absent.
pub struct CommandDriver {
    program: String,
    args: Vec<String>,
    port: String,
}

impl CommandDriver {
    pub fn new(program: &str, args: Vec<String>, port: &str) -> Self {
        Self {
            program: program.to_string(),
            args,
            port: port.to_string(),
        }
    }

    fn run(&self, operation: &str, address: &str) -> anyhow::Result<String> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(operation)
            .arg(&self.port)
            .arg(address)
            .output()
            .with_context(|| format!("failed to execute {}", self.program))?;

        if !output.status.success() {
            bail!(
                "{} {} on {} for {} failed ({}): {}",
                self.program,
                operation,
                self.port,
                address,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl ChannelDriver for CommandDriver {
    fn read_power(&mut self, serial: &str) -> anyhow::Result<Option<f64>> {
        let stdout = self.run("power", serial)?;
        parse_power_output(&stdout)
    }

    fn read_environment(&mut self, address: &str) -> anyhow::Result<EnvironmentReading> {
        let stdout = self.run("environment", address)?;
        parse_environment_output(&stdout)
    }
}

fn parse_token(token: Option<&str>) -> anyhow::Result<Option<f64>> {
    match token {
        None => Ok(None),
        Some(t) if t.eq_ignore_ascii_case("null") || t.eq_ignore_ascii_case("none") => Ok(None),
        Some(t) => {
            let value: f64 = t
                .parse()
                .with_context(|| format!("unparseable reading '{}'", t))?;
            Ok(Some(value).filter(|v| v.is_finite()))
        }
    }
}

pub(crate) fn parse_power_output(stdout: &str) -> anyhow::Result<Option<f64>> {
    parse_token(stdout.split_whitespace().next())
}

pub(crate) fn parse_environment_output(stdout: &str) -> anyhow::Result<EnvironmentReading> {
    let mut tokens = stdout.split_whitespace();
    let temperature = parse_token(tokens.next())?;
    let humidity = parse_token(tokens.next())?;
    Ok(EnvironmentReading::new(temperature, humidity))
}

/// Stand-in for a real bus: sleeps for `latency`, then returns a random reading
/// or, with probability `failure_rate`, an error.
pub struct SimulatedDriver {
    port: String,
    latency: Duration,
    failure_rate: f64,
    rng: StdRng,
}

impl SimulatedDriver {
    pub fn new(port: &str, latency: Duration, failure_rate: f64) -> Self {
        Self::with_rng(port, latency, failure_rate, StdRng::from_os_rng())
    }

    pub fn seeded(port: &str, latency: Duration, failure_rate: f64, seed: u64) -> Self {
        Self::with_rng(port, latency, failure_rate, StdRng::seed_from_u64(seed))
    }

    fn with_rng(port: &str, latency: Duration, failure_rate: f64, rng: StdRng) -> Self {
        Self {
            port: port.to_string(),
            latency,
            failure_rate: failure_rate.clamp(0.0, 1.0),
            rng,
        }
    }

    fn transact(&mut self, address: &str) -> anyhow::Result<()> {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        if self.rng.random_bool(self.failure_rate) {
            bail!("no response from device {} on {}", address, self.port);
        }
        Ok(())
    }
}

fn one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

impl ChannelDriver for SimulatedDriver {
    fn read_power(&mut self, serial: &str) -> anyhow::Result<Option<f64>> {
        self.transact(serial)?;
        Ok(Some(one_decimal(self.rng.random_range(50.0..2500.0))))
    }

    fn read_environment(&mut self, address: &str) -> anyhow::Result<EnvironmentReading> {
        self.transact(address)?;
        let temperature = one_decimal(self.rng.random_range(18.0..30.0));
        let humidity = one_decimal(self.rng.random_range(30.0..60.0));
        Ok(EnvironmentReading::new(Some(temperature), Some(humidity)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::config_meters::ChannelConfig;

    #[test]
    fn test_parse_power_output() {
        assert_eq!(parse_power_output("42.5\n").unwrap(), Some(42.5));
        assert_eq!(parse_power_output("").unwrap(), None);
        assert_eq!(parse_power_output("NULL").unwrap(), None);
        assert_eq!(parse_power_output("NaN").unwrap(), None);
        assert!(parse_power_output("garbage").is_err());
    }

    #[test]
    fn test_parse_environment_output() {
        let both = parse_environment_output("21.5 40.25\n").unwrap();
        assert_eq!(both, EnvironmentReading::new(Some(21.5), Some(40.25)));

        let partial = parse_environment_output("None 38").unwrap();
        assert_eq!(partial.temperature, None);
        assert_eq!(partial.humidity, Some(38.0));

        assert!(parse_environment_output("").unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_command_driver_passes_operation_port_and_address() {
        // $1 = operation, $2 = port, $3 = address
        let script = r#"if [ "$1" = power ] && [ "$2" = /dev/ttyS9 ]; then echo "$3"; else echo NULL; fi"#;
        let mut driver = CommandDriver::new(
            "sh",
            vec!["-c".to_string(), script.to_string(), "busread".to_string()],
            "/dev/ttyS9",
        );
        assert_eq!(driver.read_power("17").unwrap(), Some(17.0));
        assert!(driver.read_environment("17").unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_command_driver_reports_failures() {
        let mut driver = CommandDriver::new(
            "sh",
            vec!["-c".to_string(), "echo bus jammed >&2; exit 3".to_string(), "busread".to_string()],
            "/dev/ttyS0",
        );
        let err = driver.read_power("7").unwrap_err();
        assert!(err.to_string().contains("bus jammed"));

        let mut missing = CommandDriver::new("/nonexistent/busread", Vec::new(), "/dev/ttyS0");
        assert!(missing.read_power("7").is_err());
    }

    #[test]
    fn test_simulated_driver_ranges_and_failures() {
        let mut ok = SimulatedDriver::seeded("sim0", Duration::ZERO, 0.0, 7);
        let power = ok.read_power("1").unwrap().unwrap();
        assert!((50.0..=2500.0).contains(&power));
        let env = ok.read_environment("1").unwrap();
        assert!(env.temperature.is_some() && env.humidity.is_some());

        let mut broken = SimulatedDriver::seeded("sim0", Duration::ZERO, 1.0, 7);
        assert!(broken.read_power("1").is_err());
    }

    #[test]
    fn test_build_drivers_one_per_channel() {
        let config = MetersConfig {
            channels: vec![
                ChannelConfig { id: 0, port: "a".to_string() },
                ChannelConfig { id: 5, port: "b".to_string() },
            ],
            ..Default::default()
        };
        let ids: Vec<ChannelId> = build_drivers(&config).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![0, 5]);
    }
}

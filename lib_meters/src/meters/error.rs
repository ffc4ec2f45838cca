use thiserror::Error;

use super::ChannelId;
use super::directory::DeviceKind;

/// Everything that can go wrong while answering one reading request.
///
/// `Clone` because a single failed fetch is handed to every request that was waiting
/// on it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MeterError {
    /// The client-facing key is not in the directory. Terminal, no hardware touched.
    #[error("{kind} '{key}' not found")]
    KeyNotFound { kind: DeviceKind, key: String },

    /// A required query parameter was absent.
    #[error("missing argument '{0}'")]
    MissingArgument(&'static str),

    /// The device answered, but with nothing usable.
    #[error("{kind} '{key}' returned no usable data")]
    BrokenData { kind: DeviceKind, key: String },

    /// The bus transaction itself failed.
    #[error("{0}")]
    Channel(String),

    #[error("channel {0} is not configured")]
    UnknownChannel(ChannelId),
}

impl MeterError {
    /// The `msg` text API clients have always received for this failure.
    pub fn client_message(&self) -> String {
        match self {
            MeterError::KeyNotFound { kind: DeviceKind::Meter, .. } => "IP Not Found".to_string(),
            MeterError::KeyNotFound { kind: DeviceKind::Sensor, .. } => "Temper Not Found".to_string(),
            MeterError::MissingArgument(_) => "too few arguments".to_string(),
            MeterError::BrokenData { kind: DeviceKind::Meter, .. } => "broken data".to_string(),
            MeterError::BrokenData { kind: DeviceKind::Sensor, .. } => "Temper Read Fail!".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_messages() {
        let not_found = MeterError::KeyNotFound {
            kind: DeviceKind::Meter,
            key: "10.9.9.9".to_string(),
        };
        assert_eq!(not_found.client_message(), "IP Not Found");
        assert_eq!(not_found.to_string(), "meter '10.9.9.9' not found");

        let broken = MeterError::BrokenData {
            kind: DeviceKind::Sensor,
            key: "attic".to_string(),
        };
        assert_eq!(broken.client_message(), "Temper Read Fail!");

        let channel = MeterError::Channel("no response from /dev/ttyUSB0".to_string());
        assert_eq!(channel.client_message(), "no response from /dev/ttyUSB0");
        assert_eq!(
            MeterError::UnknownChannel(3).client_message(),
            "channel 3 is not configured"
        );
    }
}

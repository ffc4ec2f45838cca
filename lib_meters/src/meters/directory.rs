//! Static device directory: client-facing key to physical location.

use std::collections::HashMap;
use std::fmt;

use crate::configs::config_meters::DeviceEntry;

use super::ChannelId;
use super::error::MeterError;

/// Which directory a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// Power meter, keyed by client IP.
    Meter,
    /// Temperature/humidity sensor, keyed by name.
    Sensor,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Meter => write!(f, "meter"),
            DeviceKind::Sensor => write!(f, "sensor"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLocation {
    /// Bus address or serial number, passed verbatim to the driver.
    pub address: String,
    pub channel: ChannelId,
}

/// Built once at startup, read-only afterwards, so it is shared without locking.
#[derive(Debug, Clone)]
pub struct DeviceDirectory {
    kind: DeviceKind,
    entries: HashMap<String, DeviceLocation>,
}

impl DeviceDirectory {
    pub fn new<I, K>(kind: DeviceKind, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, DeviceLocation)>,
        K: Into<String>,
    {
        Self {
            kind,
            entries: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn from_entries<'a, I>(kind: DeviceKind, entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a DeviceEntry)>,
    {
        Self::new(
            kind,
            entries.into_iter().map(|(key, entry)| {
                (
                    key.clone(),
                    DeviceLocation {
                        address: entry.address.clone(),
                        channel: entry.channel,
                    },
                )
            }),
        )
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn resolve(&self, key: &str) -> Result<&DeviceLocation, MeterError> {
        self.entries.get(key).ok_or_else(|| MeterError::KeyNotFound {
            kind: self.kind,
            key: key.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_resolve_hit_and_miss() {
        let dir = DeviceDirectory::new(
            DeviceKind::Meter,
            [(
                "10.0.0.5",
                DeviceLocation {
                    address: "7".to_string(),
                    channel: 0,
                },
            )],
        );

        let location = dir.resolve("10.0.0.5").unwrap();
        assert_eq!(location.address, "7");
        assert_eq!(location.channel, 0);

        assert_eq!(
            dir.resolve("10.0.0.6"),
            Err(MeterError::KeyNotFound {
                kind: DeviceKind::Meter,
                key: "10.0.0.6".to_string(),
            })
        );
    }

    #[test]
    fn test_from_config_entries() {
        let mut sensors = BTreeMap::new();
        sensors.insert(
            "rack-a".to_string(),
            DeviceEntry {
                address: "1".to_string(),
                channel: 2,
            },
        );
        let dir = DeviceDirectory::from_entries(DeviceKind::Sensor, &sensors);
        assert_eq!(dir.kind(), DeviceKind::Sensor);
        assert_eq!(dir.len(), 1);
        assert_eq!(dir.resolve("rack-a").unwrap().channel, 2);
    }
}

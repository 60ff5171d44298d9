//! Core data types for connection management and measurement relay.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{TargetError, TargetResult};

/// Default host for network targets when none is configured.
pub const DEFAULT_NETWORK_HOST: &str = "192.168.0.10";

/// Default TCP port for network targets (`host` without an explicit port).
pub const DEFAULT_NETWORK_PORT: u16 = 35000;

/// State of the link to the remote OBD device.
///
/// Owned exclusively by the connection supervisor; connectors report
/// transitions into it but never hold the authoritative value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection and no attempt in progress.
    None,
    /// Waiting for an inbound session on the medium.
    Listen,
    /// An outbound connect attempt is in flight.
    Connecting,
    /// Link established.
    Connected,
    /// Link was lost or an attempt failed; reconnect policy applies.
    Offline,
}

impl ConnectionState {
    /// Stable numeric form, used for the atomic state mirror in connectors.
    pub const fn as_u8(self) -> u8 {
        match self {
            ConnectionState::None => 0,
            ConnectionState::Listen => 1,
            ConnectionState::Connecting => 2,
            ConnectionState::Connected => 3,
            ConnectionState::Offline => 4,
        }
    }

    /// Inverse of [`ConnectionState::as_u8`]. Unknown values map to `None`.
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Listen,
            2 => ConnectionState::Connecting,
            3 => ConnectionState::Connected,
            4 => ConnectionState::Offline,
            _ => ConnectionState::None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::None => "none",
            ConnectionState::Listen => "listen",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Offline => "offline",
        };
        f.write_str(s)
    }
}

/// Lifecycle state of the background service as a whole.
///
/// Independent axis from [`ConnectionState`]: the service can be `Running`
/// while the link is `Offline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceState::Stopped => "stopped",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Transport class used to reach the remote device.
///
/// Selected once from configuration when the supervisor is constructed;
/// switching medium requires stopping the service and starting it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMedium {
    /// Short-range radio (BLE serial bridge).
    Radio,
    /// Local serial/USB adapter.
    Serial,
    /// TCP socket (WiFi adapters).
    Network,
}

impl fmt::Display for TransportMedium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportMedium::Radio => "radio",
            TransportMedium::Serial => "serial",
            TransportMedium::Network => "network",
        };
        f.write_str(s)
    }
}

/// Address of a remote OBD device, specific to one transport medium.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "medium", rename_all = "lowercase")]
pub enum DeviceTarget {
    /// Radio peripheral address (MAC on Linux/Windows, UUID on macOS).
    Radio { address: String },
    /// Serial device path, e.g. `/dev/ttyUSB0`.
    Serial { port: String },
    /// TCP endpoint of a network adapter.
    Network { host: String, port: u16 },
}

impl DeviceTarget {
    /// Parse a target string for the given medium.
    ///
    /// Network targets accept `host` or `host:port`; a missing port falls
    /// back to [`DEFAULT_NETWORK_PORT`].
    pub fn parse(medium: TransportMedium, s: &str) -> TargetResult<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(TargetError::Empty);
        }
        match medium {
            TransportMedium::Radio => Ok(DeviceTarget::Radio {
                address: s.to_string(),
            }),
            TransportMedium::Serial => Ok(DeviceTarget::Serial {
                port: s.to_string(),
            }),
            TransportMedium::Network => {
                let (host, port) = match s.rsplit_once(':') {
                    Some((h, p)) => {
                        let port = p.parse::<u16>().map_err(|_| TargetError::InvalidPort {
                            port: p.to_string(),
                        })?;
                        (h, port)
                    }
                    None => (s, DEFAULT_NETWORK_PORT),
                };
                if host.is_empty() {
                    return Err(TargetError::Empty);
                }
                Ok(DeviceTarget::Network {
                    host: host.to_string(),
                    port,
                })
            }
        }
    }

    /// The medium this target addresses.
    pub fn medium(&self) -> TransportMedium {
        match self {
            DeviceTarget::Radio { .. } => TransportMedium::Radio,
            DeviceTarget::Serial { .. } => TransportMedium::Serial,
            DeviceTarget::Network { .. } => TransportMedium::Network,
        }
    }
}

impl fmt::Display for DeviceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceTarget::Radio { address } => write!(f, "{address}"),
            DeviceTarget::Serial { port } => write!(f, "{port}"),
            DeviceTarget::Network { host, port } => write!(f, "{host}:{port}"),
        }
    }
}

/// An already-decoded measurement snapshot.
///
/// Produced by the external protocol decoder, consumed once by the data
/// relay and not retained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementEvent {
    /// Short identifier of the measured parameter, e.g. `RPM`.
    pub mnemonic: String,
    /// Formatted value.
    pub value: String,
    /// Display unit, e.g. `rpm`.
    pub unit: String,
}

impl MeasurementEvent {
    pub fn new(
        mnemonic: impl Into<String>,
        value: impl Into<String>,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            mnemonic: mnemonic.into(),
            value: value.into(),
            unit: unit.into(),
        }
    }

    /// Render the wire payload delivered to the broadcast sink and the
    /// message broker.
    ///
    /// Field order, quoting and the single space after each comma are fixed
    /// for compatibility with existing external consumers; this must not be
    /// replaced with serde serialization.
    pub fn payload(&self) -> String {
        format!(
            "{{\"mnemonic\":\"{}\", \"value\":\"{}\", \"unit\":\"{}\"}}",
            self.mnemonic, self.value, self.unit
        )
    }
}

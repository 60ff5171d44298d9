//! Service configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use obdlink_types::TransportMedium;
use serde::{Deserialize, Serialize};

/// Service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Connection settings.
    pub connection: ConnectionConfig,
    /// Relay settings.
    pub relay: RelayConfig,
    /// MQTT settings.
    pub mqtt: MqttConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        // Create parent directories if needed
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return any errors.
    ///
    /// This checks:
    /// - The configured target (if any) is not blank
    /// - Timing values are non-zero and within reasonable bounds
    /// - The broadcast buffer can hold at least one payload
    /// - The MQTT broker URL and topic are usable when MQTT is enabled
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.connection.validate());
        errors.extend(self.relay.validate());
        errors.extend(self.mqtt.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    ///
    /// This is a convenience method that combines `load()` and `validate()`.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Transport medium to reach the device over.
    pub medium: TransportMedium,
    /// Device target for the medium: a radio address, a serial port path
    /// or a `host[:port]` endpoint. Optional; without it the service starts
    /// idle and waits for an explicit connect request.
    pub target: Option<String>,
    /// Request an encrypted link where the medium supports it.
    pub secure: bool,
    /// Whether a lost link schedules an automatic reconnect.
    pub auto_reconnect: bool,
    /// Delay between losing the link and the next automatic attempt.
    pub reconnect_delay_ms: u64,
    /// Window for a single connect attempt.
    pub connect_timeout_ms: u64,
    /// Baud rate for serial adapters.
    pub baud: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            medium: TransportMedium::Radio,
            target: None,
            secure: false,
            auto_reconnect: true,
            reconnect_delay_ms: 5000,
            connect_timeout_ms: 10_000,
            baud: 38400,
        }
    }
}

impl ConnectionConfig {
    /// Validate connection settings.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Some(target) = &self.target
            && target.trim().is_empty()
        {
            errors.push(ValidationError {
                field: "connection.target".to_string(),
                message: "target cannot be blank (use null/omit instead)".to_string(),
            });
        }

        if self.reconnect_delay_ms == 0 {
            errors.push(ValidationError {
                field: "connection.reconnect_delay_ms".to_string(),
                message: "reconnect delay cannot be 0".to_string(),
            });
        }

        if self.connect_timeout_ms == 0 {
            errors.push(ValidationError {
                field: "connection.connect_timeout_ms".to_string(),
                message: "connect timeout cannot be 0".to_string(),
            });
        }

        if self.baud == 0 {
            errors.push(ValidationError {
                field: "connection.baud".to_string(),
                message: "baud rate cannot be 0".to_string(),
            });
        }

        errors
    }

    /// Reconnect delay as a [`Duration`].
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// How long after start the service waits before reporting itself
    /// running, giving the transport time to settle.
    pub settle_delay_ms: u64,
    /// Capacity of the broadcast channel; slow subscribers lag past this.
    pub broadcast_buffer: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 3000,
            broadcast_buffer: 100,
        }
    }
}

impl RelayConfig {
    /// Validate relay settings.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.broadcast_buffer == 0 {
            errors.push(ValidationError {
                field: "relay.broadcast_buffer".to_string(),
                message: "broadcast buffer cannot be 0".to_string(),
            });
        }

        errors
    }

    /// Settle delay as a [`Duration`].
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// MQTT settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Whether measurement payloads are published to a broker.
    pub enabled: bool,
    /// Broker URL, `mqtt://host[:port]` or `mqtts://host[:port]`.
    pub broker: String,
    /// Client identifier presented to the broker.
    pub client_id: String,
    /// Topic all measurement payloads are published to.
    pub topic: String,
    /// Optional username.
    pub username: Option<String>,
    /// Optional password.
    pub password: Option<String>,
    /// Keep-alive interval in seconds.
    pub keep_alive: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            broker: "mqtt://localhost:1883".to_string(),
            client_id: "obdlink".to_string(),
            topic: "androbd/data".to_string(),
            username: None,
            password: None,
            keep_alive: 30,
        }
    }
}

impl MqttConfig {
    /// Validate MQTT settings. Skipped entirely while disabled.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !self.enabled {
            return errors;
        }

        if !self.broker.starts_with("mqtt://") && !self.broker.starts_with("mqtts://") {
            errors.push(ValidationError {
                field: "mqtt.broker".to_string(),
                message: format!(
                    "invalid broker URL '{}': must start with mqtt:// or mqtts://",
                    self.broker
                ),
            });
        }

        if self.topic.is_empty() {
            errors.push(ValidationError {
                field: "mqtt.topic".to_string(),
                message: "topic cannot be empty".to_string(),
            });
        } else if self.topic.contains(['#', '+']) {
            errors.push(ValidationError {
                field: "mqtt.topic".to_string(),
                message: format!("topic '{}' cannot contain wildcards", self.topic),
            });
        }

        if self.client_id.is_empty() {
            errors.push(ValidationError {
                field: "mqtt.client_id".to_string(),
                message: "client id cannot be empty".to_string(),
            });
        }

        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `connection.target` or `mqtt.broker`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("obdlink")
        .join("service.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.connection.medium, TransportMedium::Radio);
        assert_eq!(config.connection.target, None);
        assert!(config.connection.auto_reconnect);
        assert_eq!(config.connection.reconnect_delay_ms, 5000);
        assert_eq!(config.relay.settle_delay_ms, 3000);
        assert_eq!(config.mqtt.topic, "androbd/data");
        assert!(!config.mqtt.enabled);
    }

    #[test]
    fn test_default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_full_toml() {
        let toml = r#"
            [connection]
            medium = "network"
            target = "192.168.0.10:35000"
            auto_reconnect = false
            reconnect_delay_ms = 2500

            [relay]
            settle_delay_ms = 1000
            broadcast_buffer = 16

            [mqtt]
            enabled = true
            broker = "mqtt://broker.lan"
            topic = "car/telemetry"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.connection.medium, TransportMedium::Network);
        assert_eq!(
            config.connection.target,
            Some("192.168.0.10:35000".to_string())
        );
        assert!(!config.connection.auto_reconnect);
        assert_eq!(config.connection.reconnect_delay_ms, 2500);
        assert_eq!(config.relay.broadcast_buffer, 16);
        assert!(config.mqtt.enabled);
        assert_eq!(config.mqtt.topic, "car/telemetry");
        // Unset fields keep their defaults.
        assert_eq!(config.connection.connect_timeout_ms, 10_000);
        assert_eq!(config.mqtt.client_id, "obdlink");
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("test_config.toml");

        let mut config = Config::default();
        config.connection.medium = TransportMedium::Serial;
        config.connection.target = Some("/dev/ttyUSB0".to_string());
        config.connection.baud = 115_200;

        config.save(&config_path).unwrap();
        let loaded = Config::load(&config_path).unwrap();

        assert_eq!(loaded.connection.medium, TransportMedium::Serial);
        assert_eq!(loaded.connection.target, Some("/dev/ttyUSB0".to_string()));
        assert_eq!(loaded.connection.baud, 115_200);
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/config.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("invalid.toml");
        std::fs::write(&config_path, "this is not valid { toml").unwrap();

        let result = Config::load(&config_path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("obdlink/service.toml"));
    }

    #[test]
    fn test_connection_validation() {
        let blank_target = ConnectionConfig {
            target: Some("   ".to_string()),
            ..Default::default()
        };
        let errors = blank_target.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("blank"));

        let zero_delay = ConnectionConfig {
            reconnect_delay_ms: 0,
            ..Default::default()
        };
        let errors = zero_delay.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].field.contains("reconnect_delay_ms"));

        let zero_baud = ConnectionConfig {
            baud: 0,
            ..Default::default()
        };
        assert_eq!(zero_baud.validate().len(), 1);
    }

    #[test]
    fn test_relay_validation() {
        let zero_buffer = RelayConfig {
            broadcast_buffer: 0,
            ..Default::default()
        };
        let errors = zero_buffer.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("cannot be 0"));
    }

    #[test]
    fn test_mqtt_validation_skipped_when_disabled() {
        let config = MqttConfig {
            enabled: false,
            broker: "not a url".to_string(),
            topic: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_mqtt_validation() {
        let bad_broker = MqttConfig {
            enabled: true,
            broker: "http://localhost:1883".to_string(),
            ..Default::default()
        };
        let errors = bad_broker.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("mqtt://"));

        let wildcard_topic = MqttConfig {
            enabled: true,
            topic: "androbd/#".to_string(),
            ..Default::default()
        };
        let errors = wildcard_topic.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("wildcards"));

        let empty_client = MqttConfig {
            enabled: true,
            client_id: String::new(),
            ..Default::default()
        };
        assert_eq!(empty_client.validate().len(), 1);
    }

    #[test]
    fn test_validation_error_display() {
        let error = ValidationError {
            field: "mqtt.broker".to_string(),
            message: "invalid broker URL".to_string(),
        };
        assert_eq!(format!("{}", error), "mqtt.broker: invalid broker URL");
    }

    #[test]
    fn test_config_validation_error_display() {
        let config = Config {
            connection: ConnectionConfig {
                reconnect_delay_ms: 0,
                ..Default::default()
            },
            relay: RelayConfig {
                broadcast_buffer: 0,
                ..Default::default()
            },
            mqtt: MqttConfig::default(),
        };
        let err = config.validate().unwrap_err();
        let display = format!("{}", err);
        assert!(display.contains("connection.reconnect_delay_ms"));
        assert!(display.contains("relay.broadcast_buffer"));
    }

    #[test]
    fn test_duration_accessors() {
        let config = ConnectionConfig::default();
        assert_eq!(config.reconnect_delay(), Duration::from_millis(5000));
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(
            RelayConfig::default().settle_delay(),
            Duration::from_millis(3000)
        );
    }
}

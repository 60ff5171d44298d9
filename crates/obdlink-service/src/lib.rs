//! Background OBD connection service.
//!
//! This crate provides a service that:
//! - Keeps a link to an OBD adapter alive over radio, serial or network
//! - Reconnects automatically when the link drops
//! - Relays decoded measurements to a broadcast channel for in-process
//!   subscribers
//! - Optionally publishes each measurement payload to an MQTT broker
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/obdlink/service.toml`:
//!
//! ```toml
//! [connection]
//! medium = "network"
//! target = "192.168.0.10:35000"
//! auto_reconnect = true
//!
//! [relay]
//! settle_delay_ms = 3000
//!
//! [mqtt]
//! enabled = true
//! broker = "mqtt://localhost:1883"
//! topic = "androbd/data"
//! ```
//!
//! # Lifecycle
//!
//! [`ServiceLifecycleController`] drives the whole thing: `start()` claims
//! host readiness, brings up the connector, supervisor, publisher and
//! relay, and reports `Running` after a settle delay; `stop()` tears it
//! all down in reverse and reports `Stopped` last.

pub mod config;
pub mod controller;
#[cfg(feature = "mqtt")]
pub mod mqtt;
pub mod readiness;
pub mod relay;

pub use config::{Config, ConfigError, default_config_path};
pub use controller::{ServiceError, ServiceLifecycleController};
#[cfg(feature = "mqtt")]
pub use mqtt::{MqttError, MqttPublisher};
pub use readiness::{GateError, HostGate, ProcessGate};
pub use relay::DataRelay;

//! Connection core for the obdlink background OBD service.
//!
//! This crate keeps a live link to a remote OBD device independent of any
//! foreground interface, across three transport media:
//!
//! - **Radio** - BLE serial-bridge adapters ([`transport::RadioConnector`])
//! - **Serial** - locally attached USB adapters ([`transport::SerialConnector`])
//! - **Network** - WiFi adapters speaking raw TCP ([`transport::NetworkConnector`])
//!
//! All three implement the [`Connector`] contract. The
//! [`ConnectionSupervisor`] owns exactly one connector, runs the connection
//! state machine on a single control task and schedules automatic
//! reconnects when the link drops. State, connection and data notifications
//! fan out to registered [`StateListener`]s, serialized on the same control
//! task.
//!
//! # Quick Start
//!
//! ```no_run
//! use obdlink_core::{ConnectionSupervisor, SupervisorOptions};
//! use obdlink_core::events::connector_channel;
//! use obdlink_core::transport::{build_connector, ConnectorOptions};
//! use obdlink_types::{DeviceTarget, TransportMedium};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (events_tx, events_rx) = connector_channel();
//!     let connector = build_connector(
//!         TransportMedium::Network,
//!         events_tx,
//!         ConnectorOptions::default(),
//!     );
//!     let supervisor =
//!         ConnectionSupervisor::spawn(connector, events_rx, SupervisorOptions::default());
//!
//!     let target = DeviceTarget::parse(TransportMedium::Network, "192.168.0.10:35000").unwrap();
//!     supervisor.connect(target, false);
//! }
//! ```

pub mod error;
pub mod events;
pub mod registry;
pub mod supervisor;
pub mod traits;
pub mod transport;

pub use error::{Error, Result};
pub use events::{ConnectorEvent, DisconnectReason};
pub use registry::{ListenerId, ListenerRegistry, StateListener};
pub use supervisor::{ConnectionSupervisor, DEFAULT_RECONNECT_DELAY, SupervisorOptions};
pub use traits::Connector;
pub use transport::{ConnectorOptions, MockConnector, MockOutcome, build_connector};

//! Shared types for the obdlink background OBD service.
//!
//! This crate provides the data model used by both the connection core
//! (obdlink-core) and the service layer (obdlink-service):
//!
//! - Connection and service state enums
//! - Transport medium selection
//! - Device addressing ([`DeviceTarget`])
//! - Decoded measurement snapshots ([`MeasurementEvent`])

pub mod error;
pub mod types;

pub use error::{TargetError, TargetResult};
pub use types::{ConnectionState, DeviceTarget, MeasurementEvent, ServiceState, TransportMedium};

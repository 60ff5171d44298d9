//! Error types for obdlink-core.
//!
//! Connector I/O failures never cross the worker boundary as errors: they
//! are converted into [`crate::events::ConnectorEvent`] state messages at
//! the connector that detects them. The variants here cover the internal
//! fallible steps of a connect attempt.

use thiserror::Error;

/// Errors that can occur inside the connection core.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error
/// variants in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Serial port error.
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Connect attempt failed before a link was established.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Auto-reconnect was requested but no target has ever been attempted.
    #[error("No cached device target for auto-reconnect")]
    NoCachedTarget,
}

/// Result alias for obdlink-core operations.
pub type Result<T> = std::result::Result<T, Error>;

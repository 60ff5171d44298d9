//! Trait abstraction over the transport connectors.
//!
//! All three media (radio, serial, network) implement [`Connector`], which
//! is the full contract the supervisor depends on. A mock implementation
//! for tests lives in [`crate::transport::MockConnector`].

use async_trait::async_trait;

use obdlink_types::{ConnectionState, DeviceTarget, TransportMedium};

use crate::error::Result;

/// Medium-specific module implementing the connect/disconnect contract.
///
/// Connect attempts are non-blocking handoffs: [`Connector::connect`]
/// replaces any in-flight attempt with a new worker task and returns
/// immediately; the outcome arrives later as a
/// [`crate::events::ConnectorEvent`] on the channel the connector was
/// constructed with. A superseded attempt is cancelled and emits nothing.
///
/// I/O failures are caught at this boundary and reported as a transition
/// to [`ConnectionState::Offline`] with a reason; they never surface as
/// errors to the caller.
#[async_trait]
pub trait Connector: Send + Sync {
    /// The medium this connector serves.
    fn medium(&self) -> TransportMedium;

    /// Prepare medium-specific resources (adapters, port enumeration).
    ///
    /// Failures here are recoverable; a later [`Connector::connect`] will
    /// retry whatever `start` could not prepare.
    async fn start(&self) -> Result<()>;

    /// Begin an asynchronous connect attempt to `target`.
    ///
    /// Calling this while already connecting or connected supersedes the
    /// previous attempt for this connector instance.
    async fn connect(&self, target: &DeviceTarget, secure: bool);

    /// Tear down the current link or attempt. Idempotent.
    async fn disconnect(&self);

    /// Current state as seen by this connector, without blocking.
    fn state(&self) -> ConnectionState;
}

//! Transport connector implementations.
//!
//! One connector per medium, all behind the [`crate::traits::Connector`]
//! contract:
//!
//! - [`RadioConnector`] - BLE serial bridge via btleplug
//! - [`SerialConnector`] - local serial/USB adapter via tokio-serial
//! - [`NetworkConnector`] - TCP socket (WiFi adapters)
//! - [`MockConnector`] - scripted connector for tests

mod mock;
mod network;
mod radio;
mod serial;

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use bytes::Bytes;
use obdlink_types::{ConnectionState, TransportMedium};
use tokio::sync::mpsc;

use crate::events::{ConnectorEvent, ConnectorEventSender, DisconnectReason};
use crate::traits::Connector;

pub use mock::{MockConnector, MockOutcome};
pub use network::NetworkConnector;
pub use radio::RadioConnector;
pub use serial::SerialConnector;

/// Default window for a single connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default baud rate for serial adapters (ELM327 factory default).
pub const DEFAULT_BAUD: u32 = 38400;

/// Construction options shared by all connectors.
#[derive(Debug, Clone)]
pub struct ConnectorOptions {
    /// How long a single connect attempt may take before it is reported
    /// as a timeout.
    pub connect_timeout: Duration,
    /// Baud rate, used by the serial connector only.
    pub baud: u32,
    /// Optional sink for raw link bytes. The protocol decoder collaborator
    /// consumes this; the core itself never parses the stream.
    pub decoder_tap: Option<mpsc::UnboundedSender<Bytes>>,
}

impl Default for ConnectorOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            baud: DEFAULT_BAUD,
            decoder_tap: None,
        }
    }
}

/// Build the connector for the given medium.
pub fn build_connector(
    medium: TransportMedium,
    events: ConnectorEventSender,
    options: ConnectorOptions,
) -> Box<dyn Connector> {
    match medium {
        TransportMedium::Radio => Box::new(RadioConnector::new(events, options)),
        TransportMedium::Serial => Box::new(SerialConnector::new(events, options)),
        TransportMedium::Network => Box::new(NetworkConnector::new(events, options)),
    }
}

/// Shared state mirror plus event emission for a connector.
///
/// `mirror` updates only the locally readable state (used for transitions
/// the supervisor drives itself, like entering `Connecting`); `report`
/// additionally sends a state message to the control task. Send failures
/// are ignored: a closed channel means the supervisor is gone and late
/// completions are discarded by design.
#[derive(Clone)]
pub(crate) struct StateReporter {
    current: Arc<AtomicU8>,
    events: ConnectorEventSender,
}

impl StateReporter {
    pub(crate) fn new(events: ConnectorEventSender) -> Self {
        Self {
            current: Arc::new(AtomicU8::new(ConnectionState::None.as_u8())),
            events,
        }
    }

    pub(crate) fn mirror(&self, state: ConnectionState) {
        self.current.store(state.as_u8(), Ordering::SeqCst);
    }

    pub(crate) fn report(&self, state: ConnectionState, reason: Option<DisconnectReason>) {
        self.current.store(state.as_u8(), Ordering::SeqCst);
        let _ = self.events.send(ConnectorEvent::StateChanged { state, reason });
    }

    pub(crate) fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.current.load(Ordering::SeqCst))
    }

    /// Forward raw link bytes to the decoder tap, if one is attached.
    pub(crate) fn tap(tap: &Option<mpsc::UnboundedSender<Bytes>>, data: &[u8]) {
        if let Some(tx) = tap {
            let _ = tx.send(Bytes::copy_from_slice(data));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::connector_channel;

    #[test]
    fn test_reporter_mirror_does_not_emit() {
        let (tx, mut rx) = connector_channel();
        let reporter = StateReporter::new(tx);

        reporter.mirror(ConnectionState::Connecting);
        assert_eq!(reporter.get(), ConnectionState::Connecting);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_reporter_report_emits_and_mirrors() {
        let (tx, mut rx) = connector_channel();
        let reporter = StateReporter::new(tx);

        reporter.report(
            ConnectionState::Offline,
            Some(DisconnectReason::Timeout),
        );
        assert_eq!(reporter.get(), ConnectionState::Offline);
        assert_eq!(
            rx.try_recv().unwrap(),
            ConnectorEvent::StateChanged {
                state: ConnectionState::Offline,
                reason: Some(DisconnectReason::Timeout),
            }
        );
    }

    #[test]
    fn test_reporter_survives_closed_channel() {
        let (tx, rx) = connector_channel();
        drop(rx);
        let reporter = StateReporter::new(tx);

        // Late completion after the supervisor is gone is discarded.
        reporter.report(ConnectionState::Connected, None);
        assert_eq!(reporter.get(), ConnectionState::Connected);
    }
}

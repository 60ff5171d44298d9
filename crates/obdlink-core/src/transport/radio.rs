//! Short-range radio connector for BLE serial-bridge OBD adapters.
//!
//! BLE ELM327 clones expose a UART-style service (most commonly the Nordic
//! UART layout): one notify characteristic carrying adapter output and one
//! write characteristic for commands. The connector finds the peripheral by
//! address through a short scan, subscribes to the notify characteristic
//! and forwards everything it receives to the decoder tap.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::StreamExt;
use obdlink_types::{ConnectionState, DeviceTarget, TransportMedium};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::events::{ConnectorEventSender, DisconnectReason};
use crate::traits::Connector;
use crate::transport::{ConnectorOptions, StateReporter};

/// Nordic UART service.
pub const UART_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);
/// Notify characteristic (adapter -> host).
pub const UART_TX_UUID: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

/// How long the pre-connect scan runs before the peripheral list is checked.
const SCAN_WINDOW: Duration = Duration::from_secs(3);

struct Attempt {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Attempt {
    fn supersede(&self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

/// Connector for BLE OBD adapters.
pub struct RadioConnector {
    reporter: StateReporter,
    connect_timeout: Duration,
    decoder_tap: Option<mpsc::UnboundedSender<Bytes>>,
    attempt: Mutex<Option<Attempt>>,
    /// The connected peripheral, kept so `disconnect` can tear the link
    /// down at the BLE level rather than only aborting the worker.
    peripheral: Arc<Mutex<Option<Peripheral>>>,
}

impl RadioConnector {
    pub fn new(events: ConnectorEventSender, options: ConnectorOptions) -> Self {
        Self {
            reporter: StateReporter::new(events),
            connect_timeout: options.connect_timeout,
            decoder_tap: options.decoder_tap,
            attempt: Mutex::new(None),
            peripheral: Arc::new(Mutex::new(None)),
        }
    }
}

#[async_trait]
impl Connector for RadioConnector {
    fn medium(&self) -> TransportMedium {
        TransportMedium::Radio
    }

    async fn start(&self) -> Result<()> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        if adapters.is_empty() {
            return Err(Error::ConnectionFailed(
                "no Bluetooth adapter available".to_string(),
            ));
        }
        debug!("{} Bluetooth adapter(s) available", adapters.len());
        Ok(())
    }

    async fn connect(&self, target: &DeviceTarget, secure: bool) {
        let DeviceTarget::Radio { address } = target else {
            warn!("radio connector given non-radio target {target}");
            self.reporter.report(
                ConnectionState::Offline,
                Some(DisconnectReason::ConnectFailed(format!(
                    "target '{target}' is not a radio address"
                ))),
            );
            return;
        };
        if secure {
            // Link encryption is negotiated by the platform BLE stack on
            // pairing; there is no per-connection switch to flip here.
            debug!("secure link requested; relying on platform pairing for {address}");
        }

        let mut attempt = self.attempt.lock().await;
        if let Some(previous) = attempt.take() {
            debug!("superseding in-flight radio attempt");
            previous.supersede();
        }

        self.reporter.mirror(ConnectionState::Connecting);

        let address = address.clone();
        let reporter = self.reporter.clone();
        let tap = self.decoder_tap.clone();
        let connect_timeout = self.connect_timeout;
        let peripheral_slot = Arc::clone(&self.peripheral);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = task_cancel.cancelled() => return,
                outcome = timeout(connect_timeout, establish(&address)) => outcome,
            };

            let (peripheral, notify_char) = match outcome {
                Err(_) => {
                    warn!("connect to {address} timed out after {connect_timeout:?}");
                    reporter.report(
                        ConnectionState::Offline,
                        Some(DisconnectReason::Timeout),
                    );
                    return;
                }
                Ok(Err(e)) => {
                    warn!("connect to {address} failed: {e}");
                    reporter.report(
                        ConnectionState::Offline,
                        Some(DisconnectReason::ConnectFailed(e.to_string())),
                    );
                    return;
                }
                Ok(Ok(link)) => link,
            };

            info!("connected to {address}");
            *peripheral_slot.lock().await = Some(peripheral.clone());
            reporter.report(ConnectionState::Connected, None);
            run_link(peripheral, reporter, tap, task_cancel).await;
        });

        *attempt = Some(Attempt { cancel, handle });
    }

    async fn disconnect(&self) {
        let mut attempt = self.attempt.lock().await;
        if let Some(current) = attempt.take() {
            current.supersede();
        }
        if let Some(peripheral) = self.peripheral.lock().await.take()
            && let Err(e) = peripheral.disconnect().await
        {
            debug!("error disconnecting peripheral: {e}");
        }
        self.reporter.mirror(ConnectionState::None);
    }

    fn state(&self) -> ConnectionState {
        self.reporter.get()
    }
}

/// Scan for the peripheral, connect and locate the notify characteristic.
async fn establish(address: &str) -> Result<(Peripheral, Characteristic)> {
    let manager = Manager::new().await?;
    let adapter: Adapter = manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| Error::ConnectionFailed("no Bluetooth adapter available".to_string()))?;

    adapter.start_scan(ScanFilter::default()).await?;
    sleep(SCAN_WINDOW).await;
    adapter.stop_scan().await?;

    let peripheral = find_peripheral(&adapter, address)
        .await?
        .ok_or_else(|| Error::ConnectionFailed(format!("device '{address}' not found")))?;

    peripheral.connect().await?;
    peripheral.discover_services().await?;

    let notify_char = find_notify_characteristic(&peripheral).ok_or_else(|| {
        Error::ConnectionFailed("no UART notify characteristic on device".to_string())
    })?;

    peripheral.subscribe(&notify_char).await?;
    Ok((peripheral, notify_char))
}

/// Match a discovered peripheral by address (or platform id string).
async fn find_peripheral(adapter: &Adapter, address: &str) -> Result<Option<Peripheral>> {
    for peripheral in adapter.peripherals().await? {
        if peripheral
            .address()
            .to_string()
            .eq_ignore_ascii_case(address)
            || peripheral.id().to_string().eq_ignore_ascii_case(address)
        {
            return Ok(Some(peripheral));
        }
    }
    Ok(None)
}

/// Prefer the Nordic UART TX characteristic, fall back to any notify-capable
/// characteristic (clones use assorted vendor UUIDs with the same layout).
fn find_notify_characteristic(peripheral: &Peripheral) -> Option<Characteristic> {
    let characteristics = peripheral.characteristics();
    characteristics
        .iter()
        .find(|c| c.uuid == UART_TX_UUID)
        .or_else(|| {
            characteristics
                .iter()
                .find(|c| c.properties.contains(CharPropFlags::NOTIFY))
        })
        .cloned()
}

/// Forward notifications until the stream ends or the attempt is cancelled.
async fn run_link(
    peripheral: Peripheral,
    reporter: StateReporter,
    tap: Option<mpsc::UnboundedSender<Bytes>>,
    cancel: CancellationToken,
) {
    let mut stream = match peripheral.notifications().await {
        Ok(stream) => stream,
        Err(e) => {
            if !cancel.is_cancelled() {
                reporter.report(
                    ConnectionState::Offline,
                    Some(DisconnectReason::LinkLost(e.to_string())),
                );
            }
            return;
        }
    };

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = stream.next() => next,
        };
        match next {
            Some(notification) => StateReporter::tap(&tap, &notification.value),
            None => {
                // Stream end means the peripheral dropped the connection.
                if !cancel.is_cancelled() {
                    reporter.report(
                        ConnectionState::Offline,
                        Some(DisconnectReason::LinkLost(
                            "notification stream ended".to_string(),
                        )),
                    );
                }
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ConnectorEvent, connector_channel};
    use tokio::time::timeout as tokio_timeout;

    #[tokio::test]
    async fn test_wrong_target_kind_reports_offline() {
        let (tx, mut rx) = connector_channel();
        let connector = RadioConnector::new(tx, ConnectorOptions::default());

        let target = DeviceTarget::Network {
            host: "192.168.0.10".to_string(),
            port: 35000,
        };
        connector.connect(&target, false).await;

        let event = tokio_timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            ConnectorEvent::StateChanged {
                state: ConnectionState::Offline,
                reason: Some(DisconnectReason::ConnectFailed(_)),
            } => {}
            other => panic!("expected failure event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_disconnect_without_connect_is_noop() {
        let (tx, mut rx) = connector_channel();
        let connector = RadioConnector::new(tx, ConnectorOptions::default());

        connector.disconnect().await;
        connector.disconnect().await;
        assert_eq!(connector.state(), ConnectionState::None);
        assert!(rx.try_recv().is_err());
    }
}

//! Serial/USB connector for locally attached OBD adapters.

use async_trait::async_trait;
use bytes::Bytes;
use obdlink_types::{ConnectionState, DeviceTarget, TransportMedium};
use tokio::io::AsyncReadExt;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::events::{ConnectorEventSender, DisconnectReason};
use crate::traits::Connector;
use crate::transport::{ConnectorOptions, StateReporter};

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

/// Connector for ELM327-style adapters on a local serial port.
pub struct SerialConnector {
    reporter: StateReporter,
    baud: u32,
    decoder_tap: Option<mpsc::UnboundedSender<Bytes>>,
    attempt: Mutex<Option<Attempt>>,
}

impl SerialConnector {
    pub fn new(events: ConnectorEventSender, options: ConnectorOptions) -> Self {
        Self {
            reporter: StateReporter::new(events),
            baud: options.baud,
            decoder_tap: options.decoder_tap,
            attempt: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Connector for SerialConnector {
    fn medium(&self) -> TransportMedium {
        TransportMedium::Serial
    }

    async fn start(&self) -> Result<()> {
        let ports = tokio_serial::available_ports()?;
        debug!("{} serial port(s) present", ports.len());
        for port in &ports {
            debug!("  {}", port.port_name);
        }
        Ok(())
    }

    async fn connect(&self, target: &DeviceTarget, _secure: bool) {
        let DeviceTarget::Serial { port } = target else {
            warn!("serial connector given non-serial target {target}");
            self.reporter.report(
                ConnectionState::Offline,
                Some(DisconnectReason::ConnectFailed(format!(
                    "target '{target}' is not a serial port"
                ))),
            );
            return;
        };

        let mut attempt = self.attempt.lock().await;
        if let Some(previous) = attempt.take() {
            debug!("superseding in-flight serial attempt");
            previous.supersede();
        }

        self.reporter.mirror(ConnectionState::Connecting);

        let port = port.clone();
        let baud = self.baud;
        let reporter = self.reporter.clone();
        let tap = self.decoder_tap.clone();
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            if task_cancel.is_cancelled() {
                return;
            }
            let stream = match tokio_serial::new(&port, baud).open_native_async() {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("open of {port} at {baud} baud failed: {e}");
                    reporter.report(
                        ConnectionState::Offline,
                        Some(DisconnectReason::ConnectFailed(e.to_string())),
                    );
                    return;
                }
            };

            info!("opened {port} at {baud} baud");
            reporter.report(ConnectionState::Connected, None);
            run_link(stream, reporter, tap, task_cancel).await;
        });

        *attempt = Some(Attempt { cancel, handle });
    }

    async fn disconnect(&self) {
        let mut attempt = self.attempt.lock().await;
        if let Some(current) = attempt.take() {
            current.supersede();
            debug!("serial link closed on request");
        }
        self.reporter.mirror(ConnectionState::None);
    }

    fn state(&self) -> ConnectionState {
        self.reporter.get()
    }
}

/// Pump the open port until it fails or the attempt is cancelled.
async fn run_link(
    mut stream: SerialStream,
    reporter: StateReporter,
    tap: Option<mpsc::UnboundedSender<Bytes>>,
    cancel: CancellationToken,
) {
    let mut buf = [0u8; 1024];
    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => return,
            read = stream.read(&mut buf) => read,
        };
        match read {
            Ok(0) => {
                if !cancel.is_cancelled() {
                    reporter.report(
                        ConnectionState::Offline,
                        Some(DisconnectReason::LinkLost("port closed".to_string())),
                    );
                }
                return;
            }
            Ok(n) => StateReporter::tap(&tap, &buf[..n]),
            Err(e) => {
                // A detached USB adapter surfaces here as a read error.
                if !cancel.is_cancelled() {
                    reporter.report(
                        ConnectionState::Offline,
                        Some(DisconnectReason::LinkLost(e.to_string())),
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
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_missing_port_reports_offline() {
        let (tx, mut rx) = connector_channel();
        let connector = SerialConnector::new(tx, ConnectorOptions::default());

        let target = DeviceTarget::Serial {
            port: "/dev/obdlink-test-no-such-port".to_string(),
        };
        connector.connect(&target, false).await;

        let event = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            ConnectorEvent::StateChanged {
                state: ConnectionState::Offline,
                reason: Some(DisconnectReason::ConnectFailed(_)),
            } => {}
            other => panic!("expected connect failure, got {other:?}"),
        }
        assert_eq!(connector.state(), ConnectionState::Offline);
    }

    #[tokio::test]
    async fn test_wrong_target_kind_reports_offline() {
        let (tx, mut rx) = connector_channel();
        let connector = SerialConnector::new(tx, ConnectorOptions::default());

        let target = DeviceTarget::Network {
            host: "192.168.0.10".to_string(),
            port: 35000,
        };
        connector.connect(&target, false).await;

        let event = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            event,
            ConnectorEvent::StateChanged {
                state: ConnectionState::Offline,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_disconnect_without_connect_is_noop() {
        let (tx, mut rx) = connector_channel();
        let connector = SerialConnector::new(tx, ConnectorOptions::default());

        connector.disconnect().await;
        assert_eq!(connector.state(), ConnectionState::None);
        assert!(rx.try_recv().is_err());
    }
}

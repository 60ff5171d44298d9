//! TCP connector for network-attached OBD adapters.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use obdlink_types::{ConnectionState, DeviceTarget, TransportMedium};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::events::{ConnectorEventSender, DisconnectReason};
use crate::traits::Connector;
use crate::transport::{ConnectorOptions, StateReporter};

/// One in-flight connect attempt or established link.
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

/// Connector for WiFi/Ethernet OBD adapters speaking raw TCP.
pub struct NetworkConnector {
    reporter: StateReporter,
    connect_timeout: Duration,
    decoder_tap: Option<mpsc::UnboundedSender<Bytes>>,
    attempt: Mutex<Option<Attempt>>,
}

impl NetworkConnector {
    pub fn new(events: ConnectorEventSender, options: ConnectorOptions) -> Self {
        Self {
            reporter: StateReporter::new(events),
            connect_timeout: options.connect_timeout,
            decoder_tap: options.decoder_tap,
            attempt: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Connector for NetworkConnector {
    fn medium(&self) -> TransportMedium {
        TransportMedium::Network
    }

    async fn start(&self) -> Result<()> {
        // Nothing to prepare for plain TCP.
        Ok(())
    }

    async fn connect(&self, target: &DeviceTarget, _secure: bool) {
        let DeviceTarget::Network { host, port } = target else {
            warn!("network connector given non-network target {target}");
            self.reporter.report(
                ConnectionState::Offline,
                Some(DisconnectReason::ConnectFailed(format!(
                    "target '{target}' is not a network address"
                ))),
            );
            return;
        };

        let mut attempt = self.attempt.lock().await;
        if let Some(previous) = attempt.take() {
            debug!("superseding in-flight network attempt");
            previous.supersede();
        }

        self.reporter.mirror(ConnectionState::Connecting);

        let host = host.clone();
        let port = *port;
        let reporter = self.reporter.clone();
        let tap = self.decoder_tap.clone();
        let connect_timeout = self.connect_timeout;
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            let connected = tokio::select! {
                _ = task_cancel.cancelled() => return,
                result = timeout(connect_timeout, TcpStream::connect((host.as_str(), port))) => result,
            };

            let stream = match connected {
                Err(_) => {
                    warn!("connect to {host}:{port} timed out after {connect_timeout:?}");
                    reporter.report(
                        ConnectionState::Offline,
                        Some(DisconnectReason::Timeout),
                    );
                    return;
                }
                Ok(Err(e)) => {
                    warn!("connect to {host}:{port} failed: {e}");
                    reporter.report(
                        ConnectionState::Offline,
                        Some(DisconnectReason::ConnectFailed(e.to_string())),
                    );
                    return;
                }
                Ok(Ok(stream)) => stream,
            };

            info!("connected to {host}:{port}");
            reporter.report(ConnectionState::Connected, None);
            run_link(stream, reporter, tap, task_cancel).await;
        });

        *attempt = Some(Attempt { cancel, handle });
    }

    async fn disconnect(&self) {
        let mut attempt = self.attempt.lock().await;
        if let Some(current) = attempt.take() {
            current.supersede();
            debug!("network link closed on request");
        }
        self.reporter.mirror(ConnectionState::None);
    }

    fn state(&self) -> ConnectionState {
        self.reporter.get()
    }
}

/// Pump the established link until it drops or the attempt is cancelled.
///
/// Received bytes go to the decoder tap; EOF or a read error is reported
/// as link loss unless the caller already cancelled the attempt.
async fn run_link(
    mut stream: TcpStream,
    reporter: StateReporter,
    tap: Option<mpsc::UnboundedSender<Bytes>>,
    cancel: CancellationToken,
) {
    let mut buf = [0u8; 4096];
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
                        Some(DisconnectReason::LinkLost("remote closed".to_string())),
                    );
                }
                return;
            }
            Ok(n) => StateReporter::tap(&tap, &buf[..n]),
            Err(e) => {
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
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn wait_event(rx: &mut crate::events::ConnectorEventReceiver) -> ConnectorEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for connector event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_connect_and_link_loss() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (tx, mut rx) = connector_channel();
        let connector = NetworkConnector::new(tx, ConnectorOptions::default());

        let target = DeviceTarget::Network {
            host: addr.ip().to_string(),
            port: addr.port(),
        };
        connector.connect(&target, false).await;

        let (server_side, _) = listener.accept().await.unwrap();

        assert_eq!(
            wait_event(&mut rx).await,
            ConnectorEvent::StateChanged {
                state: ConnectionState::Connected,
                reason: None,
            }
        );
        assert_eq!(connector.state(), ConnectionState::Connected);

        // Remote closes the socket: link lost.
        drop(server_side);
        match wait_event(&mut rx).await {
            ConnectorEvent::StateChanged {
                state: ConnectionState::Offline,
                reason: Some(DisconnectReason::LinkLost(_)),
            } => {}
            other => panic!("expected link loss, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_refused_reports_offline() {
        // Bind then drop to get a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, mut rx) = connector_channel();
        let connector = NetworkConnector::new(tx, ConnectorOptions::default());

        let target = DeviceTarget::Network {
            host: addr.ip().to_string(),
            port: addr.port(),
        };
        connector.connect(&target, false).await;

        match wait_event(&mut rx).await {
            ConnectorEvent::StateChanged {
                state: ConnectionState::Offline,
                reason: Some(DisconnectReason::ConnectFailed(_)),
            } => {}
            other => panic!("expected connect failure, got {other:?}"),
        }
        assert_eq!(connector.state(), ConnectionState::Offline);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_and_silent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (tx, mut rx) = connector_channel();
        let connector = NetworkConnector::new(tx, ConnectorOptions::default());

        let target = DeviceTarget::Network {
            host: addr.ip().to_string(),
            port: addr.port(),
        };
        connector.connect(&target, false).await;
        let _ = listener.accept().await.unwrap();
        wait_event(&mut rx).await; // Connected

        connector.disconnect().await;
        connector.disconnect().await;
        assert_eq!(connector.state(), ConnectionState::None);

        // A requested disconnect must not masquerade as link loss.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_wrong_target_kind_reports_offline() {
        let (tx, mut rx) = connector_channel();
        let connector = NetworkConnector::new(tx, ConnectorOptions::default());

        let target = DeviceTarget::Serial {
            port: "/dev/ttyUSB0".to_string(),
        };
        connector.connect(&target, false).await;

        match wait_event(&mut rx).await {
            ConnectorEvent::StateChanged {
                state: ConnectionState::Offline,
                reason: Some(DisconnectReason::ConnectFailed(_)),
            } => {}
            other => panic!("expected failure event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_received_bytes_reach_decoder_tap() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (tx, mut rx) = connector_channel();
        let (tap_tx, mut tap_rx) = mpsc::unbounded_channel();
        let options = ConnectorOptions {
            decoder_tap: Some(tap_tx),
            ..Default::default()
        };
        let connector = NetworkConnector::new(tx, options);

        let target = DeviceTarget::Network {
            host: addr.ip().to_string(),
            port: addr.port(),
        };
        connector.connect(&target, false).await;

        let (mut server_side, _) = listener.accept().await.unwrap();
        wait_event(&mut rx).await; // Connected

        server_side.write_all(b"41 0C 1A F8\r>").await.unwrap();
        let chunk = timeout(Duration::from_secs(2), tap_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&chunk[..], b"41 0C 1A F8\r>");
    }
}

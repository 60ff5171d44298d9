//! Scripted connector for testing without hardware.
//!
//! [`MockConnector`] behaves exactly like the real connectors at the event
//! level: connect is a non-blocking handoff, outcomes arrive as state
//! messages, and a superseded attempt emits nothing. Tests script the
//! outcome of each attempt up front and can fail an established link on
//! demand.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use obdlink_types::{ConnectionState, DeviceTarget, TransportMedium};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::events::{ConnectorEventSender, DisconnectReason};
use crate::traits::Connector;
use crate::transport::StateReporter;

/// Scripted result of one connect attempt.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Attempt succeeds.
    Connected,
    /// Attempt fails with the given reason.
    Fail(String),
    /// Connector enters listen mode instead of connecting.
    Listen,
    /// Attempt never completes (until superseded or disconnected).
    Hang,
}

struct Attempt {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    reporter: StateReporter,
    outcomes: StdMutex<VecDeque<MockOutcome>>,
    latency: Duration,
    connect_calls: AtomicU32,
    last_target: StdMutex<Option<(DeviceTarget, bool)>>,
    attempt: Mutex<Option<Attempt>>,
}

/// A mock transport connector.
///
/// Clones share state, so tests keep one clone for scripting and hand the
/// other to the supervisor.
#[derive(Clone)]
pub struct MockConnector {
    inner: Arc<Inner>,
}

impl MockConnector {
    pub fn new(events: ConnectorEventSender) -> Self {
        Self::with_latency(events, Duration::ZERO)
    }

    /// Create a mock whose attempts take `latency` before completing.
    pub fn with_latency(events: ConnectorEventSender, latency: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                reporter: StateReporter::new(events),
                outcomes: StdMutex::new(VecDeque::new()),
                latency,
                connect_calls: AtomicU32::new(0),
                last_target: StdMutex::new(None),
                attempt: Mutex::new(None),
            }),
        }
    }

    /// Queue the outcome for the next connect attempt.
    ///
    /// Attempts with an empty queue succeed.
    pub fn push_outcome(&self, outcome: MockOutcome) {
        self.inner.outcomes.lock().unwrap().push_back(outcome);
    }

    /// Number of connect attempts started so far (including superseded ones).
    pub fn connect_calls(&self) -> u32 {
        self.inner.connect_calls.load(Ordering::SeqCst)
    }

    /// Target and security flag of the most recent attempt.
    pub fn last_target(&self) -> Option<(DeviceTarget, bool)> {
        self.inner.last_target.lock().unwrap().clone()
    }

    /// Simulate loss of an established link.
    pub fn fail_link(&self, reason: &str) {
        self.inner.reporter.report(
            ConnectionState::Offline,
            Some(DisconnectReason::LinkLost(reason.to_string())),
        );
    }
}

#[async_trait]
impl Connector for MockConnector {
    fn medium(&self) -> TransportMedium {
        TransportMedium::Network
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn connect(&self, target: &DeviceTarget, secure: bool) {
        self.inner.connect_calls.fetch_add(1, Ordering::SeqCst);
        *self.inner.last_target.lock().unwrap() = Some((target.clone(), secure));

        let outcome = self
            .inner
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(MockOutcome::Connected);

        let mut attempt = self.inner.attempt.lock().await;
        if let Some(previous) = attempt.take() {
            previous.cancel.cancel();
            previous.handle.abort();
        }

        self.inner.reporter.mirror(ConnectionState::Connecting);

        let reporter = self.inner.reporter.clone();
        let latency = self.inner.latency;
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = task_cancel.cancelled() => return,
                _ = sleep(latency) => {}
            }
            match outcome {
                MockOutcome::Connected => reporter.report(ConnectionState::Connected, None),
                MockOutcome::Fail(reason) => reporter.report(
                    ConnectionState::Offline,
                    Some(DisconnectReason::ConnectFailed(reason)),
                ),
                MockOutcome::Listen => reporter.report(ConnectionState::Listen, None),
                MockOutcome::Hang => task_cancel.cancelled().await,
            }
        });

        *attempt = Some(Attempt { cancel, handle });
    }

    async fn disconnect(&self) {
        let mut attempt = self.inner.attempt.lock().await;
        if let Some(current) = attempt.take() {
            current.cancel.cancel();
            current.handle.abort();
        }
        self.inner.reporter.mirror(ConnectionState::None);
    }

    fn state(&self) -> ConnectionState {
        self.inner.reporter.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ConnectorEvent, connector_channel};
    use tokio::time::timeout;

    fn network_target(port: u16) -> DeviceTarget {
        DeviceTarget::Network {
            host: "192.168.0.10".to_string(),
            port,
        }
    }

    #[tokio::test]
    async fn test_default_outcome_is_connected() {
        let (tx, mut rx) = connector_channel();
        let mock = MockConnector::new(tx);

        mock.connect(&network_target(35000), false).await;
        let event = timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            ConnectorEvent::StateChanged {
                state: ConnectionState::Connected,
                reason: None,
            }
        );
        assert_eq!(mock.connect_calls(), 1);
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let (tx, mut rx) = connector_channel();
        let mock = MockConnector::new(tx);
        mock.push_outcome(MockOutcome::Fail("no route".to_string()));

        mock.connect(&network_target(35000), true).await;
        let event = timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            ConnectorEvent::StateChanged {
                state: ConnectionState::Offline,
                reason: Some(DisconnectReason::ConnectFailed("no route".to_string())),
            }
        );
        assert_eq!(mock.last_target().unwrap().1, true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_attempt_emits_nothing() {
        let (tx, mut rx) = connector_channel();
        let mock = MockConnector::with_latency(tx, Duration::from_millis(100));
        mock.push_outcome(MockOutcome::Fail("first".to_string()));
        mock.push_outcome(MockOutcome::Connected);

        mock.connect(&network_target(1), false).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        mock.connect(&network_target(2), false).await;

        tokio::time::sleep(Duration::from_millis(200)).await;

        // Only the second attempt's outcome is ever observed.
        let event = rx.try_recv().unwrap();
        assert_eq!(
            event,
            ConnectorEvent::StateChanged {
                state: ConnectionState::Connected,
                reason: None,
            }
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(mock.connect_calls(), 2);
        assert_eq!(mock.last_target().unwrap().0, network_target(2));
    }
}

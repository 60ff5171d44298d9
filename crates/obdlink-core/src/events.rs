//! Asynchronous messages from connector workers to the control task.
//!
//! Connectors run their blocking I/O on worker tasks and never touch
//! supervisor state directly; every outcome (link established, attempt
//! failed, link lost) travels through the channel created here and is
//! applied by the single control task that owns the state machine.

use std::fmt;

use obdlink_types::ConnectionState;
use tokio::sync::mpsc;

/// Why a link ended or an attempt failed.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DisconnectReason {
    /// The connect attempt itself failed.
    ConnectFailed(String),
    /// An established link dropped.
    LinkLost(String),
    /// The attempt exceeded the configured connect timeout.
    Timeout,
    /// Disconnect requested by the caller.
    UserRequested,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::ConnectFailed(msg) => write!(f, "connect failed: {msg}"),
            DisconnectReason::LinkLost(msg) => write!(f, "link lost: {msg}"),
            DisconnectReason::Timeout => f.write_str("connect timed out"),
            DisconnectReason::UserRequested => f.write_str("disconnect requested"),
        }
    }
}

/// Message emitted by a connector worker.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectorEvent {
    /// The connector observed a state transition.
    StateChanged {
        state: ConnectionState,
        reason: Option<DisconnectReason>,
    },
}

/// Sender half handed to a connector at construction.
pub type ConnectorEventSender = mpsc::UnboundedSender<ConnectorEvent>;

/// Receiver half consumed by the supervisor control task.
pub type ConnectorEventReceiver = mpsc::UnboundedReceiver<ConnectorEvent>;

/// Create the connector-to-supervisor event channel.
pub fn connector_channel() -> (ConnectorEventSender, ConnectorEventReceiver) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_reason_display() {
        assert_eq!(
            DisconnectReason::ConnectFailed("refused".to_string()).to_string(),
            "connect failed: refused"
        );
        assert_eq!(
            DisconnectReason::LinkLost("eof".to_string()).to_string(),
            "link lost: eof"
        );
        assert_eq!(DisconnectReason::Timeout.to_string(), "connect timed out");
    }

    #[tokio::test]
    async fn test_connector_channel_delivery() {
        let (tx, mut rx) = connector_channel();
        tx.send(ConnectorEvent::StateChanged {
            state: ConnectionState::Connected,
            reason: None,
        })
        .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            ConnectorEvent::StateChanged {
                state: ConnectionState::Connected,
                reason: None,
            }
        );
    }
}

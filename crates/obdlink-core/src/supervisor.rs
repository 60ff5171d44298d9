//! Connection supervisor: the state machine that keeps the device link
//! alive.
//!
//! The supervisor owns exactly one [`Connector`] and runs a single control
//! task that serializes every state transition, every listener dispatch and
//! the reconnect timer. Connector workers and external callers communicate
//! with it only through messages; nothing else ever touches its state.
//!
//! # Transition table
//!
//! ```text
//! None        --connect(target)-->           Connecting
//! Connecting  --connector: success-->        Connected
//! Connecting  --connector: failure-->        Offline
//! Connected   --connector: link lost-->      Offline
//! Offline     --auto-reconnect enabled-->    delayed Connecting (5000 ms)
//! Offline     --auto-reconnect disabled-->   None
//! Connected   --disconnect()-->              None
//! ```
//!
//! A lost link is reported to listeners as `Offline` and the reconnect
//! timer is armed immediately in the same handling pass; there is no
//! intermediate notification cycle before arming. Entering `Connected`
//! cancels any pending timer, and arming a timer always cancels the
//! previous one first, so at most one timer is ever live.
//!
//! Connector reports only enter the table from states where they make
//! sense (`Connected` from `Connecting`; `Offline` from `Connecting`,
//! `Connected` or `Listen`); anything else is a stale report from a
//! superseded or torn-down worker and is dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use obdlink_types::{ConnectionState, DeviceTarget, ServiceState};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::events::{ConnectorEvent, ConnectorEventReceiver, DisconnectReason};
use crate::registry::{ListenerId, ListenerRegistry, StateListener};
use crate::traits::Connector;

/// Delay between losing the link and the next automatic connect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(5000);

/// Supervisor construction options.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Whether a lost link schedules an automatic reconnect.
    pub auto_reconnect: bool,
    /// Delay before an automatic reconnect attempt.
    pub reconnect_delay: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// Messages consumed by the control task.
enum ControlMsg {
    Connect { target: DeviceTarget, secure: bool },
    Disconnect,
    SetAutoReconnect(bool),
    AddListener(ListenerId, Arc<dyn StateListener>),
    RemoveListener(ListenerId),
    NotifyServiceState(ServiceState),
    NotifyData(String),
    ReconnectFired,
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable handle to a running supervisor.
///
/// All methods are non-blocking message sends except [`shutdown`], which
/// waits for teardown to complete. Sends to an already shut down supervisor
/// are silently dropped.
///
/// [`shutdown`]: ConnectionSupervisor::shutdown
#[derive(Clone)]
pub struct ConnectionSupervisor {
    msg_tx: mpsc::UnboundedSender<ControlMsg>,
    state_rx: watch::Receiver<ConnectionState>,
    listener_seq: Arc<AtomicU64>,
}

impl ConnectionSupervisor {
    /// Spawn the control task for `connector`.
    ///
    /// `link_rx` is the receiving half of the channel the connector was
    /// built with; the supervisor consumes every connector event through
    /// it.
    pub fn spawn(
        connector: Box<dyn Connector>,
        link_rx: ConnectorEventReceiver,
        options: SupervisorOptions,
    ) -> Self {
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::None);

        let control = ControlTask {
            connector,
            state_tx,
            registry: ListenerRegistry::new(),
            auto_reconnect: options.auto_reconnect,
            reconnect_delay: options.reconnect_delay,
            cached_target: None,
            reconnect_timer: None,
            msg_tx: msg_tx.clone(),
        };
        tokio::spawn(control.run(msg_rx, link_rx));

        Self {
            msg_tx,
            state_rx,
            listener_seq: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Request a connect attempt to `target`.
    ///
    /// Supersedes any attempt already in flight.
    pub fn connect(&self, target: DeviceTarget, secure: bool) {
        let _ = self.msg_tx.send(ControlMsg::Connect { target, secure });
    }

    /// Tear the link down and return to `None`.
    pub fn disconnect(&self) {
        let _ = self.msg_tx.send(ControlMsg::Disconnect);
    }

    /// Enable or disable the automatic reconnect policy.
    ///
    /// Disabling also cancels a pending reconnect timer.
    pub fn set_auto_reconnect(&self, enabled: bool) {
        let _ = self.msg_tx.send(ControlMsg::SetAutoReconnect(enabled));
    }

    /// Register a listener; returns the id to unregister with.
    pub fn add_listener(&self, listener: Arc<dyn StateListener>) -> ListenerId {
        let id = ListenerId(self.listener_seq.fetch_add(1, Ordering::SeqCst));
        let _ = self.msg_tx.send(ControlMsg::AddListener(id, listener));
        id
    }

    /// Unregister a listener. Unknown ids are ignored.
    pub fn remove_listener(&self, id: ListenerId) {
        let _ = self.msg_tx.send(ControlMsg::RemoveListener(id));
    }

    /// Dispatch a service-state notification through the registry.
    pub fn notify_service_state(&self, state: ServiceState) {
        let _ = self.msg_tx.send(ControlMsg::NotifyServiceState(state));
    }

    /// Dispatch a data-received notification through the registry.
    pub fn notify_data(&self, payload: String) {
        let _ = self.msg_tx.send(ControlMsg::NotifyData(payload));
    }

    /// Current connection state, without blocking.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch channel for connection-state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Stop the control task: cancels the reconnect timer, disconnects the
    /// connector, clears all listeners and discards late connector events.
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.msg_tx.send(ControlMsg::Shutdown(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

struct ControlTask {
    connector: Box<dyn Connector>,
    state_tx: watch::Sender<ConnectionState>,
    registry: ListenerRegistry,
    auto_reconnect: bool,
    reconnect_delay: Duration,
    /// Most recently attempted target; never stale beyond one generation.
    cached_target: Option<(DeviceTarget, bool)>,
    /// At most one live timer; superseded atomically by any scheduling call.
    reconnect_timer: Option<JoinHandle<()>>,
    msg_tx: mpsc::UnboundedSender<ControlMsg>,
}

impl ControlTask {
    async fn run(
        mut self,
        mut msg_rx: mpsc::UnboundedReceiver<ControlMsg>,
        mut link_rx: ConnectorEventReceiver,
    ) {
        loop {
            tokio::select! {
                Some(msg) = msg_rx.recv() => {
                    if self.handle(msg).await {
                        break;
                    }
                }
                Some(event) = link_rx.recv() => {
                    self.handle_link_event(event);
                }
                else => break,
            }
        }
        debug!("supervisor control task exited");
    }

    /// Apply one message; returns true when the loop should stop.
    async fn handle(&mut self, msg: ControlMsg) -> bool {
        match msg {
            ControlMsg::Connect { target, secure } => {
                self.cancel_timer();
                info!("connecting to {target}");
                self.cached_target = Some((target.clone(), secure));
                self.set_state(ConnectionState::Connecting);
                self.connector.connect(&target, secure).await;
            }
            ControlMsg::Disconnect => {
                self.cancel_timer();
                self.connector.disconnect().await;
                self.set_state(ConnectionState::None);
            }
            ControlMsg::SetAutoReconnect(enabled) => {
                self.auto_reconnect = enabled;
                if !enabled {
                    self.cancel_timer();
                    if self.state() == ConnectionState::Offline {
                        self.set_state(ConnectionState::None);
                    }
                }
            }
            ControlMsg::AddListener(id, listener) => self.registry.add(id, listener),
            ControlMsg::RemoveListener(id) => self.registry.remove(id),
            ControlMsg::NotifyServiceState(state) => self.registry.notify_service_state(state),
            ControlMsg::NotifyData(payload) => self.registry.notify_data(&payload),
            ControlMsg::ReconnectFired => {
                self.reconnect_timer = None;
                if let Err(e) = self.try_reconnect().await {
                    info!("auto-reconnect skipped: {e}");
                }
            }
            ControlMsg::Shutdown(ack) => {
                self.auto_reconnect = false;
                self.cancel_timer();
                self.connector.disconnect().await;
                self.registry.clear();
                self.set_state(ConnectionState::None);
                let _ = ack.send(());
                return true;
            }
        }
        false
    }

    /// Apply one connector report, validated against the current state.
    ///
    /// A worker can have a report in flight when its attempt is superseded
    /// or torn down; such a report arrives after the supervisor has already
    /// moved on and must not re-enter the table (a link-lost event landing
    /// after an explicit disconnect would otherwise resurrect the reconnect
    /// policy). Reports that do not fit the current state are dropped.
    fn handle_link_event(&mut self, event: ConnectorEvent) {
        let ConnectorEvent::StateChanged { state, reason } = event;
        let current = self.state();
        match state {
            ConnectionState::Connected => {
                if current != ConnectionState::Connecting {
                    debug!("dropping stale connected report in state {current}");
                    return;
                }
                // Guard against a stale reconnect racing the fresh link.
                self.cancel_timer();
                self.set_state(ConnectionState::Connected);
            }
            ConnectionState::Offline => {
                if !matches!(
                    current,
                    ConnectionState::Connecting
                        | ConnectionState::Connected
                        | ConnectionState::Listen
                ) {
                    debug!("dropping stale offline report in state {current}");
                    return;
                }
                let reason = reason
                    .unwrap_or(DisconnectReason::LinkLost("unknown".to_string()));
                warn!("link offline: {reason}");
                self.set_state(ConnectionState::Offline);
                if self.auto_reconnect {
                    self.schedule_reconnect();
                } else {
                    self.set_state(ConnectionState::None);
                }
            }
            ConnectionState::Listen => {
                if current != ConnectionState::Connecting {
                    debug!("dropping stale listen report in state {current}");
                    return;
                }
                self.set_state(ConnectionState::Listen);
            }
            other => debug!("ignoring connector report of {other}"),
        }
    }

    /// Connect to the cached target, if any.
    async fn try_reconnect(&mut self) -> Result<()> {
        if !self.auto_reconnect {
            return Ok(());
        }
        match self.state() {
            ConnectionState::Connected | ConnectionState::Connecting => return Ok(()),
            _ => {}
        }
        let (target, secure) = self
            .cached_target
            .clone()
            .ok_or(Error::NoCachedTarget)?;
        info!("auto-reconnecting to {target}");
        self.set_state(ConnectionState::Connecting);
        self.connector.connect(&target, secure).await;
        Ok(())
    }

    /// Arm the reconnect timer, superseding any pending one.
    fn schedule_reconnect(&mut self) {
        self.cancel_timer();
        let delay = self.reconnect_delay;
        let msg_tx = self.msg_tx.clone();
        debug!("reconnect scheduled in {delay:?}");
        self.reconnect_timer = Some(tokio::spawn(async move {
            sleep(delay).await;
            let _ = msg_tx.send(ControlMsg::ReconnectFired);
        }));
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&mut self, state: ConnectionState) {
        let changed = *self.state_tx.borrow() != state;
        if changed {
            debug!("connection state -> {state}");
            self.state_tx.send_replace(state);
            self.registry.notify_connection_state(state);
        }
    }
}

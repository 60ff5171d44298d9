//! Service lifecycle controller.
//!
//! Owns the start/stop sequence of the whole service and the service-state
//! axis (`Stopped -> Starting -> Running -> Stopping -> Stopped`), which is
//! independent of the connection state: the service can be `Running` while
//! the link is offline.
//!
//! Start order: readiness claim, connector, supervisor, MQTT publisher,
//! relay, then the settle delay before `Running` is reported. Stop order is
//! the reverse, with the reconnect policy disabled first so no timer can
//! fire into a half-torn-down service; `Stopped` is reported last.

use std::sync::Arc;
use std::time::Duration;

use obdlink_core::events::connector_channel;
use obdlink_core::transport::{ConnectorOptions, build_connector};
use obdlink_core::{ConnectionSupervisor, ListenerId, StateListener, SupervisorOptions};
use obdlink_types::{ConnectionState, DeviceTarget, MeasurementEvent, ServiceState};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::Config;
#[cfg(feature = "mqtt")]
use crate::mqtt::MqttPublisher;
use crate::readiness::{HostGate, ProcessGate, acquire_within};
use crate::relay::DataRelay;

/// Window for each readiness-claim attempt.
const GATE_ACQUIRE_WINDOW: Duration = Duration::from_secs(5);

/// Errors from lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("service is already running")]
    AlreadyRunning,
    #[error("service is not running")]
    NotRunning,
    #[error("invalid device target: {0}")]
    Target(#[from] obdlink_types::TargetError),
    #[cfg(feature = "mqtt")]
    #[error(transparent)]
    Mqtt(#[from] crate::mqtt::MqttError),
}

/// Parts that only exist while the service is running.
struct Active {
    supervisor: ConnectionSupervisor,
    relay: DataRelay,
    #[cfg(feature = "mqtt")]
    mqtt: Option<MqttPublisher>,
    settle: JoinHandle<()>,
}

/// Controller for the background service.
pub struct ServiceLifecycleController {
    config: Config,
    gate: Arc<dyn HostGate>,
    state_tx: watch::Sender<ServiceState>,
    active: Mutex<Option<Active>>,
}

impl ServiceLifecycleController {
    /// Create a controller with the in-process readiness gate.
    pub fn new(config: Config) -> Self {
        Self::with_gate(config, Arc::new(ProcessGate::new()))
    }

    /// Create a controller with a custom readiness gate.
    pub fn with_gate(config: Config, gate: Arc<dyn HostGate>) -> Self {
        let (state_tx, _) = watch::channel(ServiceState::Stopped);
        Self {
            config,
            gate,
            state_tx,
            active: Mutex::new(None),
        }
    }

    /// Bring the service up.
    ///
    /// Reports `Starting` immediately and `Running` only after the settle
    /// delay has passed. When a target is configured the first connect
    /// attempt is issued right before `Running` is reported.
    pub async fn start(&self) -> Result<(), ServiceError> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Err(ServiceError::AlreadyRunning);
        }

        // Validate the configured target before anything is brought up, so
        // a bad config cannot leave half-started parts behind.
        let connection = &self.config.connection;
        let initial_target = match &connection.target {
            Some(target) => Some(DeviceTarget::parse(connection.medium, target)?),
            None => None,
        };

        self.set_state(ServiceState::Starting, None);

        if let Err(e) = acquire_within(self.gate.as_ref(), GATE_ACQUIRE_WINDOW).await {
            // Degraded but functional: the host may suspend the process.
            warn!("starting without readiness claim: {e}");
        }

        let (events_tx, events_rx) = connector_channel();
        let connector = build_connector(
            connection.medium,
            events_tx,
            ConnectorOptions {
                connect_timeout: connection.connect_timeout(),
                baud: connection.baud,
                decoder_tap: None,
            },
        );
        if let Err(e) = connector.start().await {
            // Recoverable: a later connect retries whatever start could
            // not prepare.
            warn!("transport preparation failed: {e}");
        }

        let supervisor = ConnectionSupervisor::spawn(
            connector,
            events_rx,
            SupervisorOptions {
                auto_reconnect: connection.auto_reconnect,
                reconnect_delay: connection.reconnect_delay(),
            },
        );

        #[cfg(feature = "mqtt")]
        let mqtt = if self.config.mqtt.enabled {
            match MqttPublisher::start(&self.config.mqtt) {
                Ok(publisher) => Some(publisher),
                Err(e) => {
                    // Unwind the parts already brought up.
                    supervisor.shutdown().await;
                    self.gate.release().await;
                    self.set_state(ServiceState::Stopped, None);
                    return Err(e.into());
                }
            }
        } else {
            None
        };
        #[cfg(feature = "mqtt")]
        let mqtt_tx = mqtt.as_ref().map(MqttPublisher::sender);
        #[cfg(not(feature = "mqtt"))]
        let mqtt_tx = None;

        let relay = DataRelay::start(
            supervisor.clone(),
            mqtt_tx,
            self.config.relay.broadcast_buffer,
        );

        // The first connect happens only after the settle delay, giving
        // the transport time to come up.
        let secure = connection.secure;
        let settle_delay = self.config.relay.settle_delay();
        let state_tx = self.state_tx.clone();
        let settle_supervisor = supervisor.clone();
        let settle = tokio::spawn(async move {
            sleep(settle_delay).await;
            match initial_target {
                Some(target) => settle_supervisor.connect(target, secure),
                None => info!("no device target configured; waiting for connect request"),
            }
            info!("service state -> {}", ServiceState::Running);
            state_tx.send_replace(ServiceState::Running);
            settle_supervisor.notify_service_state(ServiceState::Running);
        });

        *active = Some(Active {
            supervisor,
            relay,
            #[cfg(feature = "mqtt")]
            mqtt,
            settle,
        });
        Ok(())
    }

    /// Bring the service down.
    ///
    /// No-op when already stopped. The reconnect policy is disabled before
    /// anything is torn down, and `Stopped` is reported only once teardown
    /// has finished.
    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        let Some(active) = active.take() else {
            return;
        };

        self.set_state(ServiceState::Stopping, Some(&active.supervisor));

        active.supervisor.set_auto_reconnect(false);
        active.settle.abort();
        active.supervisor.shutdown().await;
        active.relay.abort();
        #[cfg(feature = "mqtt")]
        if let Some(mqtt) = &active.mqtt {
            mqtt.stop();
        }
        self.gate.release().await;

        self.set_state(ServiceState::Stopped, None);
    }

    /// Request a connect attempt to `target`, parsed for the configured
    /// medium.
    pub async fn connect(&self, target: &str) -> Result<(), ServiceError> {
        let active = self.active.lock().await;
        let active = active.as_ref().ok_or(ServiceError::NotRunning)?;
        let target = DeviceTarget::parse(self.config.connection.medium, target)?;
        active
            .supervisor
            .connect(target, self.config.connection.secure);
        Ok(())
    }

    /// Tear the device link down without stopping the service.
    pub async fn disconnect(&self) -> Result<(), ServiceError> {
        let active = self.active.lock().await;
        let active = active.as_ref().ok_or(ServiceError::NotRunning)?;
        active.supervisor.disconnect();
        Ok(())
    }

    /// Enable or disable the automatic reconnect policy at runtime.
    pub async fn set_auto_reconnect(&self, enabled: bool) -> Result<(), ServiceError> {
        let active = self.active.lock().await;
        let active = active.as_ref().ok_or(ServiceError::NotRunning)?;
        active.supervisor.set_auto_reconnect(enabled);
        Ok(())
    }

    /// Register a listener with the running supervisor.
    pub async fn add_listener(
        &self,
        listener: Arc<dyn StateListener>,
    ) -> Result<ListenerId, ServiceError> {
        let active = self.active.lock().await;
        let active = active.as_ref().ok_or(ServiceError::NotRunning)?;
        Ok(active.supervisor.add_listener(listener))
    }

    /// Unregister a listener.
    pub async fn remove_listener(&self, id: ListenerId) -> Result<(), ServiceError> {
        let active = self.active.lock().await;
        let active = active.as_ref().ok_or(ServiceError::NotRunning)?;
        active.supervisor.remove_listener(id);
        Ok(())
    }

    /// Sender the protocol decoder feeds measurements into.
    pub async fn measurement_sender(
        &self,
    ) -> Result<mpsc::UnboundedSender<MeasurementEvent>, ServiceError> {
        let active = self.active.lock().await;
        let active = active.as_ref().ok_or(ServiceError::NotRunning)?;
        Ok(active.relay.sender())
    }

    /// Subscribe to rendered measurement payloads.
    pub async fn subscribe_broadcast(
        &self,
    ) -> Result<broadcast::Receiver<String>, ServiceError> {
        let active = self.active.lock().await;
        let active = active.as_ref().ok_or(ServiceError::NotRunning)?;
        Ok(active.relay.subscribe())
    }

    /// Current service state, without blocking.
    pub fn state(&self) -> ServiceState {
        *self.state_tx.borrow()
    }

    /// Watch channel for service-state changes.
    pub fn watch_state(&self) -> watch::Receiver<ServiceState> {
        self.state_tx.subscribe()
    }

    /// Current connection state; `None` while the service is stopped.
    pub async fn connection_state(&self) -> ConnectionState {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(active) => active.supervisor.state(),
            None => ConnectionState::None,
        }
    }

    fn set_state(&self, state: ServiceState, supervisor: Option<&ConnectionSupervisor>) {
        info!("service state -> {state}");
        self.state_tx.send_replace(state);
        if let Some(supervisor) = supervisor {
            supervisor.notify_service_state(state);
        }
    }
}

//! Measurement relay.
//!
//! Sits between the protocol decoder and the outward-facing sinks: each
//! [`MeasurementEvent`] is rendered once into its wire payload and fanned
//! out to the broadcast channel, the MQTT publisher (when enabled) and the
//! supervisor's listener registry. Events are consumed exactly once and
//! never stored.

use obdlink_core::ConnectionSupervisor;
use obdlink_types::MeasurementEvent;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;

/// Running relay task plus the handles to feed and observe it.
pub struct DataRelay {
    measurement_tx: mpsc::UnboundedSender<MeasurementEvent>,
    broadcast_tx: broadcast::Sender<String>,
    task: JoinHandle<()>,
}

impl DataRelay {
    /// Spawn the relay task.
    ///
    /// `mqtt_tx` is the publisher's payload sender, absent when MQTT is
    /// disabled. `buffer` sizes the broadcast channel.
    pub fn start(
        supervisor: ConnectionSupervisor,
        mqtt_tx: Option<mpsc::UnboundedSender<String>>,
        buffer: usize,
    ) -> Self {
        let (measurement_tx, mut measurement_rx) = mpsc::unbounded_channel::<MeasurementEvent>();
        let (broadcast_tx, _) = broadcast::channel(buffer);

        let fanout_tx = broadcast_tx.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = measurement_rx.recv().await {
                let payload = event.payload();
                debug!("relaying {}", event.mnemonic);

                // A send error just means nobody is subscribed right now.
                let _ = fanout_tx.send(payload.clone());
                if let Some(mqtt) = &mqtt_tx {
                    let _ = mqtt.send(payload.clone());
                }
                supervisor.notify_data(payload);
            }
            debug!("relay task exited");
        });

        Self {
            measurement_tx,
            broadcast_tx,
            task,
        }
    }

    /// Sender the protocol decoder feeds measurements into.
    pub fn sender(&self) -> mpsc::UnboundedSender<MeasurementEvent> {
        self.measurement_tx.clone()
    }

    /// Subscribe to rendered payloads.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.broadcast_tx.subscribe()
    }

    /// Stop the relay task; queued events are dropped.
    pub fn abort(&self) {
        self.task.abort();
    }
}

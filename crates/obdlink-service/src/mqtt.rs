//! MQTT publisher for measurement payloads.
//!
//! Publishes every relayed payload to a single configurable topic
//! (default `androbd/data`), fire-and-forget: QoS 0, no retain. External
//! dashboards subscribe to the topic and receive the same payload string
//! the broadcast sink carries.
//!
//! # Example Configuration
//!
//! ```toml
//! [mqtt]
//! enabled = true
//! broker = "mqtt://localhost:1883"
//! topic = "androbd/data"
//! ```
//!
//! # Reconnection
//!
//! The client reconnects on its own if the broker connection is lost.
//! Connection errors are logged but never stop the publisher task.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::MqttConfig;

/// Errors from starting the publisher.
#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    #[error("invalid MQTT broker URL: {0}")]
    Broker(String),
}

/// Publisher handle; payloads sent through [`sender`] end up on the broker.
///
/// [`sender`]: MqttPublisher::sender
pub struct MqttPublisher {
    payload_tx: mpsc::UnboundedSender<String>,
    stop_tx: watch::Sender<bool>,
}

impl MqttPublisher {
    /// Connect to the configured broker and start the publish loop.
    ///
    /// Returns immediately; publishing happens in the background.
    pub fn start(config: &MqttConfig) -> Result<Self, MqttError> {
        let (host, port, use_tls) = parse_broker_url(&config.broker).map_err(MqttError::Broker)?;

        let mut mqtt_options = MqttOptions::new(&config.client_id, host, port);
        mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            mqtt_options.set_credentials(username, password);
        }

        if use_tls {
            // Native TLS with system roots; matches the use-native-tls
            // feature this crate builds rumqttc with.
            mqtt_options.set_transport(rumqttc::Transport::tls_with_config(
                rumqttc::TlsConfiguration::Native,
            ));
        }

        let (client, mut eventloop) = AsyncClient::new(mqtt_options, 100);
        let (payload_tx, mut payload_rx) = mpsc::unbounded_channel::<String>();
        let (stop_tx, mut stop_rx) = watch::channel(false);

        info!("Starting MQTT publisher to {}", config.broker);

        // Event loop handler; drives the connection until stopped.
        let mut loop_stop_rx = stop_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = eventloop.poll() => match event {
                        Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                            info!("MQTT connected: {:?}", ack);
                        }
                        Ok(Event::Incoming(Packet::PingResp)) => {
                            debug!("MQTT ping response received");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!("MQTT connection error: {}. Reconnecting...", e);
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    },
                    _ = loop_stop_rx.changed() => {
                        if *loop_stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        // Publish loop.
        let topic = config.topic.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    payload = payload_rx.recv() => {
                        let Some(payload) = payload else {
                            info!("Payload channel closed, stopping MQTT publisher");
                            break;
                        };
                        if let Err(e) = client
                            .publish(&topic, QoS::AtMostOnce, false, payload.into_bytes())
                            .await
                        {
                            warn!("Failed to publish payload: {}", e);
                        }
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            info!("MQTT publisher received stop signal");
                            break;
                        }
                    }
                }
            }

            if let Err(e) = client.disconnect().await {
                debug!("Error disconnecting MQTT client: {}", e);
            }
            info!("MQTT publisher stopped");
        });

        Ok(Self {
            payload_tx,
            stop_tx,
        })
    }

    /// Sender for payloads to publish.
    pub fn sender(&self) -> mpsc::UnboundedSender<String> {
        self.payload_tx.clone()
    }

    /// Signal both background tasks to stop and disconnect.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

/// Parse an MQTT broker URL into (host, port, use_tls).
fn parse_broker_url(url: &str) -> Result<(String, u16, bool), String> {
    let (scheme, rest) = if let Some(stripped) = url.strip_prefix("mqtt://") {
        ("mqtt", stripped)
    } else if let Some(stripped) = url.strip_prefix("mqtts://") {
        ("mqtts", stripped)
    } else {
        return Err("Invalid scheme: URL must start with mqtt:// or mqtts://".to_string());
    };

    let use_tls = scheme == "mqtts";
    let default_port = if use_tls { 8883 } else { 1883 };

    let (host, port) = if let Some((h, p)) = rest.rsplit_once(':') {
        let port = p
            .parse::<u16>()
            .map_err(|_| format!("Invalid port: {}", p))?;
        (h.to_string(), port)
    } else {
        (rest.to_string(), default_port)
    };

    if host.is_empty() {
        return Err("Host cannot be empty".to_string());
    }

    Ok((host, port, use_tls))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_broker_url_mqtt() {
        let (host, port, tls) = parse_broker_url("mqtt://localhost:1883").unwrap();
        assert_eq!(host, "localhost");
        assert_eq!(port, 1883);
        assert!(!tls);
    }

    #[test]
    fn test_parse_broker_url_mqtts() {
        let (host, port, tls) = parse_broker_url("mqtts://broker.example.com:8883").unwrap();
        assert_eq!(host, "broker.example.com");
        assert_eq!(port, 8883);
        assert!(tls);
    }

    #[test]
    fn test_parse_broker_url_default_port() {
        let (host, port, tls) = parse_broker_url("mqtt://localhost").unwrap();
        assert_eq!(host, "localhost");
        assert_eq!(port, 1883);
        assert!(!tls);

        let (host, port, tls) = parse_broker_url("mqtts://secure.example.com").unwrap();
        assert_eq!(host, "secure.example.com");
        assert_eq!(port, 8883);
        assert!(tls);
    }

    #[test]
    fn test_parse_broker_url_invalid_scheme() {
        assert!(parse_broker_url("http://localhost:1883").is_err());
        assert!(parse_broker_url("localhost:1883").is_err());
    }

    #[test]
    fn test_parse_broker_url_empty_host() {
        assert!(parse_broker_url("mqtt://:1883").is_err());
    }

    #[tokio::test]
    async fn test_start_with_tls_broker_url() {
        let config = MqttConfig {
            enabled: true,
            broker: "mqtts://broker.example.com".to_string(),
            ..Default::default()
        };
        // Exercises the native-TLS transport setup; the connection itself
        // is only attempted later by the event loop.
        let publisher = MqttPublisher::start(&config).unwrap();
        publisher.stop();
    }

    #[test]
    fn test_start_with_bad_broker_url() {
        let config = MqttConfig {
            broker: "tcp://localhost".to_string(),
            ..Default::default()
        };
        // Starting never touches the network, so only URL parsing can fail.
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let _guard = runtime.enter();
        assert!(matches!(
            MqttPublisher::start(&config),
            Err(MqttError::Broker(_))
        ));
    }
}

//! MQTT client wrapper for the cloud relay connection.

use crate::config::MqttConfig;
use crate::error::Result;
use log::{debug, error, info, warn};
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, TlsConfiguration, Transport,
};
use std::time::Duration;
use strum::Display;
use tokio::sync::{mpsc, watch};

/// Message received from MQTT broker.
#[derive(Debug, Clone)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: String,
}

/// Connection state shared with every registered node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

/// Client id unique per process: `<username>-<uuid>`.
pub fn client_id(username: &str) -> String {
    format!("{}-{}", username, uuid::Uuid::new_v4())
}

/// MQTT client for the relay broker.
pub struct MqttClient {
    client: AsyncClient,
    event_loop: EventLoop,
    reconnect: Duration,
}

impl MqttClient {
    /// Create a new MQTT client from configuration.
    ///
    /// TLS material is read from disk here, so a bad path fails early.
    pub fn new(config: &MqttConfig, username: &str, password: &str) -> Result<Self> {
        let mut options = MqttOptions::new(client_id(username), &config.broker_host, config.port());
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

        if !username.is_empty() {
            options.set_credentials(username, password);
        }

        if let Some(ca_path) = &config.ca_path {
            let ca = std::fs::read(ca_path)?;
            let client_auth = match (&config.cert_path, &config.key_path) {
                (Some(cert), Some(key)) => Some((std::fs::read(cert)?, std::fs::read(key)?)),
                _ => None,
            };
            options.set_transport(Transport::tls_with_config(TlsConfiguration::Simple {
                ca,
                alpn: None,
                client_auth,
            }));
        }

        let (client, event_loop) = AsyncClient::new(options, 100);

        Ok(Self {
            client,
            event_loop,
            reconnect: Duration::from_secs(config.reconnect_secs),
        })
    }

    /// Run the MQTT event loop and forward messages to the provided channel.
    ///
    /// `subscriptions` are (re)issued on every ConnAck, so they survive
    /// reconnects. Runs until the message channel closes.
    pub async fn run(
        mut self,
        tx: mpsc::Sender<MqttMessage>,
        status: watch::Sender<ConnectionStatus>,
        subscriptions: Vec<String>,
    ) {
        info!("[MQTT] Starting event loop");

        loop {
            match self.event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("[MQTT] Connected to relay broker");
                    status.send_replace(ConnectionStatus::Connected);
                    for topic in &subscriptions {
                        if let Err(e) = self.client.try_subscribe(topic, QoS::AtLeastOnce) {
                            warn!("[MQTT] Failed to subscribe to {}: {:?}", topic, e);
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let topic = publish.topic.clone();
                    let payload = match String::from_utf8(publish.payload.to_vec()) {
                        Ok(s) => s,
                        Err(e) => {
                            warn!("[MQTT] Invalid UTF-8 in payload on {}: {}", topic, e);
                            continue;
                        }
                    };

                    debug!("[MQTT] Received message on {}: {}", topic, payload);

                    if tx.send(MqttMessage { topic, payload }).await.is_err() {
                        error!("[MQTT] Message channel closed");
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!("[MQTT] Connection error: {:?}", e);
                    status.send_replace(ConnectionStatus::Reconnecting);
                    // Wait before reconnecting
                    tokio::time::sleep(self.reconnect).await;
                    warn!("[MQTT] Re-connecting to relay broker");
                }
            }
        }
    }

    /// Get a clone of the async client for publishing from other tasks.
    pub fn client(&self) -> AsyncClient {
        self.client.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_client_id_is_unique_per_call() {
        let a = client_id("alice");
        let b = client_id("alice");
        assert!(a.starts_with("alice-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ConnectionStatus::Reconnecting.to_string(), "reconnecting");
    }

    #[tokio::test]
    async fn test_missing_tls_material_fails_early() {
        let mut mqtt = Config::default().mqtt;
        mqtt.ca_path = Some("/nonexistent/ca.pem".into());
        assert!(MqttClient::new(&mqtt, "alice", "secret").is_err());
    }
}

//! Per-account relay session.
//!
//! Holds the broker connection and the nodes registered against it. The
//! first registration connects, the last deregistration disconnects.

use super::client::{ConnectionStatus, MqttClient, MqttMessage};
use super::{Publisher, topics};
use crate::config::{AccountConfig, MqttConfig};
use crate::directive::InboundCommand;
use crate::error::{BridgeError, Result};
use crate::handlers::CommandHandler;
use crate::state::StatePayload;
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use rumqttc::{AsyncClient, QoS};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

#[derive(Clone)]
pub enum HandlerKind {
    /// Receives directives addressed to its device.
    Command(Arc<CommandHandler>),
    /// Reports device state; registered for connection status only.
    State,
}

#[derive(Clone)]
pub struct RegisteredHandler {
    pub id: String,
    pub device: String,
    pub kind: HandlerKind,
}

impl RegisteredHandler {
    pub fn command(handler: Arc<CommandHandler>) -> Self {
        Self {
            id: handler.id().to_string(),
            device: handler.device().to_string(),
            kind: HandlerKind::Command(handler),
        }
    }

    pub fn state(id: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            device: device.into(),
            kind: HandlerKind::State,
        }
    }
}

struct Connection {
    client: AsyncClient,
    event_loop: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

/// Relay alert published on `message/{account}/...`.
#[derive(Debug, Deserialize)]
struct Alert {
    #[serde(default)]
    severity: String,
    #[serde(default)]
    message: String,
}

pub struct TransportSession {
    account: AccountConfig,
    mqtt: MqttConfig,
    handlers: RwLock<HashMap<String, RegisteredHandler>>,
    connection: Mutex<Option<Connection>>,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl TransportSession {
    pub fn new(account: AccountConfig, mqtt: MqttConfig) -> Arc<Self> {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Arc::new(Self {
            account,
            mqtt,
            handlers: RwLock::new(HashMap::new()),
            connection: Mutex::new(None),
            status_tx,
        })
    }

    pub fn account(&self) -> &AccountConfig {
        &self.account
    }

    /// Relay-side account name used in every topic.
    fn relay_account(&self) -> &str {
        &self.account.username
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.status_tx.borrow() == ConnectionStatus::Connected
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Register a node. The first registration opens the connection.
    pub fn register(self: &Arc<Self>, handler: RegisteredHandler) {
        let first = {
            let mut handlers = self.handlers.write();
            handlers.insert(handler.id.clone(), handler);
            handlers.len() == 1
        };

        if first {
            self.connect();
        }
    }

    /// Remove a node. Returns true when it was the last one and the
    /// connection was closed.
    pub fn deregister(&self, id: &str) -> bool {
        let empty = {
            let mut handlers = self.handlers.write();
            if handlers.remove(id).is_none() {
                return false;
            }
            handlers.is_empty()
        };

        if empty {
            self.disconnect();
        }
        empty
    }

    /// Drop every registration and close the connection.
    pub fn shutdown(&self) {
        self.handlers.write().clear();
        self.disconnect();
    }

    fn connect(self: &Arc<Self>) {
        let mut slot = self.connection.lock();
        if slot.is_some() {
            return;
        }

        info!(
            "[MQTT] Connecting to relay MQTT server {}:{}, account username: {}",
            self.mqtt.broker_host,
            self.mqtt.port(),
            self.account.username
        );

        let mqtt_client = match MqttClient::new(&self.mqtt, &self.account.username, &self.account.password) {
            Ok(client) => client,
            Err(e) => {
                error!("[MQTT] Unable to create client for {}: {}", self.account.id, e);
                self.status_tx.send_replace(ConnectionStatus::Disconnected);
                return;
            }
        };
        let client = mqtt_client.client();
        self.status_tx.send_replace(ConnectionStatus::Connecting);

        let (msg_tx, mut msg_rx) = mpsc::channel::<MqttMessage>(64);
        let subscriptions = vec![
            topics::command_filter(self.relay_account()),
            topics::message_filter(self.relay_account()),
        ];
        let status_tx = self.status_tx.clone();
        let event_loop = tokio::spawn(async move {
            mqtt_client.run(msg_tx, status_tx, subscriptions).await;
        });

        let session: Weak<Self> = Arc::downgrade(self);
        let dispatcher = tokio::spawn(async move {
            while let Some(msg) = msg_rx.recv().await {
                let Some(session) = session.upgrade() else {
                    break;
                };
                session.dispatch(&msg.topic, &msg.payload);
            }
        });

        *slot = Some(Connection {
            client,
            event_loop,
            dispatcher,
        });
    }

    fn disconnect(&self) {
        let Some(connection) = self.connection.lock().take() else {
            return;
        };

        info!("[MQTT] Disconnecting account {}", self.account.id);
        if let Err(e) = connection.client.try_disconnect() {
            debug!("[MQTT] Disconnect request not sent: {:?}", e);
        }
        connection.event_loop.abort();
        connection.dispatcher.abort();
        self.status_tx.send_replace(ConnectionStatus::Disconnected);
    }

    /// Route one inbound message. Returns the number of command handlers
    /// that received it.
    pub fn dispatch(&self, topic: &str, payload: &str) -> usize {
        match topics::classify(self.relay_account(), topic) {
            topics::InboundTopic::Message => {
                self.alert(payload);
                0
            }
            topics::InboundTopic::Command { .. } => self.dispatch_command(payload),
            topics::InboundTopic::Unknown => {
                debug!("[MQTT] Ignoring message on {}", topic);
                0
            }
        }
    }

    fn alert(&self, payload: &str) {
        match serde_json::from_str::<Alert>(payload) {
            Ok(alert) => match alert.severity.as_str() {
                "error" => error!("[MQTT] Relay: {}", alert.message),
                "warn" => warn!("[MQTT] Relay: {}", alert.message),
                _ => info!("[MQTT] Relay: {}", alert.message),
            },
            Err(e) => warn!("[MQTT] Unreadable relay alert: {}", e),
        }
    }

    fn dispatch_command(&self, payload: &str) -> usize {
        let command = match InboundCommand::parse(payload) {
            Ok(command) => command,
            Err(e) => {
                warn!("[MQTT] Dropping command message: {}", e);
                return 0;
            }
        };
        let Some(endpoint_id) = command.endpoint_id() else {
            warn!("[MQTT] {} command without endpoint id", command.format());
            return 0;
        };

        // Collect first so handlers run without the registry lock held
        let targets: Vec<Arc<CommandHandler>> = self
            .handlers
            .read()
            .values()
            .filter(|h| h.device == endpoint_id)
            .filter_map(|h| match &h.kind {
                HandlerKind::Command(handler) => Some(handler.clone()),
                HandlerKind::State => None,
            })
            .collect();

        if targets.is_empty() {
            debug!("[MQTT] No command node for endpoint {}", endpoint_id);
        }
        for handler in &targets {
            // Failures are logged by the handler
            let _ = handler.command(&command);
        }
        targets.len()
    }

    fn client(&self) -> Result<AsyncClient> {
        if !self.is_connected() {
            return Err(BridgeError::TransportUnavailable);
        }
        self.connection
            .lock()
            .as_ref()
            .map(|c| c.client.clone())
            .ok_or(BridgeError::TransportUnavailable)
    }
}

impl Publisher for TransportSession {
    fn acknowledge(&self, message_id: &str, endpoint_id: &str, success: bool) -> Result<()> {
        let client = self.client()?;
        let topic = topics::response_topic(self.relay_account(), endpoint_id);
        let body = json!({
            "messageId": message_id,
            "success": success,
        });
        debug!("[MQTT] Response on {}: {}", topic, body);
        client.try_publish(topic, QoS::AtMostOnce, false, body.to_string())?;
        Ok(())
    }

    fn update_state(
        &self,
        message_id: &str,
        endpoint_id: &str,
        state: &StatePayload,
        device_name: &str,
    ) -> Result<()> {
        let client = self.client()?;
        let topic = topics::state_topic(self.relay_account(), endpoint_id);
        let body = json!({
            "messageId": message_id,
            "payload": { "state": state },
        });
        info!(
            "{} : sending state update, topic: {} message: {}",
            device_name, topic, body
        );
        client.try_publish(topic, QoS::AtMostOnce, false, body.to_string())?;
        Ok(())
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.get_mut().take() {
            connection.event_loop.abort();
            connection.dispatcher.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CommandNodeConfig, Config};
    use crate::handlers::CommandMessage;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn session() -> Arc<TransportSession> {
        let mut config = Config::default();
        config.account.id = "acct".to_string();
        config.account.username = "alice".to_string();
        // Nothing listens here; the event loop just retries in the background
        config.mqtt.broker_host = "127.0.0.1".to_string();
        config.mqtt.broker_port = Some(1);
        config.mqtt.reconnect_secs = 60;
        TransportSession::new(config.account, config.mqtt)
    }

    fn command_node(
        session: &Arc<TransportSession>,
        id: &str,
        device: &str,
    ) -> (Arc<CommandHandler>, UnboundedReceiver<CommandMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = Arc::new(CommandHandler::new(
            CommandNodeConfig {
                id: id.to_string(),
                name: id.to_string(),
                device: device.to_string(),
                topic: String::new(),
                acknowledge: false,
            },
            "acct",
            session.clone(),
            tx,
        ));
        (handler, rx)
    }

    const TURN_ON_LAMP: &str = r#"{"directive":{"header":{"name":"TurnOn","messageId":"m-1"},"endpoint":{"endpointId":"lamp"},"payload":{}}}"#;

    #[tokio::test]
    async fn test_register_refcounts_connection() {
        let session = session();
        assert_eq!(*session.status().borrow(), ConnectionStatus::Disconnected);

        session.register(RegisteredHandler::state("s1", "lamp"));
        assert_eq!(*session.status().borrow(), ConnectionStatus::Connecting);
        session.register(RegisteredHandler::state("s2", "fan"));
        assert_eq!(session.handler_count(), 2);

        assert!(!session.deregister("s1"));
        assert!(!session.deregister("unknown"));
        assert!(session.deregister("s2"));
        assert_eq!(*session.status().borrow(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_dispatch_matches_endpoint() {
        let session = session();
        let (lamp, mut lamp_rx) = command_node(&session, "c1", "lamp");
        let (fan, mut fan_rx) = command_node(&session, "c2", "fan");
        session.register(RegisteredHandler::command(lamp));
        session.register(RegisteredHandler::command(fan));
        session.register(RegisteredHandler::state("s1", "lamp"));

        assert_eq!(session.dispatch("command/alice/lamp", TURN_ON_LAMP), 1);

        let msg = lamp_rx.try_recv().unwrap();
        assert_eq!(msg.endpoint_id, "lamp");
        assert!(fan_rx.try_recv().is_err());

        session.shutdown();
    }

    #[tokio::test]
    async fn test_dispatch_ignores_other_accounts_and_garbage() {
        let session = session();
        let (lamp, mut lamp_rx) = command_node(&session, "c1", "lamp");
        session.register(RegisteredHandler::command(lamp));

        assert_eq!(session.dispatch("command/bob/lamp", TURN_ON_LAMP), 0);
        assert_eq!(session.dispatch("command/alice/lamp", "{not json"), 0);
        assert_eq!(
            session.dispatch("message/alice/x", r#"{"severity":"warn","message":"skill unlinked"}"#),
            0
        );
        assert!(lamp_rx.try_recv().is_err());

        session.shutdown();
    }

    #[tokio::test]
    async fn test_publish_requires_connection() {
        let session = session();
        let err = session.acknowledge("m-1", "lamp", true).unwrap_err();
        assert!(matches!(err, BridgeError::TransportUnavailable));

        let state = StatePayload::parse(&json!({"power": "ON"})).unwrap();
        let err = session.update_state("u-1", "lamp", &state, "Lamp").unwrap_err();
        assert!(matches!(err, BridgeError::TransportUnavailable));
    }
}

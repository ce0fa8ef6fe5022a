//! Response node: reports the outcome of a command back to the relay.

use crate::error::{BridgeError, Result};
use crate::registry::AccountRegistry;
use crate::transport::Publisher;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Flow message arriving at a response node, usually a [`CommandMessage`]
/// with `acknowledge` set by the flow.
///
/// [`CommandMessage`]: super::CommandMessage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    #[serde(rename = "_messageId", default)]
    pub message_id: Option<String>,
    #[serde(rename = "_endpointId", default)]
    pub endpoint_id: Option<String>,
    #[serde(rename = "_confId", default)]
    pub conf_id: Option<String>,
    #[serde(default)]
    pub acknowledge: Option<Value>,
}

impl ResponseMessage {
    /// Only a literal `true` counts as success.
    pub fn succeeded(&self) -> bool {
        matches!(self.acknowledge, Some(Value::Bool(true)))
    }
}

pub struct AckHandler {
    id: String,
    registry: Arc<AccountRegistry>,
}

impl AckHandler {
    pub fn new(id: impl Into<String>, registry: Arc<AccountRegistry>) -> Self {
        Self {
            id: id.into(),
            registry,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Publish a success or failure response for the command the message
    /// answers. Messages lacking any of the correlation ids are ignored.
    pub fn handle(&self, msg: &ResponseMessage) -> Result<()> {
        let (Some(message_id), Some(endpoint_id), Some(conf_id)) =
            (&msg.message_id, &msg.endpoint_id, &msg.conf_id)
        else {
            debug!("[Command] {}: response without correlation ids ignored", self.id);
            return Ok(());
        };

        let session = self
            .registry
            .get(conf_id)
            .ok_or_else(|| BridgeError::AccountNotFound(conf_id.clone()))?;
        session.acknowledge(message_id, endpoint_id, msg.succeeded())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::directory::DeviceDirectory;
    use serde_json::json;

    fn handler() -> AckHandler {
        let registry = Arc::new(AccountRegistry::new(Arc::new(DeviceDirectory::new())));
        let mut config = Config::default();
        config.account.id = "acct".to_string();
        config.mqtt.broker_host = "127.0.0.1".to_string();
        config.mqtt.broker_port = Some(1);
        registry.configure(config.account, config.mqtt);
        AckHandler::new("r1", registry)
    }

    fn message(value: Value) -> ResponseMessage {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_only_true_is_success() {
        assert!(message(json!({"acknowledge": true})).succeeded());
        assert!(!message(json!({"acknowledge": false})).succeeded());
        assert!(!message(json!({"acknowledge": "true"})).succeeded());
        assert!(!message(json!({})).succeeded());
    }

    #[test]
    fn test_parses_command_message_shape() {
        let msg = message(json!({
            "topic": "lights",
            "_messageId": "m-1",
            "_endpointId": "lamp",
            "_confId": "acct",
            "command": "TurnOn",
            "payload": "ON",
            "acknowledge": true
        }));
        assert_eq!(msg.message_id.as_deref(), Some("m-1"));
        assert_eq!(msg.endpoint_id.as_deref(), Some("lamp"));
        assert_eq!(msg.conf_id.as_deref(), Some("acct"));
    }

    #[tokio::test]
    async fn test_incomplete_message_ignored() {
        let handler = handler();
        let msg = message(json!({"_messageId": "m-1", "acknowledge": true}));
        tokio_test::assert_ok!(handler.handle(&msg));
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let handler = handler();
        let msg = message(json!({
            "_messageId": "m-1", "_endpointId": "lamp", "_confId": "nobody"
        }));
        assert!(matches!(
            handler.handle(&msg).unwrap_err(),
            BridgeError::AccountNotFound(id) if id == "nobody"
        ));
    }

    #[tokio::test]
    async fn test_offline_session_drops_response() {
        let handler = handler();
        let msg = message(json!({
            "_messageId": "m-1", "_endpointId": "lamp", "_confId": "acct", "acknowledge": true
        }));
        assert!(matches!(
            handler.handle(&msg).unwrap_err(),
            BridgeError::TransportUnavailable
        ));
    }
}

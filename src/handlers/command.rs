//! Command node: one device, translated directives out to the user flow.

use crate::config::CommandNodeConfig;
use crate::directive::{Command, InboundCommand};
use crate::error::{BridgeError, Result};
use crate::state::StateInput;
use crate::transport::Publisher;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Internal command message handed to the user flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMessage {
    pub topic: String,
    pub name: String,
    #[serde(rename = "_messageId")]
    pub message_id: Option<String>,
    #[serde(rename = "_endpointId")]
    pub endpoint_id: String,
    #[serde(rename = "_confId")]
    pub conf_id: String,
    pub command: Command,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(rename = "extraInfo", default, skip_serializing_if = "Option::is_none")]
    pub extra_info: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(
        rename = "temperatureScale",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub temperature_scale: Option<String>,
    pub acknowledge: bool,
}

impl CommandMessage {
    /// The same message as a state node sees it when wired straight through.
    pub fn to_state_input(&self) -> StateInput {
        StateInput {
            command: Some(self.command.to_string()),
            payload: self.payload.clone(),
            acknowledge: Some(Value::Bool(self.acknowledge)),
        }
    }
}

pub struct CommandHandler {
    config: CommandNodeConfig,
    conf_id: String,
    publisher: Arc<dyn Publisher>,
    downstream: mpsc::UnboundedSender<CommandMessage>,
}

impl CommandHandler {
    pub fn new(
        config: CommandNodeConfig,
        conf_id: impl Into<String>,
        publisher: Arc<dyn Publisher>,
        downstream: mpsc::UnboundedSender<CommandMessage>,
    ) -> Self {
        Self {
            config,
            conf_id: conf_id.into(),
            publisher,
            downstream,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn device(&self) -> &str {
        &self.config.device
    }

    /// Translate a directive and forward it downstream.
    ///
    /// Unsupported directives are warned about and dropped. With
    /// auto-acknowledge configured, a success response goes out as soon as
    /// the message has been forwarded.
    pub fn command(&self, inbound: &InboundCommand) -> Result<CommandMessage> {
        let translation = match inbound.translate() {
            Ok(t) => t,
            Err(e) => {
                warn!(
                    "[Command] {}: {} command unsupported! ({})",
                    self.config.name,
                    inbound.format(),
                    e
                );
                return Err(e);
            }
        };

        let message = CommandMessage {
            topic: self.config.topic.clone(),
            name: self.config.name.clone(),
            message_id: inbound.message_id().map(str::to_string),
            endpoint_id: inbound
                .device_id()
                .unwrap_or(&self.config.device)
                .to_string(),
            conf_id: self.conf_id.clone(),
            command: translation.command,
            payload: translation.payload,
            extra_info: inbound.extra_info().cloned(),
            params: translation.params,
            temperature_scale: translation.temperature_scale,
            acknowledge: self.config.acknowledge,
        };

        debug!(
            "[Command] {}: {} -> {}",
            self.config.name,
            inbound.vendor_command().unwrap_or("?"),
            message.command
        );

        if self.downstream.send(message.clone()).is_err() {
            warn!("[Command] {}: downstream flow closed", self.config.name);
            return Err(BridgeError::FlowClosed);
        }

        if self.config.acknowledge
            && let Some(message_id) = &message.message_id
            && let Err(e) = self
                .publisher
                .acknowledge(message_id, &self.config.device, true)
        {
            debug!("[Command] {}: acknowledge dropped: {}", self.config.name, e);
        }

        Ok(message)
    }
}

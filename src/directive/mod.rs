//! Command translation for inbound relay messages.
//!
//! The relay forwards either Alexa directives or Google Home executions on
//! `command/{account}/{device}`. Both are mapped onto the same internal
//! [`Command`] vocabulary plus a raw payload for the user flow.

pub mod alexa;
mod command;
pub mod google;

pub use alexa::AlexaDirective;
pub use command::Command;
pub use google::GoogleExecution;

use crate::error::{BridgeError, Result};
use serde_json::Value;
use strum::Display;

/// Internal `(command, payload)` pair produced from a vendor directive.
#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub command: Command,
    pub payload: Option<Value>,
    /// Raw Google Home params, passed through for the user flow.
    pub params: Option<Value>,
    /// Scale of thermostat setpoints (Alexa only).
    pub temperature_scale: Option<String>,
}

impl Translation {
    pub(crate) fn new(command: Command, payload: impl Into<Value>) -> Self {
        Self {
            command,
            payload: Some(payload.into()),
            params: None,
            temperature_scale: None,
        }
    }

    /// A command whose payload is the command name itself.
    pub(crate) fn named(command: Command) -> Self {
        Self::new(command, command.to_string())
    }

    pub(crate) fn bare(command: Command) -> Self {
        Self {
            command,
            payload: None,
            params: None,
            temperature_scale: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DirectiveFormat {
    #[strum(serialize = "Alexa")]
    Alexa,
    #[strum(serialize = "Google Home")]
    GoogleHome,
}

/// A parsed message from the `command/` topic.
#[derive(Debug, Clone)]
pub enum InboundCommand {
    Alexa(AlexaDirective),
    Google(GoogleExecution),
}

impl InboundCommand {
    pub fn parse(body: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(body)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        if value.get("directive").is_some() {
            Ok(InboundCommand::Alexa(serde_json::from_value(value)?))
        } else if value.get("execution").is_some() {
            Ok(InboundCommand::Google(serde_json::from_value(value)?))
        } else {
            Err(BridgeError::InvalidDirective(
                "message has neither 'directive' nor 'execution'".to_string(),
            ))
        }
    }

    pub fn format(&self) -> DirectiveFormat {
        match self {
            InboundCommand::Alexa(_) => DirectiveFormat::Alexa,
            InboundCommand::Google(_) => DirectiveFormat::GoogleHome,
        }
    }

    /// Device the command is addressed to; used for handler dispatch.
    pub fn endpoint_id(&self) -> Option<&str> {
        match self {
            InboundCommand::Alexa(d) => Some(d.directive.endpoint.endpoint_id.as_str()),
            InboundCommand::Google(g) => g.endpoint_id(),
        }
    }

    /// Device reported to the flow as `_endpointId`. For Google this is the
    /// first listed device, falling back to the dispatch id.
    pub fn device_id(&self) -> Option<&str> {
        match self {
            InboundCommand::Alexa(d) => Some(d.directive.endpoint.endpoint_id.as_str()),
            InboundCommand::Google(g) => g.device_id().or_else(|| g.endpoint_id()),
        }
    }

    /// Id the relay expects back on `response/`.
    pub fn message_id(&self) -> Option<&str> {
        match self {
            InboundCommand::Alexa(d) => d.directive.header.message_id.as_deref(),
            InboundCommand::Google(g) => g.request_id.as_deref(),
        }
    }

    /// Opaque endpoint cookie (Alexa only).
    pub fn extra_info(&self) -> Option<&Value> {
        match self {
            InboundCommand::Alexa(d) => d.directive.endpoint.cookie.as_ref(),
            InboundCommand::Google(_) => None,
        }
    }

    /// Vendor name of the command, before translation.
    pub fn vendor_command(&self) -> Option<&str> {
        match self {
            InboundCommand::Alexa(d) => Some(d.directive.header.name.as_str()),
            InboundCommand::Google(g) => g.first_command().map(|c| c.command.as_str()),
        }
    }

    pub fn translate(&self) -> Result<Translation> {
        match self {
            InboundCommand::Alexa(d) => alexa::translate(&d.directive),
            InboundCommand::Google(g) => google::translate(g),
        }
    }
}

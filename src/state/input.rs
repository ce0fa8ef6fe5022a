//! Messages arriving at a state node.
//!
//! A state node accepts either a message produced by a command node
//! (`command` + raw `payload`) or a hand-built `{payload: {state: {...}}}`
//! message from the user flow.

use crate::directive::Command;
use crate::error::StateRejection;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Only a literal `true` counts; anything else is passed through so the
    /// state node can reject it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledge: Option<Value>,
}

impl StateInput {
    /// Direct state report from the user flow.
    pub fn state(state: Value) -> Self {
        Self {
            command: None,
            payload: Some(json!({ "state": state })),
            acknowledge: None,
        }
    }

    /// Message as emitted by a command node.
    pub fn from_command(command: Command, payload: Value, acknowledge: bool) -> Self {
        Self {
            command: Some(command.to_string()),
            payload: Some(payload),
            acknowledge: Some(Value::Bool(acknowledge)),
        }
    }

    pub fn acknowledged(&self) -> bool {
        matches!(self.acknowledge, Some(Value::Bool(true)))
    }
}

/// Result of normalising a [`StateInput`].
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    /// A `state` object ready for validation.
    State {
        state: Value,
        /// Derived from a relay command; always reported back.
        from_command: bool,
    },
    /// Transport-control command with nothing to report.
    Stateless(Command),
}

pub fn normalize(input: &StateInput) -> Result<Normalized, StateRejection> {
    let Some(name) = input.command.as_deref() else {
        return direct_state(input);
    };

    let command: Command = name
        .parse()
        .map_err(|_| StateRejection::UnsupportedCommand(name.to_string()))?;
    if command.is_stateless() {
        return Ok(Normalized::Stateless(command));
    }

    let raw = input.payload.clone().ok_or(StateRejection::MissingPayload)?;
    let state = command_state(command, raw)?;
    if !input.acknowledged() {
        return Err(StateRejection::MissingAcknowledge);
    }

    Ok(Normalized::State {
        state,
        from_command: true,
    })
}

/// Messages without a command count as acknowledged, whatever the flow set.
fn direct_state(input: &StateInput) -> Result<Normalized, StateRejection> {
    let payload = input.payload.as_ref().ok_or(StateRejection::MissingPayload)?;
    let state = payload
        .get("state")
        .filter(|s| !s.is_null())
        .ok_or(StateRejection::MissingState)?;
    Ok(Normalized::State {
        state: state.clone(),
        from_command: false,
    })
}

fn command_state(command: Command, raw: Value) -> Result<Value, StateRejection> {
    let state = match command {
        Command::AdjustPercentage => json!({ "percentageDelta": raw }),
        Command::AdjustTargetTemperature => json!({ "targetSetpointDelta": raw }),
        Command::AdjustVolume => json!({ "volumeDelta": raw }),
        Command::AdjustRangeValue => json!({ "rangeValueDelta": raw }),
        Command::Lock => json!({ "lock": "LOCKED" }),
        Command::Unlock => json!({ "lock": "UNLOCKED" }),
        Command::SetBrightness => json!({ "brightness": raw }),
        Command::SetColor => json!({
            "colorHue": raw.get("hue"),
            "colorSaturation": raw.get("saturation"),
            "colorBrightness": raw.get("brightness"),
        }),
        Command::SetColorTemperature => json!({ "colorTemperature": raw }),
        Command::SelectInput => json!({ "input": raw }),
        Command::SetMode => json!({ "mode": raw }),
        Command::SetMute => json!({ "mute": raw }),
        Command::SetPercentage => json!({ "percentage": raw }),
        Command::SetRangeValue => json!({ "rangeValue": raw }),
        Command::SetTargetTemperature => json!({ "thermostatSetPoint": raw }),
        Command::SetThermostatMode => json!({ "thermostatMode": raw }),
        Command::SetVolume => json!({ "volume": raw }),
        Command::TurnOn | Command::TurnOff => json!({ "power": raw }),
        other => return Err(StateRejection::UnsupportedCommand(other.to_string())),
    };
    Ok(state)
}

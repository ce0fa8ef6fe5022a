//! Alexa Smart Home directive translation.

use super::{Command, Translation};
use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlexaDirective {
    pub directive: Directive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Directive {
    pub header: Header,
    pub endpoint: Endpoint,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub endpoint_id: String,
    #[serde(default)]
    pub cookie: Option<Value>,
}

/// Look up a JSON pointer in the directive payload.
fn field(directive: &Directive, pointer: &str) -> Result<Value> {
    match directive.payload.pointer(pointer) {
        Some(Value::Null) | None => Err(BridgeError::InvalidDirective(format!(
            "{} directive missing payload{}",
            directive.header.name, pointer
        ))),
        Some(v) => Ok(v.clone()),
    }
}

fn optional(directive: &Directive, pointer: &str) -> Option<Value> {
    directive
        .payload
        .pointer(pointer)
        .filter(|v| !v.is_null())
        .cloned()
}

pub fn translate(directive: &Directive) -> Result<Translation> {
    let name = directive.header.name.as_str();
    let command: Command = name
        .parse()
        .map_err(|_| BridgeError::UnsupportedCommand(name.to_string()))?;

    let translation = match command {
        Command::Activate => Translation::new(command, "ON"),
        Command::AdjustBrightness => Translation::new(command, field(directive, "/brightnessDelta")?),
        Command::AdjustPercentage => Translation::new(command, field(directive, "/percentageDelta")?),
        Command::AdjustRangeValue => Translation::new(command, field(directive, "/rangeValueDelta")?),
        Command::AdjustTargetTemperature => Translation {
            temperature_scale: optional(directive, "/targetSetpointDelta/scale")
                .and_then(|v| v.as_str().map(str::to_string)),
            ..Translation::new(command, field(directive, "/targetSetpointDelta/value")?)
        },
        Command::AdjustVolume => {
            // StepSpeaker sends volumeSteps, Speaker sends volume
            let steps = optional(directive, "/volumeSteps")
                .or_else(|| optional(directive, "/volume"))
                .ok_or_else(|| {
                    BridgeError::InvalidDirective(
                        "AdjustVolume directive missing volumeSteps/volume".to_string(),
                    )
                })?;
            Translation::new(command, steps)
        }
        Command::ChangeChannel => {
            let channel = optional(directive, "/channel/number")
                .or_else(|| optional(directive, "/channelMetadata/name"))
                .ok_or_else(|| {
                    BridgeError::InvalidDirective(
                        "ChangeChannel directive missing channel number/name".to_string(),
                    )
                })?;
            Translation::new(command, channel)
        }
        Command::DecreaseColorTemperature
        | Command::FastForward
        | Command::IncreaseColorTemperature
        | Command::Lock
        | Command::Next
        | Command::Pause
        | Command::Play
        | Command::Previous
        | Command::Rewind
        | Command::StartOver
        | Command::Stop
        | Command::Unlock => Translation::named(command),
        Command::SelectInput => Translation::new(command, field(directive, "/input")?),
        Command::SetBrightness => Translation::new(command, field(directive, "/brightness")?),
        Command::SetColor => Translation::new(command, field(directive, "/color")?),
        Command::SetColorTemperature => {
            Translation::new(command, field(directive, "/colorTemperatureInKelvin")?)
        }
        Command::SetMode => Translation::new(command, field(directive, "/mode")?),
        Command::SetMute => {
            let mute = field(directive, "/mute")?.as_bool().ok_or_else(|| {
                BridgeError::InvalidDirective("SetMute expects a boolean mute".to_string())
            })?;
            Translation::new(command, if mute { "ON" } else { "OFF" })
        }
        Command::SetPercentage => Translation::new(command, field(directive, "/percentage")?),
        Command::SetRangeValue => Translation::new(command, field(directive, "/rangeValue")?),
        Command::SetTargetTemperature => Translation {
            temperature_scale: optional(directive, "/targetSetpoint/scale")
                .and_then(|v| v.as_str().map(str::to_string)),
            ..Translation::new(command, field(directive, "/targetSetpoint/value")?)
        },
        Command::SetThermostatMode => {
            Translation::new(command, field(directive, "/thermostatMode/value")?)
        }
        Command::SetVolume => Translation::new(command, field(directive, "/volume")?),
        Command::TurnOn => Translation::new(command, "ON"),
        Command::TurnOff => Translation::new(command, "OFF"),
        Command::Resume => return Err(BridgeError::UnsupportedCommand(name.to_string())),
    };

    Ok(translation)
}

//! Google Home execution translation.

use super::{Command, Translation};
use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

const PREFIX: &str = "action.devices.commands.";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleExecution {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    pub execution: Execution,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    #[serde(default)]
    pub devices: Vec<ExecutionDevice>,
    #[serde(default)]
    pub execution: Vec<ExecutionCommand>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionDevice {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionCommand {
    pub command: String,
    #[serde(default)]
    pub params: Value,
}

impl GoogleExecution {
    pub fn endpoint_id(&self) -> Option<&str> {
        self.id
            .as_deref()
            .or_else(|| self.execution.devices.first().map(|d| d.id.as_str()))
    }

    /// First device of the execution; this is what the flow sees as
    /// `_endpointId`, which may differ from the dispatch `id`.
    pub fn device_id(&self) -> Option<&str> {
        self.execution.devices.first().map(|d| d.id.as_str())
    }

    pub fn first_command(&self) -> Option<&ExecutionCommand> {
        self.execution.execution.first()
    }
}

fn unsupported(command: &str) -> BridgeError {
    BridgeError::UnsupportedCommand(command.to_string())
}

pub fn translate(execution: &GoogleExecution) -> Result<Translation> {
    let exec = execution.first_command().ok_or_else(|| {
        BridgeError::InvalidDirective("execution carries no command".to_string())
    })?;
    let params = &exec.params;
    let name = exec.command.strip_prefix(PREFIX).unwrap_or(&exec.command);
    let param = |key: &str| params.get(key).filter(|v| !v.is_null()).cloned();

    let translation = match name {
        "ActivateScene" => Translation::new(Command::Activate, "ON"),
        "BrightnessAbsolute" => {
            let brightness = param("brightness").ok_or_else(|| unsupported(&exec.command))?;
            Translation::new(Command::SetBrightness, brightness)
        }
        "ColorAbsolute" => {
            let color = params.get("color").ok_or_else(|| unsupported(&exec.command))?;
            if let Some(hsv) = color.get("spectrumHSV") {
                Translation::new(
                    Command::SetColor,
                    json!({
                        "hue": hsv.get("hue"),
                        "saturation": hsv.get("saturation"),
                        "brightness": hsv.get("value"),
                    }),
                )
            } else if let Some(temperature) = color.get("temperature") {
                Translation::new(Command::SetColorTemperature, temperature.clone())
            } else {
                return Err(unsupported(&exec.command));
            }
        }
        "LockUnlock" => match params.get("lock").and_then(Value::as_bool) {
            Some(true) => Translation::named(Command::Lock),
            Some(false) => Translation::named(Command::Unlock),
            None => return Err(unsupported(&exec.command)),
        },
        "mediaPause" => Translation::bare(Command::Pause),
        "mediaResume" => Translation::bare(Command::Play),
        "mediaNext" => Translation::bare(Command::Next),
        "mediaPrevious" => Translation::bare(Command::Previous),
        "mediaStop" => Translation::bare(Command::Stop),
        "mediaSeekRelative" => {
            let offset = params
                .get("relativePositionMs")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            if offset < 0.0 {
                Translation::bare(Command::Rewind)
            } else if offset > 0.0 {
                Translation::bare(Command::FastForward)
            } else {
                return Err(unsupported(&exec.command));
            }
        }
        "mediaSeekToPosition" => match params.get("absPositionMs").and_then(Value::as_f64) {
            Some(p) if p == 0.0 => Translation::bare(Command::StartOver),
            _ => return Err(unsupported(&exec.command)),
        },
        "OnOff" => match params.get("on").and_then(Value::as_bool) {
            Some(true) => Translation::new(Command::TurnOn, "ON"),
            Some(false) => Translation::new(Command::TurnOff, "OFF"),
            None => return Err(unsupported(&exec.command)),
        },
        "OpenClose" => {
            let percent = param("openPercent").ok_or_else(|| unsupported(&exec.command))?;
            Translation::new(Command::SetRangeValue, percent)
        }
        "SetFanSpeed" => {
            let speed = param("fanSpeed").ok_or_else(|| unsupported(&exec.command))?;
            Translation::new(Command::SetRangeValue, speed)
        }
        "setVolume" => {
            let level = param("volumeLevel").ok_or_else(|| unsupported(&exec.command))?;
            Translation::new(Command::SetVolume, level)
        }
        "ThermostatTemperatureSetpoint" => {
            let setpoint = param("thermostatTemperatureSetpoint")
                .ok_or_else(|| unsupported(&exec.command))?;
            Translation::new(Command::SetTargetTemperature, setpoint)
        }
        "ThermostatSetMode" => {
            let mode = params
                .get("thermostatMode")
                .and_then(Value::as_str)
                .ok_or_else(|| unsupported(&exec.command))?;
            Translation::new(Command::SetThermostatMode, mode.to_uppercase())
        }
        "volumeRelative" => {
            let level = param("volumeRelativeLevel").ok_or_else(|| unsupported(&exec.command))?;
            Translation::new(Command::AdjustVolume, level)
        }
        _ => return Err(unsupported(&exec.command)),
    };

    Ok(Translation {
        params: Some(params.clone()),
        ..translation
    })
}

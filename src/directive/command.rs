use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Internal command vocabulary shared by both directive formats.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    AsRefStr,
    EnumString,
    Serialize,
    Deserialize,
)]
pub enum Command {
    Activate,
    AdjustBrightness,
    AdjustPercentage,
    AdjustRangeValue,
    AdjustTargetTemperature,
    AdjustVolume,
    ChangeChannel,
    DecreaseColorTemperature,
    FastForward,
    IncreaseColorTemperature,
    Lock,
    Next,
    Pause,
    Play,
    Previous,
    Resume,
    Rewind,
    SelectInput,
    SetBrightness,
    SetColor,
    SetColorTemperature,
    SetMode,
    SetMute,
    SetPercentage,
    SetRangeValue,
    SetTargetTemperature,
    SetThermostatMode,
    SetVolume,
    StartOver,
    Stop,
    TurnOff,
    TurnOn,
    Unlock,
}

impl Command {
    /// Transport controls that carry no device state to report.
    pub fn is_stateless(self) -> bool {
        matches!(
            self,
            Command::Play
                | Command::Resume
                | Command::Pause
                | Command::FastForward
                | Command::Rewind
                | Command::Previous
                | Command::Next
                | Command::StartOver
                | Command::Stop
        )
    }
}

//! Recognized state fields and their validation rules.
//!
//! A state payload is parsed once into a [`StatePayload`], a map from
//! [`FieldTag`] to a typed [`StateField`]. The ordered tag set doubles as the
//! coalescing group key ([`FieldShape`]).

use crate::error::StateRejection;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::str::FromStr;
use strum::{AsRefStr, Display, EnumString};

/// Identifies one recognized state field. The colour triple is a single tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, AsRefStr)]
#[strum(serialize_all = "camelCase")]
pub enum FieldTag {
    Brightness,
    Color,
    ColorTemperature,
    Contact,
    Input,
    Lock,
    Mode,
    Motion,
    Mute,
    Percentage,
    PercentageDelta,
    Playback,
    Power,
    RangeValue,
    RangeValueDelta,
    TargetSetpointDelta,
    Temperature,
    ThermostatMode,
    ThermostatSetPoint,
    Volume,
    VolumeDelta,
}

impl FieldTag {
    /// Relative adjustments that may legitimately repeat ("nudge again").
    pub fn is_delta(self) -> bool {
        matches!(
            self,
            FieldTag::PercentageDelta | FieldTag::TargetSetpointDelta | FieldTag::VolumeDelta
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DetectionState {
    Detected,
    NotDetected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LockState {
    Locked,
    Unlocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PowerState {
    On,
    Off,
}

/// Hue in degrees, saturation and brightness as fractions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hsb {
    pub hue: f64,
    pub saturation: f64,
    pub brightness: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StateField {
    Brightness(f64),
    Color(Hsb),
    ColorTemperature(f64),
    Contact(DetectionState),
    Input(String),
    Lock(LockState),
    Mode(String),
    Motion(DetectionState),
    Mute(bool),
    Percentage(f64),
    PercentageDelta(f64),
    Playback(String),
    Power(PowerState),
    RangeValue(f64),
    RangeValueDelta(f64),
    TargetSetpointDelta(f64),
    Temperature(f64),
    ThermostatMode(String),
    ThermostatSetPoint(f64),
    Volume(f64),
    VolumeDelta(f64),
}

impl StateField {
    pub fn tag(&self) -> FieldTag {
        match self {
            StateField::Brightness(_) => FieldTag::Brightness,
            StateField::Color(_) => FieldTag::Color,
            StateField::ColorTemperature(_) => FieldTag::ColorTemperature,
            StateField::Contact(_) => FieldTag::Contact,
            StateField::Input(_) => FieldTag::Input,
            StateField::Lock(_) => FieldTag::Lock,
            StateField::Mode(_) => FieldTag::Mode,
            StateField::Motion(_) => FieldTag::Motion,
            StateField::Mute(_) => FieldTag::Mute,
            StateField::Percentage(_) => FieldTag::Percentage,
            StateField::PercentageDelta(_) => FieldTag::PercentageDelta,
            StateField::Playback(_) => FieldTag::Playback,
            StateField::Power(_) => FieldTag::Power,
            StateField::RangeValue(_) => FieldTag::RangeValue,
            StateField::RangeValueDelta(_) => FieldTag::RangeValueDelta,
            StateField::TargetSetpointDelta(_) => FieldTag::TargetSetpointDelta,
            StateField::Temperature(_) => FieldTag::Temperature,
            StateField::ThermostatMode(_) => FieldTag::ThermostatMode,
            StateField::ThermostatSetPoint(_) => FieldTag::ThermostatSetPoint,
            StateField::Volume(_) => FieldTag::Volume,
            StateField::VolumeDelta(_) => FieldTag::VolumeDelta,
        }
    }

    /// Parse a single (non-colour) wire field.
    fn parse(key: &str, value: &Value) -> Result<Self, StateRejection> {
        let field = match key {
            "brightness" => StateField::Brightness(number(key, value, Some((0.0, 100.0)))?),
            "colorTemperature" => {
                StateField::ColorTemperature(number(key, value, Some((0.0, 10000.0)))?)
            }
            "contact" => StateField::Contact(keyword(key, value)?),
            "input" => StateField::Input(string(key, value)?),
            "lock" => StateField::Lock(keyword(key, value)?),
            "mode" => StateField::Mode(string(key, value)?),
            "motion" => StateField::Motion(keyword(key, value)?),
            "mute" => StateField::Mute(mute(value)?),
            "percentage" => StateField::Percentage(number(key, value, Some((0.0, 100.0)))?),
            "percentageDelta" => {
                StateField::PercentageDelta(number(key, value, Some((-100.0, 100.0)))?)
            }
            "playback" => StateField::Playback(string(key, value)?),
            "power" => StateField::Power(keyword(key, value)?),
            "rangeValue" => StateField::RangeValue(number(key, value, None)?),
            "rangeValueDelta" => StateField::RangeValueDelta(number(key, value, None)?),
            "targetSetpointDelta" => StateField::TargetSetpointDelta(number(key, value, None)?),
            "temperature" => StateField::Temperature(number(key, value, None)?),
            "thermostatMode" => StateField::ThermostatMode(string(key, value)?),
            "thermostatSetPoint" => StateField::ThermostatSetPoint(number(key, value, None)?),
            "volume" => StateField::Volume(number(key, value, None)?),
            "volumeDelta" => StateField::VolumeDelta(number(key, value, None)?),
            other => {
                return Err(StateRejection::invalid(other, "unrecognized state field"));
            }
        };
        Ok(field)
    }
}

fn number(key: &str, value: &Value, range: Option<(f64, f64)>) -> Result<f64, StateRejection> {
    let n = value
        .as_f64()
        .ok_or_else(|| StateRejection::invalid(key, "expected a number"))?;
    if let Some((min, max)) = range
        && !(min..=max).contains(&n)
    {
        return Err(StateRejection::invalid(
            key,
            format!("{} outside range {}..={}", n, min, max),
        ));
    }
    Ok(n)
}

fn string(key: &str, value: &Value) -> Result<String, StateRejection> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| StateRejection::invalid(key, "expected a string"))
}

fn keyword<T: FromStr>(key: &str, value: &Value) -> Result<T, StateRejection> {
    let s = value
        .as_str()
        .ok_or_else(|| StateRejection::invalid(key, "expected a string"))?;
    s.parse()
        .map_err(|_| StateRejection::invalid(key, format!("unexpected value '{}'", s)))
}

fn mute(value: &Value) -> Result<bool, StateRejection> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s == "ON" => Ok(true),
        Value::String(s) if s == "OFF" => Ok(false),
        _ => Err(StateRejection::invalid("mute", "expected \"ON\" or \"OFF\"")),
    }
}

/// Write whole numbers without a trailing `.0`.
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

/// Ordered set of the fields present in a payload.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldShape(Vec<FieldTag>);

impl FieldShape {
    pub fn tags(&self) -> &[FieldTag] {
        &self.0
    }
}

impl std::fmt::Display for FieldShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.tags().iter().map(|t| t.to_string()).collect();
        write!(f, "[{}]", names.join(","))
    }
}

/// A validated, sparse device state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatePayload {
    fields: BTreeMap<FieldTag, StateField>,
}

impl StatePayload {
    /// Validate the `state` object of a state-node message.
    pub fn parse(state: &Value) -> Result<Self, StateRejection> {
        let object = match state {
            Value::Object(object) => object,
            Value::Null => return Err(StateRejection::MissingState),
            _ => return Err(StateRejection::invalid("state", "expected an object")),
        };
        Self::from_object(object)
    }

    fn from_object(object: &Map<String, Value>) -> Result<Self, StateRejection> {
        let mut fields = BTreeMap::new();
        let (mut hue, mut saturation, mut brightness) = (None, None, None);

        for (key, value) in object {
            match key.as_str() {
                "colorHue" => hue = Some(number(key, value, Some((0.0, 360.0)))?),
                "colorSaturation" => saturation = Some(number(key, value, Some((0.0, 1.0)))?),
                "colorBrightness" => brightness = Some(number(key, value, Some((0.0, 1.0)))?),
                _ => {
                    let field = StateField::parse(key, value)?;
                    fields.insert(field.tag(), field);
                }
            }
        }

        match (hue, saturation, brightness) {
            (None, None, None) => {}
            (Some(hue), Some(saturation), Some(brightness)) => {
                if fields.contains_key(&FieldTag::ColorTemperature) {
                    return Err(StateRejection::ConflictingColorFields);
                }
                fields.insert(
                    FieldTag::Color,
                    StateField::Color(Hsb {
                        hue,
                        saturation,
                        brightness,
                    }),
                );
            }
            _ => {
                return Err(StateRejection::invalid(
                    "color",
                    "colorHue, colorSaturation and colorBrightness must be sent together",
                ));
            }
        }

        if fields.is_empty() {
            return Err(StateRejection::invalid("state", "no state fields present"));
        }

        Ok(Self { fields })
    }

    pub fn shape(&self) -> FieldShape {
        FieldShape(self.fields.keys().copied().collect())
    }

    /// True when any relative-adjustment field is present.
    pub fn has_delta(&self) -> bool {
        self.fields.keys().any(|tag| tag.is_delta())
    }

    pub fn get(&self, tag: FieldTag) -> Option<&StateField> {
        self.fields.get(&tag)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl Serialize for StatePayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut entries = self.fields.len();
        if self.fields.contains_key(&FieldTag::Color) {
            entries += 2;
        }
        let mut map = serializer.serialize_map(Some(entries))?;
        for (tag, field) in &self.fields {
            let key: &str = tag.as_ref();
            match field {
                StateField::Color(hsb) => {
                    map.serialize_entry("colorHue", &number_value(hsb.hue))?;
                    map.serialize_entry("colorSaturation", &number_value(hsb.saturation))?;
                    map.serialize_entry("colorBrightness", &number_value(hsb.brightness))?;
                }
                StateField::Contact(v) | StateField::Motion(v) => {
                    map.serialize_entry(key, &v.to_string())?
                }
                StateField::Lock(v) => map.serialize_entry(key, &v.to_string())?,
                StateField::Power(v) => map.serialize_entry(key, &v.to_string())?,
                StateField::Mute(v) => map.serialize_entry(key, v)?,
                StateField::Input(s)
                | StateField::Mode(s)
                | StateField::Playback(s)
                | StateField::ThermostatMode(s) => map.serialize_entry(key, s)?,
                StateField::Brightness(n)
                | StateField::ColorTemperature(n)
                | StateField::Percentage(n)
                | StateField::PercentageDelta(n)
                | StateField::RangeValue(n)
                | StateField::RangeValueDelta(n)
                | StateField::TargetSetpointDelta(n)
                | StateField::Temperature(n)
                | StateField::ThermostatSetPoint(n)
                | StateField::Volume(n)
                | StateField::VolumeDelta(n) => map.serialize_entry(key, &number_value(*n))?,
            }
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_power_and_brightness() {
        let payload = StatePayload::parse(&json!({"power": "ON", "brightness": 42})).unwrap();
        assert_eq!(payload.len(), 2);
        assert_eq!(
            payload.get(FieldTag::Power),
            Some(&StateField::Power(PowerState::On))
        );
        assert_eq!(
            payload.get(FieldTag::Brightness),
            Some(&StateField::Brightness(42.0))
        );
    }

    #[test]
    fn test_brightness_out_of_range_rejected() {
        let err = StatePayload::parse(&json!({"brightness": 150})).unwrap_err();
        assert!(matches!(err, StateRejection::InvalidFieldType { ref field, .. } if field == "brightness"));
    }

    #[test]
    fn test_string_where_number_expected_rejected() {
        let err = StatePayload::parse(&json!({"volume": "11"})).unwrap_err();
        assert!(matches!(err, StateRejection::InvalidFieldType { ref field, .. } if field == "volume"));
    }

    #[test]
    fn test_enum_fields_validate_values() {
        assert!(StatePayload::parse(&json!({"contact": "DETECTED"})).is_ok());
        assert!(StatePayload::parse(&json!({"motion": "NOT_DETECTED"})).is_ok());
        assert!(StatePayload::parse(&json!({"lock": "UNLOCKED"})).is_ok());
        assert!(StatePayload::parse(&json!({"lock": "AJAR"})).is_err());
        assert!(StatePayload::parse(&json!({"power": "on"})).is_err());
    }

    #[test]
    fn test_mute_normalized_to_bool() {
        let payload = StatePayload::parse(&json!({"mute": "ON"})).unwrap();
        assert_eq!(payload.get(FieldTag::Mute), Some(&StateField::Mute(true)));
        assert_eq!(payload.to_json(), json!({"mute": true}));

        let payload = StatePayload::parse(&json!({"mute": false})).unwrap();
        assert_eq!(payload.get(FieldTag::Mute), Some(&StateField::Mute(false)));
    }

    #[test]
    fn test_color_triple_collapses_to_one_tag() {
        let payload = StatePayload::parse(
            &json!({"colorHue": 120, "colorSaturation": 0.5, "colorBrightness": 1}),
        )
        .unwrap();
        assert_eq!(payload.shape().tags(), &[FieldTag::Color]);
        assert_eq!(
            payload.to_json(),
            json!({"colorHue": 120, "colorSaturation": 0.5, "colorBrightness": 1})
        );
    }

    #[test]
    fn test_partial_color_rejected() {
        let err = StatePayload::parse(&json!({"colorHue": 120, "colorSaturation": 0.5})).unwrap_err();
        assert!(matches!(err, StateRejection::InvalidFieldType { ref field, .. } if field == "color"));
    }

    #[test]
    fn test_color_and_temperature_conflict() {
        let err = StatePayload::parse(&json!({
            "colorHue": 10,
            "colorSaturation": 0.5,
            "colorBrightness": 0.5,
            "colorTemperature": 3000
        }))
        .unwrap_err();
        assert_eq!(err, StateRejection::ConflictingColorFields);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = StatePayload::parse(&json!({"sparkle": 1})).unwrap_err();
        assert!(matches!(err, StateRejection::InvalidFieldType { ref field, .. } if field == "sparkle"));
    }

    #[test]
    fn test_empty_and_missing_state() {
        assert!(StatePayload::parse(&json!({})).is_err());
        assert_eq!(
            StatePayload::parse(&Value::Null).unwrap_err(),
            StateRejection::MissingState
        );
    }

    #[test]
    fn test_shape_is_order_independent() {
        let a = StatePayload::parse(&json!({"power": "ON", "brightness": 10})).unwrap();
        let b = StatePayload::parse(&json!({"brightness": 90, "power": "OFF"})).unwrap();
        assert_eq!(a.shape(), b.shape());
        assert_eq!(a.shape().to_string(), "[brightness,power]");
    }

    #[test]
    fn test_delta_detection() {
        assert!(StatePayload::parse(&json!({"volumeDelta": 5})).unwrap().has_delta());
        assert!(StatePayload::parse(&json!({"percentageDelta": -5, "power": "ON"})).unwrap().has_delta());
        assert!(!StatePayload::parse(&json!({"rangeValueDelta": 5})).unwrap().has_delta());
    }

    #[test]
    fn test_fractional_numbers_preserved() {
        let payload = StatePayload::parse(&json!({"temperature": 21.5, "thermostatSetPoint": 22})).unwrap();
        assert_eq!(payload.to_json(), json!({"temperature": 21.5, "thermostatSetPoint": 22}));
    }
}

//! Wire vocabulary shared by the device and the console.
//!
//! Telemetry and indicator reports are small JSON objects carrying one value
//! field and an integer Unix timestamp. Control commands are bare text tokens.

use serde::Serialize;
use std::fmt;

/// Upper bound of the green band, exclusive.
pub const YELLOW_FROM: f64 = 25.0;
/// Upper bound of the yellow band, inclusive.
pub const RED_ABOVE: f64 = 30.0;

/// State of the tri-colour indicator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IndicatorState {
    #[default]
    Off,
    Red,
    Yellow,
    Green,
}

impl IndicatorState {
    /// Threshold rule applied by the device when no override is active.
    pub fn from_temperature(temperature: f64) -> Self {
        if temperature > RED_ABOVE {
            IndicatorState::Red
        } else if temperature >= YELLOW_FROM {
            IndicatorState::Yellow
        } else {
            IndicatorState::Green
        }
    }

    /// Lenient parse used by the console; unknown labels display as `Off`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "RED" => IndicatorState::Red,
            "YELLOW" => IndicatorState::Yellow,
            "GREEN" => IndicatorState::Green,
            _ => IndicatorState::Off,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            IndicatorState::Off => "OFF",
            IndicatorState::Red => "RED",
            IndicatorState::Yellow => "YELLOW",
            IndicatorState::Green => "GREEN",
        }
    }

    /// Background hue the console paints for this state.
    pub fn hue(&self) -> &'static str {
        match self {
            IndicatorState::Red => "#e84118",
            IndicatorState::Yellow => "#fbc531",
            IndicatorState::Green => "#4cd137",
            IndicatorState::Off => "#f5f6fa",
        }
    }
}

impl fmt::Display for IndicatorState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Override directive carried on the control topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Return to automatic thresholding
    On,
    /// Force the indicator off and suspend thresholding
    Off,
}

impl ControlCommand {
    /// Case-insensitive parse; anything other than `on`/`off` is `None`.
    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim();
        if token.eq_ignore_ascii_case("on") {
            Some(ControlCommand::On)
        } else if token.eq_ignore_ascii_case("off") {
            Some(ControlCommand::Off)
        } else {
            None
        }
    }

    /// Token the console puts on the wire.
    pub fn token(&self) -> &'static str {
        match self {
            ControlCommand::On => "ON",
            ControlCommand::Off => "OFF",
        }
    }
}

impl From<bool> for ControlCommand {
    fn from(on: bool) -> Self {
        if on {
            ControlCommand::On
        } else {
            ControlCommand::Off
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemperatureReport {
    pub temperature: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HumidityReport {
    pub humidity: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorReport {
    pub led: IndicatorState,
    pub timestamp: i64,
}

/// Current Unix time in whole seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

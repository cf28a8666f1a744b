//! Collaborator interfaces of the device controller.
//!
//! The physical sensor, the indicator outputs and the network link live outside
//! the control logic. They are reached through the three traits below; the
//! simulated implementations let the device run on a host without hardware.

use tracing::{debug, info};

use crate::config::DeviceSettings;
use crate::telemetry::IndicatorState;

/// One successful measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub temperature: f64,
    pub humidity: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("Sensor did not respond: {0}")]
    NoResponse(String),

    #[error("Sensor returned invalid data: {0}")]
    InvalidData(String),
}

pub trait Sensor: Send {
    fn measure(&mut self) -> Result<Reading, SensorError>;
}

/// Discrete outputs driven by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lamp {
    Red,
    Yellow,
    Green,
    /// Lit while automatic thresholding is active
    Mode,
}

impl Lamp {
    pub const INDICATORS: [Lamp; 3] = [Lamp::Red, Lamp::Yellow, Lamp::Green];

    /// The indicator lamp that represents `state`, if any.
    pub fn for_state(state: IndicatorState) -> Option<Lamp> {
        match state {
            IndicatorState::Red => Some(Lamp::Red),
            IndicatorState::Yellow => Some(Lamp::Yellow),
            IndicatorState::Green => Some(Lamp::Green),
            IndicatorState::Off => None,
        }
    }

    fn index(self) -> usize {
        match self {
            Lamp::Red => 0,
            Lamp::Yellow => 1,
            Lamp::Green => 2,
            Lamp::Mode => 3,
        }
    }
}

pub trait Actuator: Send {
    fn set(&mut self, lamp: Lamp, on: bool);
}

pub trait LinkMonitor: Send {
    fn is_up(&self) -> bool;
}

/// Link monitor for hosts whose network is managed elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysUp;

impl LinkMonitor for AlwaysUp {
    fn is_up(&self) -> bool {
        true
    }
}

/// Sensor that sweeps slowly through all three temperature bands.
///
/// With `fail_every = Some(n)` every n-th measurement fails, which exercises
/// the skipped-cycle path.
#[derive(Debug, Default)]
pub struct SimulatedSensor {
    tick: u32,
    fail_every: Option<u32>,
}

impl SimulatedSensor {
    const PERIOD: u32 = 40;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failures(fail_every: u32) -> Self {
        SimulatedSensor {
            tick: 0,
            fail_every: Some(fail_every.max(1)),
        }
    }

    /// Sensor honouring `[device] simulate_failure_every`.
    pub fn from_settings(settings: &DeviceSettings) -> Self {
        match settings.simulate_failure_every {
            Some(n) => Self::with_failures(n),
            None => Self::new(),
        }
    }
}

impl Sensor for SimulatedSensor {
    fn measure(&mut self) -> Result<Reading, SensorError> {
        self.tick = self.tick.wrapping_add(1);

        if let Some(n) = self.fail_every {
            if self.tick % n == 0 {
                return Err(SensorError::NoResponse(format!(
                    "simulated timeout on read {}",
                    self.tick
                )));
            }
        }

        let phase = self.tick % Self::PERIOD;
        let ramp = f64::from(if phase < Self::PERIOD / 2 {
            phase
        } else {
            Self::PERIOD - phase
        });

        Ok(Reading {
            temperature: 20.0 + ramp * 0.75,
            humidity: 70.0 - ramp * 0.5,
        })
    }
}

/// Actuator that only records and logs lamp changes.
#[derive(Debug, Default, Clone)]
pub struct LogActuator {
    lamps: [bool; 4],
}

impl Actuator for LogActuator {
    fn set(&mut self, lamp: Lamp, on: bool) {
        let slot = &mut self.lamps[lamp.index()];
        if *slot != on {
            info!("Lamp {:?} -> {}", lamp, if on { "on" } else { "off" });
        } else {
            debug!("Lamp {:?} unchanged", lamp);
        }
        *slot = on;
    }
}

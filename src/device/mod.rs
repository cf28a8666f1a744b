//! Device side: sensing, threshold logic and override handling
//!
//! Implements the sensing endpoint as one control task:
//!
//! 1. [`hardware`] - Sensor, lamp outputs and link collaborators
//! 2. [`device_controller`] - Cycle state machine and control-message handling
//!
//! # Architecture
//!
//! ```text
//! Sensor ──► DeviceController ──► Broker (temperature, humidity, led status)
//!                  ▲   │
//!   control inbox ─┘   └──► Lamps (red / yellow / green / mode)
//! ```
//!
//! The gateway's network task only forwards control messages into the inbox;
//! all state changes happen on the controller task.

pub mod device_controller;
#[cfg(feature = "gpio")]
pub mod gpio;
pub mod hardware;

pub use device_controller::{
    control_inbox, CycleOutcome, DeviceController, DeviceError, DeviceHardware,
};
pub use hardware::{
    Actuator, AlwaysUp, Lamp, LinkMonitor, LogActuator, Reading, Sensor, SensorError,
    SimulatedSensor,
};

//! # thermolink
//!
//! Telemetry-and-control link between a sensing device and an operator
//! console over an MQTT broker. The device measures temperature and humidity,
//! derives a tri-colour indicator state from fixed thresholds and publishes
//! all three; the console keeps a bounded history, redraws it periodically and
//! can force the device's indicator off.
//!
//! ```text
//! DeviceController ─► MqttGateway ─► broker ─► MqttGateway ─► ConsoleController
//!        ▲                                                          │
//!        └──────────── led control ◄── broker ◄─────────────────────┘
//! ```

pub mod config;
pub mod console;
pub mod device;
pub mod mqtt;
pub mod telemetry;

#[cfg(test)]
mod scenarios;
#[cfg(test)]
mod testing;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

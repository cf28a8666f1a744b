//! Operator console: bounded telemetry history, redraw timer, override commands
//!
//! ```text
//! Broker ──► ConsoleInbox ──► ConsoleView ◄── refresh task ──► Dashboard
//!   ▲
//!   └──────── ConsoleController::send_indicator_command
//! ```

pub mod console_controller;
pub mod dashboard;
pub mod telemetry_buffer;

pub use console_controller::{ConsoleController, ConsoleInbox, ConsoleView};
pub use dashboard::{axis_range, Dashboard, LogDashboard};
pub use telemetry_buffer::{TelemetrySeries, TemperaturePoint, HISTORY_CAPACITY};

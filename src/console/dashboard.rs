//! Rendering collaborator of the console.
//!
//! Chart and widget drawing live outside this crate; the console only hands
//! the current series and indicator to a [`Dashboard`]. [`LogDashboard`] is the
//! headless renderer used by the binary.

use tracing::{debug, info};

use super::telemetry_buffer::TemperaturePoint;
use crate::telemetry::IndicatorState;

pub trait Dashboard: Send + 'static {
    /// Called with a non-empty temperature series, oldest first.
    fn render_temperature(&mut self, points: &[TemperaturePoint]);

    /// Called with a non-empty humidity series, oldest first.
    fn render_humidity(&mut self, values: &[f64]);

    fn show_indicator(&mut self, state: IndicatorState, hue: &'static str);

    /// Releases rendering resources. Called once, during shutdown.
    fn close(&mut self);
}

/// Y-axis limits for a series: one unit of padding around min and max.
pub fn axis_range(values: impl IntoIterator<Item = f64>) -> Option<(f64, f64)> {
    values.into_iter().fold(None, |range, v| match range {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
    .map(|(lo, hi)| (lo - 1.0, hi + 1.0))
}

pub struct LogDashboard {
    title: String,
    indicator: Option<IndicatorState>,
    closed: bool,
}

impl LogDashboard {
    pub fn new(title: impl Into<String>) -> Self {
        let title = title.into();
        info!("Dashboard \"{}\" ready", title);
        LogDashboard {
            title,
            indicator: None,
            closed: false,
        }
    }
}

impl Dashboard for LogDashboard {
    fn render_temperature(&mut self, points: &[TemperaturePoint]) {
        if let (Some(last), Some((lo, hi))) =
            (points.last(), axis_range(points.iter().map(|p| p.value)))
        {
            debug!(
                "[{}] temperature: {} samples, latest {:.2}°C at {}, axis {:.1}..{:.1}",
                self.title,
                points.len(),
                last.value,
                last.time,
                lo,
                hi
            );
        }
    }

    fn render_humidity(&mut self, values: &[f64]) {
        if let (Some(last), Some((lo, hi))) = (values.last(), axis_range(values.iter().copied())) {
            debug!(
                "[{}] humidity: {} samples, latest {:.2}%, axis {:.1}..{:.1}",
                self.title,
                values.len(),
                last,
                lo,
                hi
            );
        }
    }

    fn show_indicator(&mut self, state: IndicatorState, hue: &'static str) {
        if self.indicator != Some(state) {
            info!("[{}] indicator {} ({})", self.title, state, hue);
            self.indicator = Some(state);
        }
    }

    fn close(&mut self) {
        if !self.closed {
            info!("[{}] dashboard closed", self.title);
            self.closed = true;
        }
    }
}

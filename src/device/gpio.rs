//! Raspberry Pi GPIO backend for the indicator outputs.

use rppal::gpio::{Gpio, OutputPin};
use tracing::info;

use super::hardware::{Actuator, Lamp};

/// BCM pin numbers of the four outputs.
#[derive(Debug, Clone, Copy)]
pub struct IndicatorPins {
    pub red: u8,
    pub yellow: u8,
    pub green: u8,
    pub mode: u8,
}

impl Default for IndicatorPins {
    fn default() -> Self {
        IndicatorPins {
            red: 18,
            yellow: 19,
            green: 20,
            mode: 22,
        }
    }
}

pub struct GpioActuator {
    red: OutputPin,
    yellow: OutputPin,
    green: OutputPin,
    mode: OutputPin,
}

impl GpioActuator {
    /// Claims the pins and drives them all low.
    pub fn new(pins: IndicatorPins) -> Result<Self, rppal::gpio::Error> {
        let gpio = Gpio::new()?;
        info!("Claiming indicator pins {:?}", pins);
        Ok(GpioActuator {
            red: gpio.get(pins.red)?.into_output_low(),
            yellow: gpio.get(pins.yellow)?.into_output_low(),
            green: gpio.get(pins.green)?.into_output_low(),
            mode: gpio.get(pins.mode)?.into_output_low(),
        })
    }
}

impl Actuator for GpioActuator {
    fn set(&mut self, lamp: Lamp, on: bool) {
        let pin = match lamp {
            Lamp::Red => &mut self.red,
            Lamp::Yellow => &mut self.yellow,
            Lamp::Green => &mut self.green,
            Lamp::Mode => &mut self.mode,
        };
        if on {
            pin.set_high();
        } else {
            pin.set_low();
        }
    }
}

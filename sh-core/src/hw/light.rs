//! Light sensor with its auxiliary threshold line
//!
//! Every read drives the auxiliary GPIO from a fixed threshold. Which level
//! means "dark" depends on the board revision, so the polarity is a setting.

use std::sync::Arc;
use tracing::{debug, warn};

use super::adc::AnalogReader;
use super::gpio::{Direction, GpioLines};
use crate::constants::adc;

pub struct LightSensor {
    adc: Arc<dyn AnalogReader>,
    gpio: Arc<dyn GpioLines>,
    channel: u8,
    aux_pin: u32,
    threshold: i32,
    aux_active_when_dark: bool,
}

impl LightSensor {
    pub fn new(
        adc: Arc<dyn AnalogReader>,
        gpio: Arc<dyn GpioLines>,
        channel: u8,
        aux_pin: u32,
        threshold: i32,
        aux_active_when_dark: bool,
    ) -> Self {
        Self {
            adc,
            gpio,
            channel,
            aux_pin,
            threshold,
            aux_active_when_dark,
        }
    }

    /// Export the auxiliary line as an output, initially low
    pub fn configure(&self) {
        let pin = self.aux_pin;
        let result = self
            .gpio
            .export_line(pin)
            .and_then(|_| self.gpio.set_direction(pin, Direction::Out))
            .and_then(|_| self.gpio.write_line(pin, false));
        if let Err(e) = result {
            warn!(pin, error = %e, "Auxiliary line setup failed");
        }
    }

    /// Level for the auxiliary line at a given reading
    pub fn aux_level(&self, reading: i32) -> bool {
        let bright = reading > self.threshold;
        if self.aux_active_when_dark {
            !bright
        } else {
            bright
        }
    }

    /// Raw ADC count, or `adc::UNAVAILABLE` without a bus.
    ///
    /// The auxiliary line is only driven for real readings.
    pub fn read(&self) -> i32 {
        let reading = self.adc.read_channel(self.channel);
        if reading == adc::UNAVAILABLE {
            return reading;
        }

        let level = self.aux_level(reading);
        if let Err(e) = self.gpio.write_line(self.aux_pin, level) {
            warn!(pin = self.aux_pin, error = %e, "Auxiliary line write failed");
        }
        debug!(reading, aux_high = level, "Light sensor read");
        reading
    }
}

//! Three-segment fan curve
//!
//! - below the low threshold the fan is off
//! - above the high threshold it runs at full duty
//! - in between, duty rises linearly from the minimum duty to full scale

use crate::constants::fan as fan_const;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FanCurve {
    low_c: f64,
    high_c: f64,
    min_duty: u8,
}

impl Default for FanCurve {
    fn default() -> Self {
        Self::new(fan_const::LOW_THRESHOLD_C, fan_const::HIGH_THRESHOLD_C, fan_const::MIN_DUTY)
    }
}

impl FanCurve {
    /// `low_c` must be below `high_c`; settings validation enforces this
    pub fn new(low_c: f64, high_c: f64, min_duty: u8) -> Self {
        Self { low_c, high_c, min_duty }
    }

    /// Target duty for a temperature in °C
    pub fn target(&self, temp_c: f64) -> u8 {
        if !temp_c.is_finite() {
            return fan_const::MAX_DUTY;
        }
        if temp_c < self.low_c {
            return 0;
        }
        if temp_c > self.high_c {
            return fan_const::MAX_DUTY;
        }

        let span = (fan_const::MAX_DUTY - self.min_duty) as f64;
        let step = ((temp_c - self.low_c) * span / (self.high_c - self.low_c)).floor();
        (self.min_duty as f64 + step).clamp(0.0, fan_const::MAX_DUTY as f64) as u8
    }
}

//! Thermal zone reads and fan PWM writes
//!
//! # PWM Values
//!
//! The pwm-fan driver accepts a decimal duty from 0 to 255:
//! - 0 = fan off
//! - 255 = full speed
//!
//! # Temperature Values
//!
//! The thermal zone reports millidegrees Celsius as decimal text.

use crate::error::{Result, SmartHomeError};
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::temperature;

/// Write a PWM duty (0-255)
pub fn set_pwm_value(pwm_path: &Path, value: u8) -> Result<()> {
    fs::write(pwm_path, value.to_string()).map_err(|e| SmartHomeError::PwmWrite {
        path: pwm_path.to_path_buf(),
        reason: format!("Failed to write PWM value {}: {}", value, e),
    })
}

/// Read the current PWM duty back from the driver
pub fn read_pwm_value(pwm_path: &Path) -> Result<u8> {
    let content = fs::read_to_string(pwm_path).map_err(|e| SmartHomeError::FileRead {
        path: pwm_path.to_path_buf(),
        source: e,
    })?;

    content.trim().parse::<u8>().map_err(|e| SmartHomeError::PwmWrite {
        path: pwm_path.to_path_buf(),
        reason: format!("Unreadable duty '{}': {}", content.trim(), e),
    })
}

/// Read a thermal zone in degrees Celsius
pub fn read_temperature(temp_path: &Path) -> Result<f64> {
    let content = fs::read_to_string(temp_path).map_err(|e| SmartHomeError::TemperatureRead {
        path: temp_path.to_path_buf(),
        reason: format!("Failed to read: {}", e),
    })?;

    let millidegrees = content.trim().parse::<f64>().map_err(|e| SmartHomeError::TemperatureRead {
        path: temp_path.to_path_buf(),
        reason: format!("Failed to parse '{}': {}", content.trim(), e),
    })?;

    let celsius = millidegrees / temperature::MILLIDEGREE_DIVISOR;
    if !celsius.is_finite() {
        return Err(SmartHomeError::TemperatureRead {
            path: temp_path.to_path_buf(),
            reason: "non-finite reading".into(),
        });
    }
    Ok(celsius)
}

/// Sink for fan duty writes
#[cfg_attr(test, mockall::automock)]
pub trait PwmOutput: Send + Sync {
    fn write_pwm(&self, value: u8) -> Result<()>;
}

/// pwm-fan `target_pwm` attribute
#[derive(Debug, Clone)]
pub struct SysfsPwm {
    path: PathBuf,
}

impl SysfsPwm {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PwmOutput for SysfsPwm {
    fn write_pwm(&self, value: u8) -> Result<()> {
        set_pwm_value(&self.path, value)
    }
}

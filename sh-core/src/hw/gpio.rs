//! sysfs GPIO lines
//!
//! Lines live under a root directory (normally `/sys/class/gpio`) with one
//! `gpioN` subtree per exported pin. Export is skipped when the subtree is
//! already present, and a short settle delay follows a real export because the
//! kernel creates `direction`/`value` asynchronously.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::constants::gpio as gpio_const;
use crate::error::{Result, SmartHomeError};

/// Line direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    fn as_sysfs(self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

/// Digital line access used by the LED bank and the light sensor
#[cfg_attr(test, mockall::automock)]
pub trait GpioLines: Send + Sync {
    fn export_line(&self, pin: u32) -> Result<()>;
    fn set_direction(&self, pin: u32, direction: Direction) -> Result<()>;
    fn write_line(&self, pin: u32, high: bool) -> Result<()>;
}

/// GPIO through the sysfs pseudo-files
#[derive(Debug, Clone)]
pub struct SysfsGpio {
    root: PathBuf,
    settle: Duration,
}

impl Default for SysfsGpio {
    fn default() -> Self {
        Self::new(crate::constants::paths::GPIO_ROOT, gpio_const::EXPORT_SETTLE)
    }
}

impl SysfsGpio {
    pub fn new(root: impl Into<PathBuf>, settle: Duration) -> Self {
        Self {
            root: root.into(),
            settle,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn pin_dir(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{}", pin))
    }

    pub fn is_exported(&self, pin: u32) -> bool {
        self.pin_dir(pin).is_dir()
    }

    /// Release a line; no-op when it was never exported
    pub fn unexport_line(&self, pin: u32) -> Result<()> {
        if !self.is_exported(pin) {
            return Ok(());
        }
        fs::write(self.root.join("unexport"), pin.to_string())
            .map_err(|e| SmartHomeError::gpio(pin, "unexport", e.to_string()))
    }

    /// Export, set output and drive an initial level, logging any failure
    pub fn setup_output(&self, pin: u32, initial_high: bool) {
        let result = self
            .export_line(pin)
            .and_then(|_| self.set_direction(pin, Direction::Out))
            .and_then(|_| self.write_line(pin, initial_high));

        match result {
            Ok(()) => debug!(pin, "GPIO line configured as output"),
            Err(e) => warn!(pin, error = %e, "GPIO setup failed, line left unconfigured"),
        }
    }
}

impl GpioLines for SysfsGpio {
    fn export_line(&self, pin: u32) -> Result<()> {
        if self.is_exported(pin) {
            return Ok(());
        }

        fs::write(self.root.join("export"), pin.to_string())
            .map_err(|e| SmartHomeError::gpio(pin, "export", e.to_string()))?;

        if !self.settle.is_zero() {
            std::thread::sleep(self.settle);
        }
        Ok(())
    }

    fn set_direction(&self, pin: u32, direction: Direction) -> Result<()> {
        fs::write(self.pin_dir(pin).join("direction"), direction.as_sysfs())
            .map_err(|e| SmartHomeError::gpio(pin, "direction", e.to_string()))
    }

    fn write_line(&self, pin: u32, high: bool) -> Result<()> {
        let level = if high { "1" } else { "0" };
        fs::write(self.pin_dir(pin).join("value"), level)
            .map_err(|e| SmartHomeError::gpio(pin, "write", e.to_string()))
    }
}

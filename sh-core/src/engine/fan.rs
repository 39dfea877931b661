//! Fan state and PWM decisions
//!
//! Auto mode follows the curve and writes only when the target differs from
//! the last duty that reached the hardware. Manual mode writes immediately and
//! the control loop leaves it alone until Auto is selected again.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::curve::FanCurve;
use crate::hw::PwmOutput;
use sh_protocol::{SystemStatus, PWM_MAX};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanMode {
    Auto,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FanState {
    pub mode: FanMode,
    pub current_pwm: u8,
    pub current_temp: f64,
    /// Last duty successfully written; `None` until the first write
    pub last_written: Option<u8>,
}

impl Default for FanState {
    fn default() -> Self {
        Self {
            mode: FanMode::Auto,
            current_pwm: 0,
            current_temp: 0.0,
            last_written: None,
        }
    }
}

pub struct FanController {
    output: Arc<dyn PwmOutput>,
    curve: FanCurve,
    state: Mutex<FanState>,
    // Serializes hardware writes so a tick and a manual set cannot interleave.
    write_lock: Mutex<()>,
}

impl FanController {
    pub fn new(output: Arc<dyn PwmOutput>, curve: FanCurve) -> Self {
        Self {
            output,
            curve,
            state: Mutex::new(FanState::default()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn state(&self) -> FanState {
        *self.state.lock()
    }

    pub fn status(&self) -> SystemStatus {
        let s = self.state();
        SystemStatus {
            cpu_temp: s.current_temp,
            fan_speed: s.current_pwm,
            is_auto_fan: s.mode == FanMode::Auto,
        }
    }

    /// One control tick with a fresh temperature reading.
    ///
    /// Returns the duty written, if any.
    pub fn update(&self, temp_c: f64) -> Option<u8> {
        let _io = self.write_lock.lock();

        let (target, last) = {
            let mut state = self.state.lock();
            state.current_temp = temp_c;
            if state.mode != FanMode::Auto {
                return None;
            }
            (self.curve.target(temp_c), state.last_written)
        };

        if last == Some(target) {
            return None;
        }

        match self.output.write_pwm(target) {
            Ok(()) => {
                let mut state = self.state.lock();
                state.last_written = Some(target);
                state.current_pwm = target;
                debug!(temp_c, pwm = target, "Fan duty updated");
                Some(target)
            }
            Err(e) => {
                warn!(temp_c, pwm = target, error = %e, "Fan PWM write failed, retrying next tick");
                None
            }
        }
    }

    /// Switch to manual and write `pwm` (clamped to 0-255) right away
    pub fn set_manual(&self, pwm: i32) -> u8 {
        let value = pwm.clamp(0, PWM_MAX as i32) as u8;
        let _io = self.write_lock.lock();

        self.state.lock().mode = FanMode::Manual;

        match self.output.write_pwm(value) {
            Ok(()) => {
                let mut state = self.state.lock();
                state.last_written = Some(value);
                state.current_pwm = value;
                info!(requested = pwm, pwm = value, "Manual fan duty set");
            }
            Err(e) => warn!(pwm = value, error = %e, "Manual fan write failed"),
        }
        value
    }

    /// Return to curve control; the next tick converges the duty
    pub fn set_auto(&self) {
        self.state.lock().mode = FanMode::Auto;
        info!("Fan returned to automatic control");
    }
}

//! Hardware interaction modules
//!
//! - `gpio` - sysfs GPIO lines (export, direction, value)
//! - `adc` - MCP3008 analog reads over spidev
//! - `control` - thermal zone reads and fan PWM writes
//! - `leds` - the four-channel LED bank and blink sequences
//! - `light` - light sensor reading with the auxiliary threshold line

pub mod adc;
pub mod control;
pub mod gpio;
pub mod leds;
pub mod light;

pub use adc::{AnalogReader, Mcp3008};
pub use control::{read_temperature, set_pwm_value, PwmOutput, SysfsPwm};
pub use gpio::{Direction, GpioLines, SysfsGpio};
pub use leds::LedBank;
pub use light::LightSensor;

const IOC_WRITE: u32 = 1;
const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = 8;
const IOC_SIZESHIFT: u32 = 16;
const IOC_DIRSHIFT: u32 = 30;

/// Linux `_IOW(ty, nr, size)` request code
pub const fn iow(ty: u8, nr: u8, size: usize) -> u32 {
    (IOC_WRITE << IOC_DIRSHIFT)
        | ((size as u32) << IOC_SIZESHIFT)
        | ((ty as u32) << IOC_TYPESHIFT)
        | ((nr as u32) << IOC_NRSHIFT)
}

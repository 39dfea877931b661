//! Smart-home core library
//!
//! Hardware access and background engines for a single embedded Linux board.
//!
//! # Module Structure
//!
//! - `hw/` - sysfs GPIO lines, the MCP3008 ADC, LEDs, light sensor, fan PWM
//! - `engine/` - fan curve and fan controller
//! - `camera/` - capture thread, person detection, latest-frame store
//! - `blackbox/` - kernel blackbox log device bridge
//! - `sensors` - push fan-out for MQTT/serial sensor readings
//! - `state` - the `SmartHome` surface handed to the HTTP/push layer
//!
//! # Example
//!
//! ```no_run
//! use sh_core::{load_settings, Hardware, SmartHome};
//!
//! let settings = load_settings().unwrap_or_default();
//! let home = SmartHome::new(Hardware::open(&settings), &settings);
//! home.configure_lines();
//! home.set_led(2, true);
//! ```

pub use sh_error as error;

// Grouped modules
pub mod blackbox;
pub mod camera;
pub mod engine;
pub mod hw;

// Standalone modules
pub mod auth;
pub mod constants;
pub mod sensors;
pub mod settings;
pub mod shutdown;
pub mod state;

pub use auth::AuthToken;
pub use blackbox::{Blackbox, BlackboxDevice, CharDevice};
pub use camera::{CameraPipeline, CameraStatus, CaptureTiming, FrameSnapshot, FrameStore, PipelineState};
pub use engine::{FanController, FanCurve, FanMode, FanState};
pub use hw::{read_temperature, AnalogReader, GpioLines, LedBank, LightSensor, Mcp3008, PwmOutput, SysfsGpio, SysfsPwm};
pub use sensors::{parse_payload, CommandSink, LinkState, LinkStatus, SensorHub};
pub use settings::{load_settings, load_settings_from, AppSettings};
pub use shutdown::Shutdown;
pub use state::{Hardware, SmartHome};

//! Constants and configuration defaults
//!
//! Centralizes pins, kernel paths, thresholds and timings.
//! Settings loaded from disk start from these values; nothing else hardcodes them.

use std::time::Duration;

/// Fixed kernel and device paths
pub mod paths {
    /// sysfs GPIO root (export/unexport plus one gpioN subtree per pin)
    pub const GPIO_ROOT: &str = "/sys/class/gpio";

    /// CPU thermal zone, millidegrees Celsius as decimal text
    pub const THERMAL_ZONE: &str = "/sys/devices/virtual/thermal/thermal_zone0/temp";

    /// pwm-fan target duty, accepts decimal 0-255
    pub const FAN_PWM: &str = "/sys/devices/pwm-fan/target_pwm";

    /// SPI bus 3, chip-select 0 (MCP3008)
    pub const SPI_DEVICE: &str = "/dev/spidev3.0";

    /// Blackbox logging character device
    pub const BLACKBOX_DEVICE: &str = "/dev/blackbox";

    /// Bluetooth RFCOMM serial link to the ESP32 node
    pub const SERIAL_DEVICE: &str = "/dev/rfcomm0";

    /// System-wide settings file
    pub const SYSTEM_CONFIG: &str = "/etc/smarthome/settings.json";

    /// Environment variable overriding the settings path
    pub const CONFIG_ENV: &str = "SMARTHOME_CONFIG";

    /// Request/response socket for the HTTP layer
    pub const CONTROL_SOCKET: &str = "/run/smarthome.sock";

    /// Push event socket (one JSON line per event)
    pub const EVENT_SOCKET: &str = "/run/smarthome-events.sock";

    /// User configuration directory fallback (~/.config/smarthome)
    pub fn user_config_dir() -> Option<std::path::PathBuf> {
        dirs::config_dir().map(|p| p.join("smarthome"))
    }
}

/// GPIO pin assignments and timings
pub mod gpio {
    use super::*;

    /// LED channels 1..=4 in order
    pub const LED_PINS: [u32; 4] = [396, 466, 397, 255];

    /// Line driven from the light sensor threshold
    pub const AUX_PIN: u32 = 388;

    /// sysfs entries are not writable immediately after export
    pub const EXPORT_SETTLE: Duration = Duration::from_millis(100);

    /// LED boards on this host sink current: logical "on" drives the line low
    pub const LED_ACTIVE_LOW: bool = true;
}

/// SPI ADC (MCP3008) parameters
pub mod adc {
    /// SPI clock
    pub const CLOCK_HZ: u32 = 1_000_000;

    /// SPI mode 0 (CPOL=0, CPHA=0)
    pub const SPI_MODE: u8 = 0;

    /// Light sensor channel
    pub const LIGHT_CHANNEL: u8 = 0;

    /// MCP3008 has 8 single-ended channels
    pub const CHANNEL_COUNT: u8 = 8;

    /// 10-bit converter
    pub const MAX_READING: i32 = 1023;

    /// Returned when the bus was never initialized or a transfer failed
    pub const UNAVAILABLE: i32 = -1;

    /// Readings above this are "bright"
    pub const LIGHT_THRESHOLD: i32 = 600;
}

/// Fan control loop
pub mod fan {
    use super::*;

    /// Control loop tick
    pub const TICK_INTERVAL: Duration = Duration::from_secs(2);

    /// Below this the fan is off (°C)
    pub const LOW_THRESHOLD_C: f64 = 40.0;

    /// Above this the fan runs at full duty (°C)
    pub const HIGH_THRESHOLD_C: f64 = 70.0;

    /// Duty at the low end of the linear band
    pub const MIN_DUTY: u8 = 50;

    /// Full-scale duty
    pub const MAX_DUTY: u8 = 255;
}

/// Temperature constants
pub mod temperature {
    /// Thermal zone readings are in millidegrees
    pub const MILLIDEGREE_DIVISOR: f64 = 1000.0;
}

/// Camera capture and detection
pub mod camera {
    use super::*;

    /// Device indices probed in order
    pub const CANDIDATE_INDICES: [u32; 2] = [0, 1];

    /// Requested capture geometry
    pub const FRAME_WIDTH: u32 = 640;
    pub const FRAME_HEIGHT: u32 = 480;
    pub const FRAME_RATE: u32 = 30;

    /// Sleep after every loop iteration (~30 fps)
    pub const FRAME_INTERVAL: Duration = Duration::from_millis(30);

    /// Extra back-off after a failed read
    pub const READ_FAILURE_BACKOFF: Duration = Duration::from_millis(100);

    /// JPEG quality for served frames
    pub const JPEG_QUALITY: u8 = 70;

    /// Accelerated model artifacts (Caffe SSD face detector)
    pub const MODEL_PROTOTXT: &str = "deploy.prototxt";
    pub const MODEL_WEIGHTS: &str = "res10_300x300_ssd_iter_140000.caffemodel";

    /// Classic cascade artifact
    pub const CASCADE_XML: &str = "haarcascade_frontalface_default.xml";

    /// Minimum confidence counted as a person (accelerated path)
    pub const CONFIDENCE_THRESHOLD: f32 = 0.5;

    /// Model input size and mean subtraction for the SSD detector
    pub const MODEL_INPUT_SIZE: u32 = 300;
    pub const MODEL_MEAN_BGR: [f64; 3] = [104.0, 177.0, 123.0];

    /// Cascade detection policy
    pub const CASCADE_SCALE_FACTOR: f64 = 1.1;
    pub const CASCADE_MIN_NEIGHBORS: i32 = 5;
    pub const CASCADE_MIN_SIZE: u32 = 30;

    /// Annotation box stroke in pixels
    pub const BOX_THICKNESS: u32 = 2;
}

/// Blackbox character device contract
pub mod blackbox {
    /// Password field width (bytes)
    pub const PASSWORD_LEN: usize = 20;

    /// ioctl payload: password + i32 result
    pub const AUTH_DATA_SIZE: usize = PASSWORD_LEN + 4;

    /// Full record: password + i32 result + i64 timestamp
    pub const RECORD_SIZE: usize = PASSWORD_LEN + 4 + 8;

    /// Records requested per bulk read (kernel ring holds 100)
    pub const MAX_RECORDS: usize = 100;

    /// ioctl magic and command number
    pub const IOCTL_MAGIC: u8 = b'k';
    pub const IOCTL_WRITE_LOG_NR: u8 = 1;

    /// Kernel log tag searched by the message view
    pub const KERNEL_LOG_TAG: &str = "BlackBox";

    /// Kernel message lines returned at most
    pub const MAX_KERNEL_MESSAGES: usize = 100;
}

/// Authorization flag
pub mod auth {
    use super::*;

    /// Lifetime of a presence-triggered authorization
    pub const TOKEN_TTL: Duration = Duration::from_secs(30);
}

/// Sensor ingestion workers
pub mod ingest {
    use super::*;

    /// Delay before reconnecting a dropped link
    pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

    /// Read timeout; expiry means "no data this cycle"
    pub const READ_TIMEOUT: Duration = Duration::from_secs(1);

    /// Idle gap between serial reads
    pub const SERIAL_POLL_GAP: Duration = Duration::from_millis(10);

    /// Push fan-out capacity; slow subscribers lose the oldest events
    pub const PUSH_CAPACITY: usize = 64;

    /// Serial link speed
    pub const SERIAL_BAUD: u32 = 115_200;

    /// MQTT broker and topics
    pub const MQTT_HOST: &str = "localhost";
    pub const MQTT_PORT: u16 = 1883;
    pub const MQTT_CLIENT_ID: &str = "smarthomed";
    pub const MQTT_SENSOR_TOPIC: &str = "home/sensor/livingroom";
    pub const MQTT_COMMAND_TOPIC: &str = "home/command/livingroom";
    pub const MQTT_KEEP_ALIVE: Duration = Duration::from_secs(60);

    /// Clock sync cadence toward the ESP32 node
    pub const CLOCK_SYNC_INTERVAL: Duration = Duration::from_secs(1);
}

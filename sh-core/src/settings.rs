//! Daemon Settings
//!
//! JSON settings resolved from `$SMARTHOME_CONFIG`, `/etc/smarthome/settings.json`
//! or `~/.config/smarthome/settings.json`. Every field has a default matching the
//! fixed board conventions in [`crate::constants`], so a missing file is not an error.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::constants::{self, paths};
use crate::error::{Result, SmartHomeError};

/// Top-level settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppSettings {
    #[serde(default)]
    pub gpio: GpioSettings,
    #[serde(default)]
    pub adc: AdcSettings,
    #[serde(default)]
    pub fan: FanSettings,
    #[serde(default)]
    pub camera: CameraSettings,
    #[serde(default)]
    pub blackbox: BlackboxSettings,
    #[serde(default)]
    pub mqtt: MqttSettings,
    #[serde(default)]
    pub serial: SerialSettings,
    #[serde(default)]
    pub auth: AuthSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GpioSettings {
    #[serde(default = "default_gpio_root")]
    pub root: PathBuf,
    #[serde(default = "default_led_pins")]
    pub led_pins: [u32; 4],
    #[serde(default = "default_aux_pin")]
    pub aux_pin: u32,
    /// Logical "on" drives the LED line low
    #[serde(default = "default_led_active_low")]
    pub led_active_low: bool,
    /// Drive the auxiliary line high when the light reading is at or below threshold.
    /// Board revisions disagree on this, so it is a setting rather than a constant.
    #[serde(default = "default_true")]
    pub aux_active_when_dark: bool,
    #[serde(default = "default_settle_ms")]
    pub export_settle_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdcSettings {
    #[serde(default = "default_spi_device")]
    pub spi_device: PathBuf,
    #[serde(default = "default_spi_clock")]
    pub clock_hz: u32,
    #[serde(default = "default_light_channel")]
    pub light_channel: u8,
    #[serde(default = "default_light_threshold")]
    pub light_threshold: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FanSettings {
    #[serde(default = "default_thermal_path")]
    pub thermal_path: PathBuf,
    #[serde(default = "default_pwm_path")]
    pub pwm_path: PathBuf,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_low_c")]
    pub low_threshold_c: f64,
    #[serde(default = "default_high_c")]
    pub high_threshold_c: f64,
    #[serde(default = "default_min_duty")]
    pub min_duty: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CameraSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_camera_indices")]
    pub indices: Vec<u32>,
    /// Directory holding model and cascade artifacts
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlackboxSettings {
    #[serde(default = "default_blackbox_device")]
    pub device: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_mqtt_client_id")]
    pub client_id: String,
    #[serde(default = "default_sensor_topic")]
    pub sensor_topic: String,
    #[serde(default = "default_command_topic")]
    pub command_topic: String,
    /// Publish `TIME:HH:MM:SS` to the command topic every second
    #[serde(default = "default_true")]
    pub clock_sync: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SerialSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_serial_device")]
    pub device: PathBuf,
    #[serde(default = "default_serial_baud")]
    pub baud: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthSettings {
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
}

fn default_true() -> bool { true }
fn default_gpio_root() -> PathBuf { PathBuf::from(paths::GPIO_ROOT) }
fn default_led_pins() -> [u32; 4] { constants::gpio::LED_PINS }
fn default_aux_pin() -> u32 { constants::gpio::AUX_PIN }
fn default_led_active_low() -> bool { constants::gpio::LED_ACTIVE_LOW }
fn default_settle_ms() -> u64 { constants::gpio::EXPORT_SETTLE.as_millis() as u64 }
fn default_spi_device() -> PathBuf { PathBuf::from(paths::SPI_DEVICE) }
fn default_spi_clock() -> u32 { constants::adc::CLOCK_HZ }
fn default_light_channel() -> u8 { constants::adc::LIGHT_CHANNEL }
fn default_light_threshold() -> i32 { constants::adc::LIGHT_THRESHOLD }
fn default_thermal_path() -> PathBuf { PathBuf::from(paths::THERMAL_ZONE) }
fn default_pwm_path() -> PathBuf { PathBuf::from(paths::FAN_PWM) }
fn default_tick_ms() -> u64 { constants::fan::TICK_INTERVAL.as_millis() as u64 }
fn default_low_c() -> f64 { constants::fan::LOW_THRESHOLD_C }
fn default_high_c() -> f64 { constants::fan::HIGH_THRESHOLD_C }
fn default_min_duty() -> u8 { constants::fan::MIN_DUTY }
fn default_camera_indices() -> Vec<u32> { constants::camera::CANDIDATE_INDICES.to_vec() }
fn default_model_dir() -> PathBuf { PathBuf::from(".") }
fn default_jpeg_quality() -> u8 { constants::camera::JPEG_QUALITY }
fn default_blackbox_device() -> PathBuf { PathBuf::from(paths::BLACKBOX_DEVICE) }
fn default_mqtt_host() -> String { constants::ingest::MQTT_HOST.to_string() }
fn default_mqtt_port() -> u16 { constants::ingest::MQTT_PORT }
fn default_mqtt_client_id() -> String { constants::ingest::MQTT_CLIENT_ID.to_string() }
fn default_sensor_topic() -> String { constants::ingest::MQTT_SENSOR_TOPIC.to_string() }
fn default_command_topic() -> String { constants::ingest::MQTT_COMMAND_TOPIC.to_string() }
fn default_serial_device() -> PathBuf { PathBuf::from(paths::SERIAL_DEVICE) }
fn default_serial_baud() -> u32 { constants::ingest::SERIAL_BAUD }
fn default_token_ttl_secs() -> u64 { constants::auth::TOKEN_TTL.as_secs() }

impl Default for GpioSettings {
    fn default() -> Self {
        Self {
            root: default_gpio_root(),
            led_pins: default_led_pins(),
            aux_pin: default_aux_pin(),
            led_active_low: default_led_active_low(),
            aux_active_when_dark: true,
            export_settle_ms: default_settle_ms(),
        }
    }
}

impl GpioSettings {
    pub fn export_settle(&self) -> Duration {
        Duration::from_millis(self.export_settle_ms)
    }
}

impl Default for AdcSettings {
    fn default() -> Self {
        Self {
            spi_device: default_spi_device(),
            clock_hz: default_spi_clock(),
            light_channel: default_light_channel(),
            light_threshold: default_light_threshold(),
        }
    }
}

impl Default for FanSettings {
    fn default() -> Self {
        Self {
            thermal_path: default_thermal_path(),
            pwm_path: default_pwm_path(),
            tick_ms: default_tick_ms(),
            low_threshold_c: default_low_c(),
            high_threshold_c: default_high_c(),
            min_duty: default_min_duty(),
        }
    }
}

impl FanSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            indices: default_camera_indices(),
            model_dir: default_model_dir(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for BlackboxSettings {
    fn default() -> Self {
        Self { device: default_blackbox_device() }
    }
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: default_mqtt_client_id(),
            sensor_topic: default_sensor_topic(),
            command_topic: default_command_topic(),
            clock_sync: true,
        }
    }
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            device: default_serial_device(),
            baud: default_serial_baud(),
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self { token_ttl_secs: default_token_ttl_secs() }
    }
}

impl AuthSettings {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

impl AppSettings {
    /// Reject values the hardware layers cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.fan.low_threshold_c >= self.fan.high_threshold_c {
            return Err(SmartHomeError::InvalidConfig {
                field: "fan.low_threshold_c".into(),
                reason: format!(
                    "must be below high_threshold_c ({} >= {})",
                    self.fan.low_threshold_c, self.fan.high_threshold_c
                ),
            });
        }
        if self.fan.tick_ms == 0 {
            return Err(SmartHomeError::InvalidConfig {
                field: "fan.tick_ms".into(),
                reason: "must be non-zero".into(),
            });
        }
        if self.adc.light_channel >= constants::adc::CHANNEL_COUNT {
            return Err(SmartHomeError::InvalidConfig {
                field: "adc.light_channel".into(),
                reason: format!("must be below {}", constants::adc::CHANNEL_COUNT),
            });
        }
        if self.camera.jpeg_quality == 0 || self.camera.jpeg_quality > 100 {
            return Err(SmartHomeError::InvalidConfig {
                field: "camera.jpeg_quality".into(),
                reason: "must be 1-100".into(),
            });
        }
        if self.mqtt.sensor_topic.is_empty() || self.mqtt.command_topic.is_empty() {
            return Err(SmartHomeError::InvalidConfig {
                field: "mqtt".into(),
                reason: "topics must not be empty".into(),
            });
        }
        if self.auth.token_ttl_secs == 0 {
            return Err(SmartHomeError::InvalidConfig {
                field: "auth.token_ttl_secs".into(),
                reason: "must be non-zero".into(),
            });
        }
        Ok(())
    }
}

/// Resolve which settings file to read, if any exists
///
/// Order: `$SMARTHOME_CONFIG`, `/etc/smarthome/settings.json`, user config dir.
pub fn get_settings_path() -> Option<PathBuf> {
    if let Ok(p) = std::env::var(paths::CONFIG_ENV) {
        return Some(PathBuf::from(p));
    }

    let system = PathBuf::from(paths::SYSTEM_CONFIG);
    if system.exists() {
        return Some(system);
    }

    paths::user_config_dir()
        .map(|d| d.join("settings.json"))
        .filter(|p| p.exists())
}

/// Load settings from the resolved path, or defaults when no file exists
pub fn load_settings() -> Result<AppSettings> {
    match get_settings_path() {
        Some(path) => load_settings_from(&path),
        None => {
            info!("No settings file found, using board defaults");
            Ok(AppSettings::default())
        }
    }
}

/// Load settings from an explicit path; a missing file yields defaults
pub fn load_settings_from(path: &Path) -> Result<AppSettings> {
    if !path.exists() {
        info!("Settings file {:?} not found, using board defaults", path);
        return Ok(AppSettings::default());
    }

    let content = fs::read_to_string(path).map_err(|e| SmartHomeError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let settings: AppSettings = serde_json::from_str(&content).map_err(|e| {
        SmartHomeError::config(format!("Failed to parse settings JSON {:?}: {}", path, e))
    })?;

    settings.validate()?;
    debug!("Settings loaded from {:?}", path);
    Ok(settings)
}

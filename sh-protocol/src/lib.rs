//! Shared request/response and push-event types
//!
//! The HTTP and push layers are external collaborators. They translate their routes
//! into a [`Request`], hand it to the core, and serialize the [`Response`] back out.
//! Field names follow the camelCase JSON the existing clients already parse.

use serde::{Deserialize, Serialize};

/// Number of LED channels on the board
pub const LED_COUNT: usize = 4;

/// Highest PWM duty value accepted by the fan
pub const PWM_MAX: u8 = 255;

/// Push event name clients subscribe to for sensor payloads
pub const SENSOR_EVENT_NAME: &str = "ReceiveSensorData";

/// Maximum LED blink repetitions accepted in one request
const MAX_BLINK_COUNT: u32 = 50;

/// Blink interval bounds in milliseconds
const MIN_BLINK_INTERVAL_MS: u64 = 50;
const MAX_BLINK_INTERVAL_MS: u64 = 5_000;

/// Longest password that fits the 20-byte blackbox field
pub const MAX_PASSWORD_LEN: usize = 20;

/// Longest command forwarded to the sensor nodes
pub const MAX_COMMAND_LEN: usize = 128;

/// Largest request line accepted on the control socket (frames go out, never in)
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd", content = "data")]
pub enum Request {
    SetLed { id: u32, state: bool },
    GetLed { id: u32 },
    GetLeds,
    ReadLight,
    GetSystemStatus,
    /// Out-of-range values are clamped, never rejected
    SetManualFan { pwm: i32 },
    SetAutoFan,
    GetFrame,
    WriteLog { password: String, success: bool },
    ReadLogs,
    KernelMessages,
    Authorize,
    AuthStatus,
    AwayCheck,
    Blink { targets: Vec<u32>, count: u32, interval_ms: u64 },
    /// Forward a one-line command to every connected sensor node link
    SendCommand { command: String },
}

impl Request {
    /// Validate request parameters before dispatch
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Request::GetLeds
            | Request::ReadLight
            | Request::GetSystemStatus
            | Request::SetManualFan { .. }
            | Request::SetAutoFan
            | Request::GetFrame
            | Request::ReadLogs
            | Request::KernelMessages
            | Request::Authorize
            | Request::AuthStatus
            | Request::AwayCheck => Ok(()),

            Request::SetLed { id, .. } | Request::GetLed { id } => validate_led_id(*id),

            Request::WriteLog { password, .. } => validate_password(password),

            Request::SendCommand { command } => validate_command(command),

            Request::Blink { targets, count, interval_ms } => {
                if targets.is_empty() {
                    return Err("Blink requires at least one target".into());
                }
                for id in targets {
                    validate_led_id(*id)?;
                }
                if *count == 0 || *count > MAX_BLINK_COUNT {
                    return Err(format!("Blink count {} out of range (1-{})", count, MAX_BLINK_COUNT));
                }
                if !(MIN_BLINK_INTERVAL_MS..=MAX_BLINK_INTERVAL_MS).contains(interval_ms) {
                    return Err(format!(
                        "Blink interval {}ms out of range ({}-{}ms)",
                        interval_ms, MIN_BLINK_INTERVAL_MS, MAX_BLINK_INTERVAL_MS
                    ));
                }
                Ok(())
            }
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Request::SetLed { .. } => "SetLed",
            Request::GetLed { .. } => "GetLed",
            Request::GetLeds => "GetLeds",
            Request::ReadLight => "ReadLight",
            Request::GetSystemStatus => "GetSystemStatus",
            Request::SetManualFan { .. } => "SetManualFan",
            Request::SetAutoFan => "SetAutoFan",
            Request::GetFrame => "GetFrame",
            Request::WriteLog { .. } => "WriteLog",
            Request::ReadLogs => "ReadLogs",
            Request::KernelMessages => "KernelMessages",
            Request::Authorize => "Authorize",
            Request::AuthStatus => "AuthStatus",
            Request::AwayCheck => "AwayCheck",
            Request::Blink { .. } => "Blink",
            Request::SendCommand { .. } => "SendCommand",
        }
    }
}

/// LED ids are 1-based
pub fn validate_led_id(id: u32) -> Result<(), String> {
    if id == 0 || id as usize > LED_COUNT {
        return Err(format!("LED id {} out of range (1-{})", id, LED_COUNT));
    }
    Ok(())
}

/// Commands are single printable ASCII lines; the link adds the terminator
pub fn validate_command(command: &str) -> Result<(), String> {
    if command.is_empty() {
        return Err("Command is empty".into());
    }
    if command.len() > MAX_COMMAND_LEN {
        return Err(format!("Command too long: {} bytes (max {})", command.len(), MAX_COMMAND_LEN));
    }
    if !command.bytes().all(|b| b.is_ascii_graphic() || b == b' ') {
        return Err("Command must be printable ASCII on one line".into());
    }
    Ok(())
}

/// Passwords must be ASCII and fit the fixed-width record field
pub fn validate_password(password: &str) -> Result<(), String> {
    if !password.is_ascii() {
        return Err("Password must be ASCII".into());
    }
    if password.len() > MAX_PASSWORD_LEN {
        return Err(format!(
            "Password too long: {} bytes (max {})",
            password.len(),
            MAX_PASSWORD_LEN
        ));
    }
    if password.contains('\0') {
        return Err("Password contains null byte".into());
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status")]
pub enum Response {
    #[serde(rename = "ok")]
    Ok(ResponseData),
    #[serde(rename = "not_found")]
    NotFound { message: String },
    #[serde(rename = "error")]
    Error { message: String },
}

impl Response {
    pub fn ok(data: ResponseData) -> Self {
        Response::Ok(data)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Response::NotFound { message: message.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Response::Error { message: message.into() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub led: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leds: Option<Vec<bool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub light: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_status: Option<SystemStatus>,
    /// JPEG bytes; the HTTP layer sends these raw with `image/jpeg`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_jpeg: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<LogEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel_messages: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorized: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub away: Option<AwayReport>,
}

impl ResponseData {
    pub fn none() -> Self { Self::default() }
    pub fn message(m: impl Into<String>) -> Self { Self { message: Some(m.into()), ..Self::default() } }
    pub fn led(on: bool) -> Self { Self { led: Some(on), ..Self::default() } }
    pub fn leds(states: Vec<bool>) -> Self { Self { leds: Some(states), ..Self::default() } }
    pub fn light(raw: i32) -> Self { Self { light: Some(raw), ..Self::default() } }
    pub fn status(s: SystemStatus) -> Self { Self { system_status: Some(s), ..Self::default() } }
    pub fn frame(jpeg: Vec<u8>) -> Self { Self { frame_jpeg: Some(jpeg), ..Self::default() } }
    pub fn logs(l: Vec<LogEntry>) -> Self { Self { logs: Some(l), ..Self::default() } }
    pub fn kernel(lines: Vec<String>) -> Self { Self { kernel_messages: Some(lines), ..Self::default() } }
    pub fn authorized(a: bool) -> Self { Self { authorized: Some(a), ..Self::default() } }
    pub fn away(r: AwayReport) -> Self { Self { away: Some(r), ..Self::default() } }
}

/// CPU temperature and fan snapshot
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub cpu_temp: f64,
    pub fan_speed: u8,
    pub is_auto_fan: bool,
}

/// One decoded blackbox record as shown to clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub password: String,
    pub result: i32,
    pub timestamp: i64,
}

/// Outcome of the "nobody home" check
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AwayReport {
    /// True when the room was empty and the lights were switched off
    pub success: bool,
    pub people: u32,
    pub message: String,
}

/// Sensor payload published by the ESP32 nodes
///
/// `pressure` is absent on nodes without a barometer and defaults to 0.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorPayload {
    #[serde(rename = "sensorId")]
    pub sensor_id: String,
    pub temp: f64,
    pub hum: f64,
    #[serde(default)]
    pub pressure: f64,
}

/// Events delivered to every connected push subscriber
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// Raw JSON exactly as received from the node
    SensorDataReceived(String),
}

impl PushEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PushEvent::SensorDataReceived(_) => SENSOR_EVENT_NAME,
        }
    }

    pub fn payload(&self) -> &str {
        match self {
            PushEvent::SensorDataReceived(raw) => raw,
        }
    }
}

/// Wire form of a [`PushEvent`] on the event socket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PushMessage {
    pub event: String,
    pub payload: String,
}

impl From<&PushEvent> for PushMessage {
    fn from(event: &PushEvent) -> Self {
        Self {
            event: event.name().to_string(),
            payload: event.payload().to_string(),
        }
    }
}

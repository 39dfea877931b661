//! Unified error handling for the smart-home orchestration layer
//!
//! This crate provides the single error type shared by the core library and the daemon.
//! It uses thiserror for Display and Error impls.

use std::io;
use std::path::PathBuf;

/// Result type alias using SmartHomeError
pub type Result<T> = std::result::Result<T, SmartHomeError>;

/// Unified error type for all smart-home operations
#[derive(thiserror::Error, Debug)]
pub enum SmartHomeError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    // ============================================================================
    // Hardware Access Errors
    // ============================================================================
    #[error("GPIO {pin} {op} failed: {reason}")]
    Gpio {
        pin: u32,
        op: &'static str,
        reason: String,
    },

    #[error("SPI transfer on {path} failed: {reason}")]
    Spi {
        path: PathBuf,
        reason: String,
    },

    #[error("Failed to read temperature from {path}: {reason}")]
    TemperatureRead {
        path: PathBuf,
        reason: String,
    },

    #[error("Failed to write PWM to {path}: {reason}")]
    PwmWrite {
        path: PathBuf,
        reason: String,
    },

    #[error("Hardware not found: {0}")]
    HardwareNotFound(String),

    // ============================================================================
    // Blackbox Device Errors
    // ============================================================================
    #[error("Blackbox device {path} unavailable: {reason}")]
    BlackboxUnavailable {
        path: PathBuf,
        reason: String,
    },

    #[error("Blackbox ioctl 0x{request:08x} failed: {source}")]
    BlackboxIoctl {
        request: u32,
        source: io::Error,
    },

    #[error("Malformed blackbox record: {0}")]
    BlackboxRecord(String),

    // ============================================================================
    // Camera and Detection Errors
    // ============================================================================
    #[error("Camera {index} error: {reason}")]
    Camera {
        index: u32,
        reason: String,
    },

    #[error("No functional camera found (tried {tried:?})")]
    NoCamera {
        tried: Vec<u32>,
    },

    #[error("Detection backend error: {0}")]
    Detection(String),

    #[error("Frame encode failed: {0}")]
    Encode(String),

    // ============================================================================
    // Sensor Ingestion Errors
    // ============================================================================
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid sensor payload: {0}")]
    SensorPayload(String),

    #[error("MQTT link error: {0}")]
    Mqtt(String),

    #[error("Serial link {path} error: {reason}")]
    Serial {
        path: PathBuf,
        reason: String,
    },

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Generic(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl SmartHomeError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a detection backend error from a string
    pub fn detection(msg: impl Into<String>) -> Self {
        Self::Detection(msg.into())
    }

    /// Create a camera error for a device index
    pub fn camera(index: u32, reason: impl Into<String>) -> Self {
        Self::Camera {
            index,
            reason: reason.into(),
        }
    }

    /// Create a GPIO error for a pin and operation name
    pub fn gpio(pin: u32, op: &'static str, reason: impl Into<String>) -> Self {
        Self::Gpio {
            pin,
            op,
            reason: reason.into(),
        }
    }

    /// True for read timeouts, which workers treat as "no data this cycle"
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Io(e) => matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock),
            _ => false,
        }
    }
}

// Allow converting from String to SmartHomeError
impl From<String> for SmartHomeError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

// Allow converting from &str to SmartHomeError
impl From<&str> for SmartHomeError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}

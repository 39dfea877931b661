//! Blackbox log bridge
//!
//! Login attempts are appended to a kernel-resident ring through an ioctl and
//! read back in bulk. Nothing here is fatal: an absent device means writes are
//! dropped with a warning and reads return an empty list.

pub mod device;
pub mod record;

use std::process::Command;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::constants::blackbox::{KERNEL_LOG_TAG, MAX_KERNEL_MESSAGES, MAX_RECORDS, RECORD_SIZE};
use sh_protocol::LogEntry;

pub use device::{BlackboxDevice, CharDevice, IOCTL_WRITE_LOG};
pub use record::{decode_records, encode_auth_data};

pub struct Blackbox {
    device: Arc<dyn BlackboxDevice>,
}

impl Blackbox {
    pub fn new(device: Arc<dyn BlackboxDevice>) -> Self {
        Self { device }
    }

    /// Record a login attempt; failures are logged and swallowed
    pub fn write_log(&self, password: &str, success: bool) {
        let payload = encode_auth_data(password, success);
        match self.device.append(&payload) {
            Ok(()) => debug!(success, "Blackbox entry written"),
            Err(e) => warn!(error = %e, "Blackbox write failed"),
        }
    }

    /// All valid entries, newest first
    pub fn read_logs(&self) -> Vec<LogEntry> {
        match self.device.read_all(MAX_RECORDS * RECORD_SIZE) {
            Ok(buf) => {
                let entries = decode_records(&buf);
                debug!(bytes = buf.len(), entries = entries.len(), "Blackbox read");
                entries
            }
            Err(e) => {
                debug!(error = %e, "Blackbox read unavailable");
                Vec::new()
            }
        }
    }

    /// Recent kernel log lines from the driver, newest first
    pub fn kernel_messages(&self) -> Vec<String> {
        match Command::new("dmesg").output() {
            Ok(output) if output.status.success() => {
                filter_kernel_messages(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(output) => {
                debug!(status = ?output.status, "dmesg refused");
                Vec::new()
            }
            Err(e) => {
                debug!(error = %e, "dmesg not available");
                Vec::new()
            }
        }
    }
}

/// Keep lines mentioning the driver tag (any case), newest first, capped
pub fn filter_kernel_messages(output: &str) -> Vec<String> {
    let tag = KERNEL_LOG_TAG.to_lowercase();
    output
        .lines()
        .rev()
        .filter(|line| line.to_lowercase().contains(&tag))
        .take(MAX_KERNEL_MESSAGES)
        .map(str::to_string)
        .collect()
}

//! Blackbox character device access

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::constants::blackbox::{AUTH_DATA_SIZE, IOCTL_MAGIC, IOCTL_WRITE_LOG_NR};
use crate::error::{Result, SmartHomeError};
use crate::hw::iow;

/// `_IOW('k', 1, auth_data_t)`
pub const IOCTL_WRITE_LOG: u32 = iow(IOCTL_MAGIC, IOCTL_WRITE_LOG_NR, AUTH_DATA_SIZE);

/// Raw device operations behind the log bridge
#[cfg_attr(test, mockall::automock)]
pub trait BlackboxDevice: Send + Sync {
    /// Append one record through the write control call
    fn append(&self, payload: &[u8; AUTH_DATA_SIZE]) -> Result<()>;

    /// One bulk read of at most `max_bytes` from a fresh handle
    fn read_all(&self, max_bytes: usize) -> Result<Vec<u8>>;
}

/// `/dev/blackbox`
///
/// The write handle is opened once and kept; reads always open a new
/// read-only handle because the device cannot rewind.
pub struct CharDevice {
    path: PathBuf,
    writer: Mutex<Option<File>>,
}

impl CharDevice {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let writer = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => {
                info!(path = %path.display(), "Blackbox device opened for writing");
                Some(file)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Blackbox device unavailable, logging disabled");
                None
            }
        };
        Self {
            path,
            writer: Mutex::new(writer),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_writable(&self) -> bool {
        self.writer.lock().is_some()
    }
}

impl BlackboxDevice for CharDevice {
    fn append(&self, payload: &[u8; AUTH_DATA_SIZE]) -> Result<()> {
        let guard = self.writer.lock();
        let file = guard.as_ref().ok_or_else(|| SmartHomeError::BlackboxUnavailable {
            path: self.path.clone(),
            reason: "write handle not open".into(),
        })?;

        // SAFETY: the descriptor is open for the lifetime of the guard and the
        // payload is exactly the size encoded in IOCTL_WRITE_LOG.
        let rc = unsafe { libc::ioctl(file.as_raw_fd(), IOCTL_WRITE_LOG as _, payload.as_ptr()) };
        if rc < 0 {
            return Err(SmartHomeError::BlackboxIoctl {
                request: IOCTL_WRITE_LOG,
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    fn read_all(&self, max_bytes: usize) -> Result<Vec<u8>> {
        let mut file = File::open(&self.path).map_err(|e| SmartHomeError::BlackboxUnavailable {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        let mut buf = vec![0u8; max_bytes];
        let n = file.read(&mut buf).map_err(|e| SmartHomeError::FileRead {
            path: self.path.clone(),
            source: e,
        })?;
        buf.truncate(n);
        Ok(buf)
    }
}

//! MCP3008 analog reads over spidev
//!
//! Single-ended conversion: the host clocks out `[0x01, (0x08 | ch) << 4, 0x00]`
//! and the 10-bit result is the low two bits of the second reply byte followed
//! by the third.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::iow;
use crate::constants::adc;
use crate::error::{Result, SmartHomeError};

const SPI_IOC_MAGIC: u8 = b'k';
const SPI_IOC_MESSAGE_1: u32 = iow(SPI_IOC_MAGIC, 0, std::mem::size_of::<SpiIocTransfer>());
const SPI_IOC_WR_MODE: u32 = iow(SPI_IOC_MAGIC, 1, 1);
const SPI_IOC_WR_BITS_PER_WORD: u32 = iow(SPI_IOC_MAGIC, 3, 1);
const SPI_IOC_WR_MAX_SPEED_HZ: u32 = iow(SPI_IOC_MAGIC, 4, 4);

/// `struct spi_ioc_transfer` from linux/spi/spidev.h
#[repr(C)]
#[derive(Debug, Default)]
struct SpiIocTransfer {
    tx_buf: u64,
    rx_buf: u64,
    len: u32,
    speed_hz: u32,
    delay_usecs: u16,
    bits_per_word: u8,
    cs_change: u8,
    tx_nbits: u8,
    rx_nbits: u8,
    word_delay_usecs: u8,
    pad: u8,
}

/// Raw analog reads; `adc::UNAVAILABLE` when there is no working bus
#[cfg_attr(test, mockall::automock)]
pub trait AnalogReader: Send + Sync {
    fn read_channel(&self, channel: u8) -> i32;
}

/// Command frame for a single-ended read of `channel`
pub fn request_frame(channel: u8) -> [u8; 3] {
    [0x01, (0x08 | (channel & 0x07)) << 4, 0x00]
}

/// Extract the 10-bit conversion from a reply frame
pub fn decode_reply(rx: &[u8; 3]) -> i32 {
    (((rx[1] & 0x03) as i32) << 8) | rx[2] as i32
}

/// MCP3008 on a spidev node
///
/// Opening never fails: a missing or unconfigurable device leaves the bus
/// uninitialized and every read returns the sentinel.
pub struct Mcp3008 {
    path: PathBuf,
    speed_hz: u32,
    device: Mutex<Option<File>>,
}

impl Mcp3008 {
    pub fn open(path: impl Into<PathBuf>, speed_hz: u32) -> Self {
        let path = path.into();
        let device = match Self::open_device(&path, speed_hz) {
            Ok(file) => {
                info!(path = %path.display(), speed_hz, "SPI ADC initialized");
                Some(file)
            }
            Err(e) => {
                warn!(error = %e, "SPI ADC unavailable, light readings disabled");
                None
            }
        };
        Self {
            path,
            speed_hz,
            device: Mutex::new(device),
        }
    }

    /// A bus that was never initialized
    pub fn disabled(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            speed_hz: adc::CLOCK_HZ,
            device: Mutex::new(None),
        }
    }

    pub fn is_available(&self) -> bool {
        self.device.lock().is_some()
    }

    fn open_device(path: &Path, speed_hz: u32) -> Result<File> {
        if !path.exists() {
            return Err(SmartHomeError::HardwareNotFound(format!(
                "SPI device {} not present",
                path.display()
            )));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| spi_error(path, format!("open: {}", e)))?;

        let fd = file.as_raw_fd();
        let mode: u8 = adc::SPI_MODE;
        let bits: u8 = 8;
        // SAFETY: fd is a valid open spidev descriptor and each pointer refers to
        // a live value whose size matches the one encoded in the request code.
        unsafe {
            if libc::ioctl(fd, SPI_IOC_WR_MODE as _, &mode as *const u8) < 0 {
                return Err(spi_error(path, format!("set mode: {}", std::io::Error::last_os_error())));
            }
            if libc::ioctl(fd, SPI_IOC_WR_BITS_PER_WORD as _, &bits as *const u8) < 0 {
                return Err(spi_error(path, format!("set word size: {}", std::io::Error::last_os_error())));
            }
            if libc::ioctl(fd, SPI_IOC_WR_MAX_SPEED_HZ as _, &speed_hz as *const u32) < 0 {
                return Err(spi_error(path, format!("set speed: {}", std::io::Error::last_os_error())));
            }
        }

        Ok(file)
    }

    fn transfer(&self, file: &File, tx: &[u8; 3]) -> Result<[u8; 3]> {
        let mut rx = [0u8; 3];
        let xfer = SpiIocTransfer {
            tx_buf: tx.as_ptr() as u64,
            rx_buf: rx.as_mut_ptr() as u64,
            len: tx.len() as u32,
            speed_hz: self.speed_hz,
            bits_per_word: 8,
            ..Default::default()
        };

        // SAFETY: tx and rx outlive the call and are both `len` bytes long;
        // xfer matches the kernel's spi_ioc_transfer layout (32 bytes).
        let rc = unsafe { libc::ioctl(file.as_raw_fd(), SPI_IOC_MESSAGE_1 as _, &xfer as *const SpiIocTransfer) };
        if rc < 0 {
            return Err(spi_error(&self.path, std::io::Error::last_os_error().to_string()));
        }
        Ok(rx)
    }
}

impl AnalogReader for Mcp3008 {
    fn read_channel(&self, channel: u8) -> i32 {
        if channel >= adc::CHANNEL_COUNT {
            warn!(channel, "ADC channel out of range");
            return adc::UNAVAILABLE;
        }

        let guard = self.device.lock();
        let Some(file) = guard.as_ref() else {
            return adc::UNAVAILABLE;
        };

        match self.transfer(file, &request_frame(channel)) {
            Ok(rx) => {
                let value = decode_reply(&rx);
                debug!(channel, value, "ADC read");
                value
            }
            Err(e) => {
                warn!(channel, error = %e, "ADC read failed");
                adc::UNAVAILABLE
            }
        }
    }
}

fn spi_error(path: &Path, reason: impl Into<String>) -> SmartHomeError {
    SmartHomeError::Spi {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

//! Camera sources and device probing

use image::RgbImage;
use tracing::{info, warn};

use crate::error::{Result, SmartHomeError};

/// An opened capture device
#[cfg_attr(test, mockall::automock)]
pub trait CameraSource: Send {
    /// Next frame; `Ok(None)` when the device produced nothing this time
    fn read_frame(&mut self) -> Result<Option<RgbImage>>;

    /// Request capture geometry and rate; devices may ignore it
    fn configure(&mut self, width: u32, height: u32, fps: u32) -> Result<()>;
}

/// Opens capture devices by platform index
#[cfg_attr(test, mockall::automock)]
pub trait CameraOpener: Send {
    fn open(&self, index: u32) -> Result<Box<dyn CameraSource>>;
}

/// Opener for builds without a capture backend; every index fails
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCamera;

impl CameraOpener for NoCamera {
    fn open(&self, index: u32) -> Result<Box<dyn CameraSource>> {
        Err(SmartHomeError::camera(index, "no capture backend compiled in"))
    }
}

/// Open `indices` in order and adopt the first device that yields a non-empty
/// frame. Rejected devices are dropped before the next index is tried.
pub fn probe_camera(opener: &dyn CameraOpener, indices: &[u32]) -> Result<(u32, Box<dyn CameraSource>)> {
    for &index in indices {
        info!(index, "Probing camera");
        let mut source = match opener.open(index) {
            Ok(source) => source,
            Err(e) => {
                warn!(index, error = %e, "Camera did not open");
                continue;
            }
        };

        match source.read_frame() {
            Ok(Some(frame)) if frame.width() > 0 && frame.height() > 0 => {
                info!(index, width = frame.width(), height = frame.height(), "Camera adopted");
                return Ok((index, source));
            }
            Ok(_) => warn!(index, "Camera opened but trial read was empty"),
            Err(e) => warn!(index, error = %e, "Camera trial read failed"),
        }
    }

    Err(SmartHomeError::NoCamera {
        tried: indices.to_vec(),
    })
}

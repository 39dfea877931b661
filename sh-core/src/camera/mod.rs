//! Camera capture and person detection
//!
//! - `source` - capture devices and index probing
//! - `detection` - backend selection and the detector seam
//! - `annotate` - bounding boxes and JPEG encoding
//! - `frame` - the latest-frame store shared with request handlers
//! - `pipeline` - the capture thread tying it together
//! - `cv` - concrete capture and detectors (`opencv` feature)

pub mod annotate;
pub mod detection;
pub mod frame;
pub mod pipeline;
pub mod source;

#[cfg(feature = "opencv")]
pub mod cv;

pub use detection::{AccelTarget, BackendKind, Detection, Detector, DetectorFactory, NoDetectors};
pub use frame::{FrameSnapshot, FrameStore};
pub use pipeline::{CameraPipeline, CameraStatus, CaptureTiming, PipelineState};
pub use source::{CameraOpener, CameraSource, NoCamera};

/// Capture backend for this build
pub fn default_opener() -> Box<dyn CameraOpener> {
    #[cfg(feature = "opencv")]
    {
        Box::new(cv::OpenCvCameras)
    }
    #[cfg(not(feature = "opencv"))]
    {
        Box::new(NoCamera)
    }
}

/// Detector factory for this build
pub fn default_detectors() -> Box<dyn DetectorFactory + Send> {
    #[cfg(feature = "opencv")]
    {
        Box::new(cv::OpenCvDetectors)
    }
    #[cfg(not(feature = "opencv"))]
    {
        Box::new(NoDetectors)
    }
}

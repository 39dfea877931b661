//! Person detection backends
//!
//! The backend is chosen once at startup:
//!
//! 1. If the SSD model artifacts are present, load them against each
//!    acceleration target in priority order and adopt the first target that
//!    completes a dummy inference.
//! 2. Otherwise (or when every target fails) use the cascade classifier if its
//!    XML is present.
//! 3. Otherwise detection is disabled.

use image::RgbImage;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::constants::camera as cam;
use crate::error::Result;

/// One detected region in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Model confidence; cascade hits report 1.0
    pub confidence: f32,
}

/// Acceleration target for the model backend, highest priority first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccelTarget {
    Gpu,
    Npu,
    OpenCl,
    Cpu,
}

impl AccelTarget {
    pub const PRIORITY: [AccelTarget; 4] = [
        AccelTarget::Gpu,
        AccelTarget::Npu,
        AccelTarget::OpenCl,
        AccelTarget::Cpu,
    ];
}

impl fmt::Display for AccelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccelTarget::Gpu => "GPU",
            AccelTarget::Npu => "NPU",
            AccelTarget::OpenCl => "OpenCL",
            AccelTarget::Cpu => "CPU",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Accelerated(AccelTarget),
    Cascade,
    None,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Accelerated(target) => write!(f, "accelerated model ({})", target),
            BackendKind::Cascade => f.write_str("cascade classifier"),
            BackendKind::None => f.write_str("disabled"),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait Detector: Send {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>>;
}

/// Builds detectors from artifact files
#[cfg_attr(test, mockall::automock)]
pub trait DetectorFactory {
    fn load_model(&self, prototxt: &Path, weights: &Path, target: AccelTarget) -> Result<Box<dyn Detector>>;
    fn load_cascade(&self, xml: &Path) -> Result<Box<dyn Detector>>;
}

/// Factory for builds without a detection backend
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDetectors;

impl DetectorFactory for NoDetectors {
    fn load_model(&self, _prototxt: &Path, _weights: &Path, target: AccelTarget) -> Result<Box<dyn Detector>> {
        Err(crate::error::SmartHomeError::NotSupported(format!(
            "model backend for {} not compiled in",
            target
        )))
    }

    fn load_cascade(&self, _xml: &Path) -> Result<Box<dyn Detector>> {
        Err(crate::error::SmartHomeError::NotSupported(
            "cascade backend not compiled in".into(),
        ))
    }
}

/// Artifact locations under a model directory
#[derive(Debug, Clone)]
pub struct ModelArtifacts {
    pub prototxt: PathBuf,
    pub weights: PathBuf,
    pub cascade: PathBuf,
}

impl ModelArtifacts {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            prototxt: dir.join(cam::MODEL_PROTOTXT),
            weights: dir.join(cam::MODEL_WEIGHTS),
            cascade: dir.join(cam::CASCADE_XML),
        }
    }

    pub fn has_model(&self) -> bool {
        self.prototxt.is_file() && self.weights.is_file()
    }

    pub fn has_cascade(&self) -> bool {
        self.cascade.is_file()
    }
}

/// The startup decision: which backend, and the detector if any
pub struct ResolvedBackend {
    pub kind: BackendKind,
    pub detector: Option<Box<dyn Detector>>,
}

impl ResolvedBackend {
    pub fn disabled() -> Self {
        Self {
            kind: BackendKind::None,
            detector: None,
        }
    }
}

impl fmt::Debug for ResolvedBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedBackend").field("kind", &self.kind).finish()
    }
}

/// Load the model for `target` and run one inference on a blank frame
fn probe_target(factory: &dyn DetectorFactory, artifacts: &ModelArtifacts, target: AccelTarget) -> Result<Box<dyn Detector>> {
    let mut detector = factory.load_model(&artifacts.prototxt, &artifacts.weights, target)?;
    let blank = RgbImage::new(cam::MODEL_INPUT_SIZE, cam::MODEL_INPUT_SIZE);
    detector.detect(&blank)?;
    Ok(detector)
}

pub fn resolve_backend(factory: &dyn DetectorFactory, artifacts: &ModelArtifacts) -> ResolvedBackend {
    if artifacts.has_model() {
        for target in AccelTarget::PRIORITY {
            match probe_target(factory, artifacts, target) {
                Ok(detector) => {
                    info!(%target, "Detection backend: accelerated model");
                    return ResolvedBackend {
                        kind: BackendKind::Accelerated(target),
                        detector: Some(detector),
                    };
                }
                Err(e) => warn!(%target, error = %e, "Model target probe failed"),
            }
        }
        warn!("No acceleration target usable, trying cascade");
    } else {
        info!(
            prototxt = %artifacts.prototxt.display(),
            weights = %artifacts.weights.display(),
            "Model artifacts missing, skipping accelerated backend"
        );
    }

    if artifacts.has_cascade() {
        match factory.load_cascade(&artifacts.cascade) {
            Ok(detector) => {
                info!("Detection backend: cascade classifier");
                return ResolvedBackend {
                    kind: BackendKind::Cascade,
                    detector: Some(detector),
                };
            }
            Err(e) => warn!(error = %e, "Cascade load failed"),
        }
    }

    warn!("No detection backend available, frames will be served unannotated");
    ResolvedBackend::disabled()
}

/// Detections that count as people for the active backend
pub fn people(kind: BackendKind, detections: &[Detection]) -> Vec<Detection> {
    match kind {
        BackendKind::Accelerated(_) => detections
            .iter()
            .filter(|d| d.confidence > cam::CONFIDENCE_THRESHOLD)
            .copied()
            .collect(),
        BackendKind::Cascade => detections.to_vec(),
        BackendKind::None => Vec::new(),
    }
}

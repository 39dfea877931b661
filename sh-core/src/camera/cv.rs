//! OpenCV capture and detection
//!
//! Built with the `opencv` feature. Frames cross into the rest of the crate as
//! `RgbImage`; OpenCV works in BGR internally.

use image::RgbImage;
use opencv::core::{self, Mat, Rect, Scalar, Size, Vector};
use opencv::prelude::*;
use opencv::{dnn, imgproc, objdetect, videoio};
use std::path::Path;
use tracing::debug;

use super::detection::{AccelTarget, Detection, Detector, DetectorFactory};
use super::source::{CameraOpener, CameraSource};
use crate::constants::camera as cam;
use crate::error::{Result, SmartHomeError};

fn cv_err(e: opencv::Error) -> SmartHomeError {
    SmartHomeError::detection(e.to_string())
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| SmartHomeError::detection(format!("non-UTF-8 path {}", path.display())))
}

fn bgr_to_rgb_image(bgr: &Mat) -> Result<RgbImage> {
    let mut rgb = Mat::default();
    imgproc::cvt_color(bgr, &mut rgb, imgproc::COLOR_BGR2RGB, 0).map_err(cv_err)?;
    let width = rgb.cols() as u32;
    let height = rgb.rows() as u32;
    let data = rgb.data_bytes().map_err(cv_err)?.to_vec();
    RgbImage::from_raw(width, height, data)
        .ok_or_else(|| SmartHomeError::Encode("frame buffer size mismatch".into()))
}

fn rgb_image_to_bgr(frame: &RgbImage) -> Result<Mat> {
    let mut rgb = Mat::new_rows_cols_with_default(
        frame.height() as i32,
        frame.width() as i32,
        core::CV_8UC3,
        Scalar::all(0.0),
    )
    .map_err(cv_err)?;
    rgb.data_bytes_mut().map_err(cv_err)?.copy_from_slice(frame.as_raw());

    let mut bgr = Mat::default();
    imgproc::cvt_color(&rgb, &mut bgr, imgproc::COLOR_RGB2BGR, 0).map_err(cv_err)?;
    Ok(bgr)
}

/// `VideoCapture` by device index
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenCvCameras;

struct OpenCvSource {
    index: u32,
    capture: videoio::VideoCapture,
    frame: Mat,
}

impl CameraOpener for OpenCvCameras {
    fn open(&self, index: u32) -> Result<Box<dyn CameraSource>> {
        let capture = videoio::VideoCapture::new(index as i32, videoio::CAP_ANY)
            .map_err(|e| SmartHomeError::camera(index, e.to_string()))?;
        if !capture.is_opened().map_err(|e| SmartHomeError::camera(index, e.to_string()))? {
            return Err(SmartHomeError::camera(index, "device did not open"));
        }
        Ok(Box::new(OpenCvSource {
            index,
            capture,
            frame: Mat::default(),
        }))
    }
}

impl CameraSource for OpenCvSource {
    fn read_frame(&mut self) -> Result<Option<RgbImage>> {
        let ok = self
            .capture
            .read(&mut self.frame)
            .map_err(|e| SmartHomeError::camera(self.index, e.to_string()))?;
        if !ok || self.frame.empty() {
            return Ok(None);
        }
        bgr_to_rgb_image(&self.frame).map(Some)
    }

    fn configure(&mut self, width: u32, height: u32, fps: u32) -> Result<()> {
        let props = [
            (videoio::CAP_PROP_FRAME_WIDTH, width as f64),
            (videoio::CAP_PROP_FRAME_HEIGHT, height as f64),
            (videoio::CAP_PROP_FPS, fps as f64),
        ];
        for (prop, value) in props {
            let accepted = self
                .capture
                .set(prop, value)
                .map_err(|e| SmartHomeError::camera(self.index, e.to_string()))?;
            if !accepted {
                debug!(index = self.index, prop, value, "Capture property not accepted");
            }
        }
        Ok(())
    }
}

/// Caffe SSD face model through `cv::dnn`
struct SsdDetector {
    net: dnn::Net,
}

impl Detector for SsdDetector {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>> {
        let bgr = rgb_image_to_bgr(frame)?;
        let (w, h) = (frame.width() as f32, frame.height() as f32);
        let [b, g, r] = cam::MODEL_MEAN_BGR;

        let blob = dnn::blob_from_image(
            &bgr,
            1.0,
            Size::new(cam::MODEL_INPUT_SIZE as i32, cam::MODEL_INPUT_SIZE as i32),
            Scalar::new(b, g, r, 0.0),
            false,
            false,
            core::CV_32F,
        )
        .map_err(cv_err)?;
        self.net.set_input(&blob, "", 1.0, Scalar::default()).map_err(cv_err)?;
        let output = self.net.forward_single("").map_err(cv_err)?;

        // Output is 1x1xNx7: [image_id, label, confidence, x1, y1, x2, y2]
        let values = output.data_typed::<f32>().map_err(cv_err)?;
        let detections = values
            .chunks_exact(7)
            .map(|row| {
                let x1 = (row[3] * w).clamp(0.0, w) as u32;
                let y1 = (row[4] * h).clamp(0.0, h) as u32;
                let x2 = (row[5] * w).clamp(0.0, w) as u32;
                let y2 = (row[6] * h).clamp(0.0, h) as u32;
                Detection {
                    x: x1,
                    y: y1,
                    width: x2.saturating_sub(x1),
                    height: y2.saturating_sub(y1),
                    confidence: row[2],
                }
            })
            .collect();
        Ok(detections)
    }
}

/// Haar cascade through `cv::CascadeClassifier`
struct CascadeDetector {
    classifier: objdetect::CascadeClassifier,
}

impl Detector for CascadeDetector {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>> {
        let bgr = rgb_image_to_bgr(frame)?;
        let mut gray = Mat::default();
        imgproc::cvt_color(&bgr, &mut gray, imgproc::COLOR_BGR2GRAY, 0).map_err(cv_err)?;
        let mut equalized = Mat::default();
        imgproc::equalize_hist(&gray, &mut equalized).map_err(cv_err)?;

        let min = cam::CASCADE_MIN_SIZE as i32;
        let mut faces = Vector::<Rect>::new();
        self.classifier
            .detect_multi_scale(
                &equalized,
                &mut faces,
                cam::CASCADE_SCALE_FACTOR,
                cam::CASCADE_MIN_NEIGHBORS,
                objdetect::CASCADE_SCALE_IMAGE,
                Size::new(min, min),
                Size::new(0, 0),
            )
            .map_err(cv_err)?;

        Ok(faces
            .iter()
            .map(|r| Detection {
                x: r.x.max(0) as u32,
                y: r.y.max(0) as u32,
                width: r.width.max(0) as u32,
                height: r.height.max(0) as u32,
                confidence: 1.0,
            })
            .collect())
    }
}

/// Loads SSD and cascade detectors
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenCvDetectors;

fn backend_for(target: AccelTarget) -> (i32, i32) {
    match target {
        AccelTarget::Gpu => (dnn::DNN_BACKEND_CUDA, dnn::DNN_TARGET_CUDA),
        AccelTarget::Npu => (dnn::DNN_BACKEND_TIMVX, dnn::DNN_TARGET_NPU),
        AccelTarget::OpenCl => (dnn::DNN_BACKEND_OPENCV, dnn::DNN_TARGET_OPENCL),
        AccelTarget::Cpu => (dnn::DNN_BACKEND_OPENCV, dnn::DNN_TARGET_CPU),
    }
}

impl DetectorFactory for OpenCvDetectors {
    fn load_model(&self, prototxt: &Path, weights: &Path, target: AccelTarget) -> Result<Box<dyn Detector>> {
        let mut net = dnn::read_net_from_caffe(path_str(prototxt)?, path_str(weights)?).map_err(cv_err)?;
        let (backend, device) = backend_for(target);
        net.set_preferable_backend(backend).map_err(cv_err)?;
        net.set_preferable_target(device).map_err(cv_err)?;
        Ok(Box::new(SsdDetector { net }))
    }

    fn load_cascade(&self, xml: &Path) -> Result<Box<dyn Detector>> {
        let classifier = objdetect::CascadeClassifier::new(path_str(xml)?).map_err(cv_err)?;
        if classifier.empty().map_err(cv_err)? {
            return Err(SmartHomeError::detection(format!("cascade {} is empty", xml.display())));
        }
        Ok(Box::new(CascadeDetector { classifier }))
    }
}

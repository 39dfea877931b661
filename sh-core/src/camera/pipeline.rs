//! Capture thread
//!
//! `Uninitialized -> ProbingDevice -> Running | Failed`, then `Stopped` once
//! shutdown is requested. The backend is resolved on the capture thread before
//! the device probe so startup never waits on model loading.

use image::RgbImage;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::annotate::{annotate, encode_jpeg};
use super::detection::{people, resolve_backend, BackendKind, DetectorFactory, ModelArtifacts, ResolvedBackend};
use super::frame::FrameStore;
use super::source::{probe_camera, CameraOpener, CameraSource};
use crate::constants::camera as cam;
use crate::error::Result;
use crate::settings::CameraSettings;
use crate::shutdown::Shutdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    ProbingDevice,
    Running { index: u32 },
    Failed,
    Stopped,
}

/// Loop timing
#[derive(Debug, Clone, Copy)]
pub struct CaptureTiming {
    pub frame_interval: Duration,
    pub read_failure_backoff: Duration,
}

impl Default for CaptureTiming {
    fn default() -> Self {
        Self {
            frame_interval: cam::FRAME_INTERVAL,
            read_failure_backoff: cam::READ_FAILURE_BACKOFF,
        }
    }
}

/// Shared view of the pipeline for request handlers
#[derive(Debug)]
pub struct CameraStatus {
    state: Mutex<PipelineState>,
    backend: Mutex<BackendKind>,
}

impl Default for CameraStatus {
    fn default() -> Self {
        Self {
            state: Mutex::new(PipelineState::Uninitialized),
            backend: Mutex::new(BackendKind::None),
        }
    }
}

impl CameraStatus {
    pub fn state(&self) -> PipelineState {
        *self.state.lock()
    }

    pub fn backend(&self) -> BackendKind {
        *self.backend.lock()
    }

    fn set_state(&self, next: PipelineState) {
        let mut state = self.state.lock();
        debug!(from = ?*state, to = ?next, "Camera pipeline transition");
        *state = next;
    }
}

/// Per-frame work: detect, annotate, encode. The previous count is kept when
/// detection itself fails.
pub fn process_frame(
    mut frame: RgbImage,
    backend: &mut ResolvedBackend,
    previous_count: u32,
    jpeg_quality: u8,
) -> Result<(Vec<u8>, u32)> {
    let mut count = previous_count;

    if let Some(detector) = backend.detector.as_mut() {
        match detector.detect(&frame) {
            Ok(hits) => {
                let found = people(backend.kind, &hits);
                annotate(&mut frame, backend.kind, &found);
                count = found.len() as u32;
            }
            Err(e) => warn!(error = %e, "Detection failed on frame"),
        }
    }

    let jpeg = encode_jpeg(&frame, jpeg_quality)?;
    Ok((jpeg, count))
}

/// Handle to the running capture thread
pub struct CameraPipeline {
    status: Arc<CameraStatus>,
    frames: Arc<FrameStore>,
    thread: Option<JoinHandle<()>>,
}

impl CameraPipeline {
    /// A pipeline that never runs; frames stay empty
    pub fn disabled(frames: Arc<FrameStore>) -> Self {
        let status = Arc::new(CameraStatus::default());
        status.set_state(PipelineState::Stopped);
        Self {
            status,
            frames,
            thread: None,
        }
    }

    pub fn start(
        opener: Box<dyn CameraOpener>,
        factory: Box<dyn DetectorFactory + Send>,
        settings: CameraSettings,
        timing: CaptureTiming,
        frames: Arc<FrameStore>,
        shutdown: Shutdown,
    ) -> std::io::Result<Self> {
        let status = Arc::new(CameraStatus::default());
        let thread_status = Arc::clone(&status);
        let thread_frames = Arc::clone(&frames);

        let thread = std::thread::Builder::new()
            .name("camera-capture".into())
            .spawn(move || {
                let artifacts = ModelArtifacts::in_dir(&settings.model_dir);
                let backend = resolve_backend(factory.as_ref(), &artifacts);
                drop(factory);
                *thread_status.backend.lock() = backend.kind;

                thread_status.set_state(PipelineState::ProbingDevice);
                let (index, mut source) = match probe_camera(opener.as_ref(), &settings.indices) {
                    Ok(found) => found,
                    Err(e) => {
                        error!(error = %e, "Camera pipeline failed, frames unavailable");
                        thread_status.set_state(PipelineState::Failed);
                        return;
                    }
                };
                drop(opener);

                if let Err(e) = source.configure(cam::FRAME_WIDTH, cam::FRAME_HEIGHT, cam::FRAME_RATE) {
                    warn!(index, error = %e, "Camera ignored capture settings");
                }

                thread_status.set_state(PipelineState::Running { index });
                info!(index, backend = %backend.kind, "Camera capture running");

                capture_loop(source.as_mut(), backend, &settings, timing, &thread_frames, &shutdown);

                thread_status.set_state(PipelineState::Stopped);
                info!(index, "Camera capture stopped");
            })?;

        Ok(Self {
            status,
            frames,
            thread: Some(thread),
        })
    }

    pub fn status(&self) -> Arc<CameraStatus> {
        Arc::clone(&self.status)
    }

    pub fn frames(&self) -> Arc<FrameStore> {
        Arc::clone(&self.frames)
    }

    /// Wait for the capture thread; shutdown must already be triggered
    pub fn join(mut self) {
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("Camera capture thread panicked");
            }
        }
    }
}

fn capture_loop(
    source: &mut dyn CameraSource,
    mut backend: ResolvedBackend,
    settings: &CameraSettings,
    timing: CaptureTiming,
    frames: &FrameStore,
    shutdown: &Shutdown,
) {
    let mut count = 0u32;

    while !shutdown.is_triggered() {
        match source.read_frame() {
            Ok(Some(frame)) if frame.width() > 0 && frame.height() > 0 => {
                match process_frame(frame, &mut backend, count, settings.jpeg_quality) {
                    Ok((jpeg, people)) => {
                        count = people;
                        frames.publish(jpeg, people);
                    }
                    Err(e) => warn!(error = %e, "Frame dropped"),
                }
            }
            Ok(_) => {
                if shutdown.sleep_blocking(timing.read_failure_backoff) {
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "Camera read failed");
                if shutdown.sleep_blocking(timing.read_failure_backoff) {
                    break;
                }
            }
        }

        if shutdown.sleep_blocking(timing.frame_interval) {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::detection::{Detection, MockDetector, NoDetectors};
    use crate::camera::source::{MockCameraSource, NoCamera};
    use crate::error::SmartHomeError;
    use std::time::Instant;

    fn wait_for(status: &CameraStatus, pred: impl Fn(PipelineState) -> bool) -> PipelineState {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let state = status.state();
            if pred(state) || Instant::now() > deadline {
                return state;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn fast() -> CaptureTiming {
        CaptureTiming {
            frame_interval: Duration::from_millis(1),
            read_failure_backoff: Duration::from_millis(1),
        }
    }

    fn settings(dir: &std::path::Path) -> CameraSettings {
        CameraSettings {
            model_dir: dir.to_path_buf(),
            ..CameraSettings::default()
        }
    }

    #[test]
    fn test_no_camera_fails_and_store_stays_empty() {
        let dir = tempfile::tempdir().unwrap();
        let frames = Arc::new(FrameStore::new());
        let shutdown = Shutdown::new();
        let pipeline = CameraPipeline::start(
            Box::new(NoCamera),
            Box::new(NoDetectors),
            settings(dir.path()),
            fast(),
            Arc::clone(&frames),
            shutdown,
        )
        .unwrap();

        let status = pipeline.status();
        assert_eq!(wait_for(&status, |s| s == PipelineState::Failed), PipelineState::Failed);
        pipeline.join();
        assert!(frames.latest().is_none());
    }

    struct FakeOpener;

    impl CameraOpener for FakeOpener {
        fn open(&self, index: u32) -> Result<Box<dyn CameraSource>> {
            if index == 0 {
                return Err(SmartHomeError::camera(0, "busy"));
            }
            let mut src = MockCameraSource::new();
            src.expect_read_frame().returning(|| Ok(Some(RgbImage::new(32, 24))));
            src.expect_configure()
                .withf(|w, h, fps| (*w, *h, *fps) == (640, 480, 30))
                .times(1)
                .returning(|_, _, _| Ok(()));
            Ok(Box::new(src))
        }
    }

    #[test]
    fn test_running_pipeline_publishes_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let frames = Arc::new(FrameStore::new());
        let shutdown = Shutdown::new();
        let pipeline = CameraPipeline::start(
            Box::new(FakeOpener),
            Box::new(NoDetectors),
            settings(dir.path()),
            fast(),
            Arc::clone(&frames),
            shutdown.clone(),
        )
        .unwrap();

        let status = pipeline.status();
        assert_eq!(
            wait_for(&status, |s| matches!(s, PipelineState::Running { .. })),
            PipelineState::Running { index: 1 }
        );
        assert_eq!(status.backend(), BackendKind::None);

        let deadline = Instant::now() + Duration::from_secs(5);
        while frames.latest().is_none() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let snap = frames.latest().unwrap();
        assert_eq!(&snap.jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(snap.person_count, 0);

        shutdown.trigger();
        pipeline.join();
        assert_eq!(status.state(), PipelineState::Stopped);
    }

    #[test]
    fn test_process_frame_counts_and_keeps_count_on_error() {
        let mut detector = MockDetector::new();
        let mut calls = 0;
        detector.expect_detect().returning(move |_| {
            calls += 1;
            if calls == 1 {
                Ok(vec![
                    Detection { x: 1, y: 1, width: 4, height: 4, confidence: 0.8 },
                    Detection { x: 8, y: 8, width: 4, height: 4, confidence: 0.3 },
                ])
            } else {
                Err(SmartHomeError::detection("inference error"))
            }
        });
        let mut backend = ResolvedBackend {
            kind: BackendKind::Accelerated(crate::camera::detection::AccelTarget::Cpu),
            detector: Some(Box::new(detector)),
        };

        let (_, count) = process_frame(RgbImage::new(16, 16), &mut backend, 0, 70).unwrap();
        assert_eq!(count, 1);
        let (jpeg, count) = process_frame(RgbImage::new(16, 16), &mut backend, count, 70).unwrap();
        assert_eq!(count, 1);
        assert!(!jpeg.is_empty());
    }
}

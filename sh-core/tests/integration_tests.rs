/*
 * Integration tests for the smart-home core
 *
 * These drive the public `SmartHome` surface and the camera pipeline against
 * in-memory hardware so the cross-module behavior can be checked without a
 * board attached.
 */

use parking_lot::Mutex;
use sh_core::camera::detection::{resolve_backend, ModelArtifacts};
use sh_core::camera::{
    AccelTarget, BackendKind, CameraOpener, CameraSource, Detection, Detector, DetectorFactory, NoCamera, NoDetectors,
};
use sh_core::error::{Result, SmartHomeError};
use sh_core::hw::Direction;
use sh_core::{
    AnalogReader, AppSettings, BlackboxDevice, CameraPipeline, CaptureTiming, FrameStore, GpioLines, Hardware,
    PipelineState, PwmOutput, Shutdown, SmartHome, SysfsGpio,
};
use sh_protocol::{Request, Response, ResponseData};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// In-memory hardware
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeGpio {
    levels: Mutex<HashMap<u32, bool>>,
}

impl GpioLines for FakeGpio {
    fn export_line(&self, _pin: u32) -> Result<()> {
        Ok(())
    }

    fn set_direction(&self, _pin: u32, _direction: Direction) -> Result<()> {
        Ok(())
    }

    fn write_line(&self, pin: u32, high: bool) -> Result<()> {
        self.levels.lock().insert(pin, high);
        Ok(())
    }
}

struct FixedAdc(i32);

impl AnalogReader for FixedAdc {
    fn read_channel(&self, _channel: u8) -> i32 {
        self.0
    }
}

#[derive(Default)]
struct CountingPwm {
    writes: Mutex<Vec<u8>>,
}

impl PwmOutput for CountingPwm {
    fn write_pwm(&self, value: u8) -> Result<()> {
        self.writes.lock().push(value);
        Ok(())
    }
}

/// Ring that stamps records on append, like the kernel side does
#[derive(Default)]
struct RingDevice {
    buf: Mutex<Vec<u8>>,
    clock: Mutex<i64>,
}

impl RingDevice {
    fn push_raw(&self, password: &str, result: i32, timestamp: i64) {
        let mut rec = [0u8; 32];
        rec[..password.len()].copy_from_slice(password.as_bytes());
        rec[20..24].copy_from_slice(&result.to_le_bytes());
        rec[24..].copy_from_slice(&timestamp.to_le_bytes());
        self.buf.lock().extend_from_slice(&rec);
    }
}

impl BlackboxDevice for RingDevice {
    fn append(&self, payload: &[u8; 24]) -> Result<()> {
        let ts = {
            let mut clock = self.clock.lock();
            *clock += 1;
            1_700_000_000 + *clock
        };
        let mut buf = self.buf.lock();
        buf.extend_from_slice(payload);
        buf.extend_from_slice(&ts.to_le_bytes());
        Ok(())
    }

    fn read_all(&self, max_bytes: usize) -> Result<Vec<u8>> {
        let buf = self.buf.lock();
        Ok(buf[..buf.len().min(max_bytes)].to_vec())
    }
}

struct Board {
    home: SmartHome,
    gpio: Arc<FakeGpio>,
    pwm: Arc<CountingPwm>,
    ring: Arc<RingDevice>,
}

fn board_with_light(light: i32) -> Board {
    let gpio = Arc::new(FakeGpio::default());
    let pwm = Arc::new(CountingPwm::default());
    let ring = Arc::new(RingDevice::default());
    let hw = Hardware {
        gpio: gpio.clone(),
        adc: Arc::new(FixedAdc(light)),
        pwm: pwm.clone(),
        blackbox: ring.clone(),
    };
    let home = SmartHome::new(hw, &AppSettings::default());
    home.configure_lines();
    Board { home, gpio, pwm, ring }
}

fn board() -> Board {
    board_with_light(300)
}

// ---------------------------------------------------------------------------
// LEDs and light
// ---------------------------------------------------------------------------

#[test]
fn test_set_led_two_reports_ordered_list() {
    let b = board();
    let resp = b.home.handle(Request::SetLed { id: 2, state: true });
    assert_eq!(resp, Response::ok(ResponseData::led(true)));

    assert_eq!(
        b.home.handle(Request::GetLeds),
        Response::ok(ResponseData::leds(vec![false, true, false, false]))
    );
}

#[test]
fn test_led_writes_reach_configured_pins() {
    let b = board();
    let settings = AppSettings::default();
    b.home.set_led(3, true);

    let pin = settings.gpio.led_pins[2];
    let expected = !settings.gpio.led_active_low;
    assert_eq!(b.gpio.levels.lock().get(&pin), Some(&expected));
}

#[test]
fn test_light_read_drives_aux_line() {
    let settings = AppSettings::default();
    let aux = settings.gpio.aux_pin;

    let dark = board_with_light(100);
    assert_eq!(dark.home.read_light(), 100);
    assert_eq!(dark.gpio.levels.lock().get(&aux), Some(&true));

    let bright = board_with_light(900);
    assert_eq!(bright.home.read_light(), 900);
    assert_eq!(bright.gpio.levels.lock().get(&aux), Some(&false));
}

#[test]
fn test_sysfs_gpio_led_bank_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::write(root.join("export"), "").unwrap();
    let settings = AppSettings::default();
    for pin in settings.gpio.led_pins.iter().chain(std::iter::once(&settings.gpio.aux_pin)) {
        let line = root.join(format!("gpio{}", pin));
        std::fs::create_dir_all(&line).unwrap();
        std::fs::write(line.join("direction"), "in").unwrap();
        std::fs::write(line.join("value"), "0").unwrap();
    }

    let hw = Hardware {
        gpio: Arc::new(SysfsGpio::new(root, Duration::ZERO)),
        adc: Arc::new(FixedAdc(-1)),
        pwm: Arc::new(CountingPwm::default()),
        blackbox: Arc::new(RingDevice::default()),
    };
    let home = SmartHome::new(hw, &settings);
    home.configure_lines();
    home.set_led(1, true);

    let line = root.join(format!("gpio{}", settings.gpio.led_pins[0]));
    assert_eq!(std::fs::read_to_string(line.join("direction")).unwrap().trim(), "out");
    let expected = if settings.gpio.led_active_low { "0" } else { "1" };
    assert_eq!(std::fs::read_to_string(line.join("value")).unwrap().trim(), expected);
    assert_eq!(home.read_light(), -1);
}

// ---------------------------------------------------------------------------
// Fan
// ---------------------------------------------------------------------------

#[test]
fn test_fan_identical_targets_write_once() {
    let b = board();
    let fan = b.home.fan();

    assert_eq!(fan.update(55.0), Some(152));
    assert_eq!(fan.update(55.0), None);
    assert_eq!(*b.pwm.writes.lock(), vec![152]);
}

#[test]
fn test_fan_manual_then_auto_keeps_reported_pwm() {
    let b = board();
    b.home.handle(Request::SetManualFan { pwm: 128 });
    b.home.handle(Request::SetAutoFan);

    let status = b.home.system_status();
    assert!(status.is_auto_fan);
    assert_eq!(status.fan_speed, 128);

    b.home.fan().update(80.0);
    assert_eq!(b.home.system_status().fan_speed, 255);
    assert_eq!(*b.pwm.writes.lock(), vec![128, 255]);
}

#[test]
fn test_fan_manual_ignores_ticks() {
    let b = board();
    b.home.set_manual_fan(-20);
    assert_eq!(b.home.fan().update(90.0), None);
    assert_eq!(b.home.system_status().fan_speed, 0);
}

// ---------------------------------------------------------------------------
// Blackbox
// ---------------------------------------------------------------------------

#[test]
fn test_blackbox_skips_zero_record_newest_first() {
    let b = board();
    b.ring.push_raw("first", 1, 100);
    b.ring.push_raw("second", 0, 200);
    b.ring.push_raw("third", 1, 300);
    b.ring.push_raw("", 0, 0);

    let logs = b.home.read_logs();
    let names: Vec<&str> = logs.iter().map(|e| e.password.as_str()).collect();
    assert_eq!(names, ["third", "second", "first"]);
    assert_eq!(logs[1].result, 0);
}

#[test]
fn test_blackbox_write_then_read() {
    let b = board();
    b.home.handle(Request::WriteLog { password: "1234".into(), success: true });
    b.home.handle(Request::WriteLog { password: "0000".into(), success: false });

    let logs = b.home.read_logs();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].password, "0000");
    assert_eq!(logs[0].result, 0);
    assert_eq!(logs[1].password, "1234");
    assert_eq!(logs[1].result, 1);
    assert!(logs[0].timestamp > logs[1].timestamp);
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[test]
fn test_auth_token_window() {
    let b = board();
    let t0 = Instant::now();
    b.home.auth().grant_at(t0);

    assert!(b.home.auth().is_valid_at(t0 + Duration::from_secs(29)));
    assert!(!b.home.auth().is_valid_at(t0 + Duration::from_secs(31)));
}

// ---------------------------------------------------------------------------
// Camera
// ---------------------------------------------------------------------------

fn fast_timing() -> CaptureTiming {
    CaptureTiming {
        frame_interval: Duration::from_millis(1),
        read_failure_backoff: Duration::from_millis(1),
    }
}

fn wait_until(deadline: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if pred() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    pred()
}

#[test]
fn test_no_camera_means_frame_not_found() {
    let b = board();
    let dir = tempfile::tempdir().unwrap();
    let settings = sh_core::settings::CameraSettings {
        model_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let pipeline = CameraPipeline::start(
        Box::new(NoCamera),
        Box::new(NoDetectors),
        settings,
        fast_timing(),
        b.home.frames(),
        Shutdown::new(),
    )
    .unwrap();

    let status = pipeline.status();
    assert!(wait_until(Duration::from_secs(5), || status.state() == PipelineState::Failed));
    pipeline.join();

    assert!(matches!(b.home.handle(Request::GetFrame), Response::NotFound { .. }));
    assert_eq!(b.home.person_count(), 0);
}

/// Always reports two confident people
struct TwoPeople;

impl Detector for TwoPeople {
    fn detect(&mut self, _frame: &image::RgbImage) -> Result<Vec<Detection>> {
        Ok(vec![
            Detection { x: 2, y: 2, width: 6, height: 6, confidence: 0.9 },
            Detection { x: 10, y: 2, width: 6, height: 6, confidence: 0.7 },
            Detection { x: 2, y: 10, width: 6, height: 6, confidence: 0.2 },
        ])
    }
}

/// Fails every target except `ok_target`; records probe order
struct ScriptedFactory {
    ok_target: Option<AccelTarget>,
    probes: Arc<Mutex<Vec<AccelTarget>>>,
}

impl DetectorFactory for ScriptedFactory {
    fn load_model(&self, _prototxt: &Path, _weights: &Path, target: AccelTarget) -> Result<Box<dyn Detector>> {
        self.probes.lock().push(target);
        if Some(target) == self.ok_target {
            Ok(Box::new(TwoPeople))
        } else {
            Err(SmartHomeError::detection(format!("{} unavailable", target)))
        }
    }

    fn load_cascade(&self, _xml: &Path) -> Result<Box<dyn Detector>> {
        Ok(Box::new(TwoPeople))
    }
}

fn model_dir(with_model: bool, with_cascade: bool) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let artifacts = ModelArtifacts::in_dir(dir.path());
    if with_model {
        std::fs::write(&artifacts.prototxt, "proto").unwrap();
        std::fs::write(&artifacts.weights, "weights").unwrap();
    }
    if with_cascade {
        std::fs::write(&artifacts.cascade, "xml").unwrap();
    }
    dir
}

#[test]
fn test_backend_selection_is_deterministic() {
    let dir = model_dir(true, true);
    let artifacts = ModelArtifacts::in_dir(dir.path());

    let mut outcomes = Vec::new();
    for _ in 0..3 {
        let probes = Arc::new(Mutex::new(Vec::new()));
        let factory = ScriptedFactory {
            ok_target: Some(AccelTarget::OpenCl),
            probes: Arc::clone(&probes),
        };
        let resolved = resolve_backend(&factory, &artifacts);
        let order = probes.lock().clone();
        outcomes.push((resolved.kind, order));
    }

    assert!(outcomes.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(outcomes[0].0, BackendKind::Accelerated(AccelTarget::OpenCl));
    assert_eq!(outcomes[0].1, [AccelTarget::Gpu, AccelTarget::Npu, AccelTarget::OpenCl]);
}

#[test]
fn test_backend_falls_back_to_cascade_then_none() {
    let probes = Arc::new(Mutex::new(Vec::new()));
    let failing = ScriptedFactory { ok_target: None, probes: Arc::clone(&probes) };

    let both = model_dir(true, true);
    let resolved = resolve_backend(&failing, &ModelArtifacts::in_dir(both.path()));
    assert_eq!(resolved.kind, BackendKind::Cascade);
    assert_eq!(probes.lock().len(), AccelTarget::PRIORITY.len());

    let empty = model_dir(false, false);
    let resolved = resolve_backend(&failing, &ModelArtifacts::in_dir(empty.path()));
    assert_eq!(resolved.kind, BackendKind::None);
    assert!(resolved.detector.is_none());
}

struct StaticOpener;

struct StaticSource;

impl CameraSource for StaticSource {
    fn read_frame(&mut self) -> Result<Option<image::RgbImage>> {
        Ok(Some(image::RgbImage::new(40, 30)))
    }

    fn configure(&mut self, _width: u32, _height: u32, _fps: u32) -> Result<()> {
        Ok(())
    }
}

impl CameraOpener for StaticOpener {
    fn open(&self, _index: u32) -> Result<Box<dyn CameraSource>> {
        Ok(Box::new(StaticSource))
    }
}

#[test]
fn test_pipeline_counts_people_and_away_check_respects_it() {
    let b = board();
    b.home.set_led(1, true);
    let dir = model_dir(true, false);
    let shutdown = Shutdown::new();
    let factory = ScriptedFactory {
        ok_target: Some(AccelTarget::Gpu),
        probes: Arc::new(Mutex::new(Vec::new())),
    };
    let settings = sh_core::settings::CameraSettings {
        model_dir: dir.path().to_path_buf(),
        ..Default::default()
    };

    let pipeline = CameraPipeline::start(
        Box::new(StaticOpener),
        Box::new(factory),
        settings,
        fast_timing(),
        b.home.frames(),
        shutdown.clone(),
    )
    .unwrap();

    assert!(wait_until(Duration::from_secs(5), || b.home.latest_frame().is_some()));
    assert_eq!(pipeline.status().backend(), BackendKind::Accelerated(AccelTarget::Gpu));
    assert_eq!(b.home.person_count(), 2);

    let report = b.home.away_check();
    assert!(!report.success);
    assert_eq!(report.people, 2);
    assert_eq!(b.home.leds(), [true, false, false, false]);

    shutdown.trigger();
    pipeline.join();
}

#[test]
fn test_frame_store_never_tears() {
    let store = Arc::new(FrameStore::new());
    let stop = Arc::new(AtomicUsize::new(0));

    let writer = {
        let store = Arc::clone(&store);
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            for i in 0..2000u32 {
                // payload encodes the count so readers can cross-check the pair
                let n = i % 7;
                store.publish(vec![n as u8; (n as usize + 1) * 16], n);
            }
            stop.store(1, Ordering::SeqCst);
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                let mut last_seq = 0;
                while stop.load(Ordering::SeqCst) == 0 {
                    if let Some(snap) = store.latest() {
                        let n = snap.person_count;
                        assert_eq!(snap.jpeg.len(), (n as usize + 1) * 16);
                        assert!(snap.jpeg.iter().all(|&b| b == n as u8));
                        assert!(snap.seq >= last_seq);
                        last_seq = snap.seq;
                    }
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for r in readers {
        r.join().unwrap();
    }
}

// ---------------------------------------------------------------------------
// Push
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_sensor_readings_reach_subscribers() {
    let b = board();
    let mut rx = b.home.subscribe();
    let hub = b.home.sensors();

    let raw = r#"{"sensorId":"livingroom","temp":21.0,"hum":40.0,"pressure":1012.5}"#;
    hub.ingest("serial", raw).unwrap();

    let event = rx.recv().await.unwrap();
    assert_eq!(event.name(), sh_protocol::SENSOR_EVENT_NAME);
    assert_eq!(event.payload(), raw);
}

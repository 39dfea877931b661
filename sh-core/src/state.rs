//! The smart-home surface exposed to the HTTP/push layer
//!
//! `SmartHome` owns one instance of every hardware resource and is shared by
//! `Arc` between request handlers and background workers. Each resource has its
//! own lock; nothing here serializes unrelated operations.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::auth::AuthToken;
use crate::blackbox::{Blackbox, BlackboxDevice, CharDevice};
use crate::camera::{FrameSnapshot, FrameStore};
use crate::engine::{FanController, FanCurve};
use crate::hw::{AnalogReader, GpioLines, LedBank, LightSensor, Mcp3008, PwmOutput, SysfsGpio, SysfsPwm};
use crate::sensors::{CommandSink, SensorHub};
use crate::settings::AppSettings;
use sh_protocol::{AwayReport, LogEntry, PushEvent, Request, Response, ResponseData, SystemStatus, LED_COUNT};

/// Hardware handles the surface is built from
pub struct Hardware {
    pub gpio: Arc<dyn GpioLines>,
    pub adc: Arc<dyn AnalogReader>,
    pub pwm: Arc<dyn PwmOutput>,
    pub blackbox: Arc<dyn BlackboxDevice>,
}

impl Hardware {
    /// Open the real devices named in `settings`. Missing devices degrade
    /// their feature; nothing here fails.
    pub fn open(settings: &AppSettings) -> Self {
        Self {
            gpio: Arc::new(SysfsGpio::new(&settings.gpio.root, settings.gpio.export_settle())),
            adc: Arc::new(Mcp3008::open(&settings.adc.spi_device, settings.adc.clock_hz)),
            pwm: Arc::new(SysfsPwm::new(&settings.fan.pwm_path)),
            blackbox: Arc::new(CharDevice::open(&settings.blackbox.device)),
        }
    }
}

pub struct SmartHome {
    leds: Arc<LedBank>,
    light: LightSensor,
    fan: Arc<FanController>,
    frames: Arc<FrameStore>,
    blackbox: Blackbox,
    auth: AuthToken,
    sensors: SensorHub,
    command_sinks: Mutex<Vec<Arc<dyn CommandSink>>>,
}

impl SmartHome {
    pub fn new(hw: Hardware, settings: &AppSettings) -> Self {
        let leds = Arc::new(LedBank::new(
            Arc::clone(&hw.gpio),
            settings.gpio.led_pins,
            settings.gpio.led_active_low,
        ));
        let light = LightSensor::new(
            hw.adc,
            hw.gpio,
            settings.adc.light_channel,
            settings.gpio.aux_pin,
            settings.adc.light_threshold,
            settings.gpio.aux_active_when_dark,
        );
        let curve = FanCurve::new(
            settings.fan.low_threshold_c,
            settings.fan.high_threshold_c,
            settings.fan.min_duty,
        );

        Self {
            leds,
            light,
            fan: Arc::new(FanController::new(hw.pwm, curve)),
            frames: Arc::new(FrameStore::new()),
            blackbox: Blackbox::new(hw.blackbox),
            auth: AuthToken::new(settings.auth.token_ttl()),
            sensors: SensorHub::default(),
            command_sinks: Mutex::new(Vec::new()),
        }
    }

    /// Export and initialize every output line
    pub fn configure_lines(&self) {
        self.leds.configure();
        self.light.configure();
        info!("Hardware lines configured");
    }

    // ---- LEDs -------------------------------------------------------------

    pub fn set_led(&self, id: u32, on: bool) -> bool {
        self.leds.set(id, on)
    }

    pub fn led(&self, id: u32) -> Option<bool> {
        self.leds.get(id)
    }

    pub fn leds(&self) -> [bool; LED_COUNT] {
        self.leds.states()
    }

    pub fn blink(&self, targets: Vec<u32>, count: u32, interval: Duration) {
        self.leds.blink(targets, count, interval);
    }

    // ---- Light / fan ------------------------------------------------------

    pub fn read_light(&self) -> i32 {
        self.light.read()
    }

    pub fn fan(&self) -> Arc<FanController> {
        Arc::clone(&self.fan)
    }

    pub fn system_status(&self) -> SystemStatus {
        self.fan.status()
    }

    pub fn set_manual_fan(&self, pwm: i32) -> u8 {
        self.fan.set_manual(pwm)
    }

    pub fn set_auto_fan(&self) {
        self.fan.set_auto();
    }

    // ---- Camera -----------------------------------------------------------

    /// Store the capture thread publishes into
    pub fn frames(&self) -> Arc<FrameStore> {
        Arc::clone(&self.frames)
    }

    pub fn latest_frame(&self) -> Option<Arc<FrameSnapshot>> {
        self.frames.latest()
    }

    pub fn person_count(&self) -> u32 {
        self.frames.person_count()
    }

    /// Switch everything off when nobody is in view
    pub fn away_check(&self) -> AwayReport {
        let people = self.person_count();
        if people > 0 {
            debug!(people, "Away check: occupied");
            return AwayReport {
                success: false,
                people,
                message: format!("Detected {} people, system stays on.", people),
            };
        }

        self.leds.cancel_blink();
        self.leds.all_off();
        info!("Away check: nobody present, lights off");
        AwayReport {
            success: true,
            people: 0,
            message: "No one detected, all lights switched off.".into(),
        }
    }

    // ---- Blackbox ---------------------------------------------------------

    pub fn write_log(&self, password: &str, success: bool) {
        self.blackbox.write_log(password, success);
    }

    pub fn read_logs(&self) -> Vec<LogEntry> {
        self.blackbox.read_logs()
    }

    pub fn kernel_messages(&self) -> Vec<String> {
        self.blackbox.kernel_messages()
    }

    // ---- Authorization ----------------------------------------------------

    pub fn authorize(&self) {
        self.auth.grant();
        info!("Authorization granted");
    }

    pub fn is_authorized(&self) -> bool {
        self.auth.is_valid()
    }

    pub fn auth(&self) -> &AuthToken {
        &self.auth
    }

    // ---- Push -------------------------------------------------------------

    pub fn sensors(&self) -> SensorHub {
        self.sensors.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.sensors.subscribe()
    }

    /// Register an outbound link for `send_command`
    pub fn attach_command_sink(&self, sink: Arc<dyn CommandSink>) {
        info!(link = sink.link(), "Command link attached");
        self.command_sinks.lock().push(sink);
    }

    /// Forward `command` to every attached link. Returns how many accepted it.
    pub fn send_command(&self, command: &str) -> usize {
        let sinks: Vec<Arc<dyn CommandSink>> = self.command_sinks.lock().clone();
        sinks
            .iter()
            .filter(|sink| match sink.send_command(command) {
                Ok(()) => true,
                Err(e) => {
                    warn!(link = sink.link(), error = %e, "Command not delivered");
                    false
                }
            })
            .count()
    }

    /// Stop background work owned by the surface
    pub fn shutdown(&self) {
        self.leds.cancel_blink();
    }

    /// Dispatch one request. `Blink` spawns onto the current tokio runtime.
    pub fn handle(&self, request: Request) -> Response {
        if let Err(e) = request.validate() {
            debug!(request = request.type_name(), error = %e, "Request rejected");
            return Response::error(e);
        }

        match request {
            Request::SetLed { id, state } => {
                self.set_led(id, state);
                Response::ok(ResponseData::led(state))
            }
            Request::GetLed { id } => match self.led(id) {
                Some(on) => Response::ok(ResponseData::led(on)),
                None => Response::not_found(format!("LED {} does not exist", id)),
            },
            Request::GetLeds => Response::ok(ResponseData::leds(self.leds().to_vec())),
            Request::ReadLight => Response::ok(ResponseData::light(self.read_light())),
            Request::GetSystemStatus => Response::ok(ResponseData::status(self.system_status())),
            Request::SetManualFan { pwm } => {
                let applied = self.set_manual_fan(pwm);
                Response::ok(ResponseData::message(format!("Fan set to {}", applied)))
            }
            Request::SetAutoFan => {
                self.set_auto_fan();
                Response::ok(ResponseData::message("Fan in automatic mode"))
            }
            Request::GetFrame => match self.latest_frame() {
                Some(snapshot) => Response::ok(ResponseData::frame(snapshot.jpeg.clone())),
                None => Response::not_found("No camera frame available"),
            },
            Request::WriteLog { password, success } => {
                self.write_log(&password, success);
                Response::ok(ResponseData::none())
            }
            Request::ReadLogs => Response::ok(ResponseData::logs(self.read_logs())),
            Request::KernelMessages => Response::ok(ResponseData::kernel(self.kernel_messages())),
            Request::Authorize => {
                self.authorize();
                Response::ok(ResponseData::authorized(true))
            }
            Request::AuthStatus => Response::ok(ResponseData::authorized(self.is_authorized())),
            Request::AwayCheck => Response::ok(ResponseData::away(self.away_check())),
            Request::Blink { targets, count, interval_ms } => {
                self.blink(targets, count, Duration::from_millis(interval_ms));
                Response::ok(ResponseData::message("Blink sequence started"))
            }
            Request::SendCommand { command } => match self.send_command(&command) {
                0 => Response::error("No sensor link accepted the command"),
                n => Response::ok(ResponseData::message(format!("Command sent on {} link(s)", n))),
            },
        }
    }
}

//! Four-channel LED bank
//!
//! Channels are addressed 1..=4 by callers. The in-memory state records the
//! last level requested for each channel; a failed line write is logged and
//! the recorded state is kept anyway.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::gpio::{Direction, GpioLines};
use sh_protocol::LED_COUNT;

pub struct LedBank {
    gpio: Arc<dyn GpioLines>,
    pins: [u32; LED_COUNT],
    active_low: bool,
    states: Mutex<[bool; LED_COUNT]>,
    blink: Mutex<Option<Blink>>,
    generation: AtomicU64,
}

/// A running blink task and the channels it toggles
struct Blink {
    generation: u64,
    handle: JoinHandle<()>,
    targets: Vec<u32>,
}

impl Blink {
    /// Abort the task if still running. Returns true when it was interrupted.
    fn stop(self) -> bool {
        if self.handle.is_finished() {
            return false;
        }
        self.handle.abort();
        true
    }
}

impl LedBank {
    pub fn new(gpio: Arc<dyn GpioLines>, pins: [u32; LED_COUNT], active_low: bool) -> Self {
        Self {
            gpio,
            pins,
            active_low,
            states: Mutex::new([false; LED_COUNT]),
            blink: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Export every channel as an output and switch it off
    pub fn configure(&self) {
        for (idx, &pin) in self.pins.iter().enumerate() {
            let result = self
                .gpio
                .export_line(pin)
                .and_then(|_| self.gpio.set_direction(pin, Direction::Out));
            if let Err(e) = result {
                warn!(led = idx + 1, pin, error = %e, "LED line setup failed");
            }
            self.drive(idx, false);
        }
        info!(pins = ?self.pins, active_low = self.active_low, "LED bank configured");
    }

    fn index(id: u32) -> Option<usize> {
        let idx = (id as usize).checked_sub(1)?;
        (idx < LED_COUNT).then_some(idx)
    }

    fn drive(&self, idx: usize, on: bool) {
        let pin = self.pins[idx];
        let high = on != self.active_low;
        if let Err(e) = self.gpio.write_line(pin, high) {
            warn!(led = idx + 1, pin, error = %e, "LED write failed");
        }
        self.states.lock()[idx] = on;
    }

    /// Switch channel `id` (1-based). Returns false for an unknown channel.
    pub fn set(&self, id: u32, on: bool) -> bool {
        match Self::index(id) {
            Some(idx) => {
                self.drive(idx, on);
                debug!(led = id, on, "LED set");
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: u32) -> Option<bool> {
        Self::index(id).map(|idx| self.states.lock()[idx])
    }

    pub fn states(&self) -> [bool; LED_COUNT] {
        *self.states.lock()
    }

    pub fn all_off(&self) {
        for idx in 0..LED_COUNT {
            self.drive(idx, false);
        }
    }

    /// Start a blink sequence on `targets`, replacing any running one.
    ///
    /// Each cycle switches the targets on, waits `interval`, switches them off
    /// and waits again. Unknown channel ids are ignored. A superseded sequence
    /// has its own channels switched off. Must be called from within a tokio
    /// runtime.
    pub fn blink(self: &Arc<Self>, targets: Vec<u32>, count: u32, interval: Duration) {
        let targets: Vec<u32> = targets.into_iter().filter(|id| Self::index(*id).is_some()).collect();
        let bank = Arc::clone(self);

        let mut slot = self.blink.lock();
        if let Some(previous) = slot.take() {
            let stale = previous.targets.clone();
            if previous.stop() {
                for id in stale {
                    self.set(id, false);
                }
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let task_targets = targets.clone();
        let handle = tokio::spawn(async move {
            for _ in 0..count {
                if !bank.blink_step(generation, &task_targets, true) {
                    return;
                }
                tokio::time::sleep(interval).await;
                if !bank.blink_step(generation, &task_targets, false) {
                    return;
                }
                tokio::time::sleep(interval).await;
            }
            debug!(targets = ?task_targets, count, "Blink sequence finished");
        });
        *slot = Some(Blink { generation, handle, targets });
    }

    /// Drive `targets` only while `generation` is still the current sequence.
    /// Holding the slot lock orders these writes against supersede and cancel.
    fn blink_step(&self, generation: u64, targets: &[u32], on: bool) -> bool {
        let slot = self.blink.lock();
        if slot.as_ref().map(|b| b.generation) != Some(generation) {
            return false;
        }
        for &id in targets {
            self.set(id, on);
        }
        true
    }

    pub fn is_blinking(&self) -> bool {
        self.blink.lock().as_ref().is_some_and(|b| !b.handle.is_finished())
    }

    /// Abort a running blink sequence and leave its channels off
    pub fn cancel_blink(&self) {
        if let Some(blink) = self.blink.lock().take() {
            if blink.stop() {
                self.all_off();
            }
        }
    }
}

impl Drop for LedBank {
    fn drop(&mut self) {
        if let Some(blink) = self.blink.get_mut().take() {
            blink.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::gpio::MockGpioLines;
    use crate::hw::SysfsGpio;
    use mockall::predicate::eq;

    const PINS: [u32; 4] = [396, 466, 397, 255];

    fn accepting_gpio() -> MockGpioLines {
        let mut gpio = MockGpioLines::new();
        gpio.expect_export_line().returning(|_| Ok(()));
        gpio.expect_set_direction().returning(|_, _| Ok(()));
        gpio.expect_write_line().returning(|_, _| Ok(()));
        gpio
    }

    #[test]
    fn test_set_is_one_based() {
        let bank = LedBank::new(Arc::new(accepting_gpio()), PINS, true);
        assert!(bank.set(2, true));
        assert_eq!(bank.states(), [false, true, false, false]);
        assert_eq!(bank.get(2), Some(true));
    }

    #[test]
    fn test_unknown_channel_rejected() {
        let bank = LedBank::new(Arc::new(accepting_gpio()), PINS, true);
        assert!(!bank.set(0, true));
        assert!(!bank.set(5, true));
        assert_eq!(bank.get(0), None);
        assert_eq!(bank.states(), [false; 4]);
    }

    #[test]
    fn test_active_low_drives_line_low_for_on() {
        let mut gpio = MockGpioLines::new();
        gpio.expect_write_line()
            .with(eq(466), eq(false))
            .times(1)
            .returning(|_, _| Ok(()));
        let bank = LedBank::new(Arc::new(gpio), PINS, true);
        bank.set(2, true);
    }

    #[test]
    fn test_active_high_drives_line_high_for_on() {
        let mut gpio = MockGpioLines::new();
        gpio.expect_write_line()
            .with(eq(396), eq(true))
            .times(1)
            .returning(|_, _| Ok(()));
        let bank = LedBank::new(Arc::new(gpio), PINS, false);
        bank.set(1, true);
    }

    #[test]
    fn test_failed_write_still_records_state() {
        let mut gpio = MockGpioLines::new();
        gpio.expect_write_line()
            .returning(|pin, _| Err(crate::error::SmartHomeError::gpio(pin, "write", "EACCES")));
        let bank = LedBank::new(Arc::new(gpio), PINS, true);
        assert!(bank.set(3, true));
        assert_eq!(bank.get(3), Some(true));
    }

    #[test]
    fn test_configure_on_fake_sysfs() {
        let dir = tempfile::tempdir().unwrap();
        for pin in PINS {
            std::fs::create_dir(dir.path().join(format!("gpio{}", pin))).unwrap();
        }
        let gpio = Arc::new(SysfsGpio::new(dir.path(), Duration::ZERO));
        let bank = LedBank::new(gpio, PINS, true);
        bank.configure();

        for pin in PINS {
            let pin_dir = dir.path().join(format!("gpio{}", pin));
            assert_eq!(std::fs::read_to_string(pin_dir.join("direction")).unwrap(), "out");
            assert_eq!(std::fs::read_to_string(pin_dir.join("value")).unwrap(), "1");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_blink_ends_with_targets_off() {
        let bank = Arc::new(LedBank::new(Arc::new(accepting_gpio()), PINS, true));
        bank.blink(vec![1, 4, 9], 3, Duration::from_millis(100));
        assert!(bank.is_blinking());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(bank.states(), [true, false, false, true]);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!bank.is_blinking());
        assert_eq!(bank.states(), [false; 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_blink_supersedes_previous() {
        let bank = Arc::new(LedBank::new(Arc::new(accepting_gpio()), PINS, true));
        bank.blink(vec![1], 50, Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(bank.get(1), Some(true));

        bank.blink(vec![2], 1, Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(bank.states(), [false, true, false, false]);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(bank.states(), [false; 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_blink_mid_on_phase_ends_dark() {
        let bank = Arc::new(LedBank::new(Arc::new(accepting_gpio()), PINS, true));
        bank.blink(vec![1], 50, Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(bank.states(), [true, false, false, false]);

        bank.blink(vec![2], 1, Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!bank.is_blinking());
        assert_eq!(bank.states(), [false; 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseding_blink_keeps_unrelated_channels() {
        let bank = Arc::new(LedBank::new(Arc::new(accepting_gpio()), PINS, true));
        bank.set(3, true);
        bank.blink(vec![1], 50, Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(30)).await;

        bank.blink(vec![2], 1, Duration::from_millis(20));
        assert_eq!(bank.states(), [false, false, true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_blink_leaves_channels_off() {
        let bank = Arc::new(LedBank::new(Arc::new(accepting_gpio()), PINS, true));
        bank.blink(vec![1, 2, 3, 4], 10, Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(bank.states(), [true; 4]);

        bank.cancel_blink();
        assert!(!bank.is_blinking());
        assert_eq!(bank.states(), [false; 4]);
    }
}

//! Fan Control Loop
//!
//! Reads the CPU thermal zone on a fixed tick and feeds the fan controller.
//! A failed temperature read skips the tick; the duty stays where it was.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use sh_core::{read_temperature, FanController, Shutdown};

/// Consecutive read failures between repeated error logs
const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// One tick: blocking sysfs read off the async workers, then the controller
pub async fn tick(fan: &Arc<FanController>, thermal_path: &Path) -> Result<Option<u8>, String> {
    let path = thermal_path.to_path_buf();
    let temp = tokio::task::spawn_blocking(move || read_temperature(&path))
        .await
        .map_err(|e| format!("temperature task failed: {}", e))?
        .map_err(|e| e.to_string())?;

    let fan = Arc::clone(fan);
    tokio::task::spawn_blocking(move || fan.update(temp))
        .await
        .map_err(|e| format!("fan update task failed: {}", e))
}

pub async fn run_control_loop(
    fan: Arc<FanController>,
    thermal_path: PathBuf,
    interval: Duration,
    shutdown: Shutdown,
) {
    info!(path = %thermal_path.display(), ?interval, "Fan control loop starting");

    let mut consecutive_errors: u32 = 0;

    loop {
        if shutdown.is_triggered() {
            break;
        }

        match tick(&fan, &thermal_path).await {
            Ok(written) => {
                if consecutive_errors > 0 {
                    debug!("Fan loop recovered after {} errors", consecutive_errors);
                    consecutive_errors = 0;
                }
                if let Some(pwm) = written {
                    debug!(pwm, "Fan tick wrote new duty");
                }
            }
            Err(e) => {
                consecutive_errors += 1;
                if consecutive_errors == 1 || consecutive_errors % MAX_CONSECUTIVE_ERRORS == 0 {
                    error!(count = consecutive_errors, error = %e, "Fan tick skipped");
                } else {
                    warn!(error = %e, "Fan tick skipped");
                }
            }
        }

        if shutdown.sleep(interval).await {
            break;
        }
    }

    info!("Fan control loop stopped");
}

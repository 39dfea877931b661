//! Smart-home daemon (smarthomed)
//!
//! Owns the board's hardware and runs every background worker:
//!
//! - **Fan loop**: thermal zone → curve → PWM, with manual override
//! - **Camera**: capture thread with person detection, latest frame in memory
//! - **Ingestion**: MQTT and RFCOMM serial sensor readings pushed to subscribers
//! - **Bridge**: Unix sockets the HTTP/push layer uses to reach the hardware
//!
//! Nothing in the hardware layer is fatal. A missing device disables its
//! feature and the rest keeps running.

mod fan_control;
mod ingest;
mod server;

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use sh_core::camera::{self, CameraPipeline, CaptureTiming};
use sh_core::constants::paths;
use sh_core::{load_settings, load_settings_from, AppSettings, Hardware, Shutdown, SmartHome};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable holding the log filter
const LOG_ENV: &str = "SMARTHOME_LOG";

/// Interval of the periodic link status line
const STATUS_INTERVAL: Duration = Duration::from_secs(60);

// ============================================================================
// CLI
// ============================================================================

#[derive(Debug, Default, PartialEq)]
struct Options {
    config: Option<PathBuf>,
    socket: Option<PathBuf>,
    event_socket: Option<PathBuf>,
}

#[derive(Debug, PartialEq)]
enum Command {
    Run(Options),
    Help,
    Version,
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let mut opts = Options::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "-v" | "--version" => return Ok(Command::Version),
            flag @ ("-c" | "--config" | "-s" | "--socket" | "-e" | "--events") => {
                i += 1;
                let value = args
                    .get(i)
                    .map(PathBuf::from)
                    .ok_or_else(|| format!("{} requires a path argument", flag))?;
                match flag {
                    "-c" | "--config" => opts.config = Some(value),
                    "-s" | "--socket" => opts.socket = Some(value),
                    _ => opts.event_socket = Some(value),
                }
            }
            arg => return Err(format!("Unknown argument: {}", arg)),
        }
        i += 1;
    }

    Ok(Command::Run(opts))
}

fn print_help() {
    eprintln!("smarthomed {} - smart-home hardware daemon", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    smarthomed [OPTIONS]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -c, --config PATH   Settings file (default: $SMARTHOME_CONFIG, {})", paths::SYSTEM_CONFIG);
    eprintln!("    -s, --socket PATH   Control socket (default: {})", paths::CONTROL_SOCKET);
    eprintln!("    -e, --events PATH   Event socket (default: {})", paths::EVENT_SOCKET);
    eprintln!("    -v, --version       Print version");
    eprintln!("    -h, --help          Print this help");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    SMARTHOME_LOG       Log filter (trace, debug, info, warn, error)");
    eprintln!("    SMARTHOME_CONFIG    Settings file path");
}

// ============================================================================
// Logging
// ============================================================================

/// Journal when systemd is present, stdout otherwise. Returns true for journal.
fn init_logging() -> bool {
    let log_level = std::env::var(LOG_ENV).unwrap_or_else(|_| "info".to_string());

    if std::path::Path::new("/run/systemd/journal/socket").exists() {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                use tracing_subscriber::prelude::*;
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(&log_level))
                    .init();
                return true;
            }
            Err(e) => eprintln!("Failed to create journald layer: {}, falling back to stdout", e),
        }
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(&log_level)
        .init();
    false
}

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("PANIC at {}: {}", location, message);
    }));
}

fn load(opts: &Options) -> anyhow::Result<AppSettings> {
    let settings = match &opts.config {
        Some(path) => load_settings_from(path).with_context(|| format!("loading {}", path.display()))?,
        None => load_settings().context("loading settings")?,
    };
    settings.validate().context("invalid settings")?;
    Ok(settings)
}

/// Run a blocking join off the async workers. Returns false if it panicked.
async fn join_blocking<F>(what: &str, join: F) -> bool
where
    F: FnOnce() + Send + 'static,
{
    match tokio::task::spawn_blocking(join).await {
        Ok(()) => true,
        Err(e) => {
            error!("Joining {} failed: {}", what, e);
            false
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    install_panic_hook();

    let args: Vec<String> = std::env::args().collect();
    let opts = match parse_args(&args) {
        Ok(Command::Help) => {
            print_help();
            return Ok(());
        }
        Ok(Command::Version) => {
            println!("smarthomed {}", VERSION);
            return Ok(());
        }
        Ok(Command::Run(opts)) => opts,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(2);
        }
    };

    let journald = init_logging();
    info!("STARTUP: smarthomed {} starting", VERSION);
    info!("STARTUP: Logging to {}", if journald { "systemd journal" } else { "stdout" });

    let settings = load(&opts)?;

    // Signal handling
    let shutdown = Shutdown::new();
    let signal = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("SIGNAL: Received SIGINT/SIGTERM - initiating shutdown");
        signal.trigger();
    }) {
        warn!("Failed to set signal handler: {}. Shutdown via signals may not work cleanly.", e);
    }

    // Hardware
    let home = Arc::new(SmartHome::new(Hardware::open(&settings), &settings));
    home.configure_lines();

    // Fan loop
    let mut tasks = Vec::new();
    tasks.push(tokio::spawn(fan_control::run_control_loop(
        home.fan(),
        settings.fan.thermal_path.clone(),
        settings.fan.tick_interval(),
        shutdown.clone(),
    )));

    // Camera
    let camera = if settings.camera.enabled {
        CameraPipeline::start(
            camera::default_opener(),
            camera::default_detectors(),
            settings.camera.clone(),
            CaptureTiming::default(),
            home.frames(),
            shutdown.clone(),
        )
        .context("spawning camera thread")?
    } else {
        info!("Camera disabled by settings");
        CameraPipeline::disabled(home.frames())
    };

    // Sensor ingestion
    let mut links = Vec::new();
    if settings.mqtt.enabled {
        let mqtt = ingest::mqtt::spawn(settings.mqtt.clone(), home.sensors(), shutdown.clone());
        home.attach_command_sink(Arc::new(mqtt.sender));
        links.push(mqtt.status);
        tasks.push(mqtt.handle);
    }
    let mut serial_thread = None;
    if settings.serial.enabled {
        match ingest::serial::spawn(settings.serial.clone(), home.sensors(), shutdown.clone()) {
            Ok(serial) => {
                home.attach_command_sink(Arc::new(serial.sender));
                links.push(serial.status);
                serial_thread = Some(serial.handle);
            }
            Err(e) => error!("Could not start serial worker: {}", e),
        }
    }

    // Bridge sockets
    let control_path = opts.socket.unwrap_or_else(|| PathBuf::from(paths::CONTROL_SOCKET));
    let event_path = opts.event_socket.unwrap_or_else(|| PathBuf::from(paths::EVENT_SOCKET));
    let control = tokio::spawn(server::run_control_server(control_path, Arc::clone(&home), shutdown.clone()));
    let events = tokio::spawn(server::run_event_server(event_path, Arc::clone(&home), shutdown.clone()));

    info!("STARTUP: PID {}", std::process::id());

    // Run until signalled
    while !shutdown.sleep(STATUS_INTERVAL).await {
        ingest::log_links(&links);
    }

    info!("SHUTDOWN: stopping workers");
    for (name, server) in [("control", control), ("event", events)] {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("{} server error: {}", name, e),
            Err(e) => error!("{} server task failed: {}", name, e),
        }
    }
    for task in tasks {
        if let Err(e) = task.await {
            error!("Worker task failed: {}", e);
        }
    }
    join_blocking("worker threads", move || {
        camera.join();
        if let Some(handle) = serial_thread {
            if handle.join().is_err() {
                error!("Serial worker panicked");
            }
        }
    })
    .await;
    home.shutdown();

    info!("SHUTDOWN: smarthomed terminated gracefully");
    Ok(())
}

//! Serial (RFCOMM) ingestion worker
//!
//! Runs on its own thread because the port API is blocking. The device node
//! only appears once the Bluetooth peer binds, so the worker polls for the
//! path before opening it. Reads time out every second; a timeout is "no data
//! this cycle", anything else drops the link.

use parking_lot::Mutex;
use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

use sh_core::constants::ingest;
use sh_core::error::{Result, SmartHomeError};
use sh_core::settings::SerialSettings;
use sh_core::{CommandSink, LinkState, LinkStatus, SensorHub, Shutdown};

/// Splits a byte stream into newline-terminated lines, keeping the tail
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Upper bound for a line without terminator before it is discarded
    const MAX_PENDING: usize = 4096;

    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line).trim().to_string();
            if !text.is_empty() {
                lines.push(text);
            }
        }

        if self.pending.len() > Self::MAX_PENDING {
            warn!(bytes = self.pending.len(), "Discarding unterminated serial data");
            self.pending.clear();
        }
        lines
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

type SharedPort = Arc<Mutex<Option<Box<dyn SerialPort>>>>;

/// Writes commands to the connected peer
#[derive(Clone)]
pub struct SerialSender {
    path: PathBuf,
    writer: SharedPort,
    status: LinkStatus,
}

impl CommandSink for SerialSender {
    fn link(&self) -> &'static str {
        self.status.name()
    }

    fn send_command(&self, command: &str) -> Result<()> {
        let mut slot = self.writer.lock();
        let port = slot.as_mut().ok_or_else(|| SmartHomeError::Serial {
            path: self.path.clone(),
            reason: "not connected".into(),
        })?;
        write_command(port, command).map_err(|e| SmartHomeError::Serial {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }
}

fn write_command<W: Write + ?Sized>(writer: &mut W, command: &str) -> io::Result<()> {
    writer.write_all(command.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()
}

fn is_idle(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Read until the link drops or shutdown. Ok means shutdown.
pub fn stream<R: Read + ?Sized>(reader: &mut R, hub: &SensorHub, shutdown: &Shutdown) -> io::Result<()> {
    let mut lines = LineBuffer::default();
    let mut buf = [0u8; 256];

    while !shutdown.is_triggered() {
        match reader.read(&mut buf) {
            Ok(0) => return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed the link")),
            Ok(n) => {
                for line in lines.push(&buf[..n]) {
                    let _ = hub.ingest("serial", &line);
                }
            }
            Err(e) if is_idle(&e) => {
                if shutdown.sleep_blocking(ingest::SERIAL_POLL_GAP) {
                    break;
                }
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn open_port(path: &Path, baud: u32) -> Result<Box<dyn SerialPort>> {
    serialport::new(path.to_string_lossy(), baud)
        .timeout(ingest::READ_TIMEOUT)
        .open()
        .map_err(|e| SmartHomeError::Serial {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

pub struct SerialWorker {
    pub handle: JoinHandle<()>,
    pub sender: SerialSender,
    pub status: LinkStatus,
}

pub fn spawn(settings: SerialSettings, hub: SensorHub, shutdown: Shutdown) -> io::Result<SerialWorker> {
    let status = LinkStatus::new("serial");
    let writer: SharedPort = Arc::new(Mutex::new(None));
    let sender = SerialSender {
        path: settings.device.clone(),
        writer: Arc::clone(&writer),
        status: status.clone(),
    };

    let thread_status = status.clone();
    let handle = std::thread::Builder::new()
        .name("serial-ingest".into())
        .spawn(move || run(&settings, &hub, &writer, &thread_status, &shutdown))?;

    Ok(SerialWorker { handle, sender, status })
}

fn run(settings: &SerialSettings, hub: &SensorHub, writer: &SharedPort, status: &LinkStatus, shutdown: &Shutdown) {
    let path = settings.device.as_path();
    info!(path = %path.display(), baud = settings.baud, "Serial worker starting");
    let mut waiting_logged = false;

    while !shutdown.is_triggered() {
        if !path.exists() {
            if !waiting_logged {
                debug!(path = %path.display(), "Waiting for serial device");
                waiting_logged = true;
            }
            if shutdown.sleep_blocking(ingest::RECONNECT_BACKOFF) {
                break;
            }
            continue;
        }
        waiting_logged = false;

        status.set(LinkState::Connecting);
        let mut port = match open_port(path, settings.baud) {
            Ok(port) => port,
            Err(e) => {
                warn!(error = %e, "Serial open failed");
                status.set(LinkState::Disconnected);
                if shutdown.sleep_blocking(ingest::RECONNECT_BACKOFF) {
                    break;
                }
                continue;
            }
        };

        match port.try_clone() {
            Ok(clone) => *writer.lock() = Some(clone),
            Err(e) => warn!(error = %e, "Serial port not writable, commands disabled"),
        }
        status.set(LinkState::Streaming);
        info!(path = %path.display(), "Serial link streaming");

        let result = stream(port.as_mut(), hub, shutdown);
        *writer.lock() = None;
        status.set(LinkState::Disconnected);

        match result {
            Ok(()) => break,
            Err(e) => {
                warn!(error = %e, backoff = ?ingest::RECONNECT_BACKOFF, "Serial link dropped, retrying");
                if shutdown.sleep_blocking(ingest::RECONNECT_BACKOFF) {
                    break;
                }
            }
        }
    }

    status.set(LinkState::Disconnected);
    info!("Serial worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;

    const READING: &str = r#"{"sensorId":"esp32_bt_01","temp":24.5,"hum":61.0}"#;

    #[test]
    fn test_line_buffer_keeps_partial_tail() {
        let mut lines = LineBuffer::default();
        assert!(lines.push(b"{\"a\":").is_empty());
        assert_eq!(lines.push(b"1}\r\n{\"b\""), vec!["{\"a\":1}".to_string()]);
        assert_eq!(lines.push(b":2}\n\n"), vec!["{\"b\":2}".to_string()]);
        lines.clear();
        assert!(lines.push(b"x").is_empty());
    }

    /// Scripted port: each entry is one read result
    struct Script(VecDeque<io::Result<Vec<u8>>>);

    impl Read for Script {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(e)) => Err(e),
                None => Ok(0),
            }
        }
    }

    #[test]
    fn test_stream_pushes_lines_across_timeouts() {
        let hub = SensorHub::default();
        let mut rx = hub.subscribe();
        let half = READING.len() / 2;
        let mut port = Script(VecDeque::from(vec![
            Ok(READING.as_bytes()[..half].to_vec()),
            Err(io::Error::new(io::ErrorKind::TimedOut, "timeout")),
            Ok(format!("{}\n", &READING[half..]).into_bytes()),
            Ok(b"garbage\n".to_vec()),
        ]));

        let err = stream(&mut port, &hub, &Shutdown::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        assert_eq!(rx.try_recv().unwrap().payload(), READING);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stream_stops_on_shutdown() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let mut port = Script(VecDeque::new());
        assert!(stream(&mut port, &SensorHub::default(), &shutdown).is_ok());
    }

    #[test]
    fn test_write_command_appends_newline() {
        let mut out = Vec::new();
        write_command(&mut out, "LED:1").unwrap();
        assert_eq!(out, b"LED:1\n");
    }

    #[test]
    fn test_worker_waits_for_missing_device() {
        let dir = tempfile::tempdir().unwrap();
        let settings = SerialSettings {
            device: dir.path().join("rfcomm0"),
            ..SerialSettings::default()
        };
        let shutdown = Shutdown::new();
        let worker = spawn(settings, SensorHub::default(), shutdown.clone()).unwrap();

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(worker.status.get(), LinkState::Disconnected);
        assert!(worker.sender.send_command("PING").is_err());

        shutdown.trigger();
        worker.handle.join().unwrap();
    }
}

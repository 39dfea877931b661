//! Unix Socket Bridge
//!
//! The HTTP/push layer runs as a separate, unprivileged process and reaches
//! the hardware through two sockets:
//!
//! - **control**: one JSON [`Request`] per line in, one JSON [`Response`] per
//!   line out
//! - **events**: write-only; every connected client receives each push event
//!   as a JSON [`PushMessage`] line, with no replay for late connections
//!
//! # Limits
//! - Maximum concurrent connections per socket
//! - Bounded request lines (oversized lines close the connection)
//! - Read/write timeouts
//! - Peer credentials logged for every connection

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use sh_core::{Shutdown, SmartHome};
use sh_protocol::{PushMessage, Request, Response, MAX_MESSAGE_SIZE};

/// Maximum concurrent clients per socket
const MAX_CONNECTIONS: usize = 32;

/// Idle time before a control connection is closed
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Time allowed to flush one reply or event
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Socket mode; the HTTP layer runs as its own user
const SOCKET_MODE: u32 = 0o660;

#[derive(Debug, Clone, Copy)]
struct PeerCredentials {
    uid: u32,
    gid: u32,
    pid: i32,
}

/// Bind `path`, replacing a stale socket but never a symlink
pub fn bind_socket(path: &Path) -> std::io::Result<UnixListener> {
    if let Ok(metadata) = path.symlink_metadata() {
        if metadata.file_type().is_symlink() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "socket path is a symlink, refusing",
            ));
        }
        std::fs::remove_file(path)?;
        debug!(path = %path.display(), "Removed stale socket");
    }

    let listener = UnixListener::bind(path)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(SOCKET_MODE))?;
    info!(path = %path.display(), "Listening (mode {:o})", SOCKET_MODE);
    Ok(listener)
}

pub async fn run_control_server(path: PathBuf, home: Arc<SmartHome>, shutdown: Shutdown) -> std::io::Result<()> {
    let listener = bind_socket(&path)?;
    let active = Arc::new(AtomicUsize::new(0));

    loop {
        let accepted = tokio::select! {
            result = listener.accept() => result,
            _ = shutdown.wait() => break,
        };

        match accepted {
            Ok((stream, _addr)) => {
                if active.load(Ordering::SeqCst) >= MAX_CONNECTIONS {
                    warn!("Control connection limit reached, rejecting");
                    continue;
                }
                active.fetch_add(1, Ordering::SeqCst);
                let home = Arc::clone(&home);
                let active = Arc::clone(&active);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    handle_control_client(stream, home, shutdown).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                });
            }
            Err(e) => error!("Accept error: {}", e),
        }
    }

    let _ = std::fs::remove_file(&path);
    info!("Control server stopped");
    Ok(())
}

pub async fn run_event_server(path: PathBuf, home: Arc<SmartHome>, shutdown: Shutdown) -> std::io::Result<()> {
    let listener = bind_socket(&path)?;
    let active = Arc::new(AtomicUsize::new(0));

    loop {
        let accepted = tokio::select! {
            result = listener.accept() => result,
            _ = shutdown.wait() => break,
        };

        match accepted {
            Ok((stream, _addr)) => {
                if active.load(Ordering::SeqCst) >= MAX_CONNECTIONS {
                    warn!("Event connection limit reached, rejecting");
                    continue;
                }
                active.fetch_add(1, Ordering::SeqCst);
                // Subscribe before spawning so nothing published after accept is missed
                let rx = home.subscribe();
                let active = Arc::clone(&active);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    handle_event_client(stream, rx, shutdown).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                });
            }
            Err(e) => error!("Accept error: {}", e),
        }
    }

    let _ = std::fs::remove_file(&path);
    info!("Event server stopped");
    Ok(())
}

/// Read one line of at most `max_len` bytes. Returns 0 on EOF.
async fn read_line_bounded<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
    out: &mut Vec<u8>,
    max_len: usize,
) -> std::io::Result<usize> {
    out.clear();

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(0);
        }

        let (take_len, found_newline) = match available.iter().position(|b| *b == b'\n') {
            Some(pos) => (pos + 1, true),
            None => (available.len(), false),
        };

        if take_len > max_len.saturating_sub(out.len()) {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "Message too large"));
        }

        out.extend_from_slice(&available[..take_len]);
        reader.consume(take_len);

        if found_newline {
            return Ok(out.len());
        }
    }
}

/// Parse and dispatch one request line. Hardware calls block, so they run on
/// the blocking pool; the runtime context stays available for blink tasks.
pub async fn dispatch(home: &Arc<SmartHome>, line: &str) -> Response {
    let request: Request = match serde_json::from_str(line.trim()) {
        Ok(r) => r,
        Err(e) => {
            debug!(error = %e, "Invalid request JSON");
            return Response::error("Invalid request format");
        }
    };

    let name = request.type_name();
    let home = Arc::clone(home);
    match tokio::task::spawn_blocking(move || home.handle(request)).await {
        Ok(response) => response,
        Err(e) => {
            error!(request = name, error = %e, "Request handler failed");
            Response::error("Internal error")
        }
    }
}

async fn write_line<W: tokio::io::AsyncWrite + Unpin>(writer: &mut W, json: &str) -> Result<(), ()> {
    let result = timeout(WRITE_TIMEOUT, async {
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    })
    .await;

    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            debug!("Write error: {}", e);
            Err(())
        }
        Err(_) => {
            warn!("Write timeout");
            Err(())
        }
    }
}

async fn send_response<W: tokio::io::AsyncWrite + Unpin>(writer: &mut W, response: &Response) -> Result<(), ()> {
    let json = serde_json::to_string(response)
        .unwrap_or_else(|_| r#"{"status":"error","message":"Serialization error"}"#.to_string());
    write_line(writer, &json).await
}

async fn handle_control_client(stream: UnixStream, home: Arc<SmartHome>, shutdown: Shutdown) {
    let cred = get_peer_credentials(&stream);
    match cred {
        Some(c) => info!(uid = c.uid, gid = c.gid, pid = c.pid, "Control client connected"),
        None => info!("Control client connected (credentials unavailable)"),
    }

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line: Vec<u8> = Vec::with_capacity(1024);
    let mut request_count: u64 = 0;
    let started = Instant::now();

    loop {
        let read = tokio::select! {
            r = timeout(READ_TIMEOUT, read_line_bounded(&mut reader, &mut line, MAX_MESSAGE_SIZE)) => r,
            _ = shutdown.wait() => break,
        };

        match read {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                request_count += 1;
                trace!(request = request_count, bytes = n, "Control request");

                let response = match std::str::from_utf8(&line) {
                    Ok(text) => dispatch(&home, text).await,
                    Err(_) => Response::error("Invalid request encoding"),
                };
                if send_response(&mut writer, &response).await.is_err() {
                    break;
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Closing control connection");
                let _ = send_response(&mut writer, &Response::error(e.to_string())).await;
                break;
            }
            Err(_) => {
                debug!("Control connection idle, closing");
                break;
            }
        }
    }

    debug!(requests = request_count, duration = ?started.elapsed(), "Control client disconnected");
}

async fn handle_event_client(
    stream: UnixStream,
    mut rx: tokio::sync::broadcast::Receiver<sh_protocol::PushEvent>,
    shutdown: Shutdown,
) {
    if let Some(c) = get_peer_credentials(&stream) {
        info!(uid = c.uid, pid = c.pid, "Event subscriber connected");
    }
    let (_reader, mut writer) = stream.into_split();

    loop {
        let event = tokio::select! {
            e = rx.recv() => e,
            _ = shutdown.wait() => break,
        };

        match event {
            Ok(event) => {
                let json = match serde_json::to_string(&PushMessage::from(&event)) {
                    Ok(j) => j,
                    Err(e) => {
                        error!(error = %e, "Push event serialization failed");
                        continue;
                    }
                };
                if write_line(&mut writer, &json).await.is_err() {
                    break;
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event subscriber too slow, events dropped"),
            Err(RecvError::Closed) => break,
        }
    }

    debug!("Event subscriber disconnected");
}

/// Peer uid/gid/pid via SO_PEERCRED
fn get_peer_credentials(stream: &UnixStream) -> Option<PeerCredentials> {
    use std::os::unix::io::AsRawFd;

    let fd = stream.as_raw_fd();

    // SAFETY: ucred is a plain C struct; all-zero is a valid value.
    let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

    // SAFETY: fd is a live socket owned by `stream`, and cred/len describe a
    // correctly sized writable buffer.
    let result = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            &mut cred as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };

    (result == 0).then_some(PeerCredentials {
        uid: cred.uid,
        gid: cred.gid,
        pid: cred.pid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sh_core::{AppSettings, Hardware};
    use sh_protocol::ResponseData;

    fn home(dir: &Path) -> Arc<SmartHome> {
        let mut settings = AppSettings::default();
        settings.gpio.root = dir.join("gpio");
        settings.adc.spi_device = dir.join("spidev");
        settings.fan.pwm_path = dir.join("pwm");
        settings.blackbox.device = dir.join("blackbox");
        Arc::new(SmartHome::new(Hardware::open(&settings), &settings))
    }

    #[tokio::test]
    async fn test_read_line_bounded_limits() {
        let data: &[u8] = b"short\nthis line is far too long\n";
        let mut reader = BufReader::new(data);
        let mut out = Vec::new();

        assert_eq!(read_line_bounded(&mut reader, &mut out, 10).await.unwrap(), 6);
        assert_eq!(out, b"short\n");
        assert!(read_line_bounded(&mut reader, &mut out, 10).await.is_err());
    }

    #[tokio::test]
    async fn test_dispatch_parses_and_rejects() {
        let dir = tempfile::tempdir().unwrap();
        let home = home(dir.path());

        assert_eq!(
            dispatch(&home, r#"{"cmd":"SetLed","data":{"id":2,"state":true}}"#).await,
            Response::ok(ResponseData::led(true))
        );
        assert_eq!(
            dispatch(&home, r#"{"cmd":"GetLeds"}"#).await,
            Response::ok(ResponseData::leds(vec![false, true, false, false]))
        );
        assert_eq!(dispatch(&home, "not json").await, Response::error("Invalid request format"));
        assert_eq!(
            dispatch(&home, r#"{"cmd":"ReadLight"}"#).await,
            Response::ok(ResponseData::light(-1))
        );
    }

    #[tokio::test]
    async fn test_control_and_event_sockets() {
        let dir = tempfile::tempdir().unwrap();
        let home = home(dir.path());
        let shutdown = Shutdown::new();
        let control = dir.path().join("control.sock");
        let events = dir.path().join("events.sock");

        let control_task = tokio::spawn(run_control_server(control.clone(), Arc::clone(&home), shutdown.clone()));
        let event_task = tokio::spawn(run_event_server(events.clone(), Arc::clone(&home), shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut sub = BufReader::new(UnixStream::connect(&events).await.unwrap());
        let mut client = BufReader::new(UnixStream::connect(&control).await.unwrap());
        tokio::time::sleep(Duration::from_millis(50)).await;

        client.get_mut().write_all(b"{\"cmd\":\"GetFrame\"}\n").await.unwrap();
        let mut reply = String::new();
        client.read_line(&mut reply).await.unwrap();
        let reply: Response = serde_json::from_str(&reply).unwrap();
        assert!(matches!(reply, Response::NotFound { .. }));

        let raw = r#"{"sensorId":"livingroom","temp":19.0,"hum":45.0}"#;
        home.sensors().ingest("test", raw).unwrap();
        let mut pushed = String::new();
        sub.read_line(&mut pushed).await.unwrap();
        let msg: PushMessage = serde_json::from_str(&pushed).unwrap();
        assert_eq!(msg.event, "ReceiveSensorData");
        assert_eq!(msg.payload, raw);

        shutdown.trigger();
        control_task.await.unwrap().unwrap();
        event_task.await.unwrap().unwrap();
        assert!(!control.exists());
    }
}

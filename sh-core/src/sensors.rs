//! Sensor push fan-out
//!
//! Ingestion workers hand every decoded reading to the hub, which broadcasts
//! the raw JSON to whoever is subscribed at that moment. There is no replay:
//! late subscribers only see later readings.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::constants::ingest;
use crate::error::{Result, SmartHomeError};
use sh_protocol::{PushEvent, SensorPayload};

/// Connection state of an ingestion worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Streaming,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Streaming => "streaming",
        };
        f.write_str(s)
    }
}

/// Shared, observable link state
#[derive(Debug, Clone)]
pub struct LinkStatus {
    name: &'static str,
    state: Arc<Mutex<LinkState>>,
}

impl LinkStatus {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Arc::new(Mutex::new(LinkState::Disconnected)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get(&self) -> LinkState {
        *self.state.lock()
    }

    pub fn set(&self, next: LinkState) {
        let mut state = self.state.lock();
        if *state != next {
            debug!(link = self.name, from = %*state, to = %next, "Link state changed");
            *state = next;
        }
    }
}

/// Outbound side of an ingestion link
pub trait CommandSink: Send + Sync {
    fn link(&self) -> &'static str;

    /// Queue `command` for the peer; fails when the link is down
    fn send_command(&self, command: &str) -> Result<()>;
}

/// Decode one reading; line framing whitespace is ignored
pub fn parse_payload(raw: &str) -> Result<SensorPayload> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SmartHomeError::SensorPayload("empty payload".into()));
    }
    serde_json::from_str(trimmed).map_err(|e| SmartHomeError::SensorPayload(format!("{}: {}", e, trimmed)))
}

#[derive(Debug, Clone)]
pub struct SensorHub {
    tx: broadcast::Sender<PushEvent>,
}

impl Default for SensorHub {
    fn default() -> Self {
        Self::new(ingest::PUSH_CAPACITY)
    }
}

impl SensorHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Validate `raw` and broadcast it unchanged.
    ///
    /// Malformed payloads are logged and dropped; the error is returned so the
    /// caller can count it.
    pub fn ingest(&self, source: &str, raw: &str) -> Result<SensorPayload> {
        let payload = match parse_payload(raw) {
            Ok(p) => p,
            Err(e) => {
                warn!(source, error = %e, "Dropping malformed sensor payload");
                return Err(e);
            }
        };

        let event = PushEvent::SensorDataReceived(raw.trim().to_string());
        // No subscribers is not an error; the reading is simply not retained.
        let delivered = self.tx.send(event).unwrap_or(0);
        debug!(source, sensor = %payload.sensor_id, delivered, "Sensor reading pushed");
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const READING: &str = r#"{"sensorId":"livingroom","temp":23.5,"hum":41.0}"#;

    #[test]
    fn test_parse_defaults_pressure() {
        let p = parse_payload(READING).unwrap();
        assert_eq!(p.sensor_id, "livingroom");
        assert_eq!(p.pressure, 0.0);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_payload("").is_err());
        assert!(parse_payload("TIME:12:00:00").is_err());
        assert!(parse_payload(r#"{"sensorId":"x"}"#).is_err());
    }

    #[tokio::test]
    async fn test_every_subscriber_gets_raw_payload() {
        let hub = SensorHub::default();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        hub.ingest("mqtt", &format!("{}\r\n", READING)).unwrap();

        for rx in [&mut a, &mut b] {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.name(), "ReceiveSensorData");
            assert_eq!(event.payload(), READING);
        }
    }

    #[tokio::test]
    async fn test_no_replay_for_late_subscriber() {
        let hub = SensorHub::default();
        hub.ingest("serial", READING).unwrap();

        let mut late = hub.subscribe();
        assert!(matches!(late.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
    }

    #[test]
    fn test_malformed_payload_not_broadcast() {
        let hub = SensorHub::default();
        let mut rx = hub.subscribe();
        assert!(hub.ingest("serial", "{not json").is_err());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_link_status_shared_between_clones() {
        let status = LinkStatus::new("mqtt");
        let view = status.clone();
        status.set(LinkState::Streaming);
        assert_eq!(view.get(), LinkState::Streaming);
        assert_eq!(view.name(), "mqtt");
    }
}

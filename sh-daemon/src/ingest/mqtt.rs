//! MQTT ingestion worker
//!
//! Subscribes to the sensor topic and pushes every valid reading. The event
//! loop reconnects on its own after a poll error; we only pace it with the
//! fixed back-off and resubscribe on every ConnAck.

use chrono::{DateTime, TimeZone};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::fmt::Display;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use sh_core::constants::ingest;
use sh_core::error::{Result, SmartHomeError};
use sh_core::settings::MqttSettings;
use sh_core::{CommandSink, LinkState, LinkStatus, SensorHub, Shutdown};

/// Request queue between the client handle and the event loop
const CLIENT_CAPACITY: usize = 16;

/// Publishes one-line commands to the node's command topic
#[derive(Clone)]
pub struct CommandSender {
    client: AsyncClient,
    topic: String,
    status: LinkStatus,
}

impl CommandSink for CommandSender {
    fn link(&self) -> &'static str {
        self.status.name()
    }

    fn send_command(&self, command: &str) -> Result<()> {
        if self.status.get() != LinkState::Streaming {
            return Err(SmartHomeError::Mqtt("broker not connected".into()));
        }
        self.client
            .try_publish(self.topic.as_str(), QoS::AtMostOnce, false, command.as_bytes().to_vec())
            .map_err(|e| SmartHomeError::Mqtt(e.to_string()))
    }
}

/// `TIME:HH:MM:SS` for the node's clock
pub fn clock_command<Tz>(now: DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    now.format("TIME:%H:%M:%S").to_string()
}

/// Decode and push one publish payload
pub fn handle_publish(hub: &SensorHub, payload: &[u8]) -> bool {
    match std::str::from_utf8(payload) {
        Ok(text) => hub.ingest("mqtt", text).is_ok(),
        Err(e) => {
            warn!(error = %e, "Dropping non-UTF-8 MQTT payload");
            false
        }
    }
}

pub struct MqttWorker {
    pub handle: JoinHandle<()>,
    pub sender: CommandSender,
    pub status: LinkStatus,
}

/// Start the worker (and its clock sync task) on the current runtime
pub fn spawn(settings: MqttSettings, hub: SensorHub, shutdown: Shutdown) -> MqttWorker {
    let mut options = MqttOptions::new(settings.client_id.clone(), settings.host.clone(), settings.port);
    options.set_keep_alive(ingest::MQTT_KEEP_ALIVE);
    let (client, eventloop) = AsyncClient::new(options, CLIENT_CAPACITY);

    let status = LinkStatus::new("mqtt");
    let sender = CommandSender {
        client: client.clone(),
        topic: settings.command_topic.clone(),
        status: status.clone(),
    };

    let clock = settings.clock_sync.then(|| tokio::spawn(run_clock_sync(sender.clone(), shutdown.clone())));

    let worker_status = status.clone();
    let handle = tokio::spawn(async move {
        run(client, eventloop, &settings, &hub, &worker_status, &shutdown).await;
        if let Some(clock) = clock {
            let _ = clock.await;
        }
    });

    MqttWorker { handle, sender, status }
}

async fn run(
    client: AsyncClient,
    mut eventloop: EventLoop,
    settings: &MqttSettings,
    hub: &SensorHub,
    status: &LinkStatus,
    shutdown: &Shutdown,
) {
    info!(host = %settings.host, port = settings.port, topic = %settings.sensor_topic, "MQTT worker starting");
    status.set(LinkState::Connecting);

    loop {
        let event = tokio::select! {
            event = eventloop.poll() => event,
            _ = shutdown.wait() => break,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!(host = %settings.host, "MQTT connected");
                if let Err(e) = client.subscribe(settings.sensor_topic.as_str(), QoS::AtMostOnce).await {
                    warn!(error = %e, "MQTT subscribe request failed");
                }
                status.set(LinkState::Streaming);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if publish.topic == settings.sensor_topic {
                    handle_publish(hub, &publish.payload);
                } else {
                    debug!(topic = %publish.topic, "Ignoring publish on unexpected topic");
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, backoff = ?ingest::RECONNECT_BACKOFF, "MQTT link down, retrying");
                status.set(LinkState::Disconnected);
                if shutdown.sleep(ingest::RECONNECT_BACKOFF).await {
                    break;
                }
                status.set(LinkState::Connecting);
            }
        }
    }

    let _ = client.try_disconnect();
    status.set(LinkState::Disconnected);
    info!("MQTT worker stopped");
}

async fn run_clock_sync(sender: CommandSender, shutdown: Shutdown) {
    loop {
        if shutdown.sleep(ingest::CLOCK_SYNC_INTERVAL).await {
            break;
        }
        if sender.status.get() != LinkState::Streaming {
            continue;
        }
        let command = clock_command(chrono::Local::now());
        if let Err(e) = sender.send_command(&command) {
            debug!(error = %e, "Clock sync skipped");
        }
    }
}

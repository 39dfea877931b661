//! Sensor ingestion workers
//!
//! - `mqtt` - broker subscription, clock sync, command publishing
//! - `serial` - RFCOMM line reader and command writer
//!
//! Both feed the same `SensorHub` and expose their link state.

pub mod mqtt;
pub mod serial;

use sh_core::LinkStatus;
use tracing::info;

/// Link states at a glance, for the periodic status line
pub fn summarize(links: &[LinkStatus]) -> String {
    links
        .iter()
        .map(|l| format!("{}={}", l.name(), l.get()))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn log_links(links: &[LinkStatus]) {
    if !links.is_empty() {
        info!(links = %summarize(links), "Sensor link status");
    }
}

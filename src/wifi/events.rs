//! Link events delivered by the WiFi driver.
//!
//! The driver invokes a single registered observer from its own event task.
//! The observer only logs: it never blocks and writes no shared state.

use log::{debug, info, warn};
use std::net::Ipv4Addr;

/// Transport-level events the firmware reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Associated with the access point.
    StationConnected,
    /// Lost the access point. The driver reconnects on its own.
    StationDisconnected { reason: u16 },
    /// DHCP assigned an address.
    AddressAcquired { ip: Ipv4Addr },
}

/// Observer signature accepted by [`WifiLink::subscribe`](super::WifiLink::subscribe).
pub type LinkObserver = fn(&LinkEvent);

/// Default observer: one log line per event.
pub fn log_link_event(event: &LinkEvent) {
    match event {
        LinkEvent::StationConnected => info!("[WiFi Event] Station connected to AP."),
        LinkEvent::StationDisconnected { reason } => {
            warn!(
                "[WiFi Event] Disconnected from AP. Reason: {} ({})",
                reason,
                disconnect_reason_name(*reason)
            );
            debug!("[WiFi Event] Waiting for driver auto-reconnect");
        }
        LinkEvent::AddressAcquired { ip } => {
            info!("[WiFi Event] IP Address obtained: {}", ip)
        }
    }
}

/// Human-readable name for common ESP-IDF `wifi_err_reason_t` codes.
pub fn disconnect_reason_name(reason: u16) -> &'static str {
    match reason {
        1 => "unspecified",
        2 => "auth expired",
        3 => "auth leave",
        4 => "assoc expired",
        8 => "assoc leave",
        15 => "4-way handshake timeout",
        200 => "beacon timeout",
        201 => "no AP found",
        202 => "auth fail",
        203 => "assoc fail",
        204 => "handshake timeout",
        205 => "connection fail",
        _ => "other",
    }
}

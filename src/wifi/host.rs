//! Host (development) platform.
//!
//! On host systems the OS handles networking, so the link only simulates
//! the radio: joining any valid network succeeds and reports the machine's
//! own address, and the "access point" is the portal on loopback. This is
//! enough to walk through the whole provisioning flow in a browser.

use super::events::{LinkEvent, LinkObserver};
use super::{LinkDiagnostics, LinkError, StationOptions, System, WifiLink};
use crate::config::Credentials;
use log::{info, warn};
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::time::{Duration, Instant};

/// Simulated radio on a development machine.
pub struct HostLink {
    observer: Option<LinkObserver>,
    online: bool,
    joined: Option<String>,
    access_point: Option<String>,
}

impl HostLink {
    pub fn new() -> Self {
        Self {
            observer: None,
            online: true,
            joined: None,
            access_point: None,
        }
    }

    /// A link on which no network can be joined, to exercise the portal and
    /// fallback paths.
    pub fn offline() -> Self {
        Self {
            online: false,
            ..Self::new()
        }
    }

    /// Name of the simulated access point, if up.
    pub fn access_point(&self) -> Option<&str> {
        self.access_point.as_deref()
    }

    /// Get the primary local IPv4 address.
    ///
    /// Connects a UDP socket to a public address (nothing is sent) and reads
    /// back which local address the OS picked.
    fn detect_local_ip() -> Option<Ipv4Addr> {
        let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect("8.8.8.8:80").ok()?;
        match socket.local_addr().ok()?.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        }
    }

    fn emit(&self, event: LinkEvent) {
        if let Some(observer) = self.observer {
            observer(&event);
        }
    }
}

impl Default for HostLink {
    fn default() -> Self {
        Self::new()
    }
}

impl WifiLink for HostLink {
    fn subscribe(&mut self, observer: LinkObserver) -> Result<(), LinkError> {
        self.observer = Some(observer);
        Ok(())
    }

    fn configure_station(&mut self, options: StationOptions) -> Result<(), LinkError> {
        info!(
            "[WiFi] Host station (auto-reconnect: {}, persistent: {})",
            options.auto_reconnect, options.persistent
        );
        self.access_point = None;
        Ok(())
    }

    fn begin(&mut self, creds: &Credentials) -> Result<(), LinkError> {
        info!("[WiFi] Connecting to '{}' (simulated)", creds.ssid);
        if self.joined.take().is_some() {
            self.emit(LinkEvent::StationDisconnected { reason: 8 });
        }
        if !self.online {
            self.emit(LinkEvent::StationDisconnected { reason: 201 });
            return Ok(());
        }

        self.joined = Some(creds.ssid.clone());
        self.emit(LinkEvent::StationConnected);
        let ip = Self::detect_local_ip().unwrap_or(Ipv4Addr::LOCALHOST);
        self.emit(LinkEvent::AddressAcquired { ip });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.joined.is_some()
    }

    fn diagnostics(&self) -> Option<LinkDiagnostics> {
        let ssid = self.joined.clone()?;
        Some(LinkDiagnostics {
            ssid,
            ip: Self::detect_local_ip().or(Some(Ipv4Addr::LOCALHOST)),
            rssi: None,
        })
    }

    fn start_access_point(&mut self, ssid: &str) -> Result<(), LinkError> {
        info!("[WiFi] Access point '{}' up (simulated)", ssid);
        self.access_point = Some(ssid.to_string());
        Ok(())
    }

    fn stop_access_point(&mut self) -> Result<(), LinkError> {
        self.access_point = None;
        Ok(())
    }
}

/// [`System`] on the host: real sleeps, process-relative uptime.
#[derive(Debug, Clone, Copy)]
pub struct HostSystem {
    boot: Instant,
}

impl HostSystem {
    pub fn new() -> Self {
        Self {
            boot: Instant::now(),
        }
    }
}

impl Default for HostSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl System for HostSystem {
    fn delay(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn uptime(&self) -> Duration {
        self.boot.elapsed()
    }

    /// Ends the process; a supervisor is expected to start it again.
    fn restart(&self) {
        warn!("[WiFi] Restart requested, exiting");
        std::process::exit(1);
    }
}

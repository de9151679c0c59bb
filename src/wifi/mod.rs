//! WiFi connectivity.
//!
//! The [`ConnectivityManager`] brings the device onto a network and keeps it
//! there. It is generic over the platform seams defined here, so the whole
//! connection algorithm runs on the host with the same code as on the ESP32:
//!
//! - [`WifiLink`] - station/access-point radio control and live status
//! - [`CredentialStore`] - last-known credentials in persistent storage
//! - [`System`] - delays, monotonic time and device restart
//!
//! # Platform implementations
//!
//! - **ESP32** (`esp32` feature): [`EspWifiLink`], [`NvsCredentialStore`], [`EspSystem`]
//! - **Host**: [`HostLink`], [`HostSystem`] and
//!   [`FileCredentialStore`](crate::persistence_host::FileCredentialStore)

use crate::config::Credentials;
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

mod events;
mod identity;
mod manager;
mod session;

#[cfg(feature = "esp32")]
mod connection;
#[cfg(feature = "esp32")]
mod storage;
#[cfg(feature = "esp32")]
mod system;

#[cfg(not(feature = "esp32"))]
mod host;

#[cfg(test)]
pub(crate) mod fakes;

pub use events::{disconnect_reason_name, log_link_event, LinkEvent, LinkObserver};
pub use identity::DeviceIdentity;
pub use manager::ConnectivityManager;
pub use session::{ConnectPath, Outcome, SessionState};

#[cfg(feature = "esp32")]
pub use connection::EspWifiLink;
#[cfg(feature = "esp32")]
pub use storage::{init_nvs, NvsCredentialStore};
#[cfg(feature = "esp32")]
pub use system::{read_efuse_mac, EspSystem};

#[cfg(not(feature = "esp32"))]
pub use host::{HostLink, HostSystem};

/// Station behavior applied once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StationOptions {
    /// Rejoin the access point after a drop without application involvement.
    pub auto_reconnect: bool,
    /// Let the driver keep accepted credentials in flash.
    pub persistent: bool,
}

impl Default for StationOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            persistent: true,
        }
    }
}

/// Snapshot of the live connection, for status logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkDiagnostics {
    pub ssid: String,
    pub ip: Option<Ipv4Addr>,
    /// Signal strength in dBm.
    pub rssi: Option<i8>,
}

/// WiFi radio abstraction.
///
/// One object owns the radio for both roles: the station used to join
/// networks and the access point hosting the provisioning portal.
pub trait WifiLink {
    /// Register the process-wide event observer. Called once at startup; the
    /// subscription lives as long as the link.
    fn subscribe(&mut self, observer: LinkObserver) -> Result<(), LinkError>;

    /// Force station-only mode and apply `options`.
    fn configure_station(&mut self, options: StationOptions) -> Result<(), LinkError>;

    /// Start joining the network described by `creds`.
    ///
    /// Returns as soon as the attempt is started; poll [`is_connected`](Self::is_connected).
    fn begin(&mut self, creds: &Credentials) -> Result<(), LinkError>;

    /// Live association status, queried from the driver on every call.
    fn is_connected(&self) -> bool;

    /// Current SSID, address and signal strength, if connected.
    fn diagnostics(&self) -> Option<LinkDiagnostics>;

    /// Host an open access point named `ssid` alongside the station.
    fn start_access_point(&mut self, ssid: &str) -> Result<(), LinkError>;

    /// Tear down the access point, back to station-only mode.
    fn stop_access_point(&mut self) -> Result<(), LinkError>;
}

/// Persistent storage of the last-known credentials.
pub trait CredentialStore {
    /// Stored credentials, or `None` if nothing usable is stored.
    fn load(&self) -> Option<Credentials>;

    /// Replace the stored credentials.
    fn save(&mut self, creds: &Credentials) -> Result<(), StoreError>;

    /// Forget the stored credentials.
    fn clear(&mut self) -> Result<(), StoreError>;
}

/// Time and power control.
pub trait System {
    /// Block the calling thread.
    fn delay(&self, duration: Duration);

    /// Monotonic time since boot.
    fn uptime(&self) -> Duration;

    /// Reset the device. Does not return on real hardware.
    fn restart(&self);
}

/// Poll `link` every `poll` until it reports connected or `timeout` elapses.
pub fn wait_for_connection<L, S>(link: &L, system: &S, timeout: Duration, poll: Duration) -> bool
where
    L: WifiLink + ?Sized,
    S: System + ?Sized,
{
    let start = system.uptime();
    loop {
        if link.is_connected() {
            return true;
        }
        if system.uptime().saturating_sub(start) >= timeout {
            return false;
        }
        system.delay(poll);
    }
}

/// Errors reported by a [`WifiLink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// SSID rejected by the driver (too long or invalid characters).
    InvalidSsid,
    /// Password rejected by the driver.
    InvalidPassword,
    /// Driver call failed.
    Driver(String),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSsid => write!(f, "invalid SSID"),
            Self::InvalidPassword => write!(f, "invalid password"),
            Self::Driver(msg) => write!(f, "driver error: {}", msg),
        }
    }
}

impl std::error::Error for LinkError {}

#[cfg(feature = "esp32")]
impl From<esp_idf_sys::EspError> for LinkError {
    fn from(e: esp_idf_sys::EspError) -> Self {
        Self::Driver(format!("{:?}", e))
    }
}

/// Errors reported by a [`CredentialStore`].
#[derive(Debug)]
pub enum StoreError {
    /// File or flash I/O failed.
    Io(std::io::Error),
    /// Data read back after a write did not match.
    VerifyFailed,
    /// Storage backend error.
    Backend(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::VerifyFailed => write!(f, "read-back verification failed"),
            Self::Backend(msg) => write!(f, "storage error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

#[cfg(feature = "esp32")]
impl From<esp_idf_sys::EspError> for StoreError {
    fn from(e: esp_idf_sys::EspError) -> Self {
        Self::Backend(format!("{:?}", e))
    }
}

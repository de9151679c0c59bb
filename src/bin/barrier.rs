//! Terelina barrier node firmware.
//!
//! Brings the node online and supervises the connection. Runs on both ESP32
//! and host platforms:
//! - **ESP32**: `cargo espflash flash --bin barrier --features esp32 --release --monitor`
//! - **Host**: `cargo run --bin barrier` (portal at http://127.0.0.1:8080/),
//!   `cargo run --bin barrier -- --offline` to walk the portal and fallback paths
//!
//! With `--features wifi-fallback`, the build-time variables
//! `TERELINA_FALLBACK_WIFI_SSID` / `TERELINA_FALLBACK_WIFI_PASSWORD` provide a
//! secondary network tried when the first portal window closes.

use log::{error, info, warn};
use terelina_esp32::config::{ConnectivitySettings, FallbackCredentials, DEVICE_CONFIG};
use terelina_esp32::portal::{CaptivePortal, PortalSettings};
use terelina_esp32::wifi::{ConnectivityManager, DeviceIdentity, Outcome};

// ESP32: Initialize ESP-IDF before anything else
#[cfg(feature = "esp32")]
fn platform_init() {
    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();
    info!("ESP-IDF initialized");
}

// Host: Just initialize env_logger
#[cfg(not(feature = "esp32"))]
fn platform_init() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

#[cfg(feature = "esp32")]
fn run() -> Result<(), Box<dyn std::error::Error>> {
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use terelina_esp32::wifi::{read_efuse_mac, EspSystem, EspWifiLink, NvsCredentialStore};

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs = terelina_esp32::get_nvs_default_partition()?;

    let identity = DeviceIdentity::from_efuse_mac(read_efuse_mac()?);
    let link = EspWifiLink::new(peripherals.modem, sysloop, Some(nvs))?;
    let store = NvsCredentialStore::open()?;

    let manager = ConnectivityManager::new(
        link,
        CaptivePortal::new(PortalSettings::device()),
        store,
        EspSystem,
        identity,
        ConnectivitySettings::default(),
        FallbackCredentials::compiled(),
    );
    supervise(manager)
}

#[cfg(not(feature = "esp32"))]
fn run() -> Result<(), Box<dyn std::error::Error>> {
    use terelina_esp32::persistence_host::FileCredentialStore;
    use terelina_esp32::wifi::{HostLink, HostSystem};

    /// Locally administered stand-in for the efuse MAC.
    const HOST_MAC: [u8; 6] = [0x02, 0x7E, 0x1E, 0x11, 0xAA, 0x00];

    let link = if std::env::args().any(|arg| arg == "--offline") {
        info!("Host link offline: no network can be joined");
        HostLink::offline()
    } else {
        HostLink::new()
    };

    let manager = ConnectivityManager::new(
        link,
        CaptivePortal::new(PortalSettings::host()),
        FileCredentialStore::open_default()?,
        HostSystem::new(),
        DeviceIdentity::from_efuse_mac(HOST_MAC),
        ConnectivitySettings::default(),
        FallbackCredentials::compiled(),
    );
    supervise(manager)
}

/// Bring the node online, then log the link status every heartbeat.
fn supervise<L, P, C, S>(
    mut manager: ConnectivityManager<L, P, C, S>,
) -> Result<(), Box<dyn std::error::Error>>
where
    L: terelina_esp32::wifi::WifiLink,
    P: terelina_esp32::portal::Portal<L, S>,
    C: terelina_esp32::wifi::CredentialStore,
    S: terelina_esp32::wifi::System,
{
    info!("Portal name: {}", manager.portal_name());

    match manager.initialize() {
        Outcome::Connected(path) => info!("Online via {:?} credentials", path),
        Outcome::Restarting => return Ok(()),
    }

    loop {
        std::thread::sleep(DEVICE_CONFIG.timing.heartbeat_interval);
        if !manager.is_connected() {
            warn!("Link down ({}), waiting for auto-reconnect", manager.state());
        }
        manager.log_status();
    }
}

fn main() {
    platform_init();

    info!("=== Terelina barrier node starting ===");

    #[cfg(feature = "esp32")]
    info!("Platform: ESP32");
    #[cfg(not(feature = "esp32"))]
    info!("Platform: Host");

    DEVICE_CONFIG.log_summary();

    if let Err(e) = run() {
        error!("Startup failed: {}", e);
        std::process::exit(1);
    }
}

//! Terelina barrier node firmware library.
//!
//! Network-session establishment and recovery for a headless ESP32 sensor
//! node: stored credentials, a captive provisioning portal, optional
//! compile-time fallback credentials, and the platform bindings they run on.
//!
//! Everything except the ESP-IDF bindings is platform-independent and is
//! tested on the host machine without hardware.

// Allow the crate to reference itself by name (needed for proc-macro generated code)
extern crate self as terelina_esp32;

pub mod config;
#[cfg(not(feature = "esp32"))]
pub mod persistence_host;
pub mod portal;
#[cfg(feature = "tap-tests")]
pub mod testing;
pub mod wifi;

// Re-export commonly used items
pub use config::{ConfigError, ConnectivitySettings, Credentials, DeviceConfig, DEVICE_CONFIG};
pub use portal::{CaptivePortal, Portal, PortalSettings};
pub use wifi::{ConnectPath, ConnectivityManager, DeviceIdentity, Outcome, SessionState};

// Re-export testing items (only with tap-tests feature)
#[cfg(feature = "tap-tests")]
pub use testing::TestRunner;

#[cfg(feature = "esp32")]
static NVS_PARTITION: std::sync::Mutex<Option<esp_idf_svc::nvs::EspDefaultNvsPartition>> =
    std::sync::Mutex::new(None);

/// Shared handle to the default NVS partition.
///
/// `EspDefaultNvsPartition::take()` succeeds only once per boot; the WiFi
/// driver and the credential store both need the partition, so the first
/// caller takes it and later callers get a clone.
#[cfg(feature = "esp32")]
pub fn get_nvs_default_partition(
) -> Result<esp_idf_svc::nvs::EspDefaultNvsPartition, esp_idf_sys::EspError> {
    let mut slot = NVS_PARTITION
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    if let Some(partition) = slot.as_ref() {
        return Ok(partition.clone());
    }
    let partition = esp_idf_svc::nvs::EspDefaultNvsPartition::take()?;
    *slot = Some(partition.clone());
    Ok(partition)
}

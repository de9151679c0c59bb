//! NVS persistence for WiFi credentials.
//!
//! Stores the last-known credentials in ESP32's Non-Volatile Storage (NVS)
//! so they persist across reboots.

use super::{CredentialStore, StoreError};
use crate::config::{Credentials, MAX_PASSWORD_LEN, MAX_SSID_LEN};
use esp_idf_svc::nvs::{EspNvs, NvsDefault};
use esp_idf_sys::EspError;
use log::{debug, error, info, warn};

/// NVS namespace for WiFi configuration.
const NVS_NAMESPACE: &str = "wifi_config";

/// NVS key for stored credentials.
const NVS_KEY: &str = "credentials";

/// Format: [ssid_len:1][ssid:32][password_len:1][password:64] = 98 bytes.
const MAX_CONFIG_BUFFER_SIZE: usize = 1 + MAX_SSID_LEN + 1 + MAX_PASSWORD_LEN;

/// Open the WiFi configuration namespace on the shared default partition.
pub fn init_nvs() -> Result<EspNvs<NvsDefault>, EspError> {
    let partition = crate::get_nvs_default_partition()?;
    EspNvs::new(partition, NVS_NAMESPACE, true)
}

/// Credential store backed by the `wifi_config` NVS namespace.
pub struct NvsCredentialStore {
    nvs: EspNvs<NvsDefault>,
}

impl NvsCredentialStore {
    pub fn new(nvs: EspNvs<NvsDefault>) -> Self {
        Self { nvs }
    }

    /// Open the store on the default partition.
    pub fn open() -> Result<Self, StoreError> {
        Ok(Self::new(init_nvs()?))
    }
}

impl CredentialStore for NvsCredentialStore {
    fn load(&self) -> Option<Credentials> {
        let mut buf = zeroize::Zeroizing::new([0u8; MAX_CONFIG_BUFFER_SIZE]);
        let bytes = match self.nvs.get_raw(NVS_KEY, buf.as_mut_slice()) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!("[WiFi] No credentials in NVS");
                return None;
            }
            Err(e) => {
                warn!("[WiFi] Failed to read credentials from NVS: {:?}", e);
                return None;
            }
        };

        match Credentials::from_bytes(bytes) {
            Ok(creds) => Some(creds),
            Err(e) => {
                error!("[WiFi] Stored credentials are corrupted: {}", e);
                None
            }
        }
    }

    /// Save with read-back verification to catch silent flash write failures.
    fn save(&mut self, creds: &Credentials) -> Result<(), StoreError> {
        let bytes = creds.to_bytes();
        self.nvs.set_raw(NVS_KEY, &bytes)?;

        let mut verify = zeroize::Zeroizing::new([0u8; MAX_CONFIG_BUFFER_SIZE]);
        let read_back = self
            .nvs
            .get_raw(NVS_KEY, verify.as_mut_slice())?
            .ok_or_else(|| {
                error!("[WiFi] Credentials not found after save - possible flash failure");
                StoreError::VerifyFailed
            })?;

        if read_back != bytes.as_slice() {
            error!("[WiFi] Credential verification failed - data mismatch after save");
            return Err(StoreError::VerifyFailed);
        }

        info!("[WiFi] Credentials saved and verified in NVS");
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.nvs.remove(NVS_KEY)?;
        Ok(())
    }
}

#[cfg(feature = "tap-tests")]
mod tap_tests {
    use super::*;
    use terelina_esp32_macros::tap_test;

    #[tap_test]
    fn nvs_round_trip() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut store = NvsCredentialStore::open()?;
        let previous = store.load();

        let creds = Credentials::new("terelina-tap", "tap-secret-1")?;
        store.save(&creds)?;
        assert_eq!(store.load(), Some(creds));

        store.clear()?;
        assert_eq!(store.load(), None);

        if let Some(previous) = previous {
            store.save(&previous)?;
        }
        Ok(())
    }

    #[tap_test]
    fn longest_record_fits_buffer() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let creds = Credentials::new(&"s".repeat(MAX_SSID_LEN), &"p".repeat(MAX_PASSWORD_LEN))?;
        assert_eq!(creds.to_bytes().len(), MAX_CONFIG_BUFFER_SIZE);

        let mut store = NvsCredentialStore::open()?;
        let previous = store.load();
        store.save(&creds)?;
        assert_eq!(store.load(), Some(creds));

        match previous {
            Some(previous) => store.save(&previous)?,
            None => store.clear()?,
        }
        Ok(())
    }
}

//! Compile-time fallback WiFi credentials.
//!
//! Enabled with the `wifi-fallback` feature. The values come from the build
//! environment so the secret never lives in the repository:
//!
//! ```bash
//! TERELINA_FALLBACK_WIFI_SSID="Plant-Floor" \
//! TERELINA_FALLBACK_WIFI_PASSWORD="secret123" \
//!     cargo build --bin barrier --features esp32,wifi-fallback --release
//! ```

use super::wifi::{ConfigError, Credentials};

/// Fallback SSID, set via TERELINA_FALLBACK_WIFI_SSID at compile time.
#[cfg(feature = "wifi-fallback")]
const FALLBACK_SSID: Option<&str> = option_env!("TERELINA_FALLBACK_WIFI_SSID");

/// Fallback password, set via TERELINA_FALLBACK_WIFI_PASSWORD at compile time.
#[cfg(feature = "wifi-fallback")]
const FALLBACK_PASSWORD: Option<&str> = option_env!("TERELINA_FALLBACK_WIFI_PASSWORD");

/// A secondary credential pair embedded in the firmware image.
///
/// Kept unvalidated: an empty SSID means "enabled but not provided", which
/// is reported when the fallback is attempted rather than at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackCredentials {
    pub ssid: &'static str,
    pub password: &'static str,
}

impl FallbackCredentials {
    /// The pair compiled into this image, or `None` without `wifi-fallback`.
    pub fn compiled() -> Option<Self> {
        #[cfg(feature = "wifi-fallback")]
        {
            Some(Self {
                ssid: FALLBACK_SSID.unwrap_or(""),
                password: FALLBACK_PASSWORD.unwrap_or(""),
            })
        }

        #[cfg(not(feature = "wifi-fallback"))]
        {
            None
        }
    }

    /// True when the feature is on but no SSID was provided.
    pub fn is_empty(&self) -> bool {
        self.ssid.is_empty()
    }

    /// Validate into station credentials.
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        Credentials::new(self.ssid, self.password)
    }
}

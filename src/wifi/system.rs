//! ESP-IDF time, restart and factory MAC.

use super::System;
use esp_idf_hal::delay::FreeRtos;
use esp_idf_sys::{esp, EspError};
use std::time::Duration;

/// [`System`] backed by FreeRTOS delays and the ESP high-resolution timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct EspSystem;

impl System for EspSystem {
    fn delay(&self, duration: Duration) {
        let ms = u32::try_from(duration.as_millis()).unwrap_or(u32::MAX);
        FreeRtos::delay_ms(ms);
    }

    fn uptime(&self) -> Duration {
        // SAFETY: reads a monotonic counter, no preconditions.
        let micros = unsafe { esp_idf_sys::esp_timer_get_time() };
        Duration::from_micros(micros.max(0) as u64)
    }

    fn restart(&self) {
        // SAFETY: resets the chip; never returns.
        unsafe { esp_idf_sys::esp_restart() };
    }
}

/// Factory-programmed base MAC from efuse.
pub fn read_efuse_mac() -> Result<[u8; 6], EspError> {
    let mut mac = [0u8; 6];
    // SAFETY: `mac` is a valid 6-byte buffer as the call requires.
    esp!(unsafe { esp_idf_sys::esp_efuse_mac_get_default(mac.as_mut_ptr()) })?;
    Ok(mac)
}

#[cfg(feature = "tap-tests")]
mod tap_tests {
    use super::*;
    use crate::config::DEFAULT_PORTAL_PREFIX;
    use crate::wifi::DeviceIdentity;
    use terelina_esp32_macros::tap_test;

    #[tap_test]
    fn efuse_mac_is_stable() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let first = read_efuse_mac()?;
        let second = read_efuse_mac()?;
        assert_eq!(first, second);
        assert_ne!(first, [0u8; 6]);

        let name = DeviceIdentity::from_efuse_mac(first).portal_name(DEFAULT_PORTAL_PREFIX);
        assert_eq!(name.len(), DEFAULT_PORTAL_PREFIX.len() + 5);
        Ok(())
    }

    #[tap_test]
    fn uptime_advances_across_delay() {
        let system = EspSystem;
        let before = system.uptime();
        system.delay(Duration::from_millis(50));
        assert!(system.uptime() >= before + Duration::from_millis(40));
    }
}

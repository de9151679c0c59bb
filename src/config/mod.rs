//! Node configuration.
//!
//! # Components
//!
//! - [`wifi`] - station credentials, validation and storage format
//! - [`connectivity`] - portal naming and connection timeouts
//! - [`device`] - static device record (broker, topics, sensor wiring)
//! - [`fallback`] - build-flag-gated fallback credentials
//!
//! Everything here is platform-independent and host-testable.

mod connectivity;
mod device;
mod fallback;
mod wifi;

pub use connectivity::{
    ConnectivitySettings, SettingsError, DEFAULT_PORTAL_PREFIX, FALLBACK_TIMEOUT, POLL_INTERVAL,
    PORTAL_TIMEOUT, RESTART_DELAY, STORED_CONNECT_TIMEOUT,
};
pub use device::{DeviceConfig, MqttConfig, SensorConfig, TimingConfig, DEVICE_CONFIG};
pub use fallback::FallbackCredentials;
pub use wifi::{ConfigError, Credentials, MAX_PASSWORD_LEN, MAX_SSID_LEN, MIN_PASSWORD_LEN};

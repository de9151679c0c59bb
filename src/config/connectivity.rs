//! Connectivity timing and naming.

use super::wifi::MAX_SSID_LEN;
use std::fmt;
use std::time::Duration;

/// Product prefix of the provisioning portal network name.
pub const DEFAULT_PORTAL_PREFIX: &str = "Terelina";

/// How long the first portal waits for an operator before giving up.
pub const PORTAL_TIMEOUT: Duration = Duration::from_secs(180);

/// How long to wait for stored credentials to produce a connection.
pub const STORED_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to wait for the fallback credentials to produce a connection.
pub const FALLBACK_TIMEOUT: Duration = Duration::from_secs(20);

/// Interval between link status polls in every blocking wait.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Pause before a restart so the final log line reaches the serial port.
pub const RESTART_DELAY: Duration = Duration::from_secs(3);

/// Length of `-XXXX` appended to the prefix.
const PORTAL_SUFFIX_LEN: usize = 5;

/// Settings consumed by the connectivity manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivitySettings {
    /// Prefix of the portal network name (`<prefix>-XXXX`).
    pub portal_prefix: String,
    /// Window of the first, bounded portal.
    pub portal_timeout: Duration,
    /// Wait applied to stored credentials.
    pub stored_connect_timeout: Duration,
    /// Wait applied to the fallback credentials.
    pub fallback_timeout: Duration,
    /// Poll interval of every wait.
    pub poll_interval: Duration,
    /// Delay between the critical log line and the restart.
    pub restart_delay: Duration,
}

impl ConnectivitySettings {
    /// Default settings with a different portal prefix.
    pub fn with_prefix(prefix: impl Into<String>) -> Result<Self, SettingsError> {
        let settings = Self {
            portal_prefix: prefix.into(),
            ..Self::default()
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Check that the portal name fits an SSID and no wait is zero.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.portal_prefix.is_empty() {
            return Err(SettingsError::PrefixEmpty);
        }
        let max = MAX_SSID_LEN - PORTAL_SUFFIX_LEN;
        if self.portal_prefix.len() > max {
            return Err(SettingsError::PrefixTooLong {
                len: self.portal_prefix.len(),
                max,
            });
        }
        if self.poll_interval.is_zero() {
            return Err(SettingsError::ZeroPollInterval);
        }
        Ok(())
    }
}

impl Default for ConnectivitySettings {
    fn default() -> Self {
        Self {
            portal_prefix: DEFAULT_PORTAL_PREFIX.to_string(),
            portal_timeout: PORTAL_TIMEOUT,
            stored_connect_timeout: STORED_CONNECT_TIMEOUT,
            fallback_timeout: FALLBACK_TIMEOUT,
            poll_interval: POLL_INTERVAL,
            restart_delay: RESTART_DELAY,
        }
    }
}

/// Invalid connectivity settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    /// The portal prefix is empty.
    PrefixEmpty,
    /// The portal prefix leaves no room for the suffix.
    PrefixTooLong { len: usize, max: usize },
    /// A zero poll interval would spin the CPU.
    ZeroPollInterval,
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrefixEmpty => write!(f, "portal prefix cannot be empty"),
            Self::PrefixTooLong { len, max } => {
                write!(f, "portal prefix too long: {} bytes (max {})", len, max)
            }
            Self::ZeroPollInterval => write!(f, "poll interval must be non-zero"),
        }
    }
}

impl std::error::Error for SettingsError {}

#[cfg(test)]
mod tests {
    use super::*;
    use terelina_esp32_macros::esp32_test;

    #[esp32_test]
    fn test_defaults() {
        let settings = ConnectivitySettings::default();
        assert_eq!(settings.portal_prefix, "Terelina");
        assert_eq!(settings.portal_timeout, Duration::from_secs(180));
        assert_eq!(settings.fallback_timeout, Duration::from_secs(20));
        assert_eq!(settings.poll_interval, Duration::from_millis(500));
        assert_eq!(settings.restart_delay, Duration::from_secs(3));
        assert!(settings.validate().is_ok());
    }

    #[esp32_test]
    fn test_prefix_bounds() {
        assert!(ConnectivitySettings::with_prefix("a".repeat(27)).is_ok());
        assert_eq!(
            ConnectivitySettings::with_prefix("a".repeat(28)),
            Err(SettingsError::PrefixTooLong { len: 28, max: 27 })
        );
        assert_eq!(
            ConnectivitySettings::with_prefix(""),
            Err(SettingsError::PrefixEmpty)
        );
    }

    #[esp32_test]
    fn test_zero_poll_interval_rejected() {
        let settings = ConnectivitySettings {
            poll_interval: Duration::ZERO,
            ..ConnectivitySettings::default()
        };
        assert_eq!(settings.validate(), Err(SettingsError::ZeroPollInterval));
    }
}

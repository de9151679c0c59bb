//! WiFi credential types.
//!
//! Platform-independent so validation and the storage format can be tested
//! on the host machine.
//!
//! # Example
//!
//! ```
//! use terelina_esp32::config::Credentials;
//!
//! let creds = Credentials::new("MyNetwork", "MyPassword").unwrap();
//! assert!(!creds.is_open());
//!
//! let restored = Credentials::from_bytes(&creds.to_bytes()).unwrap();
//! assert_eq!(creds, restored);
//! ```

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Maximum SSID length per IEEE 802.11 standard.
pub const MAX_SSID_LEN: usize = 32;

/// Maximum password length for WPA2.
pub const MAX_PASSWORD_LEN: usize = 64;

/// Minimum password length for WPA2.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Station credentials for joining an access point.
///
/// The password is wiped from memory when the value is dropped and is never
/// printed by `Debug`.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    /// Network SSID (1-32 bytes).
    pub ssid: String,
    /// Network password (8-64 bytes for WPA2, empty for open networks).
    pub password: String,
}

impl Credentials {
    /// Create validated credentials.
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Result<Self, ConfigError> {
        let creds = Self {
            ssid: ssid.into(),
            password: password.into(),
        };
        creds.validate()?;
        Ok(creds)
    }

    /// Create credentials for an open network (no password).
    pub fn open(ssid: impl Into<String>) -> Result<Self, ConfigError> {
        Self::new(ssid, String::new())
    }

    /// Validate SSID and password lengths.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ssid.is_empty() {
            return Err(ConfigError::SsidEmpty);
        }
        if self.ssid.len() > MAX_SSID_LEN {
            return Err(ConfigError::SsidTooLong {
                len: self.ssid.len(),
                max: MAX_SSID_LEN,
            });
        }

        // Empty is OK for open networks
        if !self.password.is_empty() && self.password.len() < MIN_PASSWORD_LEN {
            return Err(ConfigError::PasswordTooShort {
                len: self.password.len(),
                min: MIN_PASSWORD_LEN,
            });
        }
        if self.password.len() > MAX_PASSWORD_LEN {
            return Err(ConfigError::PasswordTooLong {
                len: self.password.len(),
                max: MAX_PASSWORD_LEN,
            });
        }

        Ok(())
    }

    /// Check if this is an open network (no password).
    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }

    /// Serialize for persistent storage.
    ///
    /// Format: `[ssid_len:1][ssid:N][password_len:1][password:M]`
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut bytes = Vec::with_capacity(2 + self.ssid.len() + self.password.len());
        bytes.push(self.ssid.len() as u8);
        bytes.extend_from_slice(self.ssid.as_bytes());
        bytes.push(self.password.len() as u8);
        bytes.extend_from_slice(self.password.as_bytes());
        Zeroizing::new(bytes)
    }

    /// Deserialize from the storage format, validating the result.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        let (&ssid_len, rest) = bytes
            .split_first()
            .ok_or_else(|| ConfigError::InvalidFormat("empty data".into()))?;
        let ssid_len = ssid_len as usize;
        if rest.len() < ssid_len + 1 {
            return Err(ConfigError::InvalidFormat("truncated SSID".into()));
        }
        let (ssid, rest) = rest.split_at(ssid_len);

        let password_len = rest[0] as usize;
        let rest = &rest[1..];
        if rest.len() < password_len {
            return Err(ConfigError::InvalidFormat("truncated password".into()));
        }

        let ssid = String::from_utf8(ssid.to_vec())
            .map_err(|_| ConfigError::InvalidFormat("invalid SSID UTF-8".into()))?;
        let password = String::from_utf8(rest[..password_len].to_vec())
            .map_err(|_| ConfigError::InvalidFormat("invalid password UTF-8".into()))?;

        Self::new(ssid, password)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid)
            .field("password", &if self.is_open() { "" } else { "****" })
            .finish()
    }
}

/// Errors that can occur while building or decoding credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// SSID is empty.
    SsidEmpty,
    /// SSID exceeds maximum length.
    SsidTooLong { len: usize, max: usize },
    /// Password is too short for WPA2.
    PasswordTooShort { len: usize, min: usize },
    /// Password exceeds maximum length.
    PasswordTooLong { len: usize, max: usize },
    /// Invalid data format during deserialization.
    InvalidFormat(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SsidEmpty => write!(f, "SSID cannot be empty"),
            Self::SsidTooLong { len, max } => {
                write!(f, "SSID too long: {} bytes (max {})", len, max)
            }
            Self::PasswordTooShort { len, min } => {
                write!(f, "password too short: {} bytes (min {})", len, min)
            }
            Self::PasswordTooLong { len, max } => {
                write!(f, "password too long: {} bytes (max {})", len, max)
            }
            Self::InvalidFormat(msg) => write!(f, "invalid format: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}


#[cfg(feature = "tap-tests")]
mod tap_tests {
    use super::*;
    use terelina_esp32_macros::tap_test;

    #[tap_test]
    fn storage_format_round_trip() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let creds = Credentials::new("Office", "secret123")?;
        let bytes = creds.to_bytes();
        assert_eq!(bytes[0] as usize, "Office".len());
        assert_eq!(Credentials::from_bytes(&bytes)?, creds);
        Ok(())
    }

    #[tap_test]
    fn truncated_record_rejected() {
        assert!(Credentials::from_bytes(&[6, b'O', b'f']).is_err());
    }
}

//! Device identity derived from the factory MAC.

use std::fmt;

/// Immutable identity of this device.
///
/// Built once at boot from the factory-programmed MAC. The portal network
/// name is derived from it so co-located devices advertise distinct names
/// without any central coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    mac: [u8; 6],
}

impl DeviceIdentity {
    /// Identity from the 6-byte efuse MAC.
    pub const fn from_efuse_mac(mac: [u8; 6]) -> Self {
        Self { mac }
    }

    /// The MAC bytes as read from efuse.
    pub fn mac(&self) -> [u8; 6] {
        self.mac
    }

    /// MAC packed into an integer, first byte least significant.
    pub fn raw(&self) -> u64 {
        let mut bytes = [0u8; 8];
        bytes[..6].copy_from_slice(&self.mac);
        u64::from_le_bytes(bytes)
    }

    /// Low 16 bits of [`raw`](Self::raw).
    pub fn suffix(&self) -> u16 {
        (self.raw() & 0xFFFF) as u16
    }

    /// Portal network name, e.g. `Terelina-3FA2`.
    pub fn portal_name(&self, prefix: &str) -> String {
        format!("{}-{:04X}", prefix, self.suffix())
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.mac;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a, b, c, d, e, g
        )
    }
}


#[cfg(feature = "tap-tests")]
mod tap_tests {
    use super::*;
    use terelina_esp32_macros::tap_test;

    #[tap_test]
    fn portal_name_from_mac_prefix() {
        let id = DeviceIdentity::from_efuse_mac([0xA2, 0x3F, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(id.portal_name("Terelina"), "Terelina-3FA2");
    }

    #[tap_test]
    fn raw_value_is_little_endian() {
        let id = DeviceIdentity::from_efuse_mac([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        assert_eq!(id.raw(), 0x0605_0403_0201);
    }
}

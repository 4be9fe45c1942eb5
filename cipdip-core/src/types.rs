//! Common types used throughout CIPDIP

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// MAC Address (6 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// Create a new MAC address
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Broadcast MAC address (ff:ff:ff:ff:ff:ff)
    pub const fn broadcast() -> Self {
        Self([0xff; 6])
    }

    /// Zero MAC address (00:00:00:00:00:00)
    pub const fn zero() -> Self {
        Self([0x00; 6])
    }

    /// Create a MAC address from a slice of exactly six bytes
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        <[u8; 6]>::try_from(slice).ok().map(Self)
    }

    /// Get bytes as slice
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Convert to array
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xff; 6]
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0x00; 6]
    }

    /// Group bit set (includes broadcast)
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 == 0x01
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = crate::Error;

    /// Accepts `aa:bb:cc:dd:ee:ff` and `aa-bb-cc-dd-ee-ff`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(|c: char| c == ':' || c == '-').collect();
        if parts.len() != 6 {
            return Err(crate::Error::invalid_parameter(
                "mac",
                format!("'{}' is not a MAC address", s),
            ));
        }

        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.is_empty() || part.len() > 2 {
                return Err(crate::Error::invalid_parameter(
                    "mac",
                    format!("bad octet '{}' in '{}'", part, s),
                ));
            }
            bytes[i] = u8::from_str_radix(part, 16).map_err(|_| {
                crate::Error::invalid_parameter("mac", format!("bad octet '{}' in '{}'", part, s))
            })?;
        }

        Ok(MacAddr(bytes))
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(bytes: [u8; 6]) -> Self {
        MacAddr(bytes)
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Ethertype constants
pub mod ethertypes {
    pub const IPV4: u16 = 0x0800;
    pub const ARP: u16 = 0x0806;
    pub const DOT1Q: u16 = 0x8100;
    pub const QINQ: u16 = 0x88A8;
    pub const IPV6: u16 = 0x86DD;
}

/// IP protocol numbers the replay path understands
pub mod ip_protocols {
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;
}

/// EtherNet/IP well-known ports
pub mod enip_ports {
    /// Explicit messaging (TCP) and ListIdentity (UDP)
    pub const EXPLICIT: u16 = 44818;
    /// Class 0/1 implicit I/O (UDP)
    pub const IMPLICIT_IO: u16 = 2222;

    pub const DEFAULT_SERVER_PORTS: [u16; 2] = [EXPLICIT, IMPLICIT_IO];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_parse_colon_and_dash() {
        let a: MacAddr = "00:1d:9c:c8:03:e7".parse().unwrap();
        let b: MacAddr = "00-1D-9C-C8-03-E7".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "00:1d:9c:c8:03:e7");
    }

    #[test]
    fn test_mac_parse_rejects_garbage() {
        assert!("00:11:22:33:44".parse::<MacAddr>().is_err());
        assert!("00:11:22:33:44:zz".parse::<MacAddr>().is_err());
        assert!("000:11:22:33:44:55".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_mac_flags() {
        assert!(MacAddr::broadcast().is_broadcast());
        assert!(MacAddr::broadcast().is_multicast());
        assert!(MacAddr::zero().is_zero());
        assert!(!MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]).is_multicast());
        assert_eq!(MacAddr::from_slice(&[1, 2, 3]), None);
    }

    #[test]
    fn test_mac_serde_as_string() {
        let mac = MacAddr([0xaa, 0xbb, 0xcc, 0x00, 0x01, 0x02]);
        let json = serde_json::to_string(&mac).unwrap();
        assert_eq!(json, "\"aa:bb:cc:00:01:02\"");
        let back: MacAddr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mac);
    }
}

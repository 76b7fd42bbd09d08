//! Hardware address type used for randomized station addresses and
//! observed transmitter identities.

use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a textual hardware address cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid hardware address: {0:?}")]
pub struct MacParseError(pub String);

/// A 48-bit hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// Placeholder handed out instead of the real randomized address.
    pub const SENTINEL: MacAddress = MacAddress([0x02, 0x00, 0x00, 0x00, 0x00, 0x00]);

    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Builds a locally administered unicast address from arbitrary bytes.
    pub fn local_unicast_from(bytes: &[u8]) -> Option<Self> {
        let mut octets = [0u8; 6];
        if bytes.len() < octets.len() {
            return None;
        }
        octets.copy_from_slice(&bytes[..6]);
        octets[0] = (octets[0] & 0xFE) | 0x02;
        Some(Self(octets))
    }

    /// Draws a fresh locally administered unicast address.
    pub fn random_local_unicast<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        let mut bytes = [0u8; 6];
        loop {
            rng.fill_bytes(&mut bytes);
            bytes[0] = (bytes[0] & 0xFE) | 0x02;
            let candidate = Self(bytes);
            if candidate != Self::SENTINEL {
                return candidate;
            }
        }
    }

    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    pub fn is_locally_administered(&self) -> bool {
        self.0[0] & 0x02 != 0
    }

    /// True for addresses usable as a randomized station address.
    pub fn is_valid_randomized(&self) -> bool {
        !self.is_multicast() && self.is_locally_administered() && *self != Self::SENTINEL
    }
}

impl Default for MacAddress {
    fn default() -> Self {
        Self::SENTINEL
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddress {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.trim().split(':');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(|| MacParseError(s.to_string()))?;
            if part.len() != 2 {
                return Err(MacParseError(s.to_string()));
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| MacParseError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(MacParseError(s.to_string()));
        }
        Ok(Self(octets))
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_formats() {
        let mac: MacAddress = "AA:bb:0C:dd:ee:ff".parse().unwrap();
        assert_eq!(mac.to_string(), "aa:bb:0c:dd:ee:ff");
        assert!("aa:bb:cc:dd:ee".parse::<MacAddress>().is_err());
        assert!("aa:bb:cc:dd:ee:ff:00".parse::<MacAddress>().is_err());
        assert!("zz:bb:cc:dd:ee:ff".parse::<MacAddress>().is_err());
    }

    #[test]
    fn random_addresses_are_local_unicast() {
        let mut rng = rand::thread_rng();
        for _ in 0..64 {
            let mac = MacAddress::random_local_unicast(&mut rng);
            assert!(mac.is_valid_randomized());
        }
    }

    #[test]
    fn sentinel_is_not_a_valid_randomized_address() {
        assert!(!MacAddress::SENTINEL.is_valid_randomized());
        assert_eq!(MacAddress::default(), MacAddress::SENTINEL);
    }
}

//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// 48-bit MAC address, serialized as "aa:bb:cc:dd:ee:ff".
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddr([u8; 6]);

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParseMacAddrError(String);

// ===== impl MacAddr =====

impl MacAddr {
    pub const LENGTH: usize = 6;
    pub const BROADCAST: Self = Self([0xff; 6]);

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    // Maps an IPv4 multicast group to its Ethernet group address
    // (RFC 1112, section 6.4).
    pub fn from_ipv4_multicast(group: Ipv4Addr) -> MacAddr {
        let octets = group.octets();
        MacAddr([0x01, 0x00, 0x5e, octets[1] & 0x7f, octets[2], octets[3]])
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(bytes: [u8; 6]) -> Self {
        MacAddr(bytes)
    }
}

impl From<MacAddr> for String {
    fn from(addr: MacAddr) -> String {
        addr.to_string()
    }
}

impl TryFrom<String> for MacAddr {
    type Error = ParseMacAddrError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl std::fmt::Display for MacAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddr {
    type Err = ParseMacAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or_else(|| ParseMacAddrError(s.into()))?;
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| ParseMacAddrError(s.into()))?;
        }
        if parts.next().is_some() {
            return Err(ParseMacAddrError(s.into()));
        }
        Ok(MacAddr(bytes))
    }
}

// ===== impl ParseMacAddrError =====

impl std::fmt::Display for ParseMacAddrError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid MAC address: {}", self.0)
    }
}

impl std::error::Error for ParseMacAddrError {}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let addr: MacAddr = "00:1b:21:0a:ff:10".parse().unwrap();
        assert_eq!(addr.octets(), [0x00, 0x1b, 0x21, 0x0a, 0xff, 0x10]);
        assert_eq!(addr.to_string(), "00:1b:21:0a:ff:10");
        assert!("00:1b:21:0a:ff".parse::<MacAddr>().is_err());
        assert!("00:1b:21:0a:ff:10:01".parse::<MacAddr>().is_err());
    }

    #[test]
    fn multicast_mapping() {
        let addr = MacAddr::from_ipv4_multicast(Ipv4Addr::new(224, 0, 0, 5));
        assert_eq!(addr.to_string(), "01:00:5e:00:00:05");
    }
}

//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;

// Extension methods for Ipv4Addr.
pub trait Ipv4AddrExt {
    const LENGTH: usize;

    // Returns true if this is an usable unicast address.
    fn is_usable(&self) -> bool;

    // Converts this address into a /32 prefix.
    fn to_host_prefix(&self) -> Ipv4Network;

    // Returns the prefix length encoded by this address when used as a
    // netmask, or `None` if the mask isn't contiguous.
    fn mask_prefixlen(&self) -> Option<u8>;
}

// Extension methods for Ipv4Network.
pub trait Ipv4NetworkExt {
    const MAX_PREFIXLEN: u8;

    // Applies the mask to the prefix address.
    #[must_use]
    fn apply_mask(&self) -> Ipv4Network;

    // Returns true if this is a host prefix.
    fn is_host_prefix(&self) -> bool;

    // Builds a network from an address and a netmask.
    fn from_mask(addr: Ipv4Addr, mask: Ipv4Addr) -> Option<Ipv4Network>;
}

// ===== impl Ipv4Addr =====

impl Ipv4AddrExt for Ipv4Addr {
    const LENGTH: usize = 4;

    fn is_usable(&self) -> bool {
        !(self.is_broadcast()
            || self.is_multicast()
            || self.is_loopback()
            || self.is_unspecified())
    }

    fn to_host_prefix(&self) -> Ipv4Network {
        Ipv4Network::new(*self, Ipv4Network::MAX_PREFIXLEN).unwrap_or_else(
            |_| unreachable!("a /32 prefix length is always valid"),
        )
    }

    fn mask_prefixlen(&self) -> Option<u8> {
        let mask = u32::from(*self);
        let plen = mask.leading_ones();
        (mask.checked_shl(plen).unwrap_or(0) == 0).then_some(plen as u8)
    }
}

// ===== impl Ipv4Network =====

impl Ipv4NetworkExt for Ipv4Network {
    const MAX_PREFIXLEN: u8 = 32;

    fn apply_mask(&self) -> Ipv4Network {
        Ipv4Network::new(self.network(), self.prefix())
            .unwrap_or_else(|_| unreachable!())
    }

    fn is_host_prefix(&self) -> bool {
        self.prefix() == Self::MAX_PREFIXLEN
    }

    fn from_mask(addr: Ipv4Addr, mask: Ipv4Addr) -> Option<Ipv4Network> {
        let plen = mask.mask_prefixlen()?;
        Ipv4Network::new(addr, plen).ok().map(|net| net.apply_mask())
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_prefixlen() {
        assert_eq!(Ipv4Addr::new(255, 255, 255, 0).mask_prefixlen(), Some(24));
        let host = Ipv4Addr::new(255, 255, 255, 255);
        assert_eq!(host.mask_prefixlen(), Some(32));
        assert_eq!(Ipv4Addr::UNSPECIFIED.mask_prefixlen(), Some(0));
        assert_eq!(Ipv4Addr::new(255, 0, 255, 0).mask_prefixlen(), None);
    }

    #[test]
    fn from_mask() {
        let net = Ipv4Network::from_mask(
            Ipv4Addr::new(20, 0, 0, 77),
            Ipv4Addr::new(255, 255, 255, 0),
        )
        .unwrap();
        assert_eq!(net, const_addrs::net4!("20.0.0.0/24"));
    }
}

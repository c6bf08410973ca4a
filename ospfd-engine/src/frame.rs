//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use internet_checksum::Checksum;
use ospfd_utils::bytes::{BytesExt, BytesMutExt};
use ospfd_utils::mac_addr::MacAddr;
use serde::Serialize;

use crate::packet::error::{DecodeError, DecodeResult};

pub const ALL_SPF_RTRS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 5);
pub const ALL_DR_RTRS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 6);

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETH_LEN: usize = 14;
pub(crate) const IP_LEN: usize = 20;
const IP_PROTO_OSPF: u8 = 89;
// Precedence "internetwork control".
const IP_TOS: u8 = 0xc0;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum MulticastAddr {
    AllSpfRtrs,
    AllDrRtrs,
}

// Destination of an outgoing packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum Destination {
    Multicast(MulticastAddr),
    Unicast(Ipv4Addr, Option<MacAddr>),
}

// OSPF payload of a received frame, with the addressing it arrived with.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RxFrame {
    pub src_mac: MacAddr,
    pub dst_mac: MacAddr,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub ttl: u8,
    pub payload: Bytes,
}

// ===== impl MulticastAddr =====

impl MulticastAddr {
    pub fn addr(&self) -> Ipv4Addr {
        match self {
            MulticastAddr::AllSpfRtrs => ALL_SPF_RTRS,
            MulticastAddr::AllDrRtrs => ALL_DR_RTRS,
        }
    }
}

// ===== impl Destination =====

impl Destination {
    pub fn addr(&self) -> Ipv4Addr {
        match self {
            Destination::Multicast(group) => group.addr(),
            Destination::Unicast(addr, _) => *addr,
        }
    }

    // Unicast packets to a neighbor whose MAC is still unknown go out as
    // link-layer broadcasts.
    pub fn mac(&self) -> MacAddr {
        match self {
            Destination::Multicast(group) => {
                MacAddr::from_ipv4_multicast(group.addr())
            }
            Destination::Unicast(_, mac) => mac.unwrap_or(MacAddr::BROADCAST),
        }
    }
}

// ===== global functions =====

// Builds an Ethernet frame carrying `payload` in an IPv4 datagram with
// TTL 1.
pub fn encode_frame(
    src_mac: MacAddr,
    src: Ipv4Addr,
    dst: Destination,
    payload: &[u8],
) -> Bytes {
    let mut ip_hdr = BytesMut::with_capacity(IP_LEN);
    ip_hdr.put_u8(0x45);
    ip_hdr.put_u8(IP_TOS);
    ip_hdr.put_u16((IP_LEN + payload.len()) as u16);
    ip_hdr.put_u32(0);
    ip_hdr.put_u8(1);
    ip_hdr.put_u8(IP_PROTO_OSPF);
    ip_hdr.put_u16(0);
    ip_hdr.put_ipv4(&src);
    ip_hdr.put_ipv4(&dst.addr());
    let mut cksum = Checksum::new();
    cksum.add_bytes(&ip_hdr);
    ip_hdr[10..12].copy_from_slice(&cksum.checksum());

    let mut buf = BytesMut::with_capacity(ETH_LEN + IP_LEN + payload.len());
    buf.put_slice(&dst.mac().octets());
    buf.put_slice(&src_mac.octets());
    buf.put_u16(ETHERTYPE_IPV4);
    buf.put_slice(&ip_hdr);
    buf.put_slice(payload);
    buf.freeze()
}

// Strips the Ethernet and IPv4 headers off a captured frame.
pub fn decode_frame(frame: &Bytes) -> DecodeResult<RxFrame> {
    let bad = DecodeError::BadEncapsulation;
    if frame.len() < ETH_LEN + IP_LEN {
        return Err(bad);
    }

    let mut eth = frame.slice(..ETH_LEN);
    let mut dst_mac = [0; MacAddr::LENGTH];
    let mut src_mac = [0; MacAddr::LENGTH];
    eth.copy_to_slice(&mut dst_mac);
    eth.copy_to_slice(&mut src_mac);
    if eth.get_u16() != ETHERTYPE_IPV4 {
        return Err(bad);
    }

    let ip = frame.slice(ETH_LEN..);
    let ihl = usize::from(ip[0] & 0x0f) * 4;
    let total_len = usize::from(u16::from_be_bytes([ip[2], ip[3]]));
    if ip[0] >> 4 != 4
        || ihl < IP_LEN
        || total_len < ihl
        || total_len > ip.len()
        || ip[9] != IP_PROTO_OSPF
    {
        return Err(bad);
    }
    let mut cksum = Checksum::new();
    cksum.add_bytes(&ip[..ihl]);
    if cksum.checksum() != [0, 0] {
        return Err(bad);
    }

    let mut addrs = ip.slice(12..20);
    Ok(RxFrame {
        src_mac: MacAddr::from(src_mac),
        dst_mac: MacAddr::from(dst_mac),
        ttl: ip[8],
        src: addrs.get_ipv4(),
        dst: addrs.get_ipv4(),
        // Ethernet padding and IP options are left out.
        payload: ip.slice(ihl..total_len),
    })
}

// ===== unit tests =====

//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod error;
pub mod lsa;

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::ops::Range;

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use internet_checksum::Checksum;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use ospfd_utils::bytes::{BytesExt, BytesMutExt, TLS_BUF};
use ospfd_utils::ip::Ipv4AddrExt;
use serde::{Deserialize, Serialize};

use self::error::{DecodeError, DecodeResult};
use self::lsa::{Lsa, LsaHdr, LsaKey, LsaType};

pub const OSPF_VERSION: u8 = 2;

bitflags! {
    // Options advertised in Hellos, DD packets and LSA headers.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct Options: u8 {
        const E = 0x02;
        const MC = 0x04;
        const NP = 0x08;
        const DC = 0x20;
        const O = 0x40;
    }
}

bitflags! {
    // Init, More and Master/Slave bits of a DD packet.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct DbDescFlags: u8 {
        const MS = 0x01;
        const M = 0x02;
        const I = 0x04;
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
#[derive(FromPrimitive, Deserialize, Serialize)]
pub enum PacketType {
    Hello = 1,
    DbDesc = 2,
    LsRequest = 3,
    LsUpdate = 4,
    LsAck = 5,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, FromPrimitive)]
enum AuType {
    Null = 0,
    Simple = 1,
    Cryptographic = 2,
}

// Clear-text password, zero padded to the size of the header's
// authentication field.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct SimpleAuthKey(pub [u8; 8]);

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum Packet {
    Hello(Hello),
    DbDesc(DbDesc),
    LsRequest(LsRequest),
    LsUpdate(LsUpdate),
    LsAck(LsAck),
}

// Common header fields. Length, checksum and authentication are derived
// while encoding and checked while decoding, so they aren't kept here.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct PacketHdr {
    pub pkt_type: PacketType,
    pub router_id: Ipv4Addr,
    pub area_id: Ipv4Addr,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct Hello {
    pub hdr: PacketHdr,
    pub network_mask: Ipv4Addr,
    pub hello_interval: u16,
    pub options: Options,
    pub priority: u8,
    pub dead_interval: u32,
    pub dr: Option<Ipv4Addr>,
    pub bdr: Option<Ipv4Addr>,
    pub neighbors: BTreeSet<Ipv4Addr>,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct DbDesc {
    pub hdr: PacketHdr,
    pub mtu: u16,
    pub options: Options,
    pub dd_flags: DbDescFlags,
    pub dd_seq_no: u32,
    pub lsa_hdrs: Vec<LsaHdr>,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct LsRequest {
    pub hdr: PacketHdr,
    pub entries: Vec<LsaKey>,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct LsUpdate {
    pub hdr: PacketHdr,
    pub lsas: Vec<Lsa>,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct LsAck {
    pub hdr: PacketHdr,
    pub lsa_hdrs: Vec<LsaHdr>,
}

// Wire layout of a packet body.
trait Body: Sized {
    // Size of the fixed part of the body.
    const FIXED_LEN: usize;

    fn read(hdr: PacketHdr, buf: &mut Bytes) -> DecodeResult<Self>;

    fn write(&self, buf: &mut BytesMut);

    fn parse(hdr: PacketHdr, buf: &mut Bytes) -> DecodeResult<Self> {
        if buf.remaining() < Self::FIXED_LEN {
            let len = PacketHdr::LENGTH as usize + buf.remaining();
            return Err(DecodeError::InvalidLength(len as u16));
        }
        Self::read(hdr, buf)
    }
}

// ===== impl SimpleAuthKey =====

impl SimpleAuthKey {
    pub fn new(password: &str) -> Self {
        let mut key = [0; 8];
        for (dst, src) in key.iter_mut().zip(password.bytes()) {
            *dst = src;
        }
        SimpleAuthKey(key)
    }
}

// ===== impl Packet =====

impl Packet {
    // Parses one packet off the front of `buf`.
    //
    // The checksum and the authentication data are checked before the body
    // is looked at. Anything past the length announced in the header is
    // left in `buf`.
    pub fn decode(
        buf: &mut Bytes,
        auth: Option<&SimpleAuthKey>,
    ) -> DecodeResult<Packet> {
        let hdr_len = PacketHdr::LENGTH as usize;
        if buf.len() < hdr_len {
            return Err(DecodeError::InvalidLength(buf.len() as u16));
        }
        let len = u16::from_be_bytes([buf[2], buf[3]]);
        if (len as usize) < hdr_len || (len as usize) > buf.len() {
            return Err(DecodeError::InvalidLength(len));
        }
        let mut data = buf.split_to(len as usize);

        let mut cksum = Checksum::new();
        cksum.add_bytes(&data[..PacketHdr::AUTH.start]);
        cksum.add_bytes(&data[PacketHdr::AUTH.end..]);
        if cksum.checksum() != [0, 0] {
            return Err(DecodeError::InvalidChecksum);
        }

        let hdr = PacketHdr::read(&mut data, auth)?;
        match hdr.pkt_type {
            PacketType::Hello => Hello::parse(hdr, &mut data).map(Self::Hello),
            PacketType::DbDesc => {
                DbDesc::parse(hdr, &mut data).map(Self::DbDesc)
            }
            PacketType::LsRequest => {
                LsRequest::parse(hdr, &mut data).map(Self::LsRequest)
            }
            PacketType::LsUpdate => {
                LsUpdate::parse(hdr, &mut data).map(Self::LsUpdate)
            }
            PacketType::LsAck => LsAck::parse(hdr, &mut data).map(Self::LsAck),
        }
    }

    pub fn encode(&self, auth: Option<&SimpleAuthKey>) -> Bytes {
        match self {
            Packet::Hello(body) => emit(&body.hdr, body, auth),
            Packet::DbDesc(body) => emit(&body.hdr, body, auth),
            Packet::LsRequest(body) => emit(&body.hdr, body, auth),
            Packet::LsUpdate(body) => emit(&body.hdr, body, auth),
            Packet::LsAck(body) => emit(&body.hdr, body, auth),
        }
    }

    pub fn hdr(&self) -> &PacketHdr {
        match self {
            Packet::Hello(body) => &body.hdr,
            Packet::DbDesc(body) => &body.hdr,
            Packet::LsRequest(body) => &body.hdr,
            Packet::LsUpdate(body) => &body.hdr,
            Packet::LsAck(body) => &body.hdr,
        }
    }
}

// ===== impl PacketHdr =====

impl PacketHdr {
    pub const LENGTH: u16 = 24;
    const CKSUM: Range<usize> = 12..14;
    const AUTH: Range<usize> = 16..24;

    pub fn new(
        pkt_type: PacketType,
        router_id: Ipv4Addr,
        area_id: Ipv4Addr,
    ) -> Self {
        PacketHdr {
            pkt_type,
            router_id,
            area_id,
        }
    }

    fn read(
        buf: &mut Bytes,
        auth: Option<&SimpleAuthKey>,
    ) -> DecodeResult<Self> {
        let version = buf.get_u8();
        if version != OSPF_VERSION {
            return Err(DecodeError::BadVersion(version));
        }
        let code = buf.get_u8();
        let pkt_type = PacketType::from_u8(code)
            .ok_or(DecodeError::BadPacketType(code))?;
        // Length and checksum were checked by the caller.
        buf.advance(2);
        let router_id = buf.get_ipv4();
        if !router_id.is_usable() {
            return Err(DecodeError::BadRouterId);
        }
        let area_id = buf.get_ipv4();
        buf.advance(2);

        let au_type = buf.get_u16();
        let mut password = [0; 8];
        buf.copy_to_slice(&mut password);
        match (AuType::from_u16(au_type), auth) {
            (Some(AuType::Null), None) => (),
            (Some(AuType::Simple), Some(key)) if key.0 == password => (),
            (Some(AuType::Simple), Some(_)) => {
                return Err(DecodeError::AuthError);
            }
            (Some(AuType::Null | AuType::Simple), _) => {
                return Err(DecodeError::AuthTypeMismatch);
            }
            (Some(AuType::Cryptographic) | None, _) => {
                return Err(DecodeError::UnsupportedAuth(au_type));
            }
        }

        Ok(PacketHdr::new(pkt_type, router_id, area_id))
    }
}

// ===== impl Hello =====

impl Body for Hello {
    const FIXED_LEN: usize = 20;

    fn read(hdr: PacketHdr, buf: &mut Bytes) -> DecodeResult<Self> {
        let network_mask = buf.get_ipv4();
        let hello_interval = buf.get_u16();
        let options = Options::from_bits_truncate(buf.get_u8());
        let priority = buf.get_u8();
        let dead_interval = buf.get_u32();
        let dr = buf.get_opt_ipv4();
        let bdr = buf.get_opt_ipv4();
        let mut neighbors = BTreeSet::new();
        while buf.remaining() >= Ipv4Addr::LENGTH {
            neighbors.insert(buf.get_ipv4());
        }

        Ok(Hello {
            hdr,
            network_mask,
            hello_interval,
            options,
            priority,
            dead_interval,
            dr,
            bdr,
            neighbors,
        })
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_ipv4(&self.network_mask);
        buf.put_u16(self.hello_interval);
        buf.put_u8(self.options.bits());
        buf.put_u8(self.priority);
        buf.put_u32(self.dead_interval);
        buf.put_opt_ipv4(&self.dr);
        buf.put_opt_ipv4(&self.bdr);
        self.neighbors.iter().for_each(|addr| buf.put_ipv4(addr));
    }
}

// ===== impl DbDesc =====

impl Body for DbDesc {
    const FIXED_LEN: usize = 8;

    fn read(hdr: PacketHdr, buf: &mut Bytes) -> DecodeResult<Self> {
        Ok(DbDesc {
            hdr,
            mtu: buf.get_u16(),
            options: Options::from_bits_truncate(buf.get_u8()),
            dd_flags: DbDescFlags::from_bits_truncate(buf.get_u8()),
            dd_seq_no: buf.get_u32(),
            lsa_hdrs: read_lsa_hdrs(buf)?,
        })
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_u16(self.mtu);
        buf.put_u8(self.options.bits());
        buf.put_u8(self.dd_flags.bits());
        buf.put_u32(self.dd_seq_no);
        self.lsa_hdrs.iter().for_each(|lsa_hdr| lsa_hdr.encode(buf));
    }
}

// ===== impl LsRequest =====

impl LsRequest {
    // Each entry is a 32-bit LS type, the LS ID and the advertising router.
    pub const ENTRY_LENGTH: usize = 12;
}

impl Body for LsRequest {
    const FIXED_LEN: usize = 0;

    fn read(hdr: PacketHdr, buf: &mut Bytes) -> DecodeResult<Self> {
        let mut entries = vec![];
        while buf.remaining() >= Self::ENTRY_LENGTH {
            let lsa_type = LsaType(buf.get_u32() as u8);
            let lsa_id = buf.get_ipv4();
            let adv_rtr = buf.get_ipv4();
            entries.push(LsaKey::new(lsa_type, adv_rtr, lsa_id));
        }
        Ok(LsRequest { hdr, entries })
    }

    fn write(&self, buf: &mut BytesMut) {
        for key in &self.entries {
            buf.put_u32(key.lsa_type.0.into());
            buf.put_ipv4(&key.lsa_id);
            buf.put_ipv4(&key.adv_rtr);
        }
    }
}

// ===== impl LsUpdate =====

impl Body for LsUpdate {
    const FIXED_LEN: usize = 4;

    fn read(hdr: PacketHdr, buf: &mut Bytes) -> DecodeResult<Self> {
        let count = buf.get_u32();
        let mut lsas = vec![];
        for _ in 0..count {
            // The length in the LSA header delimits the LSA.
            if buf.remaining() < LsaHdr::LENGTH as usize {
                return Err(DecodeError::TruncatedLsa);
            }
            let len = u16::from_be_bytes([buf[18], buf[19]]) as usize;
            if len < LsaHdr::LENGTH as usize || len > buf.remaining() {
                return Err(DecodeError::TruncatedLsa);
            }
            let mut chunk = buf.split_to(len);

            // LSAs of unknown types are skipped.
            if LsaType(chunk[3]).type_code().is_none() {
                continue;
            }
            lsas.push(Lsa::decode(&mut chunk)?);
        }
        Ok(LsUpdate { hdr, lsas })
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_u32(self.lsas.len() as u32);
        self.lsas.iter().for_each(|lsa| buf.put_slice(&lsa.raw));
    }
}

// ===== impl LsAck =====

impl Body for LsAck {
    const FIXED_LEN: usize = 0;

    fn read(hdr: PacketHdr, buf: &mut Bytes) -> DecodeResult<Self> {
        let lsa_hdrs = read_lsa_hdrs(buf)?;
        Ok(LsAck { hdr, lsa_hdrs })
    }

    fn write(&self, buf: &mut BytesMut) {
        self.lsa_hdrs.iter().for_each(|lsa_hdr| lsa_hdr.encode(buf));
    }
}

// ===== helper functions =====

fn read_lsa_hdrs(buf: &mut Bytes) -> DecodeResult<Vec<LsaHdr>> {
    let count = buf.remaining() / LsaHdr::LENGTH as usize;
    (0..count).map(|_| LsaHdr::decode(buf)).collect()
}

// Serializes header and body, then fills in the length, the checksum and
// finally the password (the checksum doesn't cover it).
fn emit<B: Body>(
    hdr: &PacketHdr,
    body: &B,
    auth: Option<&SimpleAuthKey>,
) -> Bytes {
    TLS_BUF.with(|buf| {
        let mut buf = buf.borrow_mut();
        buf.clear();

        let au_type = match auth {
            Some(_) => AuType::Simple,
            None => AuType::Null,
        };
        buf.put_u8(OSPF_VERSION);
        buf.put_u8(hdr.pkt_type as u8);
        buf.put_u16(0);
        buf.put_ipv4(&hdr.router_id);
        buf.put_ipv4(&hdr.area_id);
        buf.put_u16(0);
        buf.put_u16(au_type as u16);
        buf.put_u64(0);
        body.write(&mut buf);

        let len = buf.len() as u16;
        buf[2..4].copy_from_slice(&len.to_be_bytes());
        let mut cksum = Checksum::new();
        cksum.add_bytes(&buf);
        buf[PacketHdr::CKSUM].copy_from_slice(&cksum.checksum());
        if let Some(key) = auth {
            buf[PacketHdr::AUTH].copy_from_slice(&key.0);
        }

        Bytes::copy_from_slice(&buf)
    })
}

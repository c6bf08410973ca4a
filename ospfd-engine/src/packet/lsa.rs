//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::time::Instant;

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use derive_new::new;
use enum_as_inner::EnumAsInner;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use ospfd_utils::bytes::{BytesExt, BytesMutExt, TLS_BUF};
use serde::{Deserialize, Serialize};

use crate::lsdb::{LSA_MAX_AGE, LSA_RESERVED_SEQ_NO};
use crate::packet::Options;
use crate::packet::error::{DecodeError, DecodeResult, LsaValidationError};

// Decoded LSA together with its wire image.
//
// `raw` always mirrors `hdr` and `body`, so an LSA can be flooded without
// being encoded again.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Lsa {
    #[serde(default, skip_serializing)]
    pub raw: Bytes,
    pub hdr: LsaHdr,
    pub body: LsaBody,
    // When the header age was last valid.
    #[serde(skip)]
    pub stamp: Option<Instant>,
}

// Identity of an LSA within its flooding scope.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, new)]
#[derive(Deserialize, Serialize)]
pub struct LsaKey {
    pub lsa_type: LsaType,
    pub adv_rtr: Ipv4Addr,
    pub lsa_id: Ipv4Addr,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum LsaScope {
    Area,
    As,
}

// Raw LS type, which might not be one this router understands.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct LsaType(pub u8);

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, Deserialize, Serialize)]
pub enum LsaTypeCode {
    Router = 1,
    Network = 2,
    SummaryNetwork = 3,
    SummaryRouter = 4,
    AsExternal = 5,
}

#[derive(Clone, Debug, Eq, PartialEq, EnumAsInner)]
#[derive(Deserialize, Serialize)]
pub enum LsaBody {
    Router(LsaRouter),
    Network(LsaNetwork),
    SummaryNetwork(LsaSummary),
    SummaryRouter(LsaSummary),
    AsExternal(LsaAsExternal),
}

// 20-byte header: age, options, type, LS ID, advertising router, sequence
// number, checksum and length.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct LsaHdr {
    pub age: u16,
    pub options: Options,
    pub lsa_type: LsaType,
    pub lsa_id: Ipv4Addr,
    pub adv_rtr: Ipv4Addr,
    pub seq_no: u32,
    pub cksum: u16,
    pub length: u16,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct LsaRouter {
    pub flags: LsaRouterFlags,
    pub links: Vec<LsaRouterLink>,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct LsaRouterFlags: u8 {
        const B = 0x01;
        const E = 0x02;
        const V = 0x04;
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, FromPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum LsaRouterLinkType {
    PointToPoint = 1,
    TransitNetwork = 2,
    StubNetwork = 3,
    VirtualLink = 4,
}

#[derive(Clone, Debug, Eq, PartialEq, new, Deserialize, Serialize)]
pub struct LsaRouterLink {
    pub link_type: LsaRouterLinkType,
    pub link_id: Ipv4Addr,
    pub link_data: Ipv4Addr,
    pub metric: u16,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct LsaNetwork {
    pub mask: Ipv4Addr,
    pub attached_rtrs: BTreeSet<Ipv4Addr>,
}

// Body shared by type 3 and type 4 summaries.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct LsaSummary {
    pub mask: Ipv4Addr,
    pub metric: u32,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct LsaAsExternal {
    pub mask: Ipv4Addr,
    pub flags: LsaAsExternalFlags,
    pub metric: u32,
    pub fwd_addr: Option<Ipv4Addr>,
    pub tag: u32,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct LsaAsExternalFlags: u8 {
        const E = 0x80;
    }
}

// ===== impl Lsa =====

impl Lsa {
    // Offsets within the LSA header.
    const CKSUM_OFFSET: usize = 16;
    const LENGTH_OFFSET: usize = 18;

    // Builds a self-originated LSA, computing its length and checksum.
    pub fn new(
        age: u16,
        options: Options,
        lsa_id: Ipv4Addr,
        adv_rtr: Ipv4Addr,
        seq_no: u32,
        body: LsaBody,
    ) -> Self {
        let hdr = LsaHdr {
            age,
            options,
            lsa_type: body.lsa_type(),
            lsa_id,
            adv_rtr,
            seq_no,
            cksum: 0,
            length: 0,
        };

        let raw = TLS_BUF.with(|buf| {
            let mut buf = buf.borrow_mut();
            buf.clear();
            hdr.encode(&mut buf);
            body.write(&mut buf);

            // Length and checksum were written as zeros.
            let len = buf.len() as u16;
            buf[Self::LENGTH_OFFSET..Self::LENGTH_OFFSET + 2]
                .copy_from_slice(&len.to_be_bytes());
            let cksum = iso_checkbytes(&buf[2..]);
            buf[Self::CKSUM_OFFSET..Self::CKSUM_OFFSET + 2]
                .copy_from_slice(&cksum);
            Bytes::copy_from_slice(&buf)
        });

        let mut hdr = hdr;
        hdr.length = raw.len() as u16;
        hdr.cksum = u16::from_be_bytes([
            raw[Self::CKSUM_OFFSET],
            raw[Self::CKSUM_OFFSET + 1],
        ]);
        Lsa {
            raw,
            hdr,
            body,
            stamp: Some(Instant::now()),
        }
    }

    // Parses a complete LSA, keeping a copy of its wire image.
    pub fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let start = buf.clone();
        let hdr = LsaHdr::decode(buf)?;
        let len = hdr.length as usize;
        if len < LsaHdr::LENGTH as usize || len > start.len() {
            return Err(DecodeError::TruncatedLsa);
        }
        let code = hdr.lsa_type.type_code();
        let code = code.ok_or(DecodeError::BadLsaType(hdr.lsa_type.0))?;
        let mut body = buf.split_to(len - LsaHdr::LENGTH as usize);
        let body = LsaBody::read(code, &mut body)?;

        Ok(Lsa {
            raw: start.slice(..len),
            hdr,
            body,
            stamp: Some(Instant::now()),
        })
    }

    // Current age: the header age plus the time spent in the database,
    // capped at MaxAge.
    pub fn age(&self) -> u16 {
        let Some(stamp) = self.stamp else {
            return self.hdr.age;
        };
        if self.hdr.age >= LSA_MAX_AGE {
            return self.hdr.age;
        }
        let held = stamp.elapsed().as_secs();
        let age = u64::from(self.hdr.age).saturating_add(held);
        age.min(LSA_MAX_AGE.into()) as u16
    }

    // Rewrites the age in both the header and the wire image. The age isn't
    // covered by the checksum.
    pub fn set_age(&mut self, age: u16) {
        let mut raw = BytesMut::from(&self.raw[..]);
        raw[..2].copy_from_slice(&age.to_be_bytes());
        self.raw = raw.freeze();
        self.hdr.age = age;
        self.stamp = Some(Instant::now());
    }

    pub fn set_maxage(&mut self) {
        self.set_age(LSA_MAX_AGE);
    }

    // Checks performed on every received LSA before it's considered for
    // installation.
    pub fn validate(&self) -> Result<(), LsaValidationError> {
        let len = self.hdr.length as usize;
        if self.hdr.age > LSA_MAX_AGE {
            Err(LsaValidationError::BadAge)
        } else if self.hdr.seq_no == LSA_RESERVED_SEQ_NO {
            Err(LsaValidationError::ReservedSeqNo)
        } else if self.raw.len() < len
            || fletcher::calc_fletcher16(&self.raw[2..len]) != 0
        {
            Err(LsaValidationError::BadChecksum)
        } else if self.body.is_router() && self.hdr.adv_rtr != self.hdr.lsa_id
        {
            Err(LsaValidationError::RouterIdMismatch)
        } else {
            Ok(())
        }
    }
}

impl PartialEq for Lsa {
    fn eq(&self, other: &Self) -> bool {
        self.hdr == other.hdr && self.body == other.body
    }
}

impl Eq for Lsa {}

// ===== impl LsaType =====

impl LsaType {
    pub fn type_code(&self) -> Option<LsaTypeCode> {
        LsaTypeCode::from_u8(self.0)
    }

    // Returns `None` for unknown types.
    pub fn scope(&self) -> Option<LsaScope> {
        match self.type_code()? {
            LsaTypeCode::AsExternal => Some(LsaScope::As),
            _ => Some(LsaScope::Area),
        }
    }
}

impl From<LsaTypeCode> for LsaType {
    fn from(code: LsaTypeCode) -> LsaType {
        LsaType(code as u8)
    }
}

impl std::fmt::Display for LsaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.type_code() {
            Some(code) => write!(f, "{code:?}"),
            None => write!(f, "unknown({})", self.0),
        }
    }
}

// ===== impl LsaHdr =====

impl LsaHdr {
    pub const LENGTH: u16 = 20;

    pub fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        if buf.remaining() < Self::LENGTH as usize {
            return Err(DecodeError::TruncatedLsa);
        }
        Ok(LsaHdr {
            age: buf.get_u16(),
            options: Options::from_bits_truncate(buf.get_u8()),
            lsa_type: LsaType(buf.get_u8()),
            lsa_id: buf.get_ipv4(),
            adv_rtr: buf.get_ipv4(),
            seq_no: buf.get_u32(),
            cksum: buf.get_u16(),
            length: buf.get_u16(),
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.age);
        buf.put_u8(self.options.bits());
        buf.put_u8(self.lsa_type.0);
        buf.put_ipv4(&self.lsa_id);
        buf.put_ipv4(&self.adv_rtr);
        buf.put_u32(self.seq_no);
        buf.put_u16(self.cksum);
        buf.put_u16(self.length);
    }

    pub fn key(&self) -> LsaKey {
        LsaKey::new(self.lsa_type, self.adv_rtr, self.lsa_id)
    }

    pub fn is_maxage(&self) -> bool {
        self.age == LSA_MAX_AGE
    }
}

// ===== impl LsaBody =====

impl LsaBody {
    pub fn lsa_type(&self) -> LsaType {
        let code = match self {
            LsaBody::Router(_) => LsaTypeCode::Router,
            LsaBody::Network(_) => LsaTypeCode::Network,
            LsaBody::SummaryNetwork(_) => LsaTypeCode::SummaryNetwork,
            LsaBody::SummaryRouter(_) => LsaTypeCode::SummaryRouter,
            LsaBody::AsExternal(_) => LsaTypeCode::AsExternal,
        };
        code.into()
    }

    pub fn as_summary(&self) -> Option<&LsaSummary> {
        match self {
            LsaBody::SummaryNetwork(body) | LsaBody::SummaryRouter(body) => {
                Some(body)
            }
            _ => None,
        }
    }

    fn read(code: LsaTypeCode, buf: &mut Bytes) -> DecodeResult<Self> {
        let need = |buf: &Bytes, len: usize| {
            if buf.remaining() < len {
                return Err(DecodeError::TruncatedLsa);
            }
            Ok(())
        };

        let body = match code {
            LsaTypeCode::Router => {
                need(buf, 4)?;
                let flags = LsaRouterFlags::from_bits_truncate(buf.get_u8());
                buf.advance(1);
                let count = buf.get_u16();
                let mut links = Vec::with_capacity(count.into());
                for _ in 0..count {
                    need(buf, 12)?;
                    let link_id = buf.get_ipv4();
                    let link_data = buf.get_ipv4();
                    let code = buf.get_u8();
                    let link_type = LsaRouterLinkType::from_u8(code)
                        .ok_or(DecodeError::BadLinkType(code))?;
                    // TOS-specific metrics are skipped.
                    let tos_len = buf.get_u8() as usize * 4;
                    let metric = buf.get_u16();
                    need(buf, tos_len)?;
                    buf.advance(tos_len);
                    links.push(LsaRouterLink {
                        link_type,
                        link_id,
                        link_data,
                        metric,
                    });
                }
                LsaBody::Router(LsaRouter { flags, links })
            }
            LsaTypeCode::Network => {
                need(buf, 4)?;
                let mask = buf.get_ipv4();
                let mut attached_rtrs = BTreeSet::new();
                while buf.remaining() >= 4 {
                    attached_rtrs.insert(buf.get_ipv4());
                }
                LsaBody::Network(LsaNetwork {
                    mask,
                    attached_rtrs,
                })
            }
            LsaTypeCode::SummaryNetwork | LsaTypeCode::SummaryRouter => {
                need(buf, 8)?;
                let mask = buf.get_ipv4();
                let metric = buf.get_u32() & 0x00ff_ffff;
                let summary = LsaSummary { mask, metric };
                if code == LsaTypeCode::SummaryNetwork {
                    LsaBody::SummaryNetwork(summary)
                } else {
                    LsaBody::SummaryRouter(summary)
                }
            }
            LsaTypeCode::AsExternal => {
                need(buf, 16)?;
                let mask = buf.get_ipv4();
                let flags = LsaAsExternalFlags::from_bits_truncate(buf[0]);
                let metric = buf.get_u32() & 0x00ff_ffff;
                let fwd_addr = buf.get_opt_ipv4();
                let tag = buf.get_u32();
                LsaBody::AsExternal(LsaAsExternal {
                    mask,
                    flags,
                    metric,
                    fwd_addr,
                    tag,
                })
            }
        };

        Ok(body)
    }

    fn write(&self, buf: &mut BytesMut) {
        match self {
            LsaBody::Router(body) => {
                buf.put_u8(body.flags.bits());
                buf.put_u8(0);
                buf.put_u16(body.links.len() as u16);
                for link in &body.links {
                    buf.put_ipv4(&link.link_id);
                    buf.put_ipv4(&link.link_data);
                    buf.put_u8(link.link_type as u8);
                    buf.put_u8(0);
                    buf.put_u16(link.metric);
                }
            }
            LsaBody::Network(body) => {
                buf.put_ipv4(&body.mask);
                body.attached_rtrs.iter().for_each(|rtr| buf.put_ipv4(rtr));
            }
            LsaBody::SummaryNetwork(body) | LsaBody::SummaryRouter(body) => {
                buf.put_ipv4(&body.mask);
                buf.put_u8(0);
                buf.put_u24(body.metric);
            }
            LsaBody::AsExternal(body) => {
                buf.put_ipv4(&body.mask);
                buf.put_u8(body.flags.bits());
                buf.put_u24(body.metric);
                buf.put_opt_ipv4(&body.fwd_addr);
                buf.put_u32(body.tag);
            }
        }
    }
}

// ===== impl LsaRouter =====

impl LsaRouter {
    pub fn is_abr(&self) -> bool {
        self.flags.contains(LsaRouterFlags::B)
    }

    pub fn is_asbr(&self) -> bool {
        self.flags.contains(LsaRouterFlags::E)
    }
}

// ===== helper functions =====

// Fletcher check bytes for an LSA whose checksum field (offset 14 of
// `data`, which starts after the age) is zeroed. ISO 8473 Annex C.
fn iso_checkbytes(data: &[u8]) -> [u8; 2] {
    let sum = fletcher::calc_fletcher16(data);
    let c0 = i32::from(sum as u8);
    let c1 = i32::from((sum >> 8) as u8);
    let pos = data.len() as i32 - 15;

    let x = match (pos * c0 - c1).rem_euclid(255) {
        0 => 255,
        x => x,
    };
    let y = 510 - c0 - x;
    let y = if y > 255 { y - 255 } else { y };
    [x as u8, y as u8]
}

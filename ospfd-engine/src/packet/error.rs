//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::fmt;

use serde::{Deserialize, Serialize};

pub type DecodeResult<T> = Result<T, DecodeError>;

// Reasons for rejecting a received frame, packet or LSA.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum DecodeError {
    // Frame level.
    BadEncapsulation,
    // Packet level.
    InvalidLength(u16),
    InvalidChecksum,
    BadVersion(u8),
    BadPacketType(u8),
    BadRouterId,
    AuthTypeMismatch,
    AuthError,
    UnsupportedAuth(u16),
    // LSA level.
    TruncatedLsa,
    BadLsaType(u8),
    BadLinkType(u8),
}

// Problems found in an LSA that was otherwise parsed correctly. The LSA is
// dropped but the rest of the LS Update is still processed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum LsaValidationError {
    BadAge,
    ReservedSeqNo,
    BadChecksum,
    RouterIdMismatch,
}

// ===== impl DecodeError =====

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadEncapsulation => f.write_str("malformed Ethernet/IPv4"),
            Self::InvalidLength(len) => write!(f, "bad packet length {len}"),
            Self::InvalidChecksum => f.write_str("packet checksum mismatch"),
            Self::BadVersion(version) => write!(f, "not OSPFv2 ({version})"),
            Self::BadPacketType(code) => write!(f, "packet type {code}"),
            Self::BadRouterId => f.write_str("unusable router-id"),
            Self::AuthTypeMismatch => f.write_str("auth type mismatch"),
            Self::AuthError => f.write_str("wrong password"),
            Self::UnsupportedAuth(code) => write!(f, "auth type {code}"),
            Self::TruncatedLsa => f.write_str("truncated LSA"),
            Self::BadLsaType(code) => write!(f, "LSA type {code}"),
            Self::BadLinkType(code) => write!(f, "router link type {code}"),
        }
    }
}

impl std::error::Error for DecodeError {}

// ===== impl LsaValidationError =====

impl fmt::Display for LsaValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::BadAge => "age above MaxAge",
            Self::ReservedSeqNo => "reserved sequence number",
            Self::BadChecksum => "LSA checksum mismatch",
            Self::RouterIdMismatch => "Router-LSA ID differs from adv-rtr",
        };
        f.write_str(reason)
    }
}

impl std::error::Error for LsaValidationError {}

//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::fmt;
use std::net::Ipv4Addr;

use tracing::warn;

use crate::interface::ism;
use crate::neighbor::nsm;
use crate::packet::error::DecodeError;
use crate::tasks::messages::NbrKey;

// Failures of event handlers. None of them is fatal: the dispatcher logs
// them and moves on to the next event.
#[derive(Debug)]
pub enum Error {
    // Lookup misses
    AreaNotFound(Ipv4Addr),
    InterfaceNotFound(String),
    NeighborNotFound(NbrKey),
    // Received packets
    PacketDecode(String, DecodeError),
    AreaMismatch(String, Ipv4Addr, Ipv4Addr),
    UnknownNeighbor(String, Ipv4Addr, Ipv4Addr),
    HelloMismatch(String, Ipv4Addr, HelloMismatch),
    DbDescMtuMismatch(Ipv4Addr, u16),
    DbDescReject(Ipv4Addr, nsm::State),
    // State machines
    IsmUnexpectedEvent(ism::State, ism::Event),
    NsmUnexpectedEvent(Ipv4Addr, nsm::State, nsm::Event),
    // Southbound
    NotificationDecode(String),
}

// Hello parameter that disagrees with the receiving interface.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HelloMismatch {
    NetworkMask(Ipv4Addr),
    HelloInterval(u16),
    DeadInterval(u32),
    ExternalRouting,
}

// ===== impl Error =====

impl Error {
    pub fn log(&self) {
        match self {
            Error::AreaNotFound(area_id) => warn!(%area_id, "{}", self),
            Error::InterfaceNotFound(name) => warn!(%name, "{}", self),
            Error::NeighborNotFound(key) => warn!(
                area_id = %key.area_id,
                interface = %key.ifname,
                router_id = %key.router_id,
                "{}", self
            ),
            Error::PacketDecode(name, error) => {
                warn!(interface = %name, %error, "{}", self)
            }
            Error::AreaMismatch(name, src, area_id) => {
                warn!(interface = %name, %src, %area_id, "{}", self)
            }
            Error::UnknownNeighbor(name, src, router_id) => {
                warn!(interface = %name, %src, %router_id, "{}", self)
            }
            Error::HelloMismatch(name, src, mismatch) => {
                warn!(interface = %name, %src, ?mismatch, "{}", self)
            }
            Error::DbDescMtuMismatch(router_id, mtu) => {
                warn!(%router_id, %mtu, "{}", self)
            }
            Error::DbDescReject(router_id, state) => {
                warn!(%router_id, ?state, "{}", self)
            }
            Error::IsmUnexpectedEvent(state, event) => {
                warn!(?state, ?event, "{}", self)
            }
            Error::NsmUnexpectedEvent(router_id, state, event) => {
                warn!(%router_id, ?state, ?event, "{}", self)
            }
            Error::NotificationDecode(error) => warn!(%error, "{}", self),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::AreaNotFound(..) => write!(f, "area not found"),
            Error::InterfaceNotFound(..) => write!(f, "interface not found"),
            Error::NeighborNotFound(..) => write!(f, "neighbor not found"),
            Error::PacketDecode(..) => write!(f, "failed to decode packet"),
            Error::AreaMismatch(..) => {
                write!(f, "packet received for another area")
            }
            Error::UnknownNeighbor(..) => {
                write!(f, "packet from unknown neighbor")
            }
            Error::HelloMismatch(..) => {
                write!(f, "hello parameters don't match")
            }
            Error::DbDescMtuMismatch(..) => {
                write!(f, "neighbor MTU exceeds the interface MTU")
            }
            Error::DbDescReject(..) => {
                write!(f, "DD packet rejected in the current state")
            }
            Error::IsmUnexpectedEvent(..) | Error::NsmUnexpectedEvent(..) => {
                write!(f, "unexpected event")
            }
            Error::NotificationDecode(..) => {
                write!(f, "failed to decode notification")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::PacketDecode(_, error) => Some(error),
            _ => None,
        }
    }
}

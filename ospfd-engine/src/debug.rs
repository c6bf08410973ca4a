//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use tracing::{Span, debug, debug_span};

use crate::frame::Destination;
use crate::interface::ism;
use crate::neighbor::nsm;
use crate::packet::Packet;
use crate::packet::error::LsaValidationError;
use crate::packet::lsa::{LsaHdr, LsaKey};
use crate::spf;

// Protocol events worth tracing.
#[derive(Debug)]
pub enum Debug<'a> {
    // Instance
    InstanceCreate,
    InstanceDelete,
    InstanceStart(Ipv4Addr),
    InstanceStop(InstanceInactiveReason),
    // Interfaces
    InterfaceStart(&'a str),
    InterfaceStop(&'a str, InterfaceInactiveReason),
    IsmEvent(&'a str, ism::State, ism::Event),
    IsmTransition(&'a str, ism::State, ism::State),
    IsmDrElection(&'a str, Option<Ipv4Addr>, Option<Ipv4Addr>),
    // Neighbors
    NeighborCreate(Ipv4Addr, Ipv4Addr),
    NeighborDelete(Ipv4Addr),
    NsmEvent(Ipv4Addr, nsm::State, nsm::Event),
    NsmTransition(Ipv4Addr, nsm::State, nsm::State),
    SeqNoMismatch(Ipv4Addr, SeqNoMismatchReason),
    // Packets
    PacketRx(&'a str, Ipv4Addr, &'a Packet),
    PacketTx(&'a str, &'a Destination, &'a Packet),
    PacketRxIgnore(Ipv4Addr, nsm::State),
    // Flooding
    QuestionableAck(Ipv4Addr, &'a LsaHdr),
    LsaDiscard(Ipv4Addr, &'a LsaHdr, LsaValidationError),
    LsaUnknownType(Ipv4Addr, &'a LsaHdr),
    LsaMinArrivalDiscard(Ipv4Addr, &'a LsaHdr),
    LsaSelfOriginated(Ipv4Addr, &'a LsaHdr),
    LsReqMiss(Ipv4Addr, &'a LsaKey),
    // LSDB
    LsaInstall(&'a LsaHdr),
    LsaOriginate(&'a LsaHdr),
    LsaOriginateMinInterval(&'a LsaHdr),
    LsaFlush(&'a LsaHdr, LsaFlushReason),
    LsaRefresh(&'a LsaHdr),
    // SPF and routing table
    SpfDelayEvent(spf::DelayState, spf::DelayEvent),
    SpfDelayTransition(spf::DelayState, spf::DelayState),
    SpfRun(Duration),
    SpfUnreachableAsbr(&'a Ipv4Network, Ipv4Addr),
    RouteInstall(&'a Ipv4Network, u32),
    RouteUninstall(&'a Ipv4Network),
    // Southbound
    Notification(&'a str),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InstanceInactiveReason {
    AdminDown,
    MissingRouterId,
    Resetting,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum InterfaceInactiveReason {
    InstanceDown,
    AdminDown,
    OperationalDown,
    MissingIfindex,
    MissingIpv4Address,
    LoopedBack,
    Resetting,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum SeqNoMismatchReason {
    InconsistentFlags,
    InconsistentOptions,
    InconsistentSeqNo,
    UnexpectedDbDesc,
    InvalidLsaType,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum LsaFlushReason {
    Expiry,
    PrematureAging,
}

// ===== impl Debug =====

impl Debug<'_> {
    pub(crate) fn log(&self) {
        let _span = self.span().entered();
        match self {
            Debug::InstanceStart(router_id) => debug!(%router_id, "{}", self),
            Debug::InstanceStop(reason) => debug!(%reason, "{}", self),
            Debug::InterfaceStop(_, reason) => debug!(%reason, "{}", self),
            Debug::IsmEvent(_, state, event) => {
                debug!(?state, ?event, "{}", self)
            }
            Debug::IsmTransition(_, old, new) => debug!(?old, ?new, "{}", self),
            Debug::IsmDrElection(_, dr, bdr) => debug!(?dr, ?bdr, "{}", self),
            Debug::NeighborCreate(_, addr) => debug!(%addr, "{}", self),
            Debug::NsmEvent(_, state, event) => {
                debug!(?state, ?event, "{}", self)
            }
            Debug::NsmTransition(_, old, new) => debug!(?old, ?new, "{}", self),
            Debug::SeqNoMismatch(_, reason) => debug!(%reason, "{}", self),
            Debug::PacketRx(_, src, packet) => {
                let data = serde_json::to_string(packet).unwrap_or_default();
                debug!(%src, %data, "{}", self)
            }
            Debug::PacketTx(_, dst, packet) => {
                let data = serde_json::to_string(packet).unwrap_or_default();
                debug!(dst = %dst.addr(), %data, "{}", self)
            }
            Debug::PacketRxIgnore(_, state) => debug!(?state, "{}", self),
            Debug::QuestionableAck(_, hdr)
            | Debug::LsaUnknownType(_, hdr)
            | Debug::LsaMinArrivalDiscard(_, hdr)
            | Debug::LsaSelfOriginated(_, hdr) => debug!(?hdr, "{}", self),
            Debug::LsaDiscard(_, hdr, error) => {
                debug!(?hdr, %error, "{}", self)
            }
            Debug::LsReqMiss(_, key) => debug!(?key, "{}", self),
            Debug::LsaInstall(hdr)
            | Debug::LsaOriginate(hdr)
            | Debug::LsaOriginateMinInterval(hdr)
            | Debug::LsaRefresh(hdr) => {
                debug!(seq_no = %format_args!("{:#x}", hdr.seq_no), "{}", self)
            }
            Debug::LsaFlush(_, reason) => debug!(%reason, "{}", self),
            Debug::SpfDelayEvent(state, event) => {
                debug!(?state, ?event, "{}", self)
            }
            Debug::SpfDelayTransition(old, new) => {
                debug!(?old, ?new, "{}", self)
            }
            Debug::SpfRun(elapsed) => debug!(?elapsed, "{}", self),
            Debug::SpfUnreachableAsbr(prefix, asbr) => {
                debug!(%prefix, %asbr, "{}", self)
            }
            Debug::RouteInstall(prefix, metric) => {
                debug!(%prefix, %metric, "{}", self)
            }
            Debug::RouteUninstall(prefix) => debug!(%prefix, "{}", self),
            _ => debug!("{}", self),
        }
    }

    // Context the record belongs to.
    fn span(&self) -> Span {
        match self {
            Debug::InterfaceStart(name)
            | Debug::InterfaceStop(name, _)
            | Debug::IsmEvent(name, ..)
            | Debug::IsmTransition(name, ..)
            | Debug::IsmDrElection(name, ..) => {
                debug_span!("interface", %name)
            }
            Debug::NeighborCreate(router_id, _)
            | Debug::NeighborDelete(router_id)
            | Debug::NsmEvent(router_id, ..)
            | Debug::NsmTransition(router_id, ..)
            | Debug::SeqNoMismatch(router_id, _)
            | Debug::PacketRxIgnore(router_id, _)
            | Debug::QuestionableAck(router_id, _)
            | Debug::LsaDiscard(router_id, ..)
            | Debug::LsaUnknownType(router_id, _)
            | Debug::LsaMinArrivalDiscard(router_id, _)
            | Debug::LsaSelfOriginated(router_id, _)
            | Debug::LsReqMiss(router_id, _) => {
                debug_span!("neighbor", %router_id)
            }
            Debug::PacketRx(name, ..) => {
                debug_span!("input", interface = %name)
            }
            Debug::PacketTx(name, ..) => {
                debug_span!("output", interface = %name)
            }
            Debug::LsaInstall(hdr)
            | Debug::LsaOriginate(hdr)
            | Debug::LsaOriginateMinInterval(hdr)
            | Debug::LsaFlush(hdr, _)
            | Debug::LsaRefresh(hdr) => debug_span!(
                "lsa",
                lsa_type = %hdr.lsa_type,
                lsa_id = %hdr.lsa_id,
                adv_rtr = %hdr.adv_rtr,
            ),
            Debug::SpfDelayEvent(..)
            | Debug::SpfDelayTransition(..)
            | Debug::SpfRun(_)
            | Debug::SpfUnreachableAsbr(..) => debug_span!("spf"),
            Debug::Notification(name) => {
                debug_span!("southbound", interface = %name)
            }
            _ => Span::none(),
        }
    }
}

impl fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Debug::InstanceCreate => "instance created",
            Debug::InstanceDelete => "instance deleted",
            Debug::InstanceStart(_) => "starting instance",
            Debug::InstanceStop(_) => "stopping instance",
            Debug::InterfaceStart(_) => "starting interface",
            Debug::InterfaceStop(..) => "stopping interface",
            Debug::IsmEvent(..) | Debug::NsmEvent(..) => "event",
            Debug::IsmTransition(..) | Debug::NsmTransition(..) => {
                "state transition"
            }
            Debug::IsmDrElection(..) => "DR and BDR changed",
            Debug::NeighborCreate(..) => "neighbor created",
            Debug::NeighborDelete(_) => "neighbor deleted",
            Debug::SeqNoMismatch(..) => "database exchange out of sync",
            Debug::PacketRx(..) | Debug::PacketTx(..) => "packet",
            Debug::PacketRxIgnore(..) => {
                "ignoring packet from a non-adjacent neighbor"
            }
            Debug::QuestionableAck(..) => "acknowledgment for unknown LSA",
            Debug::LsaDiscard(..) => "discarding invalid LSA",
            Debug::LsaUnknownType(..) => "discarding LSA of unknown type",
            Debug::LsaMinArrivalDiscard(..) => {
                "discarding LSA received within MinLSArrival"
            }
            Debug::LsaSelfOriginated(..) => "received self-originated LSA",
            Debug::LsReqMiss(..) => "requested LSA not found",
            Debug::LsaInstall(_) => "installing LSA",
            Debug::LsaOriginate(_) => "originating LSA",
            Debug::LsaOriginateMinInterval(_) => {
                "postponing origination until MinLSInterval elapses"
            }
            Debug::LsaFlush(..) => "flushing LSA",
            Debug::LsaRefresh(_) => "refreshing LSA",
            Debug::SpfDelayEvent(..) => "delay event",
            Debug::SpfDelayTransition(..) => "delay state transition",
            Debug::SpfRun(_) => "routing table calculated",
            Debug::SpfUnreachableAsbr(..) => "ASBR unreachable",
            Debug::RouteInstall(..) => "installing route",
            Debug::RouteUninstall(_) => "uninstalling route",
            Debug::Notification(_) => "interface notification",
        };
        f.write_str(msg)
    }
}

// ===== impl InstanceInactiveReason =====

impl fmt::Display for InstanceInactiveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InstanceInactiveReason::AdminDown => "disabled",
            InstanceInactiveReason::MissingRouterId => "no router ID",
            InstanceInactiveReason::Resetting => "resetting",
        })
    }
}

// ===== impl InterfaceInactiveReason =====

impl fmt::Display for InterfaceInactiveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InterfaceInactiveReason::InstanceDown => "instance down",
            InterfaceInactiveReason::AdminDown => "disabled",
            InterfaceInactiveReason::OperationalDown => "link down",
            InterfaceInactiveReason::MissingIfindex => "no ifindex",
            InterfaceInactiveReason::MissingIpv4Address => "no IPv4 address",
            InterfaceInactiveReason::LoopedBack => "looped back",
            InterfaceInactiveReason::Resetting => "resetting",
        })
    }
}

// ===== impl SeqNoMismatchReason =====

impl fmt::Display for SeqNoMismatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SeqNoMismatchReason::InconsistentFlags => "unexpected flags",
            SeqNoMismatchReason::InconsistentOptions => "options changed",
            SeqNoMismatchReason::InconsistentSeqNo => "wrong sequence number",
            SeqNoMismatchReason::UnexpectedDbDesc => "DD after the exchange",
            SeqNoMismatchReason::InvalidLsaType => "unknown LSA type",
        })
    }
}

// ===== impl LsaFlushReason =====

impl fmt::Display for LsaFlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LsaFlushReason::Expiry => "reached MaxAge",
            LsaFlushReason::PrematureAging => "premature aging",
        })
    }
}

//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use ipnetwork::Ipv4Network;
use ospfd_utils::mac_addr::MacAddr;
use ospfd_utils::southbound::TxFrameMsg;
use ospfd_utils::task::{IntervalTask, TimeoutTask};
use serde::{Deserialize, Serialize};

use crate::config::InterfaceCfg;
use crate::debug::{Debug, InterfaceInactiveReason};
use crate::error::{Error, HelloMismatch};
use crate::frame::{self, Destination, MulticastAddr};
use crate::instance::{InstanceState, Output};
use crate::lsdb::LsaOrigEvent;
use crate::neighbor::{Neighbor, nsm};
use crate::packet::lsa::{Lsa, LsaHdr, LsaKey};
use crate::packet::{
    Hello, Options, Packet, PacketHdr, PacketType, SimpleAuthKey,
};
use crate::tasks;
use crate::tasks::messages::{IfaceKey, NbrKey};

// MTU assumed until the system reports one.
const DEFAULT_MTU: u16 = 1500;

#[derive(Debug)]
pub struct Interface {
    pub name: String,
    pub config: InterfaceCfg,
    pub system: InterfaceSys,
    pub state: InterfaceState,
    pub neighbors: BTreeMap<Ipv4Addr, Neighbor>,
}

// Link properties learned from the system.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InterfaceSys {
    pub ifindex: Option<u32>,
    pub addr: Option<Ipv4Network>,
    pub mac: Option<MacAddr>,
    pub mtu: Option<u16>,
    pub operative: bool,
    pub loopback: bool,
    pub vlan_id: Option<u16>,
}

#[derive(Debug, Default)]
pub struct InterfaceState {
    pub ism: ism::State,
    // Interface addresses of the elected routers.
    pub dr: Option<Ipv4Addr>,
    pub bdr: Option<Ipv4Addr>,
    pub auth: Option<SimpleAuthKey>,
    // LSAs waiting to be flooded out of the interface.
    pub ls_update: BTreeMap<LsaKey, Arc<Lsa>>,
    // Delayed acknowledgments.
    pub ls_ack: BTreeMap<LsaKey, LsaHdr>,
    // Network-LSA originated while being the DR. Kept across interface
    // resets so that it can be flushed.
    pub network_lsa: Option<LsaKey>,
    pub tasks: InterfaceTasks,
}

#[derive(Debug, Default)]
pub struct InterfaceTasks {
    pub hello: Option<IntervalTask>,
    pub wait: Option<TimeoutTask>,
    pub ls_update: Option<TimeoutTask>,
    pub delayed_ack: Option<TimeoutTask>,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterfaceType {
    #[default]
    Broadcast,
    PointToPoint,
}

// Read-only view of an interface, handed out next to a mutable borrow of
// its neighbors.
#[derive(Clone, Copy, Debug)]
pub struct Link<'a> {
    pub area_id: Ipv4Addr,
    pub router_id: Ipv4Addr,
    pub name: &'a str,
    pub config: &'a InterfaceCfg,
    pub system: &'a InterfaceSys,
    pub state: &'a InterfaceState,
    pub out: &'a Output,
}

// Router taking part in the DR election.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DrCandidate {
    pub router_id: Ipv4Addr,
    pub net_id: Ipv4Addr,
    pub dr: Option<Ipv4Addr>,
    pub bdr: Option<Ipv4Addr>,
    pub priority: u8,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct InterfaceSummary {
    pub name: String,
    pub area_id: Ipv4Addr,
    pub if_type: InterfaceType,
    pub state: ism::State,
    pub addr: Option<Ipv4Network>,
    pub cost: u16,
    pub priority: u8,
    pub dr: Option<Ipv4Addr>,
    pub bdr: Option<Ipv4Addr>,
    pub neighbors: usize,
}

// Interface state machine (RFC 2328 section 9).
pub mod ism {
    use serde::{Deserialize, Serialize};

    use crate::debug::InterfaceInactiveReason;

    #[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    pub enum State {
        #[default]
        Down,
        Loopback,
        Waiting,
        PointToPoint,
        DrOther,
        Backup,
        Dr,
    }

    #[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
    pub enum Event {
        InterfaceUp,
        WaitTimer,
        BackupSeen,
        NbrChange,
        LoopInd,
        UnloopInd,
        InterfaceDown(InterfaceInactiveReason),
    }
}

// ===== impl Interface =====

impl Interface {
    pub(crate) fn new(
        name: String,
        config: InterfaceCfg,
        system: InterfaceSys,
    ) -> Interface {
        Interface {
            name,
            config,
            system,
            state: Default::default(),
            neighbors: Default::default(),
        }
    }

    pub fn is_down(&self) -> bool {
        matches!(self.state.ism, ism::State::Down | ism::State::Loopback)
    }

    pub(crate) fn link<'a>(
        &'a self,
        area_id: Ipv4Addr,
        router_id: Ipv4Addr,
        out: &'a Output,
    ) -> Link<'a> {
        Link {
            area_id,
            router_id,
            name: &self.name,
            config: &self.config,
            system: &self.system,
            state: &self.state,
            out,
        }
    }

    pub(crate) fn split<'a>(
        &'a mut self,
        area_id: Ipv4Addr,
        router_id: Ipv4Addr,
        out: &'a Output,
    ) -> (Link<'a>, &'a mut BTreeMap<Ipv4Addr, Neighbor>) {
        let link = Link {
            area_id,
            router_id,
            name: &self.name,
            config: &self.config,
            system: &self.system,
            state: &self.state,
            out,
        };
        (link, &mut self.neighbors)
    }

    pub(crate) fn summary(&self, area_id: Ipv4Addr) -> InterfaceSummary {
        InterfaceSummary {
            name: self.name.clone(),
            area_id,
            if_type: self.config.if_type,
            state: self.state.ism,
            addr: self.system.addr,
            cost: self.config.cost,
            priority: self.config.priority,
            dr: self.state.dr,
            bdr: self.state.bdr,
            neighbors: self.neighbors.len(),
        }
    }

    fn readiness(&self) -> Result<(), InterfaceInactiveReason> {
        if !self.config.enabled {
            Err(InterfaceInactiveReason::AdminDown)
        } else if !self.system.operative {
            Err(InterfaceInactiveReason::OperationalDown)
        } else if self.system.ifindex.is_none() {
            Err(InterfaceInactiveReason::MissingIfindex)
        } else if self.system.addr.is_none() {
            Err(InterfaceInactiveReason::MissingIpv4Address)
        } else {
            Ok(())
        }
    }

    fn start(&mut self, key: &IfaceKey, out: &Output) -> ism::State {
        Debug::InterfaceStart(&self.name).log();

        self.state.auth =
            self.config.auth_key.as_deref().map(SimpleAuthKey::new);
        let task =
            tasks::hello_interval(&out.input, key, self.config.hello_interval);
        self.state.tasks.hello = Some(task);

        match self.config.if_type {
            InterfaceType::PointToPoint => ism::State::PointToPoint,
            InterfaceType::Broadcast if self.config.priority == 0 => {
                ism::State::DrOther
            }
            InterfaceType::Broadcast => {
                let task = tasks::wait_timer(
                    &out.input,
                    key,
                    self.config.dead_interval,
                );
                self.state.tasks.wait = Some(task);
                ism::State::Waiting
            }
        }
    }

    fn stop(&mut self, reason: InterfaceInactiveReason) {
        if self.is_down() {
            return;
        }
        Debug::InterfaceStop(&self.name, reason).log();

        // Neighbors go away together with their timers.
        self.neighbors.clear();
        self.state = InterfaceState {
            network_lsa: self.state.network_lsa.take(),
            ..Default::default()
        };
    }

    // Runs the election and returns the resulting interface state.
    fn elect(
        &mut self,
        key: &IfaceKey,
        router_id: Ipv4Addr,
        out: &Output,
    ) -> ism::State {
        self.state.tasks.wait = None;
        let Some(addr) = self.system.addr.map(|addr| addr.ip()) else {
            return self.state.ism;
        };

        let myself = DrCandidate {
            router_id,
            net_id: addr,
            dr: self.state.dr,
            bdr: self.state.bdr,
            priority: self.config.priority,
        };
        let others = self
            .neighbors
            .values()
            .filter(|nbr| nbr.state >= nsm::State::TwoWay)
            .map(|nbr| DrCandidate {
                router_id: nbr.router_id,
                net_id: nbr.addr,
                dr: nbr.dr,
                bdr: nbr.bdr,
                priority: nbr.priority,
            })
            .collect::<Vec<_>>();
        let (dr, bdr) = dr_election(myself, &others);

        if (dr, bdr) != (self.state.dr, self.state.bdr) {
            Debug::IsmDrElection(&self.name, dr, bdr).log();
            self.state.dr = dr;
            self.state.bdr = bdr;

            // Adjacencies might have to be formed or torn down.
            for nbr in self
                .neighbors
                .values()
                .filter(|nbr| nbr.state >= nsm::State::TwoWay)
            {
                let nbr_key = NbrKey {
                    area_id: key.area_id,
                    ifname: key.ifname.clone(),
                    router_id: nbr.router_id,
                };
                out.input.nsm_event(&nbr_key, nsm::Event::AdjOk);
            }
        }

        if dr == Some(addr) {
            ism::State::Dr
        } else if bdr == Some(addr) {
            ism::State::Backup
        } else {
            ism::State::DrOther
        }
    }
}

// ===== impl Link =====

impl Link<'_> {
    pub fn key(&self) -> IfaceKey {
        IfaceKey {
            area_id: self.area_id,
            ifname: self.name.to_owned(),
        }
    }

    pub fn nbr_key(&self, router_id: Ipv4Addr) -> NbrKey {
        NbrKey {
            area_id: self.area_id,
            ifname: self.name.to_owned(),
            router_id,
        }
    }

    pub fn addr(&self) -> Option<Ipv4Addr> {
        self.system.addr.map(|addr| addr.ip())
    }

    pub fn mtu(&self) -> u16 {
        self.system.mtu.unwrap_or(DEFAULT_MTU)
    }

    pub fn is_dr_or_bdr(&self) -> bool {
        matches!(self.state.ism, ism::State::Dr | ism::State::Backup)
    }

    // RFC 2328 section 10.4.
    pub fn adjacency_wanted(&self, nbr: &Neighbor) -> bool {
        match self.config.if_type {
            InterfaceType::PointToPoint => true,
            InterfaceType::Broadcast => {
                self.is_dr_or_bdr()
                    || self.state.dr == Some(nbr.addr)
                    || self.state.bdr == Some(nbr.addr)
            }
        }
    }

    // Destination of packets addressed to a single neighbor.
    pub fn unicast(&self, nbr: &Neighbor) -> Destination {
        match self.config.if_type {
            InterfaceType::PointToPoint => {
                Destination::Multicast(MulticastAddr::AllSpfRtrs)
            }
            InterfaceType::Broadcast => Destination::Unicast(nbr.addr, nbr.mac),
        }
    }

    // Destination of flooded updates and acknowledgments.
    pub fn flood_dst(&self) -> Destination {
        match self.config.if_type {
            InterfaceType::Broadcast if !self.is_dr_or_bdr() => {
                Destination::Multicast(MulticastAddr::AllDrRtrs)
            }
            _ => Destination::Multicast(MulticastAddr::AllSpfRtrs),
        }
    }

    pub fn packet_hdr(&self, pkt_type: PacketType) -> PacketHdr {
        PacketHdr::new(pkt_type, self.router_id, self.area_id)
    }

    pub fn send(&self, dst: Destination, packet: &Packet) {
        let (Some(ifindex), Some(mac), Some(src)) =
            (self.system.ifindex, self.system.mac, self.addr())
        else {
            return;
        };

        Debug::PacketTx(self.name, &dst, packet).log();
        let payload = packet.encode(self.state.auth.as_ref());
        let msg = TxFrameMsg {
            ifname: self.name.to_owned(),
            ifindex,
            frame: frame::encode_frame(mac, src, dst, &payload),
        };
        let _ = self.out.net.send(msg);
    }
}

// ===== global functions =====

pub(crate) fn fsm(
    state: &mut InstanceState,
    key: &IfaceKey,
    event: ism::Event,
) -> Result<(), Error> {
    use ism::{Event as E, State as S};

    let router_id = state.router_id;
    let out = &state.out;
    let iface = state
        .areas
        .get_mut(&key.area_id)
        .ok_or(Error::AreaNotFound(key.area_id))?
        .interfaces
        .get_mut(&key.ifname)
        .ok_or_else(|| Error::InterfaceNotFound(key.ifname.clone()))?;

    let old_state = iface.state.ism;
    Debug::IsmEvent(&iface.name, old_state, event).log();
    let new_state = match (old_state, event) {
        (S::Down, E::InterfaceUp) => iface.start(key, out),
        (S::Waiting, E::WaitTimer | E::BackupSeen)
        | (S::DrOther | S::Backup | S::Dr, E::NbrChange) => {
            iface.elect(key, router_id, out)
        }
        // Neighbor changes seen before the election are picked up when it
        // takes place.
        (_, E::NbrChange) => old_state,
        (S::Loopback, E::LoopInd) => old_state,
        (_, E::LoopInd) => {
            iface.stop(InterfaceInactiveReason::LoopedBack);
            S::Loopback
        }
        (S::Loopback, E::UnloopInd) => S::Down,
        (_, E::InterfaceDown(reason)) => {
            iface.stop(reason);
            S::Down
        }
        _ => return Err(Error::IsmUnexpectedEvent(old_state, event)),
    };

    if new_state != old_state {
        Debug::IsmTransition(&iface.name, old_state, new_state).log();
        iface.state.ism = new_state;

        let area_id = key.area_id;
        out.input.lsa_orig(LsaOrigEvent::RouterLsa { area_id });
        let iface = key.clone();
        out.input.lsa_orig(LsaOrigEvent::NetworkLsa { iface });
    }

    Ok(())
}

// Brings the interface up or down according to its configuration and the
// system's view of the link.
pub(crate) fn update(
    state: &mut InstanceState,
    key: &IfaceKey,
) -> Result<(), Error> {
    let iface = state
        .areas
        .get(&key.area_id)
        .and_then(|area| area.interfaces.get(&key.ifname))
        .ok_or_else(|| Error::InterfaceNotFound(key.ifname.clone()))?;

    let ism_state = iface.state.ism;
    let event = match iface.readiness() {
        Ok(()) if iface.system.loopback => match ism_state {
            ism::State::Loopback => return Ok(()),
            _ => ism::Event::LoopInd,
        },
        Ok(()) => match ism_state {
            ism::State::Loopback => ism::Event::UnloopInd,
            ism::State::Down => ism::Event::InterfaceUp,
            _ => return Ok(()),
        },
        Err(reason) if !iface.is_down() => ism::Event::InterfaceDown(reason),
        Err(_) if ism_state == ism::State::Loopback => ism::Event::UnloopInd,
        Err(_) => return Ok(()),
    };
    fsm(state, key, event)?;

    // A looped-back interface becoming usable again starts from Down.
    if event == ism::Event::UnloopInd {
        return update(state, key);
    }
    Ok(())
}

// Elects the DR and BDR of a broadcast network (RFC 2328 section 9.4).
//
// `myself` carries the calculating router's current view. Routers with
// priority zero are never elected. An existing DR is never preempted.
pub fn dr_election(
    myself: DrCandidate,
    others: &[DrCandidate],
) -> (Option<Ipv4Addr>, Option<Ipv4Addr>) {
    let (dr, bdr) = elect_once(&myself, others);

    // Run again if our own role changed, so that we're no longer a
    // candidate for the role we left.
    let role = |dr: Option<Ipv4Addr>, bdr: Option<Ipv4Addr>| {
        (dr == Some(myself.net_id), bdr == Some(myself.net_id))
    };
    if role(dr, bdr) != role(myself.dr, myself.bdr) {
        let myself = DrCandidate { dr, bdr, ..myself };
        return elect_once(&myself, others);
    }
    (dr, bdr)
}

pub(crate) fn process_hello(
    state: &mut InstanceState,
    key: &IfaceKey,
    src: Ipv4Addr,
    src_mac: MacAddr,
    hello: &Hello,
) -> Result<(), Error> {
    let router_id = state.router_id;
    let iface = state
        .areas
        .get_mut(&key.area_id)
        .and_then(|area| area.interfaces.get_mut(&key.ifname))
        .ok_or_else(|| Error::InterfaceNotFound(key.ifname.clone()))?;
    let Some(addr) = iface.system.addr else {
        return Ok(());
    };

    // Parameters that must agree on a network.
    let mismatch = if iface.config.if_type == InterfaceType::Broadcast
        && hello.network_mask != addr.mask()
    {
        Some(HelloMismatch::NetworkMask(hello.network_mask))
    } else if hello.hello_interval != iface.config.hello_interval {
        Some(HelloMismatch::HelloInterval(hello.hello_interval))
    } else if hello.dead_interval != iface.config.dead_interval {
        Some(HelloMismatch::DeadInterval(hello.dead_interval))
    } else if !hello.options.contains(Options::E) {
        Some(HelloMismatch::ExternalRouting)
    } else {
        None
    };
    if let Some(mismatch) = mismatch {
        return Err(Error::HelloMismatch(key.ifname.clone(), src, mismatch));
    }

    let nbr_rid = hello.hdr.router_id;
    let nbr = iface
        .neighbors
        .entry(nbr_rid)
        .or_insert_with(|| Neighbor::new(nbr_rid, src));
    let old_priority = nbr.priority;
    let old_dr = nbr.dr;
    let old_bdr = nbr.bdr;
    nbr.addr = src;
    nbr.mac = Some(src_mac);
    nbr.options = hello.options;
    nbr.priority = hello.priority;
    nbr.dr = hello.dr;
    nbr.bdr = hello.bdr;
    let ism_state = iface.state.ism;
    let broadcast = iface.config.if_type == InterfaceType::Broadcast;

    let nbr_key = NbrKey {
        area_id: key.area_id,
        ifname: key.ifname.clone(),
        router_id: nbr_rid,
    };
    crate::neighbor::fsm(state, &nbr_key, nsm::Event::HelloRcvd)?;
    if !hello.neighbors.contains(&router_id) {
        return crate::neighbor::fsm(state, &nbr_key, nsm::Event::OneWayRcvd);
    }
    crate::neighbor::fsm(state, &nbr_key, nsm::Event::TwoWayRcvd)?;
    if !broadcast {
        return Ok(());
    }

    let input = &state.out.input;
    let declares_dr = hello.dr == Some(src);
    let declares_bdr = hello.bdr == Some(src);
    if ism_state == ism::State::Waiting
        && (declares_bdr || (declares_dr && hello.bdr.is_none()))
    {
        input.ism_event(key, ism::Event::BackupSeen);
    } else if old_priority != hello.priority
        || declares_dr != (old_dr == Some(src))
        || declares_bdr != (old_bdr == Some(src))
    {
        input.ism_event(key, ism::Event::NbrChange);
    }

    Ok(())
}

pub(crate) fn send_hello(
    state: &InstanceState,
    key: &IfaceKey,
) -> Result<(), Error> {
    let iface = state
        .areas
        .get(&key.area_id)
        .and_then(|area| area.interfaces.get(&key.ifname))
        .ok_or_else(|| Error::InterfaceNotFound(key.ifname.clone()))?;
    if iface.is_down() {
        return Ok(());
    }
    let Some(addr) = iface.system.addr else {
        return Ok(());
    };

    let link = iface.link(key.area_id, state.router_id, &state.out);
    let network_mask = match iface.config.if_type {
        InterfaceType::Broadcast => addr.mask(),
        InterfaceType::PointToPoint => Ipv4Addr::UNSPECIFIED,
    };
    let hello = Hello {
        hdr: link.packet_hdr(PacketType::Hello),
        network_mask,
        hello_interval: iface.config.hello_interval,
        options: Options::E,
        priority: iface.config.priority,
        dead_interval: iface.config.dead_interval,
        dr: iface.state.dr,
        bdr: iface.state.bdr,
        neighbors: iface
            .neighbors
            .values()
            .filter(|nbr| nbr.state >= nsm::State::Init)
            .map(|nbr| nbr.router_id)
            .collect(),
    };
    let dst = Destination::Multicast(MulticastAddr::AllSpfRtrs);
    link.send(dst, &Packet::Hello(hello));
    Ok(())
}

// ===== helper functions =====

fn elect_once(
    myself: &DrCandidate,
    others: &[DrCandidate],
) -> (Option<Ipv4Addr>, Option<Ipv4Addr>) {
    let eligible = std::iter::once(myself)
        .chain(others)
        .filter(|rtr| rtr.priority > 0)
        .collect::<Vec<_>>();
    let rank = |rtr: &&&DrCandidate| (rtr.priority, rtr.router_id);

    // The BDR comes from routers not claiming to be DR, preferring those
    // that claim to be BDR already.
    let not_dr = eligible
        .iter()
        .filter(|rtr| rtr.dr != Some(rtr.net_id))
        .collect::<Vec<_>>();
    let bdr = not_dr
        .iter()
        .copied()
        .filter(|rtr| rtr.bdr == Some(rtr.net_id))
        .max_by_key(rank)
        .or_else(|| not_dr.iter().copied().max_by_key(rank))
        .map(|rtr| rtr.net_id);

    let dr = eligible
        .iter()
        .filter(|rtr| rtr.dr == Some(rtr.net_id))
        .max_by_key(rank)
        .map(|rtr| rtr.net_id)
        .or(bdr);

    (dr, bdr)
}

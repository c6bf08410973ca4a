//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ospfd_utils::southbound::{
    AsicNotification, LinkStateMsg, NetRxFrameMsg, SouthboundMsg,
};

use crate::debug::{Debug, InterfaceInactiveReason};
use crate::error::Error;
use crate::frame::{self, ALL_DR_RTRS, ALL_SPF_RTRS};
use crate::instance::{Instance, InstanceState};
use crate::interface::{self, ism};
use crate::packet::Packet;
use crate::packet::error::DecodeError;
use crate::tasks::messages::{IfaceKey, NbrKey};
use crate::{exchange, flood};

// MTU assumed when the driver doesn't report one.
const DEFAULT_MTU: u16 = 1500;

// ===== global functions =====

pub(crate) fn process_southbound_msg(
    instance: &mut Instance,
    msg: SouthboundMsg,
) -> Result<(), Error> {
    match msg {
        SouthboundMsg::LinkState(msg) => process_link_state(instance, msg),
        SouthboundMsg::Asic(msg) => process_asic_notification(instance, msg),
        SouthboundMsg::NetRx(msg) => match &mut instance.state {
            Some(state) => process_net_rx(state, msg),
            None => Ok(()),
        },
    }
}

// Decodes a JSON notification published by the ASIC driver.
pub fn decode_notification(data: &str) -> Result<AsicNotification, Error> {
    AsicNotification::from_json(data)
        .map_err(|error| Error::NotificationDecode(error.to_string()))
}

// ===== helper functions =====

fn process_link_state(
    instance: &mut Instance,
    msg: LinkStateMsg,
) -> Result<(), Error> {
    let system = instance
        .system
        .interfaces
        .entry(msg.ifname.clone())
        .or_default();
    system.operative = msg.operative;
    sync_interface(instance, &msg.ifname)
}

fn process_asic_notification(
    instance: &mut Instance,
    msg: AsicNotification,
) -> Result<(), Error> {
    let ifname = msg.ifname().to_owned();
    Debug::Notification(&ifname).log();

    let interfaces = &mut instance.system.interfaces;
    let system = interfaces.entry(ifname.clone()).or_default();
    match msg {
        AsicNotification::Ipv4InterfaceCreate {
            ifindex,
            addr,
            mac,
            mtu,
            loopback,
            ..
        } => {
            // Only interfaces that are up get published.
            system.operative = true;
            system.loopback = loopback;
            system.ifindex = Some(ifindex);
            system.addr = Some(addr);
            system.mac = mac.or(system.mac);
            system.mtu = mtu.or(system.mtu).or(Some(DEFAULT_MTU));
        }
        AsicNotification::Ipv4InterfaceDelete { addr, .. } => {
            if system.addr != Some(addr) {
                return Ok(());
            }
            system.addr = None;
        }
        AsicNotification::VlanCreate {
            vlan_id,
            ifindex,
            mac,
            mtu,
            ..
        } => {
            system.operative = true;
            system.vlan_id = Some(vlan_id);
            system.ifindex = Some(ifindex);
            system.mac = mac.or(system.mac);
            system.mtu = mtu.or(system.mtu).or(Some(DEFAULT_MTU));
        }
        AsicNotification::VlanDelete { vlan_id, .. } => {
            if system.vlan_id != Some(vlan_id) {
                return Ok(());
            }
            // Nothing learned about a deleted VLAN interface survives it.
            interfaces.remove(&ifname);
        }
    }

    sync_interface(instance, &ifname)
}

// Copies the system's view of an interface into the running instance and
// starts or stops the interface accordingly.
fn sync_interface(instance: &mut Instance, ifname: &str) -> Result<(), Error> {
    let system = instance
        .system
        .interfaces
        .get(ifname)
        .cloned()
        .unwrap_or_default();
    let Some(state) = &mut instance.state else {
        return Ok(());
    };
    let Some(key) = state.find_interface(ifname) else {
        return Ok(());
    };
    let Some(iface) = state
        .areas
        .get_mut(&key.area_id)
        .and_then(|area| area.interfaces.get_mut(ifname))
    else {
        return Ok(());
    };

    let addr_change = iface.system.addr != system.addr;
    iface.system = system;

    // Adjacencies were formed with the old address.
    if addr_change && !iface.is_down() {
        let reason = InterfaceInactiveReason::Resetting;
        interface::fsm(state, &key, ism::Event::InterfaceDown(reason))?;
    }
    interface::update(state, &key)
}

fn process_net_rx(
    state: &mut InstanceState,
    msg: NetRxFrameMsg,
) -> Result<(), Error> {
    let Some(key) = state.find_interface(&msg.ifname) else {
        return Err(Error::InterfaceNotFound(msg.ifname));
    };
    let Some(iface) = state.interface(&key) else {
        return Ok(());
    };
    if iface.is_down() {
        return Ok(());
    }
    let addr = iface.system.addr.map(|addr| addr.ip());
    let is_dr_or_bdr =
        matches!(iface.state.ism, ism::State::Dr | ism::State::Backup);

    let rx = frame::decode_frame(&msg.frame)
        .map_err(|error| decode_error(&msg.ifname, error))?;

    // Our own multicasts looped back, or packets meant for someone else.
    if addr == Some(rx.src) {
        return Ok(());
    }
    if rx.dst != ALL_SPF_RTRS
        && !(rx.dst == ALL_DR_RTRS && is_dr_or_bdr)
        && addr != Some(rx.dst)
    {
        return Ok(());
    }

    let mut payload = rx.payload.clone();
    let packet = Packet::decode(&mut payload, iface.state.auth.as_ref())
        .map_err(|error| decode_error(&msg.ifname, error))?;
    let hdr = packet.hdr();
    if hdr.area_id != key.area_id {
        let ifname = msg.ifname;
        return Err(Error::AreaMismatch(ifname, rx.src, hdr.area_id));
    }
    if hdr.router_id == state.router_id {
        return Ok(());
    }
    Debug::PacketRx(&msg.ifname, rx.src, &packet).log();

    if let Packet::Hello(hello) = &packet {
        let (src, src_mac) = (rx.src, rx.src_mac);
        return interface::process_hello(state, &key, src, src_mac, hello);
    }

    // Anything else must come from a known neighbor.
    let router_id = hdr.router_id;
    let known = state
        .interface(&key)
        .is_some_and(|iface| iface.neighbors.contains_key(&router_id));
    if !known {
        let ifname = msg.ifname;
        return Err(Error::UnknownNeighbor(ifname, rx.src, router_id));
    }
    let nbr_key = nbr_key(&key, router_id);
    match packet {
        Packet::Hello(_) => Ok(()),
        Packet::DbDesc(dd) => exchange::process_dbdesc(state, &nbr_key, &dd),
        Packet::LsRequest(lsreq) => {
            flood::process_lsreq(state, &nbr_key, &lsreq)
        }
        Packet::LsUpdate(lsupd) => flood::process_lsupd(state, &nbr_key, lsupd),
        Packet::LsAck(lsack) => flood::process_lsack(state, &nbr_key, &lsack),
    }
}

fn decode_error(ifname: &str, error: DecodeError) -> Error {
    Error::PacketDecode(ifname.to_owned(), error)
}

fn nbr_key(key: &IfaceKey, router_id: Ipv4Addr) -> NbrKey {
    NbrKey {
        area_id: key.area_id,
        ifname: key.ifname.clone(),
        router_id,
    }
}

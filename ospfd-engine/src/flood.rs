//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::area::Area;
use crate::debug::Debug;
use crate::error::Error;
use crate::frame;
use crate::instance::{InstanceState, Output};
use crate::interface::{Interface, Link, ism};
use crate::lsdb::{self, LSA_MAX_AGE, LSA_MAX_SEQ_NO};
use crate::neighbor::{self, Neighbor, nsm};
use crate::packet::lsa::{Lsa, LsaHdr};
use crate::packet::{LsAck, LsRequest, LsUpdate, Packet, PacketHdr, PacketType};
use crate::tasks;
use crate::tasks::messages::{IfaceKey, LsdbKey, NbrKey};

// Room taken by the LSA count of an LS Update.
const LSUPD_COUNT_LEN: usize = 4;

// ===== global functions =====

// RFC 2328 section 13.
pub(crate) fn process_lsupd(
    state: &mut InstanceState,
    key: &NbrKey,
    lsupd: LsUpdate,
) -> Result<(), Error> {
    let nbr_state = neighbor::view(state, key)?.nbr.state;
    if nbr_state < nsm::State::Exchange {
        Debug::PacketRxIgnore(key.router_id, nbr_state).log();
        return Ok(());
    }

    for lsa in lsupd.lsas {
        if process_lsa(state, key, lsa)? {
            break;
        }
    }

    // Requested LSAs might have arrived.
    if let Ok(view) = neighbor::view(state, key) {
        view.nbr.loading_check(&view.link);
    }
    Ok(())
}

// Processes one LSA of an LS Update. Returns whether the rest of the packet
// must be dropped.
fn process_lsa(
    state: &mut InstanceState,
    key: &NbrKey,
    lsa: Lsa,
) -> Result<bool, Error> {
    // (1)
    if let Err(error) = lsa.validate() {
        Debug::LsaDiscard(key.router_id, &lsa.hdr, error).log();
        return Ok(false);
    }
    // (2) and (3), the latter never applying to normal areas.
    if lsa.hdr.lsa_type.type_code().is_none() {
        Debug::LsaUnknownType(key.router_id, &lsa.hdr).log();
        return Ok(false);
    }

    let lsdb_key = lsdb::lsdb_for(lsa.hdr.lsa_type, key.area_id);
    let lsa_key = lsa.hdr.key();
    let (db_lsa, recent) = match lsdb::lsdb_get(state, lsdb_key)?.get(&lsa_key)
    {
        Some(entry) => (Some(entry.lsa.clone()), entry.arrived_recently()),
        None => (None, false),
    };

    // (4)
    if lsa.hdr.is_maxage() && db_lsa.is_none() && !synchronizing(state) {
        let view = neighbor::view(state, key)?;
        send_direct_ack(&view.link, view.nbr, vec![lsa.hdr]);
        return Ok(false);
    }

    let cmp = db_lsa
        .as_ref()
        .map(|db_lsa| lsdb::lsa_compare(&lsa.hdr, &db_lsa.hdr));
    match cmp {
        // (5)
        None | Some(Ordering::Greater) => {
            if recent {
                Debug::LsaMinArrivalDiscard(key.router_id, &lsa.hdr).log();
                return Ok(false);
            }

            // The neighbor answered our request.
            {
                let view = neighbor::view(state, key)?;
                let mut ls_request = view.nbr.ls_request();
                if ls_request.get(&lsa_key).is_some_and(|requested| {
                    lsdb::lsa_compare(&lsa.hdr, requested) != Ordering::Less
                }) {
                    ls_request.remove(&lsa_key);
                }
            }

            let lsa = Arc::new(lsa);
            let flooded_back = flood(state, lsdb_key, &lsa, Some(key))?;
            lsdb::install(state, lsdb_key, lsa.clone(), true)?;
            state.counters.rx_lsas += 1;

            let view = neighbor::view(state, key)?;
            let (link, nbr_addr) = (view.link, view.nbr.addr);
            if !flooded_back
                && (link.state.ism != ism::State::Backup
                    || link.state.dr == Some(nbr_addr))
            {
                enqueue_delayed_ack(state, &iface_key(key), lsa.hdr)?;
            }

            if lsdb::is_self_originated(state, &lsa.hdr) {
                Debug::LsaSelfOriginated(key.router_id, &lsa.hdr).log();
                lsdb::process_self_originated(state, lsdb_key, &lsa.hdr)?;
            }
            Ok(false)
        }
        // (7): either an implied acknowledgment or a duplicate.
        Some(Ordering::Equal) => {
            let view = neighbor::view(state, key)?;
            let (link, nbr) = (view.link, view.nbr);
            let implied_ack = nbr.ls_rxmt().invalidate(&lsa.hdr);
            if !implied_ack {
                send_direct_ack(&link, nbr, vec![lsa.hdr]);
                return Ok(false);
            }
            nbr.lsupd_rxmt_update(&link);
            if link.state.ism == ism::State::Backup
                && link.state.dr == Some(nbr.addr)
            {
                enqueue_delayed_ack(state, &iface_key(key), lsa.hdr)?;
            }
            Ok(false)
        }
        // The database copy is more recent.
        Some(Ordering::Less) => {
            let requested = neighbor::view(state, key)?
                .nbr
                .ls_request()
                .get(&lsa_key)
                .is_some();
            if requested {
                neighbor::fsm(state, key, nsm::Event::BadLsReq)?;
                return Ok(true);
            }

            // (8)
            let Some(db_lsa) = db_lsa else {
                return Ok(false);
            };
            if db_lsa.hdr.is_maxage() && db_lsa.hdr.seq_no == LSA_MAX_SEQ_NO {
                return Ok(false);
            }
            if recent {
                Debug::LsaMinArrivalDiscard(key.router_id, &lsa.hdr).log();
                return Ok(false);
            }
            neighbor::view(state, key)?
                .nbr
                .ls_update
                .insert(lsa_key, db_lsa);
            let iface_key = iface_key(key);
            let iface = interface_mut(&mut state.areas, &iface_key)?;
            schedule_lsupd(iface, &iface_key, &state.out);
            Ok(false)
        }
    }
}

// RFC 2328 section 10.7.
pub(crate) fn process_lsreq(
    state: &mut InstanceState,
    key: &NbrKey,
    lsreq: &LsRequest,
) -> Result<(), Error> {
    let view = neighbor::view(state, key)?;
    if view.nbr.state < nsm::State::Exchange {
        Debug::PacketRxIgnore(key.router_id, view.nbr.state).log();
        return Ok(());
    }

    let lsas = lsreq
        .entries
        .iter()
        .map(|lsa_key| {
            lsa_key
                .lsa_type
                .scope()
                .and_then(|scope| view.lsdb(scope).get(lsa_key))
                .map(|entry| entry.lsa.clone())
                .ok_or(lsa_key)
        })
        .collect::<Result<Vec<_>, _>>();
    let lsas = match lsas {
        Ok(lsas) => lsas,
        Err(lsa_key) => {
            Debug::LsReqMiss(key.router_id, lsa_key).log();
            return neighbor::fsm(state, key, nsm::Event::BadLsReq);
        }
    };

    let (link, nbr) = (view.link, view.nbr);
    for packet in lsupd_packets(&link, lsas.iter()) {
        link.send(link.unicast(nbr), &packet);
    }
    Ok(())
}

pub(crate) fn process_lsack(
    state: &mut InstanceState,
    key: &NbrKey,
    lsack: &LsAck,
) -> Result<(), Error> {
    let view = neighbor::view(state, key)?;
    let (link, nbr) = (view.link, view.nbr);
    if nbr.state < nsm::State::Exchange {
        Debug::PacketRxIgnore(key.router_id, nbr.state).log();
        return Ok(());
    }

    for hdr in &lsack.lsa_hdrs {
        if !nbr.ls_rxmt().invalidate(hdr) {
            Debug::QuestionableAck(key.router_id, hdr).log();
        }

        // Acknowledged LSAs are no longer worth requesting.
        let mut ls_request = nbr.ls_request();
        if ls_request.get(&hdr.key()).is_some_and(|requested| {
            lsdb::lsa_compare(hdr, requested) != Ordering::Less
        }) {
            ls_request.remove(&hdr.key());
        }
    }

    nbr.lsupd_rxmt_update(&link);
    nbr.loading_check(&link);
    Ok(())
}

// Floods an LSA out of the interfaces in its scope (RFC 2328 section
// 13.3). `src` is the neighbor the LSA was received from, if any. Returns
// whether the LSA was flooded back out of the receiving interface.
pub(crate) fn flood(
    state: &mut InstanceState,
    lsdb_key: LsdbKey,
    lsa: &Arc<Lsa>,
    src: Option<&NbrKey>,
) -> Result<bool, Error> {
    let router_id = state.router_id;
    let lsa_key = lsa.hdr.key();
    let mut flooded_back = false;

    for area in state.areas.values_mut().filter(|area| match lsdb_key {
        LsdbKey::Area(area_id) => area.id == area_id,
        LsdbKey::As => true,
    }) {
        let area_id = area.id;
        for iface in area.interfaces.values_mut() {
            if iface.is_down() {
                continue;
            }
            let (link, neighbors) = iface.split(area_id, router_id, &state.out);
            let from_here = src.filter(|src| {
                src.area_id == area_id && src.ifname == link.name
            });

            let mut added = false;
            for nbr in neighbors.values_mut() {
                // (1a)
                if nbr.state < nsm::State::Exchange {
                    continue;
                }
                // (1b)
                if nbr.state != nsm::State::Full {
                    let requested = nbr.ls_request().get(&lsa_key).copied();
                    if let Some(requested) = requested {
                        let cmp = lsdb::lsa_compare(&lsa.hdr, &requested);
                        if cmp != Ordering::Less {
                            nbr.ls_request().remove(&lsa_key);
                        }
                        if cmp != Ordering::Greater {
                            nbr.loading_check(&link);
                            continue;
                        }
                        nbr.loading_check(&link);
                    }
                }
                // (1c)
                if from_here.is_some_and(|src| src.router_id == nbr.router_id)
                {
                    continue;
                }
                // (1d)
                nbr.ls_rxmt().insert(lsa.clone());
                nbr.lsupd_rxmt_update(&link);
                added = true;
            }

            // (2)
            if !added {
                continue;
            }
            if let Some(src) = from_here {
                // (3)
                let src_addr = neighbors.get(&src.router_id).map(|n| n.addr);
                if src_addr.is_some_and(|addr| {
                    link.state.dr == Some(addr) || link.state.bdr == Some(addr)
                }) {
                    continue;
                }
                // (4)
                if link.state.ism == ism::State::Backup {
                    continue;
                }
                flooded_back = true;
            }

            // (5)
            let key = link.key();
            iface.state.ls_update.insert(lsa_key, lsa.clone());
            schedule_lsupd(iface, &key, &state.out);
        }
    }

    Ok(flooded_back)
}

// Sends the LSAs queued for flooding out of an interface, and those
// queued for its neighbors individually.
pub(crate) fn send_lsupd(
    state: &mut InstanceState,
    key: &IfaceKey,
) -> Result<(), Error> {
    let router_id = state.router_id;
    let iface = interface_mut(&mut state.areas, key)?;
    iface.state.tasks.ls_update = None;
    let flooded = std::mem::take(&mut iface.state.ls_update);

    let (link, neighbors) = iface.split(key.area_id, router_id, &state.out);
    for packet in lsupd_packets(&link, flooded.values()) {
        link.send(link.flood_dst(), &packet);
    }
    for nbr in neighbors.values_mut() {
        let lsas = std::mem::take(&mut nbr.ls_update);
        for packet in lsupd_packets(&link, lsas.values()) {
            link.send(link.unicast(nbr), &packet);
        }
    }
    Ok(())
}

pub(crate) fn send_delayed_ack(
    state: &mut InstanceState,
    key: &IfaceKey,
) -> Result<(), Error> {
    let router_id = state.router_id;
    let iface = interface_mut(&mut state.areas, key)?;
    iface.state.tasks.delayed_ack = None;
    let hdrs = std::mem::take(&mut iface.state.ls_ack);

    let link = iface.link(key.area_id, router_id, &state.out);
    for packet in lsack_packets(&link, hdrs.into_values().collect()) {
        link.send(link.flood_dst(), &packet);
    }
    Ok(())
}

// Retransmits every LSA the neighbor hasn't acknowledged yet.
pub(crate) fn rxmt_lsupd(link: &Link<'_>, nbr: &Neighbor) {
    let lsas = nbr.ls_rxmt().iter().cloned().collect::<Vec<_>>();
    for packet in lsupd_packets(link, lsas.iter()) {
        link.send(link.unicast(nbr), &packet);
    }
}

// ===== helper functions =====

fn iface_key(key: &NbrKey) -> IfaceKey {
    IfaceKey {
        area_id: key.area_id,
        ifname: key.ifname.clone(),
    }
}

fn interface_mut<'a>(
    areas: &'a mut BTreeMap<Ipv4Addr, Area>,
    key: &IfaceKey,
) -> Result<&'a mut Interface, Error> {
    areas
        .get_mut(&key.area_id)
        .and_then(|area| area.interfaces.get_mut(&key.ifname))
        .ok_or_else(|| Error::InterfaceNotFound(key.ifname.clone()))
}

fn synchronizing(state: &InstanceState) -> bool {
    lsdb::scope_neighbors(state, LsdbKey::As).any(|nbr| {
        matches!(nbr.state, nsm::State::Exchange | nsm::State::Loading)
    })
}

fn schedule_lsupd(iface: &mut Interface, key: &IfaceKey, out: &Output) {
    if iface.state.tasks.ls_update.is_none() {
        let task = tasks::ls_update_timer(&out.input, key);
        iface.state.tasks.ls_update = Some(task);
    }
}

fn enqueue_delayed_ack(
    state: &mut InstanceState,
    key: &IfaceKey,
    hdr: LsaHdr,
) -> Result<(), Error> {
    let iface = interface_mut(&mut state.areas, key)?;
    iface.state.ls_ack.insert(hdr.key(), hdr);
    if iface.state.tasks.delayed_ack.is_none() {
        let task = tasks::delayed_ack_timer(&state.out.input, key);
        iface.state.tasks.delayed_ack = Some(task);
    }
    Ok(())
}

fn send_direct_ack(link: &Link<'_>, nbr: &Neighbor, hdrs: Vec<LsaHdr>) {
    for packet in lsack_packets(link, hdrs) {
        link.send(link.unicast(nbr), &packet);
    }
}

// Packs LSAs into as few LS Updates as the MTU allows, aging each one by
// the interface's transmit delay.
fn lsupd_packets<'a>(
    link: &Link<'_>,
    lsas: impl Iterator<Item = &'a Arc<Lsa>>,
) -> Vec<Packet> {
    let room = usize::from(link.mtu()).saturating_sub(
        frame::IP_LEN + usize::from(PacketHdr::LENGTH) + LSUPD_COUNT_LEN,
    );
    let mut packets = vec![];
    let mut batch: Vec<Lsa> = vec![];
    let mut used = 0;
    for lsa in lsas {
        let len = usize::from(lsa.hdr.length);
        if !batch.is_empty() && used + len > room {
            packets.push(lsupd_packet(link, std::mem::take(&mut batch)));
            used = 0;
        }
        let mut lsa = (**lsa).clone();
        let age = lsa.age().saturating_add(link.config.transmit_delay);
        lsa.set_age(age.min(LSA_MAX_AGE));
        batch.push(lsa);
        used += len;
    }
    if !batch.is_empty() {
        packets.push(lsupd_packet(link, batch));
    }
    packets
}

fn lsupd_packet(link: &Link<'_>, lsas: Vec<Lsa>) -> Packet {
    Packet::LsUpdate(LsUpdate {
        hdr: link.packet_hdr(PacketType::LsUpdate),
        lsas,
    })
}

fn lsack_packets(link: &Link<'_>, hdrs: Vec<LsaHdr>) -> Vec<Packet> {
    let room = usize::from(link.mtu())
        .saturating_sub(frame::IP_LEN + usize::from(PacketHdr::LENGTH))
        / usize::from(LsaHdr::LENGTH);
    hdrs.chunks(room.max(1))
        .map(|chunk| {
            Packet::LsAck(LsAck {
                hdr: link.packet_hdr(PacketType::LsAck),
                lsa_hdrs: chunk.to_vec(),
            })
        })
        .collect()
}

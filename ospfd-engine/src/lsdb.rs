//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bitflags::bitflags;
use ospfd_utils::task::TimeoutTask;
use serde::{Deserialize, Serialize};

use crate::area::Area;
use crate::debug::{Debug, LsaFlushReason};
use crate::error::Error;
use crate::instance::InstanceState;
use crate::interface::{InterfaceType, ism};
use crate::neighbor::{Neighbor, nsm};
use crate::packet::Options;
use crate::packet::lsa::{
    Lsa, LsaBody, LsaHdr, LsaKey, LsaNetwork, LsaRouter, LsaRouterFlags,
    LsaRouterLink, LsaRouterLinkType, LsaType, LsaTypeCode,
};
use crate::tasks::messages::{IfaceKey, LsaTimerMsg, LsdbKey};
use crate::{flood, spf, tasks};

// Architectural constants (RFC 2328 appendix B).
pub const LSA_REFRESH_TIME: u16 = 1800;
pub const LSA_MAX_AGE: u16 = 3600;
pub const LSA_MAX_AGE_DIFF: u16 = 900;
pub const LSA_INFINITY: u32 = 0x00ffffff;
pub const LSA_INIT_SEQ_NO: u32 = 0x80000001;
pub const LSA_MAX_SEQ_NO: u32 = 0x7fffffff;
pub const LSA_RESERVED_SEQ_NO: u32 = 0x80000000;
pub const LSA_MIN_INTERVAL: u64 = 5;
pub const LSA_MIN_ARRIVAL: u64 = 1;

// Link state database of one flooding scope.
#[derive(Debug, Default)]
pub struct Lsdb {
    entries: BTreeMap<LsaKey, LsaEntry>,
    // LSAs waiting to be removed by the MaxAge sweep.
    maxage: BTreeSet<LsaKey>,
    // Instances to originate once the one holding the maximum sequence
    // number has been flushed.
    seqno_wrapping: BTreeMap<LsaKey, Lsa>,
    // Originations postponed by the MinLSInterval check.
    delayed: BTreeMap<LsaKey, DelayedOrig>,
}

#[derive(Debug)]
pub struct LsaEntry {
    pub lsa: Arc<Lsa>,
    pub flags: LsaEntryFlags,
    pub installed: Instant,
    expiry: Option<TimeoutTask>,
    refresh: Option<TimeoutTask>,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct LsaEntryFlags: u8 {
        // Installed from an LS Update rather than originated.
        const RECEIVED = 0x01;
        const SELF_ORIGINATED = 0x02;
    }
}

#[derive(Debug)]
struct DelayedOrig {
    options: Options,
    lsa_id: Ipv4Addr,
    body: LsaBody,
    _timer: TimeoutTask,
}

// Reasons to (re)originate self-originated LSAs.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum LsaOrigEvent {
    RouterLsa { area_id: Ipv4Addr },
    NetworkLsa { iface: IfaceKey },
    // Sent when the set of attached areas changes, which affects the B bit.
    AllRouterLsas,
}

// ===== impl Lsdb =====

impl Lsdb {
    pub fn get(&self, key: &LsaKey) -> Option<&LsaEntry> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LsaEntry> {
        self.entries.values()
    }

    pub fn iter_by_type(
        &self,
        lsa_type: LsaType,
    ) -> impl Iterator<Item = &LsaEntry> {
        let start =
            LsaKey::new(lsa_type, Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED);
        self.entries
            .range(start..)
            .take_while(move |(key, _)| key.lsa_type == lsa_type)
            .map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn maxage_count(&self) -> usize {
        self.maxage.len()
    }

    // Database edits without timers, flooding or SPF scheduling.
    #[cfg(test)]
    pub(crate) fn insert_plain(&mut self, lsa: Lsa) {
        let entry = LsaEntry {
            lsa: Arc::new(lsa),
            flags: LsaEntryFlags::RECEIVED,
            installed: Instant::now(),
            expiry: None,
            refresh: None,
        };
        self.entries.insert(entry.lsa.hdr.key(), entry);
    }

    #[cfg(test)]
    pub(crate) fn remove_plain(&mut self, key: &LsaKey) {
        self.entries.remove(key);
    }
}

// ===== impl LsaEntry =====

impl LsaEntry {
    // Whether another instance arrived by flooding less than MinLSArrival
    // seconds ago.
    pub(crate) fn arrived_recently(&self) -> bool {
        if !self.flags.contains(LsaEntryFlags::RECEIVED) {
            return false;
        }
        #[cfg(feature = "deterministic")]
        {
            false
        }
        #[cfg(not(feature = "deterministic"))]
        {
            self.installed.elapsed().as_secs() < LSA_MIN_ARRIVAL
        }
    }

    // Whether this router originated the LSA less than MinLSInterval
    // seconds ago.
    fn originated_recently(&self) -> bool {
        if self.flags.contains(LsaEntryFlags::RECEIVED) {
            return false;
        }
        #[cfg(feature = "deterministic")]
        {
            false
        }
        #[cfg(not(feature = "deterministic"))]
        {
            self.installed.elapsed().as_secs() < LSA_MIN_INTERVAL
        }
    }
}

// ===== global functions =====

// Tells which of two instances of an LSA is more recent (RFC 2328 section
// 13.1). `Greater` means `a` is.
pub fn lsa_compare(a: &LsaHdr, b: &LsaHdr) -> Ordering {
    (a.seq_no as i32)
        .cmp(&(b.seq_no as i32))
        .then(a.cksum.cmp(&b.cksum))
        .then(a.is_maxage().cmp(&b.is_maxage()))
        .then_with(|| {
            if a.age.abs_diff(b.age) > LSA_MAX_AGE_DIFF {
                b.age.cmp(&a.age)
            } else {
                Ordering::Equal
            }
        })
}

// Whether installing `b` over `a` changes anything the routing table
// depends on.
pub(crate) fn same_contents(a: &Lsa, b: &Lsa) -> bool {
    let body = usize::from(LsaHdr::LENGTH);
    a.hdr.options == b.hdr.options
        && a.hdr.is_maxage() == b.hdr.is_maxage()
        && a.hdr.length == b.hdr.length
        && a.raw.get(body..) == b.raw.get(body..)
}

pub(crate) fn lsdb_get<'a>(
    state: &'a InstanceState,
    lsdb: LsdbKey,
) -> Result<&'a Lsdb, Error> {
    match lsdb {
        LsdbKey::Area(area_id) => state
            .areas
            .get(&area_id)
            .map(|area| &area.lsdb)
            .ok_or(Error::AreaNotFound(area_id)),
        LsdbKey::As => Ok(&state.as_lsdb),
    }
}

// LSDB where an LSA received or originated in `area_id` belongs.
pub(crate) fn lsdb_for(lsa_type: LsaType, area_id: Ipv4Addr) -> LsdbKey {
    match lsa_type.type_code() {
        Some(LsaTypeCode::AsExternal) => LsdbKey::As,
        _ => LsdbKey::Area(area_id),
    }
}

// RFC 2328 section 13.4.
pub(crate) fn is_self_originated(state: &InstanceState, hdr: &LsaHdr) -> bool {
    hdr.adv_rtr == state.router_id
        || (hdr.lsa_type.type_code() == Some(LsaTypeCode::Network)
            && state
                .areas
                .values()
                .flat_map(|area| area.interfaces.values())
                .filter_map(|iface| iface.system.addr)
                .any(|addr| addr.ip() == hdr.lsa_id))
}

// Neighbors whose retransmission lists may hold LSAs of the given LSDB.
pub(crate) fn scope_neighbors(
    state: &InstanceState,
    lsdb: LsdbKey,
) -> impl Iterator<Item = &Neighbor> {
    state
        .areas
        .values()
        .filter(move |area| match lsdb {
            LsdbKey::Area(area_id) => area.id == area_id,
            LsdbKey::As => true,
        })
        .flat_map(|area| area.interfaces.values())
        .flat_map(|iface| iface.neighbors.values())
}

pub(crate) fn install(
    state: &mut InstanceState,
    lsdb_key: LsdbKey,
    lsa: Arc<Lsa>,
    received: bool,
) -> Result<(), Error> {
    Debug::LsaInstall(&lsa.hdr).log();

    // The database copy is superseded everywhere.
    for nbr in scope_neighbors(state, lsdb_key) {
        nbr.ls_rxmt().remove_older(&lsa.hdr);
    }

    let router_id = state.router_id;
    let input = &state.out.input;
    let lsdb = lsdb_mut(&mut state.areas, &mut state.as_lsdb, lsdb_key)?;
    let key = lsa.hdr.key();
    let maxage = lsa.hdr.is_maxage();
    let changed = lsdb
        .entries
        .get(&key)
        .is_none_or(|old| !same_contents(&old.lsa, &lsa));

    let mut flags = LsaEntryFlags::empty();
    flags.set(LsaEntryFlags::RECEIVED, received);
    flags.set(LsaEntryFlags::SELF_ORIGINATED, lsa.hdr.adv_rtr == router_id);
    let msg = LsaTimerMsg {
        lsdb: lsdb_key,
        key,
        seq_no: lsa.hdr.seq_no,
    };
    let expiry = (!maxage).then(|| {
        tasks::lsa_expiry_timer(input, msg.clone(), LSA_MAX_AGE - lsa.age())
    });
    let refresh = (!maxage && flags.contains(LsaEntryFlags::SELF_ORIGINATED))
        .then(|| tasks::lsa_refresh_timer(input, msg, LSA_REFRESH_TIME));
    let entry = LsaEntry {
        lsa,
        flags,
        installed: Instant::now(),
        expiry,
        refresh,
    };
    lsdb.entries.insert(key, entry);

    if maxage {
        lsdb.maxage.insert(key);
        if state.maxage_sweep.is_none() {
            let task = tasks::maxage_sweep_interval(&state.out.input);
            state.maxage_sweep = Some(task);
        }
    } else {
        lsdb.maxage.remove(&key);
    }

    if changed {
        state.out.input.spf_delay(spf::DelayEvent::Igp);
    }
    Ok(())
}

// Installs a new self-originated instance and floods it.
pub(crate) fn originate(
    state: &mut InstanceState,
    lsdb_key: LsdbKey,
    lsa: Lsa,
) -> Result<(), Error> {
    Debug::LsaOriginate(&lsa.hdr).log();
    state.counters.orig_lsas += 1;
    let lsa = Arc::new(lsa);
    install(state, lsdb_key, lsa.clone(), false)?;
    flood::flood(state, lsdb_key, &lsa, None)?;
    Ok(())
}

// Originates a new instance unless the database already holds one with
// the same contents (RFC 2328 section 12.4). Originations closer than
// MinLSInterval to the previous one are postponed.
pub(crate) fn originate_check(
    state: &mut InstanceState,
    lsdb_key: LsdbKey,
    options: Options,
    lsa_id: Ipv4Addr,
    body: LsaBody,
) -> Result<(), Error> {
    let router_id = state.router_id;
    let input = &state.out.input;
    let lsdb = lsdb_mut(&mut state.areas, &mut state.as_lsdb, lsdb_key)?;
    let key = LsaKey::new(body.lsa_type(), router_id, lsa_id);

    let Some(old) = lsdb.entries.get(&key) else {
        let seq_no = LSA_INIT_SEQ_NO;
        let lsa = Lsa::new(0, options, lsa_id, router_id, seq_no, body);
        return originate(state, lsdb_key, lsa);
    };

    let old_seq_no = old.lsa.hdr.seq_no;
    let lsa = Lsa::new(
        0,
        options,
        lsa_id,
        router_id,
        old_seq_no.wrapping_add(1),
        body,
    );
    if same_contents(&old.lsa, &lsa)
        && !old.flags.contains(LsaEntryFlags::RECEIVED)
    {
        return Ok(());
    }

    if let Some(delayed) = lsdb.delayed.get_mut(&key) {
        delayed.options = options;
        delayed.body = lsa.body;
        return Ok(());
    }
    if old.originated_recently() {
        Debug::LsaOriginateMinInterval(&lsa.hdr).log();
        let msg = LsaTimerMsg {
            lsdb: lsdb_key,
            key,
            seq_no: old_seq_no,
        };
        let delay = Duration::from_secs(LSA_MIN_INTERVAL)
            .saturating_sub(old.installed.elapsed());
        let delayed = DelayedOrig {
            options,
            lsa_id,
            body: lsa.body,
            _timer: tasks::lsa_orig_delayed_timer(input, msg, delay),
        };
        lsdb.delayed.insert(key, delayed);
        return Ok(());
    }

    if old_seq_no == LSA_MAX_SEQ_NO {
        return wrap_seq_no(state, lsdb_key, lsa);
    }
    originate(state, lsdb_key, lsa)
}

// Originates an LSA postponed by the MinLSInterval check.
pub(crate) fn process_orig_delayed(
    state: &mut InstanceState,
    msg: &LsaTimerMsg,
) -> Result<(), Error> {
    let lsdb = lsdb_mut(&mut state.areas, &mut state.as_lsdb, msg.lsdb)?;
    let Some(delayed) = lsdb.delayed.remove(&msg.key) else {
        return Ok(());
    };
    let seq_no = lsdb
        .entries
        .get(&msg.key)
        .map_or(LSA_INIT_SEQ_NO, |old| old.lsa.hdr.seq_no.wrapping_add(1));

    let lsa = Lsa::new(
        0,
        delayed.options,
        delayed.lsa_id,
        state.router_id,
        seq_no,
        delayed.body,
    );
    if seq_no == LSA_MAX_SEQ_NO.wrapping_add(1) {
        return wrap_seq_no(state, msg.lsdb, lsa);
    }
    originate(state, msg.lsdb, lsa)
}

// Prematurely ages an LSA and floods it so that every router removes it.
pub(crate) fn flush(
    state: &mut InstanceState,
    lsdb_key: LsdbKey,
    key: &LsaKey,
    reason: LsaFlushReason,
) -> Result<(), Error> {
    let lsdb = lsdb_mut(&mut state.areas, &mut state.as_lsdb, lsdb_key)?;
    lsdb.delayed.remove(key);
    let Some(entry) = lsdb.entries.get(key) else {
        return Ok(());
    };
    if entry.lsa.hdr.is_maxage() {
        return Ok(());
    }

    let mut lsa = (*entry.lsa).clone();
    lsa.set_maxage();
    Debug::LsaFlush(&lsa.hdr, reason).log();
    let lsa = Arc::new(lsa);
    install(state, lsdb_key, lsa.clone(), false)?;
    flood::flood(state, lsdb_key, &lsa, None)?;
    Ok(())
}

pub(crate) fn flush_all_self_originated(
    state: &mut InstanceState,
) -> Result<(), Error> {
    let mut keys = vec![];
    for area in state.areas.values() {
        let lsdb_key = LsdbKey::Area(area.id);
        keys.extend(self_originated(&area.lsdb).map(|key| (lsdb_key, key)));
    }
    keys.extend(self_originated(&state.as_lsdb).map(|key| (LsdbKey::As, key)));

    for (lsdb_key, key) in keys {
        flush(state, lsdb_key, &key, LsaFlushReason::PrematureAging)?;
    }
    Ok(())
}

// The LSA reached MaxAge while in the database.
pub(crate) fn process_expiry(
    state: &mut InstanceState,
    msg: &LsaTimerMsg,
) -> Result<(), Error> {
    let current = lsdb_get(state, msg.lsdb)?
        .get(&msg.key)
        .is_some_and(|entry| entry.lsa.hdr.seq_no == msg.seq_no);
    if current {
        flush(state, msg.lsdb, &msg.key, LsaFlushReason::Expiry)?;
    }
    Ok(())
}

// Originates a new instance of a self-originated LSA every
// LSRefreshTime seconds.
pub(crate) fn process_refresh(
    state: &mut InstanceState,
    msg: &LsaTimerMsg,
) -> Result<(), Error> {
    let Some(entry) = lsdb_get(state, msg.lsdb)?
        .get(&msg.key)
        .filter(|entry| entry.lsa.hdr.seq_no == msg.seq_no)
        .filter(|entry| !entry.lsa.hdr.is_maxage())
    else {
        return Ok(());
    };

    let old = &entry.lsa.hdr;
    Debug::LsaRefresh(old).log();
    let lsa = Lsa::new(
        0,
        old.options,
        old.lsa_id,
        old.adv_rtr,
        old.seq_no.wrapping_add(1),
        entry.lsa.body.clone(),
    );
    if old.seq_no == LSA_MAX_SEQ_NO {
        return wrap_seq_no(state, msg.lsdb, lsa);
    }
    originate(state, msg.lsdb, lsa)
}

// Removes MaxAge LSAs no longer needed by any neighbor (RFC 2328 section
// 14).
pub(crate) fn maxage_sweep(state: &mut InstanceState) -> Result<(), Error> {
    let mut lsdb_keys = state
        .areas
        .keys()
        .map(|area_id| LsdbKey::Area(*area_id))
        .collect::<Vec<_>>();
    lsdb_keys.push(LsdbKey::As);

    let mut pending = false;
    for lsdb_key in lsdb_keys {
        // Nothing goes while a neighbor is synchronizing.
        let syncing = scope_neighbors(state, lsdb_key).any(|nbr| {
            matches!(nbr.state, nsm::State::Exchange | nsm::State::Loading)
        });
        let lsdb = lsdb_get(state, lsdb_key)?;
        let removable = if syncing {
            vec![]
        } else {
            lsdb.maxage
                .iter()
                .filter(|key| {
                    !scope_neighbors(state, lsdb_key)
                        .any(|nbr| nbr.ls_rxmt().contains_key(key))
                })
                .copied()
                .collect::<Vec<_>>()
        };

        let lsdb = lsdb_mut(&mut state.areas, &mut state.as_lsdb, lsdb_key)?;
        let mut wrapped = vec![];
        for key in removable {
            lsdb.maxage.remove(&key);
            lsdb.entries.remove(&key);
            if let Some(lsa) = lsdb.seqno_wrapping.remove(&key) {
                wrapped.push(lsa);
            }
        }
        pending |= !lsdb.maxage.is_empty();

        for lsa in wrapped {
            originate(state, lsdb_key, lsa)?;
        }
    }

    if !pending {
        state.maxage_sweep = None;
    }
    Ok(())
}

pub(crate) fn process_orig_event(
    state: &mut InstanceState,
    event: &LsaOrigEvent,
) -> Result<(), Error> {
    match event {
        LsaOrigEvent::RouterLsa { area_id } => orig_router_lsa(state, *area_id),
        LsaOrigEvent::NetworkLsa { iface } => orig_network_lsa(state, iface),
        LsaOrigEvent::AllRouterLsas => {
            let area_ids = state.areas.keys().copied().collect::<Vec<_>>();
            for area_id in area_ids {
                orig_router_lsa(state, area_id)?;
            }
            Ok(())
        }
    }
}

// A more recent instance of one of our LSAs arrived (RFC 2328 section
// 13.4). It was installed already and is now superseded or flushed.
pub(crate) fn process_self_originated(
    state: &mut InstanceState,
    lsdb_key: LsdbKey,
    hdr: &LsaHdr,
) -> Result<(), Error> {
    let key = hdr.key();
    match (hdr.lsa_type.type_code(), lsdb_key) {
        (Some(LsaTypeCode::Router), LsdbKey::Area(area_id))
            if hdr.adv_rtr == state.router_id =>
        {
            orig_router_lsa(state, area_id)
        }
        (Some(LsaTypeCode::Network), LsdbKey::Area(area_id))
            if hdr.adv_rtr == state.router_id =>
        {
            let iface = state.areas.get(&area_id).and_then(|area| {
                area.interfaces
                    .values()
                    .find(|iface| {
                        iface.state.network_lsa == Some(key)
                            && iface.state.ism == ism::State::Dr
                    })
                    .map(|iface| IfaceKey {
                        area_id,
                        ifname: iface.name.clone(),
                    })
            });
            match iface {
                Some(iface) => orig_network_lsa(state, &iface),
                None => {
                    flush(state, lsdb_key, &key, LsaFlushReason::PrematureAging)
                }
            }
        }
        // Settled by the next routing table calculation.
        (
            Some(LsaTypeCode::SummaryNetwork | LsaTypeCode::SummaryRouter),
            _,
        ) if hdr.adv_rtr == state.router_id => Ok(()),
        _ => flush(state, lsdb_key, &key, LsaFlushReason::PrematureAging),
    }
}

// RFC 2328 section 12.4.1.
pub(crate) fn orig_router_lsa(
    state: &mut InstanceState,
    area_id: Ipv4Addr,
) -> Result<(), Error> {
    let is_abr = state.is_abr();
    let area = state
        .areas
        .get(&area_id)
        .ok_or(Error::AreaNotFound(area_id))?;

    let mut flags = LsaRouterFlags::empty();
    flags.set(LsaRouterFlags::B, is_abr);
    let links = router_links(area);

    let body = LsaBody::Router(LsaRouter { flags, links });
    let router_id = state.router_id;
    originate_check(state, LsdbKey::Area(area_id), Options::E, router_id, body)
}

// RFC 2328 section 12.4.2. The Network-LSA is originated while being the
// DR with at least one fully adjacent neighbor, and flushed otherwise.
pub(crate) fn orig_network_lsa(
    state: &mut InstanceState,
    key: &IfaceKey,
) -> Result<(), Error> {
    let router_id = state.router_id;
    let area = state
        .areas
        .get_mut(&key.area_id)
        .ok_or(Error::AreaNotFound(key.area_id))?;
    let iface = area
        .interfaces
        .get_mut(&key.ifname)
        .ok_or_else(|| Error::InterfaceNotFound(key.ifname.clone()))?;

    let full = iface
        .neighbors
        .values()
        .filter(|nbr| nbr.state == nsm::State::Full)
        .map(|nbr| nbr.router_id)
        .collect::<Vec<_>>();
    let wanted = iface
        .system
        .addr
        .filter(|_| iface.state.ism == ism::State::Dr && !full.is_empty());
    let wanted_key = wanted.map(|addr| {
        LsaKey::new(LsaTypeCode::Network.into(), router_id, addr.ip())
    });

    // Whatever was originated for an older address or role goes away.
    let stale = iface.state.network_lsa.filter(|old| Some(*old) != wanted_key);
    iface.state.network_lsa = wanted_key;
    let lsdb_key = LsdbKey::Area(key.area_id);
    if let Some(stale) = stale {
        flush(state, lsdb_key, &stale, LsaFlushReason::PrematureAging)?;
    }

    let Some(addr) = wanted else {
        return Ok(());
    };
    let attached_rtrs = std::iter::once(router_id).chain(full).collect();
    let body = LsaBody::Network(LsaNetwork {
        mask: addr.mask(),
        attached_rtrs,
    });
    originate_check(state, lsdb_key, Options::E, addr.ip(), body)
}

// ===== helper functions =====

fn lsdb_mut<'a>(
    areas: &'a mut BTreeMap<Ipv4Addr, Area>,
    as_lsdb: &'a mut Lsdb,
    lsdb: LsdbKey,
) -> Result<&'a mut Lsdb, Error> {
    match lsdb {
        LsdbKey::Area(area_id) => areas
            .get_mut(&area_id)
            .map(|area| &mut area.lsdb)
            .ok_or(Error::AreaNotFound(area_id)),
        LsdbKey::As => Ok(as_lsdb),
    }
}

fn self_originated(lsdb: &Lsdb) -> impl Iterator<Item = LsaKey> + '_ {
    lsdb.iter()
        .filter(|entry| entry.flags.contains(LsaEntryFlags::SELF_ORIGINATED))
        .filter(|entry| !entry.lsa.hdr.is_maxage())
        .map(|entry| entry.lsa.hdr.key())
}

// The current instance carries the maximum sequence number. It's flushed
// and the new one goes out with the initial sequence number once the
// flush has been acknowledged (RFC 2328 section 12.1.6).
fn wrap_seq_no(
    state: &mut InstanceState,
    lsdb_key: LsdbKey,
    lsa: Lsa,
) -> Result<(), Error> {
    let key = lsa.hdr.key();
    let lsa = Lsa::new(
        0,
        lsa.hdr.options,
        lsa.hdr.lsa_id,
        lsa.hdr.adv_rtr,
        LSA_INIT_SEQ_NO,
        lsa.body,
    );
    lsdb_mut(&mut state.areas, &mut state.as_lsdb, lsdb_key)?
        .seqno_wrapping
        .insert(key, lsa);
    flush(state, lsdb_key, &key, LsaFlushReason::PrematureAging)
}

fn router_links(area: &Area) -> Vec<LsaRouterLink> {
    let mut links = vec![];
    for iface in area.interfaces.values() {
        let Some(addr) = iface.system.addr else {
            continue;
        };
        let cost = iface.config.cost;
        match iface.state.ism {
            ism::State::Down => continue,
            // Host route to the interface address.
            ism::State::Loopback => {
                links.push(LsaRouterLink::new(
                    LsaRouterLinkType::StubNetwork,
                    addr.ip(),
                    Ipv4Addr::BROADCAST,
                    0,
                ));
                continue;
            }
            _ => (),
        }

        let full = |nbr: &&Neighbor| nbr.state == nsm::State::Full;
        let transit = match iface.config.if_type {
            InterfaceType::PointToPoint => {
                for nbr in iface.neighbors.values().filter(full) {
                    links.push(LsaRouterLink::new(
                        LsaRouterLinkType::PointToPoint,
                        nbr.router_id,
                        addr.ip(),
                        cost,
                    ));
                }
                None
            }
            // A transit link needs a full adjacency with the DR, or being
            // the DR with at least one.
            InterfaceType::Broadcast => iface.state.dr.filter(|dr| {
                let adjacent = if *dr == addr.ip() {
                    iface.neighbors.values().any(|nbr| full(&nbr))
                } else {
                    iface
                        .neighbors
                        .values()
                        .any(|nbr| nbr.addr == *dr && full(&nbr))
                };
                iface.state.ism != ism::State::Waiting && adjacent
            }),
        };

        match transit {
            Some(dr) => links.push(LsaRouterLink::new(
                LsaRouterLinkType::TransitNetwork,
                dr,
                addr.ip(),
                cost,
            )),
            None => {
                let network = addr.network();
                links.push(LsaRouterLink::new(
                    LsaRouterLinkType::StubNetwork,
                    network,
                    addr.mask(),
                    cost,
                ));
            }
        }
    }
    links
}

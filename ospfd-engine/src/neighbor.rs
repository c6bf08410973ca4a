//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use ospfd_utils::mac_addr::MacAddr;
use ospfd_utils::task::{IntervalTask, TimeoutTask};
use serde::Serialize;

use crate::debug::Debug;
use crate::error::Error;
use crate::instance::InstanceState;
use crate::interface::{InterfaceType, Link, ism};
use crate::lsdb::{self, LsaOrigEvent, Lsdb};
use crate::packet::lsa::{Lsa, LsaHdr, LsaKey, LsaScope};
use crate::packet::{DbDesc, DbDescFlags, Options, Packet};
use crate::tasks::messages::{NbrKey, RxmtPacket};
use crate::{exchange, tasks};

#[derive(Debug)]
pub struct Neighbor {
    pub router_id: Ipv4Addr,
    // Source address of the neighbor's packets.
    pub addr: Ipv4Addr,
    pub mac: Option<MacAddr>,
    pub priority: u8,
    pub options: Options,
    pub dr: Option<Ipv4Addr>,
    pub bdr: Option<Ipv4Addr>,
    pub state: nsm::State,
    pub last_change: DateTime<Utc>,
    pub event_count: u32,
    // Database exchange.
    pub local_master: bool,
    pub dd_flags: DbDescFlags,
    pub dd_seq_no: u32,
    pub last_rcvd_dd: Option<DbDescDigest>,
    pub last_sent_dd: Option<Packet>,
    pub db_summary: BTreeMap<LsaKey, LsaHdr>,
    // LSAs to be sent in a unicast LS Update.
    pub ls_update: BTreeMap<LsaKey, Arc<Lsa>>,
    ls_request: Arc<Mutex<LsRequestList>>,
    ls_rxmt: Arc<Mutex<LsRxmtList>>,
    pub tasks: NeighborTasks,
}

// Fields of a received DD packet used to spot duplicates.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DbDescDigest {
    pub options: Options,
    pub dd_flags: DbDescFlags,
    pub dd_seq_no: u32,
}

#[derive(Debug, Default)]
pub struct NeighborTasks {
    pub inactivity: Option<TimeoutTask>,
    pub dd_rxmt: Option<IntervalTask>,
    pub lsreq_rxmt: Option<IntervalTask>,
    pub lsupd_rxmt: Option<IntervalTask>,
    pub dd_free: Option<TimeoutTask>,
}

// LSAs the neighbor still has to send us.
//
// Entries are requested in key order. `sent` holds the keys of the last LS
// Request, which are expected before the next batch goes out.
#[derive(Debug, Default)]
pub struct LsRequestList {
    entries: BTreeMap<LsaKey, LsaHdr>,
    sent: BTreeSet<LsaKey>,
}

// LSAs flooded to the neighbor and not acknowledged yet.
//
// Acknowledgments only mark entries invalid. They're dropped by `purge`,
// which the retransmission timer calls before every retransmission.
#[derive(Debug, Default)]
pub struct LsRxmtList {
    entries: BTreeMap<LsaKey, RxmtEntry>,
}

#[derive(Debug)]
struct RxmtEntry {
    lsa: Arc<Lsa>,
    valid: bool,
}

// Neighbor together with its interface and the databases it synchronizes
// with.
#[derive(Debug)]
pub(crate) struct NbrView<'a> {
    pub link: Link<'a>,
    pub nbr: &'a mut Neighbor,
    pub area_lsdb: &'a Lsdb,
    pub as_lsdb: &'a Lsdb,
}

#[derive(Debug, Serialize)]
pub struct NeighborSummary {
    pub ifname: String,
    pub router_id: Ipv4Addr,
    pub addr: Ipv4Addr,
    pub priority: u8,
    pub state: nsm::State,
    pub master: Option<Ipv4Addr>,
    pub ls_request_count: usize,
    pub ls_rxmt_count: usize,
    pub last_change: DateTime<Utc>,
}

// Neighbor state machine (RFC 2328 section 10).
pub mod nsm {
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    pub enum State {
        Down,
        Attempt,
        Init,
        TwoWay,
        ExStart,
        Exchange,
        Loading,
        Full,
    }

    #[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
    pub enum Event {
        HelloRcvd,
        Start,
        TwoWayRcvd,
        NegotiationDone,
        ExchangeDone,
        BadLsReq,
        LoadingDone,
        AdjOk,
        SeqNoMismatch,
        OneWayRcvd,
        Kill,
        InactivityTimer,
        LinkDown,
    }

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub enum Action {
        Nothing,
        RestartInactivity,
        // Bump the DD sequence number and claim mastership.
        StartExchange,
        // Fill the summary list with the contents of the LSDB.
        ListDatabase,
        ClearLists,
        RestartExchange,
        Destroy,
    }

    // Transition table. `adjacency` tells whether an adjacency should be
    // formed with the neighbor and `requests_pending` whether its request
    // list is non-empty. Events that make no sense in the current state
    // yield `None`.
    pub fn transition(
        state: State,
        event: Event,
        adjacency: bool,
        requests_pending: bool,
    ) -> Option<(Action, State)> {
        use self::Action as A;
        use self::Event as E;
        use self::State as S;

        let next = match (state, event) {
            (S::Down, E::Start) => (A::RestartInactivity, S::Attempt),
            (S::Down | S::Attempt, E::HelloRcvd) => {
                (A::RestartInactivity, S::Init)
            }
            (_, E::HelloRcvd) => (A::RestartInactivity, state),
            (S::Init, E::TwoWayRcvd) | (S::TwoWay, E::AdjOk) => {
                if adjacency {
                    (A::StartExchange, S::ExStart)
                } else {
                    (A::Nothing, S::TwoWay)
                }
            }
            (S::ExStart, E::NegotiationDone) => {
                (A::ListDatabase, S::Exchange)
            }
            (S::Exchange, E::ExchangeDone) if requests_pending => {
                (A::Nothing, S::Loading)
            }
            (S::Exchange, E::ExchangeDone) => (A::Nothing, S::Full),
            (S::Loading, E::LoadingDone) => (A::Nothing, S::Full),
            (S::ExStart | S::Exchange | S::Loading | S::Full, E::AdjOk) => {
                if adjacency {
                    (A::Nothing, state)
                } else {
                    (A::ClearLists, S::TwoWay)
                }
            }
            (
                S::Exchange | S::Loading | S::Full,
                E::SeqNoMismatch | E::BadLsReq,
            ) => (A::RestartExchange, S::ExStart),
            (_, E::Kill | E::InactivityTimer | E::LinkDown) => {
                (A::Destroy, S::Down)
            }
            (S::Init, E::OneWayRcvd) => (A::Nothing, state),
            (s, E::OneWayRcvd) if s >= S::TwoWay => (A::ClearLists, S::Init),
            (s, E::TwoWayRcvd) if s >= S::TwoWay => (A::Nothing, state),
            _ => return None,
        };
        Some(next)
    }
}

// ===== impl Neighbor =====

impl Neighbor {
    pub fn new(router_id: Ipv4Addr, addr: Ipv4Addr) -> Neighbor {
        Debug::NeighborCreate(router_id, addr).log();

        // A fixed initial value keeps test runs reproducible.
        #[cfg(not(feature = "deterministic"))]
        let dd_seq_no = rand::random::<u32>();
        #[cfg(feature = "deterministic")]
        let dd_seq_no = u32::from(router_id);

        Neighbor {
            router_id,
            addr,
            mac: None,
            priority: 0,
            options: Options::empty(),
            dr: None,
            bdr: None,
            state: nsm::State::Down,
            last_change: Utc::now(),
            event_count: 0,
            local_master: false,
            dd_flags: DbDescFlags::empty(),
            dd_seq_no,
            last_rcvd_dd: None,
            last_sent_dd: None,
            db_summary: Default::default(),
            ls_update: Default::default(),
            ls_request: Default::default(),
            ls_rxmt: Default::default(),
            tasks: Default::default(),
        }
    }

    pub fn ls_request(&self) -> MutexGuard<'_, LsRequestList> {
        self.ls_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ls_rxmt(&self) -> MutexGuard<'_, LsRxmtList> {
        self.ls_rxmt.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Router ID of the master of the database exchange, once negotiated.
    pub fn master(&self, local_router_id: Ipv4Addr) -> Option<Ipv4Addr> {
        if self.state < nsm::State::Exchange {
            None
        } else if self.local_master {
            Some(local_router_id)
        } else {
            Some(self.router_id)
        }
    }

    pub(crate) fn dd_is_dup(&self, dd: &DbDesc) -> bool {
        self.last_rcvd_dd == Some(DbDescDigest::from(dd))
    }

    pub(crate) fn summary(
        &self,
        ifname: &str,
        local_router_id: Ipv4Addr,
    ) -> NeighborSummary {
        NeighborSummary {
            ifname: ifname.to_owned(),
            router_id: self.router_id,
            addr: self.addr,
            priority: self.priority,
            state: self.state,
            master: self.master(local_router_id),
            ls_request_count: self.ls_request().len(),
            ls_rxmt_count: self.ls_rxmt().len(),
            last_change: self.last_change,
        }
    }

    // Forgets everything learned during the database exchange.
    fn clear_lists(&mut self) {
        self.last_rcvd_dd = None;
        self.last_sent_dd = None;
        self.db_summary.clear();
        self.ls_update.clear();
        self.ls_request().clear();
        self.ls_rxmt().clear();
        self.tasks.dd_rxmt = None;
        self.tasks.lsreq_rxmt = None;
        self.tasks.lsupd_rxmt = None;
        self.tasks.dd_free = None;
    }

    // Starts or stops LS Update retransmissions depending on whether
    // anything is waiting for an acknowledgment.
    pub(crate) fn lsupd_rxmt_update(&mut self, link: &Link<'_>) {
        let pending = !self.ls_rxmt().is_empty();
        match (pending, self.tasks.lsupd_rxmt.is_some()) {
            (true, false) => {
                let task = tasks::lsupd_rxmt_interval(
                    &link.out.input,
                    &link.nbr_key(self.router_id),
                    link.config.retransmit_interval,
                    &self.ls_rxmt,
                );
                self.tasks.lsupd_rxmt = Some(task);
            }
            (false, true) => {
                self.ls_rxmt().purge();
                self.tasks.lsupd_rxmt = None;
            }
            _ => (),
        }
    }

    pub(crate) fn rxmt_start(&mut self, link: &Link<'_>, packet: RxmtPacket) {
        let task = tasks::rxmt_interval(
            &link.out.input,
            &link.nbr_key(self.router_id),
            packet,
            link.config.retransmit_interval,
        );
        match packet {
            RxmtPacket::DbDesc => self.tasks.dd_rxmt = Some(task),
            RxmtPacket::LsRequest => self.tasks.lsreq_rxmt = Some(task),
            RxmtPacket::LsUpdate => self.tasks.lsupd_rxmt = Some(task),
        }
    }

    // Called whenever requested LSAs arrive. Requests the next batch once
    // the outstanding one is complete, and signals the end of the loading
    // phase when nothing is left.
    pub(crate) fn loading_check(&mut self, link: &Link<'_>) {
        let (awaiting, empty) = {
            let ls_request = self.ls_request();
            (ls_request.awaiting_reply(), ls_request.is_empty())
        };
        if awaiting {
            return;
        }

        self.tasks.lsreq_rxmt = None;
        if !empty {
            exchange::send_lsreq(link, self);
        } else if self.state == nsm::State::Loading {
            let nbr_key = link.nbr_key(self.router_id);
            link.out.input.nsm_event(&nbr_key, nsm::Event::LoadingDone);
        }
    }
}

impl Drop for Neighbor {
    fn drop(&mut self) {
        Debug::NeighborDelete(self.router_id).log();
    }
}

// ===== impl DbDescDigest =====

impl From<&DbDesc> for DbDescDigest {
    fn from(dd: &DbDesc) -> DbDescDigest {
        DbDescDigest {
            options: dd.options,
            dd_flags: dd.dd_flags,
            dd_seq_no: dd.dd_seq_no,
        }
    }
}

// ===== impl LsRequestList =====

impl LsRequestList {
    pub fn get(&self, key: &LsaKey) -> Option<&LsaHdr> {
        self.entries.get(key)
    }

    // Adding a key again replaces the header and makes it eligible for the
    // next request.
    pub fn insert(&mut self, hdr: LsaHdr) {
        let key = hdr.key();
        self.sent.remove(&key);
        self.entries.insert(key, hdr);
    }

    pub fn remove(&mut self, key: &LsaKey) -> Option<LsaHdr> {
        self.sent.remove(key);
        self.entries.remove(key)
    }

    // Marks up to `max` entries as requested and returns them. Entries
    // requested before and still unanswered come first.
    pub fn next_batch(&mut self, max: usize) -> Vec<LsaKey> {
        let unsent = self
            .entries
            .keys()
            .filter(|key| !self.sent.contains(key))
            .take(max.saturating_sub(self.sent.len()))
            .copied()
            .collect::<Vec<_>>();
        self.sent.extend(unsent);
        self.sent.iter().copied().collect()
    }

    // Keys of the last request, for retransmission.
    pub fn outstanding(&self) -> Vec<LsaKey> {
        self.sent.iter().copied().collect()
    }

    pub fn awaiting_reply(&self) -> bool {
        !self.sent.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.sent.clear();
    }
}

// ===== impl LsRxmtList =====

impl LsRxmtList {
    // Adds or replaces the instance waiting for acknowledgment.
    pub fn insert(&mut self, lsa: Arc<Lsa>) {
        let entry = RxmtEntry { lsa, valid: true };
        self.entries.insert(entry.lsa.hdr.key(), entry);
    }

    // Marks the entry matching an acknowledged header as done. Returns
    // false for unknown keys, other instances and entries already acked.
    pub fn invalidate(&mut self, hdr: &LsaHdr) -> bool {
        let Some(entry) = self.entries.get_mut(&hdr.key()) else {
            return false;
        };
        let same = lsdb::lsa_compare(&entry.lsa.hdr, hdr) == Ordering::Equal;
        let acked = entry.valid && same;
        if acked {
            entry.valid = false;
        }
        acked
    }

    // Drops the entry if `hdr` describes a more recent instance.
    pub fn remove_older(&mut self, hdr: &LsaHdr) -> bool {
        let key = hdr.key();
        let older = self.entries.get(&key).is_some_and(|entry| {
            lsdb::lsa_compare(&entry.lsa.hdr, hdr) == Ordering::Less
        });
        if older {
            self.entries.remove(&key);
        }
        older
    }

    pub fn purge(&mut self) {
        self.entries.retain(|_, entry| entry.valid);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn contains_key(&self, key: &LsaKey) -> bool {
        self.entries.get(key).is_some_and(|entry| entry.valid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Lsa>> {
        self.entries
            .values()
            .filter(|entry| entry.valid)
            .map(|entry| &entry.lsa)
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

// ===== impl NbrView =====

impl NbrView<'_> {
    pub(crate) fn lsdb(&self, scope: LsaScope) -> &Lsdb {
        match scope {
            LsaScope::Area => self.area_lsdb,
            LsaScope::As => self.as_lsdb,
        }
    }
}

// ===== global functions =====

pub(crate) fn view<'a>(
    state: &'a mut InstanceState,
    key: &NbrKey,
) -> Result<NbrView<'a>, Error> {
    let router_id = state.router_id;
    let area = state
        .areas
        .get_mut(&key.area_id)
        .ok_or(Error::AreaNotFound(key.area_id))?;
    let iface = area
        .interfaces
        .get_mut(&key.ifname)
        .ok_or_else(|| Error::InterfaceNotFound(key.ifname.clone()))?;
    let (link, neighbors) = iface.split(key.area_id, router_id, &state.out);
    let nbr = neighbors
        .get_mut(&key.router_id)
        .ok_or_else(|| Error::NeighborNotFound(key.clone()))?;

    Ok(NbrView {
        link,
        nbr,
        area_lsdb: &area.lsdb,
        as_lsdb: &state.as_lsdb,
    })
}

pub(crate) fn fsm(
    state: &mut InstanceState,
    key: &NbrKey,
    event: nsm::Event,
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
    let (link, neighbors) = iface.split(key.area_id, router_id, &state.out);
    let nbr = neighbors
        .get_mut(&key.router_id)
        .ok_or_else(|| Error::NeighborNotFound(key.clone()))?;

    Debug::NsmEvent(nbr.router_id, nbr.state, event).log();
    let adjacency = link.adjacency_wanted(nbr);
    let requests_pending = !nbr.ls_request().is_empty();
    let Some((action, new_state)) =
        nsm::transition(nbr.state, event, adjacency, requests_pending)
    else {
        return Err(Error::NsmUnexpectedEvent(key.router_id, nbr.state, event));
    };

    match action {
        nsm::Action::Nothing => (),
        nsm::Action::RestartInactivity => match &mut nbr.tasks.inactivity {
            Some(task) => task.reset(None),
            None => {
                let task = tasks::inactivity_timer(
                    &link.out.input,
                    key,
                    link.config.dead_interval,
                );
                nbr.tasks.inactivity = Some(task);
            }
        },
        nsm::Action::StartExchange => exchange::start(&link, nbr),
        nsm::Action::ListDatabase => {
            // MaxAge LSAs go straight to the retransmission list.
            let lsas = area
                .lsdb
                .iter()
                .chain(state.as_lsdb.iter())
                .map(|entry| &entry.lsa);
            for lsa in lsas {
                if lsa.hdr.is_maxage() {
                    nbr.ls_rxmt().insert(lsa.clone());
                } else {
                    nbr.db_summary.insert(lsa.hdr.key(), lsa.hdr);
                }
            }
            nbr.lsupd_rxmt_update(&link);
        }
        nsm::Action::ClearLists => nbr.clear_lists(),
        nsm::Action::RestartExchange => {
            nbr.clear_lists();
            exchange::start(&link, nbr);
        }
        nsm::Action::Destroy => {
            nbr.clear_lists();
            nbr.tasks.inactivity = None;
        }
    }

    let old_state = nbr.state;
    if new_state != old_state {
        Debug::NsmTransition(nbr.router_id, old_state, new_state).log();
        nbr.state = new_state;
        nbr.last_change = Utc::now();
        nbr.event_count += 1;

        // Bidirectional communication started or ended.
        let two_way = nsm::State::TwoWay;
        if (old_state < two_way) != (new_state < two_way)
            && link.config.if_type == InterfaceType::Broadcast
        {
            link.out.input.ism_event(&link.key(), ism::Event::NbrChange);
        }

        // Adjacency went up or down.
        if old_state == nsm::State::Full || new_state == nsm::State::Full {
            let area_id = key.area_id;
            link.out.input.lsa_orig(LsaOrigEvent::RouterLsa { area_id });
            let event = LsaOrigEvent::NetworkLsa { iface: link.key() };
            link.out.input.lsa_orig(event);
        }
    }

    if action == nsm::Action::Destroy {
        neighbors.remove(&key.router_id);
    }

    Ok(())
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::nsm::{Action, Event, State, transition};

    #[test]
    fn adjacency_decision() {
        assert_eq!(
            transition(State::Init, Event::TwoWayRcvd, true, false),
            Some((Action::StartExchange, State::ExStart))
        );
        assert_eq!(
            transition(State::Init, Event::TwoWayRcvd, false, false),
            Some((Action::Nothing, State::TwoWay))
        );
        assert_eq!(
            transition(State::Full, Event::AdjOk, false, false),
            Some((Action::ClearLists, State::TwoWay))
        );
    }

    #[test]
    fn exchange_done_depends_on_requests() {
        assert_eq!(
            transition(State::Exchange, Event::ExchangeDone, true, true),
            Some((Action::Nothing, State::Loading))
        );
        assert_eq!(
            transition(State::Exchange, Event::ExchangeDone, true, false),
            Some((Action::Nothing, State::Full))
        );
    }

    #[test]
    fn protocol_errors_restart_exchange() {
        for event in [Event::SeqNoMismatch, Event::BadLsReq] {
            for state in [State::Exchange, State::Loading, State::Full] {
                assert_eq!(
                    transition(state, event, true, false),
                    Some((Action::RestartExchange, State::ExStart))
                );
            }
        }
        let ignored = transition(State::TwoWay, Event::BadLsReq, true, false);
        assert_eq!(ignored, None);
    }

    #[test]
    fn teardown_from_any_state() {
        for event in [Event::Kill, Event::InactivityTimer, Event::LinkDown] {
            assert_eq!(
                transition(State::Loading, event, true, true),
                Some((Action::Destroy, State::Down))
            );
        }
    }
}

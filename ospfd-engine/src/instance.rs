//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use ipnetwork::Ipv4Network;
use ospfd_protocol::{InstanceChannelsTx, ProtocolInstance};
use ospfd_utils::UnboundedSender;
use ospfd_utils::protocol::Protocol;
use ospfd_utils::southbound::{RibMsg, SouthboundMsg, TxFrameMsg};
use ospfd_utils::task::IntervalTask;
use serde::Serialize;

use crate::area::{Area, AreaSummary};
use crate::config::{AreaCfg, ConfigMsg, InstanceCfg};
use crate::debug::{Debug, InstanceInactiveReason, InterfaceInactiveReason};
use crate::error::Error;
use crate::interface::{self, Interface, InterfaceSummary, InterfaceSys, ism};
use crate::lsdb::{self, LsaOrigEvent, Lsdb};
use crate::neighbor::{self, NeighborSummary, nsm};
use crate::packet::lsa::LsaHdr;
use crate::route::{self, Route, RouteSummary};
use crate::spf::{self, DelayCfg, DelayState, SpfScheduler};
pub use crate::tasks::ProtocolInputChannelsRx;
use crate::tasks::ProtocolInputChannelsTx;
use crate::tasks::messages::{IfaceKey, ProtocolInputMsg};
use crate::{config, exchange, flood, southbound, tasks};

#[derive(Debug)]
pub struct Instance {
    pub name: String,
    // Interface data learned from the southbound, kept while inactive too.
    pub system: InstanceSys,
    pub config: InstanceCfg,
    // Present while the instance is running.
    pub state: Option<InstanceState>,
    pub tx: InstanceChannelsTx<Instance>,
}

#[derive(Debug, Default)]
pub struct InstanceSys {
    pub interfaces: BTreeMap<String, InterfaceSys>,
}

#[derive(Debug)]
pub struct InstanceState {
    pub router_id: Ipv4Addr,
    pub areas: BTreeMap<Ipv4Addr, Area>,
    // AS-scope LSAs.
    pub as_lsdb: Lsdb,
    pub routes: BTreeMap<Ipv4Network, Route>,
    pub spf: SpfScheduler,
    pub counters: InstanceCounters,
    pub out: Output,
    pub maxage_sweep: Option<IntervalTask>,
    pub started: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct InstanceCounters {
    pub orig_lsas: u32,
    pub rx_lsas: u32,
}

// Where packets, routes and internal events go.
#[derive(Clone, Debug)]
pub struct Output {
    pub rib: UnboundedSender<RibMsg>,
    pub net: UnboundedSender<TxFrameMsg>,
    pub input: ProtocolInputChannelsTx,
}

#[derive(Debug, Serialize)]
pub struct InstanceSummary {
    pub name: String,
    pub router_id: Option<Ipv4Addr>,
    pub active: bool,
    pub started: Option<DateTime<Utc>>,
    pub spf_delay_state: Option<DelayState>,
    pub spf_run_count: u32,
    pub counters: InstanceCounters,
    pub areas: Vec<AreaSummary>,
    pub interfaces: Vec<InterfaceSummary>,
    pub neighbors: Vec<NeighborSummary>,
    pub lsdb: Vec<LsdbSummary>,
    pub routes: Vec<RouteSummary>,
}

// Headers of one LSDB, the AS-scope one having no area.
#[derive(Debug, Serialize)]
pub struct LsdbSummary {
    pub area_id: Option<Ipv4Addr>,
    pub lsas: Vec<LsaHdr>,
}

// ===== impl Instance =====

impl Instance {
    // Starts or stops the instance depending on its configuration.
    pub(crate) fn update(&mut self) {
        match self.is_ready() {
            Ok(router_id) if !self.is_active() => self.start(router_id),
            Err(reason) if self.is_active() => self.stop(reason),
            _ => (),
        }
    }

    // Drops every adjacency and everything learned, then starts over.
    pub(crate) fn reset(&mut self) {
        self.stop(InstanceInactiveReason::Resetting);
        self.update();
    }

    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    fn is_ready(&self) -> Result<Ipv4Addr, InstanceInactiveReason> {
        if !self.config.enabled {
            return Err(InstanceInactiveReason::AdminDown);
        }
        self.config
            .router_id
            .ok_or(InstanceInactiveReason::MissingRouterId)
    }

    fn start(&mut self, router_id: Ipv4Addr) {
        Debug::InstanceStart(router_id).log();

        let out = Output {
            rib: self.tx.rib.clone(),
            net: self.tx.net.clone(),
            input: self.tx.protocol_input.clone(),
        };
        let mut state =
            InstanceState::new(router_id, self.config.spf_delays(), out);
        for (area_id, area_cfg) in &self.config.areas {
            let area = Area::new(*area_id, area_cfg.clone());
            state.areas.insert(*area_id, area);
        }
        for (ifname, iface_cfg) in &self.config.interfaces {
            let area_id = iface_cfg.area_id;
            let area = state
                .areas
                .entry(area_id)
                .or_insert_with(|| Area::new(area_id, AreaCfg::default()));
            let system = self
                .system
                .interfaces
                .get(ifname)
                .cloned()
                .unwrap_or_default();
            let iface =
                Interface::new(ifname.clone(), iface_cfg.clone(), system);
            area.interfaces.insert(ifname.clone(), iface);
        }

        for key in state.iface_keys() {
            if let Err(error) = interface::update(&mut state, &key) {
                error.log();
            }
        }
        state.out.input.lsa_orig(LsaOrigEvent::AllRouterLsas);
        self.state = Some(state);
    }

    fn stop(&mut self, reason: InstanceInactiveReason) {
        let Some(state) = &mut self.state else {
            return;
        };
        Debug::InstanceStop(reason).log();

        if let Err(error) = lsdb::flush_all_self_originated(state) {
            error.log();
        }

        // Queued events die with the state, so the flushed LSAs go out
        // right away.
        for key in state.iface_keys() {
            let up = state.interface(&key).is_some_and(|i| !i.is_down());
            if !up {
                continue;
            }
            let reason = InterfaceInactiveReason::InstanceDown;
            let result = flood::send_lsupd(state, &key).and_then(|_| {
                interface::fsm(state, &key, ism::Event::InterfaceDown(reason))
            });
            if let Err(error) = result {
                error.log();
            }
        }

        for (prefix, _) in state.routes.iter().filter(|(_, rt)| rt.installed) {
            route::route_uninstall(&state.out.rib, prefix);
        }
        self.state = None;
    }

    // Snapshot of the operational state.
    pub fn summary(&self) -> InstanceSummary {
        let state = self.state.as_ref();
        let areas = || state.into_iter().flat_map(|state| state.areas.values());
        let router_id = state.map(|state| state.router_id);

        let interfaces = areas()
            .flat_map(|area| {
                area.interfaces
                    .values()
                    .map(move |iface| iface.summary(area.id))
            })
            .collect();
        let local_rid = router_id.unwrap_or(Ipv4Addr::UNSPECIFIED);
        let neighbors = areas()
            .flat_map(|area| area.interfaces.values())
            .flat_map(|iface| {
                iface
                    .neighbors
                    .values()
                    .map(move |nbr| nbr.summary(&iface.name, local_rid))
            })
            .collect();
        let mut lsdb = areas()
            .map(|area| LsdbSummary {
                area_id: Some(area.id),
                lsas: lsdb_headers(&area.lsdb),
            })
            .collect::<Vec<_>>();
        if let Some(state) = state {
            lsdb.push(LsdbSummary {
                area_id: None,
                lsas: lsdb_headers(&state.as_lsdb),
            });
        }

        InstanceSummary {
            name: self.name.clone(),
            router_id,
            active: self.is_active(),
            started: state.map(|state| state.started),
            spf_delay_state: state.map(|state| state.spf.state),
            spf_run_count: state.map_or(0, |state| state.spf.run_count),
            counters: state.map(|state| state.counters).unwrap_or_default(),
            areas: areas().map(Area::summary).collect(),
            interfaces,
            neighbors,
            lsdb,
            routes: self.routes(),
        }
    }

    pub fn state_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.summary())
    }

    pub fn routes(&self) -> Vec<RouteSummary> {
        self.state
            .iter()
            .flat_map(|state| state.routes.iter())
            .map(|(prefix, route)| route.summary(*prefix))
            .collect()
    }

    pub fn neighbor_state(&self, router_id: Ipv4Addr) -> Option<nsm::State> {
        self.state
            .iter()
            .flat_map(|state| state.areas.values())
            .flat_map(|area| area.interfaces.values())
            .find_map(|iface| iface.neighbors.get(&router_id))
            .map(|nbr| nbr.state)
    }
}

impl ProtocolInstance for Instance {
    const PROTOCOL: Protocol = Protocol::OSPFV2;

    type ConfigMsg = ConfigMsg;
    type ProtocolInputMsg = ProtocolInputMsg;
    type ProtocolInputChannelsTx = ProtocolInputChannelsTx;
    type ProtocolInputChannelsRx = ProtocolInputChannelsRx;

    fn new(name: String, tx: InstanceChannelsTx<Instance>) -> Instance {
        Debug::InstanceCreate.log();

        Instance {
            name,
            system: Default::default(),
            config: Default::default(),
            state: None,
            tx,
        }
    }

    fn shutdown(mut self) {
        self.stop(InstanceInactiveReason::AdminDown);
    }

    fn process_config_msg(&mut self, msg: ConfigMsg) {
        config::process_config_msg(self, msg);
    }

    fn process_southbound_msg(&mut self, msg: SouthboundMsg) {
        if let Err(error) = southbound::process_southbound_msg(self, msg) {
            error.log();
        }
    }

    // Events left over from a previous run are dropped.
    fn process_protocol_msg(&mut self, msg: ProtocolInputMsg) {
        if let Some(state) = &mut self.state
            && let Err(error) = process_protocol_msg(state, msg)
        {
            error.log();
        }
    }

    fn protocol_input_channels()
    -> (ProtocolInputChannelsTx, ProtocolInputChannelsRx) {
        tasks::protocol_input_channels()
    }

    fn debug_span(name: &str) -> tracing::Span {
        tracing::debug_span!("ospf-instance", %name)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        Debug::InstanceDelete.log();
    }
}

// ===== impl InstanceState =====

impl InstanceState {
    pub(crate) fn new(
        router_id: Ipv4Addr,
        delays: DelayCfg,
        out: Output,
    ) -> InstanceState {
        InstanceState {
            router_id,
            areas: Default::default(),
            as_lsdb: Default::default(),
            routes: Default::default(),
            spf: SpfScheduler::new(delays),
            counters: Default::default(),
            out,
            maxage_sweep: None,
            started: Utc::now(),
        }
    }

    // Attached to more than one area (RFC 2328 section 3.3).
    pub fn is_abr(&self) -> bool {
        self.areas.values().filter(|area| area.is_active()).count() > 1
    }

    pub(crate) fn interface(&self, key: &IfaceKey) -> Option<&Interface> {
        self.areas
            .get(&key.area_id)
            .and_then(|area| area.interfaces.get(&key.ifname))
    }

    // Interfaces are unique by name across areas.
    pub(crate) fn find_interface(&self, ifname: &str) -> Option<IfaceKey> {
        self.areas
            .values()
            .find(|area| area.interfaces.contains_key(ifname))
            .map(|area| IfaceKey {
                area_id: area.id,
                ifname: ifname.to_owned(),
            })
    }

    pub(crate) fn iface_keys(&self) -> Vec<IfaceKey> {
        self.areas
            .values()
            .flat_map(|area| {
                area.interfaces.keys().map(|ifname| IfaceKey {
                    area_id: area.id,
                    ifname: ifname.clone(),
                })
            })
            .collect()
    }
}

// ===== helper functions =====

fn process_protocol_msg(
    state: &mut InstanceState,
    msg: ProtocolInputMsg,
) -> Result<(), Error> {
    match msg {
        ProtocolInputMsg::IsmEvent(msg) => {
            // The B bit of every Router-LSA follows the number of attached
            // areas.
            let was_abr = state.is_abr();
            interface::fsm(state, &msg.iface, msg.event)?;
            if state.is_abr() != was_abr {
                state.out.input.lsa_orig(LsaOrigEvent::AllRouterLsas);
                state.out.input.spf_delay(spf::DelayEvent::ConfigChange);
            }
            Ok(())
        }
        ProtocolInputMsg::NsmEvent(msg) => {
            neighbor::fsm(state, &msg.nbr, msg.event)
        }
        ProtocolInputMsg::HelloInterval(key) => {
            interface::send_hello(state, &key)
        }
        ProtocolInputMsg::RxmtInterval(msg) => {
            exchange::rxmt(state, &msg.nbr, msg.packet)
        }
        ProtocolInputMsg::DbDescFree(key) => exchange::dbdesc_free(state, &key),
        ProtocolInputMsg::SendLsUpdate(key) => flood::send_lsupd(state, &key),
        ProtocolInputMsg::DelayedAck(key) => {
            flood::send_delayed_ack(state, &key)
        }
        ProtocolInputMsg::LsaOrigEvent(event) => {
            lsdb::process_orig_event(state, &event)
        }
        ProtocolInputMsg::LsaOrigDelayed(msg) => {
            lsdb::process_orig_delayed(state, &msg)
        }
        ProtocolInputMsg::LsaExpiry(msg) => lsdb::process_expiry(state, &msg),
        ProtocolInputMsg::LsaRefresh(msg) => {
            lsdb::process_refresh(state, &msg)
        }
        ProtocolInputMsg::MaxAgeSweep => lsdb::maxage_sweep(state),
        ProtocolInputMsg::SpfDelay(event) => spf::delay_event(state, event),
    }
}

// Headers carrying the current age of each LSA.
fn lsdb_headers(lsdb: &Lsdb) -> Vec<LsaHdr> {
    lsdb.iter()
        .map(|entry| {
            let mut hdr = entry.lsa.hdr;
            hdr.age = entry.lsa.age();
            hdr
        })
        .collect()
}

//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::net::Ipv4Addr;

use serde::Serialize;

use crate::config::AreaCfg;
use crate::debug::LsaFlushReason;
use crate::error::Error;
use crate::instance::InstanceState;
use crate::interface::Interface;
use crate::lsdb::{self, LSA_INFINITY, Lsdb};
use crate::packet::Options;
use crate::packet::lsa::{
    LsaBody, LsaKey, LsaRouterFlags, LsaSummary, LsaTypeCode,
};
use crate::route::{PathType, Route, RouterRoute};
use crate::tasks::messages::LsdbKey;

#[derive(Debug)]
pub struct Area {
    pub id: Ipv4Addr,
    pub config: AreaCfg,
    pub interfaces: BTreeMap<String, Interface>,
    pub lsdb: Lsdb,
    // Area border and AS boundary routers reachable through the area, as
    // found by the last routing table calculation.
    pub routers: BTreeMap<Ipv4Addr, RouterRoute>,
    pub spf_run_count: u32,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct AreaSummary {
    pub area_id: Ipv4Addr,
    pub interfaces: usize,
    pub lsa_count: usize,
    pub abr_count: usize,
    pub asbr_count: usize,
    pub spf_run_count: u32,
}

// ===== impl Area =====

impl Area {
    pub(crate) fn new(id: Ipv4Addr, config: AreaCfg) -> Area {
        Area {
            id,
            config,
            interfaces: Default::default(),
            lsdb: Default::default(),
            routers: Default::default(),
            spf_run_count: 0,
        }
    }

    pub fn is_backbone(&self) -> bool {
        self.id == Ipv4Addr::UNSPECIFIED
    }

    // Attached areas are those with at least one operational interface.
    pub fn is_active(&self) -> bool {
        self.interfaces.values().any(|iface| !iface.is_down())
    }

    pub(crate) fn summary(&self) -> AreaSummary {
        let count = |flag| {
            self.routers
                .values()
                .filter(|rtr| rtr.flags.contains(flag))
                .count()
        };
        AreaSummary {
            area_id: self.id,
            interfaces: self.interfaces.len(),
            lsa_count: self.lsdb.len(),
            abr_count: count(LsaRouterFlags::B),
            asbr_count: count(LsaRouterFlags::E),
            spf_run_count: self.spf_run_count,
        }
    }
}

// ===== global functions =====

// Brings the Summary-LSAs announced into every area in line with the
// routing table (RFC 2328 section 12.4.3). Only area border routers
// announce summaries, and only into areas configured to receive them.
pub(crate) fn update_summaries(
    state: &mut InstanceState,
) -> Result<(), Error> {
    let router_id = state.router_id;
    let is_abr = state.is_abr();

    let mut plan = vec![];
    for area in state.areas.values() {
        let wanted = if is_abr && area.config.summary {
            wanted_summaries(state, area)
        } else {
            BTreeMap::new()
        };
        let summary_types = [
            LsaTypeCode::SummaryNetwork.into(),
            LsaTypeCode::SummaryRouter.into(),
        ];
        let stale = summary_types
            .into_iter()
            .flat_map(|lsa_type| area.lsdb.iter_by_type(lsa_type))
            .map(|entry| entry.lsa.hdr)
            .filter(|hdr| hdr.adv_rtr == router_id && !hdr.is_maxage())
            .map(|hdr| hdr.key())
            .filter(|key| !wanted.contains_key(key))
            .collect::<Vec<_>>();
        plan.push((area.id, wanted, stale));
    }

    for (area_id, wanted, stale) in plan {
        let lsdb_key = LsdbKey::Area(area_id);
        for key in stale {
            let reason = LsaFlushReason::PrematureAging;
            lsdb::flush(state, lsdb_key, &key, reason)?;
        }
        for (key, body) in wanted {
            let lsa_id = key.lsa_id;
            lsdb::originate_check(state, lsdb_key, Options::E, lsa_id, body)?;
        }
    }
    Ok(())
}

// ===== helper functions =====

fn wanted_summaries(
    state: &InstanceState,
    area: &Area,
) -> BTreeMap<LsaKey, LsaBody> {
    let mut wanted = BTreeMap::new();

    // Type 3: networks reachable through other areas.
    for (prefix, route) in &state.routes {
        let Some(metric) = announced_metric(area, route) else {
            continue;
        };
        let key = LsaKey::new(
            LsaTypeCode::SummaryNetwork.into(),
            state.router_id,
            prefix.network(),
        );
        let body = LsaSummary {
            mask: prefix.mask(),
            metric,
        };
        add_cheapest(&mut wanted, key, LsaBody::SummaryNetwork(body));
    }

    // Type 4: AS boundary routers inside other areas.
    let asbrs = state
        .areas
        .values()
        .filter(|other| other.id != area.id)
        .flat_map(|other| other.routers.iter())
        .filter(|(_, rtr)| rtr.path_type == PathType::IntraArea)
        .filter(|(_, rtr)| rtr.flags.contains(LsaRouterFlags::E));
    for (router_id, rtr) in asbrs {
        let key = LsaKey::new(
            LsaTypeCode::SummaryRouter.into(),
            state.router_id,
            *router_id,
        );
        let body = LsaSummary {
            mask: Ipv4Addr::UNSPECIFIED,
            metric: rtr.metric,
        };
        add_cheapest(&mut wanted, key, LsaBody::SummaryRouter(body));
    }

    wanted
}

// Intra-area routes of other areas are announced everywhere. Inter-area
// routes were learned from the backbone and only go to the other areas.
fn announced_metric(area: &Area, route: &Route) -> Option<u32> {
    if route.area_id == Some(area.id) || route.metric >= LSA_INFINITY {
        return None;
    }
    match route.path_type {
        PathType::IntraArea => Some(route.metric),
        PathType::InterArea if !area.is_backbone() => Some(route.metric),
        _ => None,
    }
}

fn add_cheapest(
    wanted: &mut BTreeMap<LsaKey, LsaBody>,
    key: LsaKey,
    body: LsaBody,
) {
    let metric = |body: &LsaBody| body.as_summary().map(|body| body.metric);
    match wanted.entry(key) {
        Entry::Vacant(entry) => {
            entry.insert(body);
        }
        Entry::Occupied(mut entry) => {
            if metric(&body) < metric(entry.get()) {
                entry.insert(body);
            }
        }
    }
}

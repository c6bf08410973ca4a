//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use ipnetwork::Ipv4Network;
use ospfd_utils::ip::Ipv4NetworkExt;
use ospfd_utils::task::TimeoutTask;
use serde::{Deserialize, Serialize};

use crate::area::{self, Area};
use crate::debug::Debug;
use crate::error::Error;
use crate::instance::InstanceState;
use crate::lsdb::{LSA_INFINITY, Lsdb};
use crate::packet::lsa::{
    Lsa, LsaAsExternalFlags, LsaBody, LsaKey, LsaRouterFlags, LsaRouterLink,
    LsaRouterLinkType, LsaTypeCode,
};
use crate::route::{self, Nexthop, PathType, Route, RouterRoute};
use crate::tasks;
use crate::tasks::ProtocolInputChannelsTx;

// States of the SPF delay algorithm (RFC 8405).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum DelayState {
    #[default]
    Quiet,
    ShortWait,
    LongWait,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum DelayEvent {
    Igp,
    DelayTimer,
    HoldDownTimer,
    LearnTimer,
    ConfigChange,
}

// Delays in milliseconds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DelayCfg {
    pub initial: u32,
    pub short: u32,
    pub long: u32,
    pub hold_down: u32,
    pub time_to_learn: u32,
}

#[derive(Debug)]
pub struct SpfScheduler {
    pub state: DelayState,
    pub delays: DelayCfg,
    pub last_event: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub run_count: u32,
    delay_timer: Option<TimeoutTask>,
    hold_down_timer: Option<TimeoutTask>,
    learn_timer: Option<TimeoutTask>,
}

// Shortest-path tree nodes. Networks are identified by the interface
// address of their DR, which is the Link State ID of their Network-LSA.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize)]
pub enum VertexId {
    Network(Ipv4Addr),
    Router(Ipv4Addr),
}

#[derive(Debug)]
pub struct Vertex {
    pub id: VertexId,
    pub lsa: Arc<Lsa>,
    pub cost: u32,
    pub nexthops: BTreeSet<Nexthop>,
    // Network reached from the root without crossing another router.
    pub attached: bool,
}

struct Candidate {
    vertex: Vertex,
    // Discovery order, for ties.
    order: usize,
}

struct Edge<'a> {
    to: VertexId,
    cost: u32,
    // Router-LSA link the edge comes from.
    link: Option<&'a LsaRouterLink>,
}

// ===== impl SpfScheduler =====

impl SpfScheduler {
    pub(crate) fn new(delays: DelayCfg) -> SpfScheduler {
        SpfScheduler {
            state: DelayState::Quiet,
            delays,
            last_event: None,
            last_run: None,
            run_count: 0,
            delay_timer: None,
            hold_down_timer: None,
            learn_timer: None,
        }
    }

    // Feeds an event to the delay state machine. Returns whether the
    // routing table should be calculated now.
    pub(crate) fn process(
        &mut self,
        tx: &ProtocolInputChannelsTx,
        event: DelayEvent,
    ) -> bool {
        use DelayEvent as E;
        use DelayState as S;

        Debug::SpfDelayEvent(self.state, event).log();
        let old_state = self.state;
        let mut run = false;
        match (self.state, event) {
            (S::Quiet, E::Igp | E::ConfigChange) => {
                self.arm_delay(tx, self.delays.initial);
                let task = tasks::spf_delay_timer(
                    tx,
                    E::LearnTimer,
                    self.delays.time_to_learn,
                );
                self.learn_timer = Some(task);
                self.restart_hold_down(tx);
                self.state = S::ShortWait;
            }
            (S::ShortWait, E::Igp | E::ConfigChange) => {
                self.restart_hold_down(tx);
                self.arm_delay(tx, self.delays.short);
            }
            (S::LongWait, E::Igp | E::ConfigChange) => {
                self.restart_hold_down(tx);
                self.arm_delay(tx, self.delays.long);
            }
            (_, E::DelayTimer) => {
                self.delay_timer = None;
                run = true;
            }
            (S::ShortWait, E::LearnTimer) => {
                self.learn_timer = None;
                self.state = S::LongWait;
            }
            (S::ShortWait | S::LongWait, E::HoldDownTimer) => {
                self.hold_down_timer = None;
                self.learn_timer = None;
                self.state = S::Quiet;
            }
            _ => (),
        }

        if matches!(event, E::Igp | E::ConfigChange) {
            self.last_event = Some(Utc::now());
        }
        if self.state != old_state {
            Debug::SpfDelayTransition(old_state, self.state).log();
        }
        run
    }

    // A pending calculation isn't postponed by further events.
    fn arm_delay(&mut self, tx: &ProtocolInputChannelsTx, delay: u32) {
        if self.delay_timer.is_none() {
            let event = DelayEvent::DelayTimer;
            let task = tasks::spf_delay_timer(tx, event, delay);
            self.delay_timer = Some(task);
        }
    }

    fn restart_hold_down(&mut self, tx: &ProtocolInputChannelsTx) {
        let task = tasks::spf_delay_timer(
            tx,
            DelayEvent::HoldDownTimer,
            self.delays.hold_down,
        );
        self.hold_down_timer = Some(task);
    }
}

// ===== global functions =====

pub(crate) fn delay_event(
    state: &mut InstanceState,
    event: DelayEvent,
) -> Result<(), Error> {
    if state.spf.process(&state.out.input, event) {
        run(state)?;
    }
    Ok(())
}

// Calculates the routing table (RFC 2328 section 16) and pushes the
// differences to the RIB.
pub(crate) fn run(state: &mut InstanceState) -> Result<(), Error> {
    let start = Instant::now();
    let router_id = state.router_id;
    let mut routes = BTreeMap::new();

    for area in state.areas.values_mut() {
        let tree = shortest_paths(area, router_id);
        let mut routers = BTreeMap::new();
        intra_area(area, router_id, &tree, &mut routes, &mut routers);
        area.routers = routers;
        area.spf_run_count += 1;
    }

    // Area border routers only look at summaries from the backbone.
    let backbone_only = state.is_abr();
    for area in state
        .areas
        .values_mut()
        .filter(|area| !backbone_only || area.is_backbone())
    {
        for (asbr, rtr) in inter_area(area, router_id, &mut routes) {
            area.routers.entry(asbr).or_insert(rtr);
        }
    }

    for (prefix, route) in external(state, &routes) {
        route::merge(&mut routes, prefix, route);
    }

    route::update_rib(&state.out.rib, &state.routes, &mut routes);
    state.routes = routes;
    state.spf.run_count += 1;
    state.spf.last_run = Some(Utc::now());
    Debug::SpfRun(start.elapsed()).log();

    area::update_summaries(state)
}

// Dijkstra over the Router-LSAs and Network-LSAs of an area, rooted at
// the calculating router (RFC 2328 section 16.1). Only links described in
// both directions are used. Among equal-cost candidates the first one
// discovered goes first.
pub(crate) fn shortest_paths(
    area: &Area,
    router_id: Ipv4Addr,
) -> BTreeMap<VertexId, Vertex> {
    let mut tree = BTreeMap::new();
    let root_id = VertexId::Router(router_id);
    let Some(root_lsa) = vertex_lsa(&area.lsdb, root_id) else {
        return tree;
    };

    let mut order = 0;
    let mut candidates = BTreeMap::new();
    let root = Vertex {
        id: root_id,
        lsa: root_lsa,
        cost: 0,
        nexthops: Default::default(),
        attached: false,
    };
    candidates.insert(root_id, Candidate { vertex: root, order });

    while let Some(id) = candidates
        .iter()
        .min_by_key(|(_, cand)| (cand.vertex.cost, cand.order))
        .map(|(id, _)| *id)
    {
        let Some(Candidate { vertex, .. }) = candidates.remove(&id) else {
            break;
        };

        for edge in edges(&vertex.lsa) {
            if tree.contains_key(&edge.to) || edge.to == vertex.id {
                continue;
            }
            let Some(lsa) = vertex_lsa(&area.lsdb, edge.to) else {
                continue;
            };
            if !links_back(&lsa, vertex.id) {
                continue;
            }
            let cost = vertex.cost.saturating_add(edge.cost);
            if cost >= LSA_INFINITY {
                continue;
            }
            let (nexthops, attached) =
                nexthops(area, root_id, &vertex, &edge, &lsa);
            if nexthops.is_empty() {
                continue;
            }

            match candidates.entry(edge.to) {
                Entry::Vacant(entry) => {
                    order += 1;
                    let vertex = Vertex {
                        id: edge.to,
                        lsa,
                        cost,
                        nexthops,
                        attached,
                    };
                    entry.insert(Candidate { vertex, order });
                }
                Entry::Occupied(mut entry) => {
                    let cand = &mut entry.get_mut().vertex;
                    if cost < cand.cost {
                        cand.cost = cost;
                        cand.nexthops = nexthops;
                        cand.attached = attached;
                    } else if cost == cand.cost {
                        cand.nexthops.extend(nexthops);
                        cand.attached |= attached;
                    }
                }
            }
        }

        tree.insert(id, vertex);
    }

    tree
}

// Networks and stub links found in the tree, plus the area border and AS
// boundary routers it reaches.
pub(crate) fn intra_area(
    area: &Area,
    router_id: Ipv4Addr,
    tree: &BTreeMap<VertexId, Vertex>,
    routes: &mut BTreeMap<Ipv4Network, Route>,
    routers: &mut BTreeMap<Ipv4Addr, RouterRoute>,
) {
    for vertex in tree.values() {
        match &vertex.lsa.body {
            LsaBody::Network(body) => {
                let hdr = &vertex.lsa.hdr;
                let Some(prefix) = Ipv4Network::from_mask(hdr.lsa_id, body.mask)
                else {
                    continue;
                };
                let mut route = Route::new(
                    Some(area.id),
                    PathType::IntraArea,
                    vertex.cost,
                    vertex.nexthops.clone(),
                );
                route.connected = vertex.attached;
                route::merge(routes, prefix, route);
            }
            LsaBody::Router(body) => {
                let root = vertex.id == VertexId::Router(router_id);
                if !root && (body.is_abr() || body.is_asbr()) {
                    let rtr = RouterRoute {
                        path_type: PathType::IntraArea,
                        metric: vertex.cost,
                        flags: body.flags,
                        nexthops: vertex.nexthops.clone(),
                    };
                    routers.insert(vertex.lsa.hdr.adv_rtr, rtr);
                }

                let stubs = body.links.iter().filter(|link| {
                    link.link_type == LsaRouterLinkType::StubNetwork
                });
                for link in stubs {
                    let Some(prefix) =
                        Ipv4Network::from_mask(link.link_id, link.link_data)
                    else {
                        continue;
                    };
                    let metric = vertex.cost + u32::from(link.metric);
                    let route = if root {
                        let mut route = Route::new(
                            Some(area.id),
                            PathType::IntraArea,
                            metric,
                            attached_nexthops(area, &prefix),
                        );
                        route.connected = true;
                        route
                    } else {
                        Route::new(
                            Some(area.id),
                            PathType::IntraArea,
                            metric,
                            vertex.nexthops.clone(),
                        )
                    };
                    route::merge(routes, prefix, route);
                }
            }
            _ => (),
        }
    }
}

// Summary-LSAs of an area (RFC 2328 section 16.2). Returns the AS
// boundary routers learned from Type 4 summaries.
pub(crate) fn inter_area(
    area: &Area,
    router_id: Ipv4Addr,
    routes: &mut BTreeMap<Ipv4Network, Route>,
) -> Vec<(Ipv4Addr, RouterRoute)> {
    let mut asbrs: BTreeMap<Ipv4Addr, RouterRoute> = BTreeMap::new();
    let summaries = [LsaTypeCode::SummaryNetwork, LsaTypeCode::SummaryRouter]
        .into_iter()
        .flat_map(|code| area.lsdb.iter_by_type(code.into()))
        .map(|entry| &entry.lsa)
        .filter(|lsa| !lsa.hdr.is_maxage() && lsa.hdr.adv_rtr != router_id);

    for lsa in summaries {
        let Some(summary) = lsa.body.as_summary() else {
            continue;
        };
        if summary.metric >= LSA_INFINITY {
            continue;
        }
        let Some(abr) = area
            .routers
            .get(&lsa.hdr.adv_rtr)
            .filter(|rtr| rtr.path_type == PathType::IntraArea)
            .filter(|rtr| rtr.flags.contains(LsaRouterFlags::B))
        else {
            continue;
        };
        let metric = abr.metric.saturating_add(summary.metric);
        if metric >= LSA_INFINITY {
            continue;
        }

        match &lsa.body {
            LsaBody::SummaryNetwork(body) => {
                let Some(prefix) =
                    Ipv4Network::from_mask(lsa.hdr.lsa_id, body.mask)
                else {
                    continue;
                };
                let route = Route::new(
                    Some(area.id),
                    PathType::InterArea,
                    metric,
                    abr.nexthops.clone(),
                );
                route::merge(routes, prefix, route);
            }
            LsaBody::SummaryRouter(_) => {
                let asbr = lsa.hdr.lsa_id;
                if asbr == router_id || area.routers.contains_key(&asbr) {
                    continue;
                }
                let rtr = RouterRoute {
                    path_type: PathType::InterArea,
                    metric,
                    flags: LsaRouterFlags::E,
                    nexthops: abr.nexthops.clone(),
                };
                match asbrs.entry(asbr) {
                    Entry::Vacant(entry) => {
                        entry.insert(rtr);
                    }
                    Entry::Occupied(mut entry) => {
                        let best = entry.get_mut();
                        if metric < best.metric {
                            *best = rtr;
                        } else if metric == best.metric {
                            best.nexthops.extend(rtr.nexthops);
                        }
                    }
                }
            }
            _ => (),
        }
    }

    asbrs.into_iter().collect()
}

// AS-external-LSAs (RFC 2328 section 16.4).
pub(crate) fn external(
    state: &InstanceState,
    routes: &BTreeMap<Ipv4Network, Route>,
) -> Vec<(Ipv4Network, Route)> {
    let mut externals = vec![];
    let lsas = state
        .as_lsdb
        .iter_by_type(LsaTypeCode::AsExternal.into())
        .map(|entry| &entry.lsa)
        .filter(|lsa| !lsa.hdr.is_maxage())
        .filter(|lsa| lsa.hdr.adv_rtr != state.router_id);

    for lsa in lsas {
        let Some(body) = lsa.body.as_as_external() else {
            continue;
        };
        if body.metric >= LSA_INFINITY {
            continue;
        }
        let Some(prefix) = Ipv4Network::from_mask(lsa.hdr.lsa_id, body.mask)
        else {
            continue;
        };

        let adv_rtr = lsa.hdr.adv_rtr;
        let Some(asbr) = state
            .areas
            .values()
            .filter_map(|area| area.routers.get(&adv_rtr))
            .filter(|rtr| rtr.flags.contains(LsaRouterFlags::E))
            .min_by_key(|rtr| (rtr.path_type, rtr.metric))
        else {
            Debug::SpfUnreachableAsbr(&prefix, adv_rtr).log();
            continue;
        };

        // Traffic goes to the forwarding address instead of the ASBR when
        // one is given.
        let (base, nexthops) = match body.fwd_addr {
            Some(fwd_addr) => {
                let Some(fwd_route) = routes
                    .iter()
                    .filter(|(prefix, _)| prefix.contains(fwd_addr))
                    .filter(|(_, route)| route.path_type <= PathType::InterArea)
                    .max_by_key(|(prefix, _)| prefix.prefix())
                    .map(|(_, route)| route)
                else {
                    continue;
                };
                let nexthops = fwd_route
                    .nexthops
                    .iter()
                    .map(|nexthop| Nexthop {
                        addr: nexthop.addr.or(Some(fwd_addr)),
                        ..nexthop.clone()
                    })
                    .collect();
                (fwd_route.metric, nexthops)
            }
            None => (asbr.metric, asbr.nexthops.clone()),
        };

        let mut route = if body.flags.contains(LsaAsExternalFlags::E) {
            let mut route =
                Route::new(None, PathType::Type2External, base, nexthops);
            route.type2_metric = Some(body.metric);
            route
        } else {
            let metric = base.saturating_add(body.metric);
            Route::new(None, PathType::Type1External, metric, nexthops)
        };
        route.tag = Some(body.tag);
        externals.push((prefix, route));
    }

    externals
}

// ===== helper functions =====

fn vertex_lsa(lsdb: &Lsdb, id: VertexId) -> Option<Arc<Lsa>> {
    let entry = match id {
        VertexId::Router(router_id) => {
            let key = LsaKey::new(
                LsaTypeCode::Router.into(),
                router_id,
                router_id,
            );
            lsdb.get(&key)
        }
        VertexId::Network(addr) => lsdb
            .iter_by_type(LsaTypeCode::Network.into())
            .filter(|entry| !entry.lsa.hdr.is_maxage())
            .find(|entry| entry.lsa.hdr.lsa_id == addr),
    };
    entry
        .map(|entry| &entry.lsa)
        .filter(|lsa| !lsa.hdr.is_maxage())
        .cloned()
}

fn edges(lsa: &Lsa) -> Vec<Edge<'_>> {
    match &lsa.body {
        LsaBody::Router(body) => body
            .links
            .iter()
            .filter_map(|link| {
                let to = match link.link_type {
                    LsaRouterLinkType::PointToPoint => {
                        VertexId::Router(link.link_id)
                    }
                    LsaRouterLinkType::TransitNetwork => {
                        VertexId::Network(link.link_id)
                    }
                    _ => return None,
                };
                Some(Edge {
                    to,
                    cost: link.metric.into(),
                    link: Some(link),
                })
            })
            .collect(),
        LsaBody::Network(body) => body
            .attached_rtrs
            .iter()
            .map(|router_id| Edge {
                to: VertexId::Router(*router_id),
                cost: 0,
                link: None,
            })
            .collect(),
        _ => vec![],
    }
}

// Whether the LSA of a vertex describes a link back to `from`.
fn links_back(lsa: &Lsa, from: VertexId) -> bool {
    match (&lsa.body, from) {
        (LsaBody::Router(body), VertexId::Router(router_id)) => {
            body.links.iter().any(|link| {
                link.link_type == LsaRouterLinkType::PointToPoint
                    && link.link_id == router_id
            })
        }
        (LsaBody::Router(body), VertexId::Network(addr)) => {
            body.links.iter().any(|link| {
                link.link_type == LsaRouterLinkType::TransitNetwork
                    && link.link_id == addr
            })
        }
        (LsaBody::Network(body), VertexId::Router(router_id)) => {
            body.attached_rtrs.contains(&router_id)
        }
        _ => false,
    }
}

// Next-hops of a vertex reached from `parent` (RFC 2328 section 16.1.1).
fn nexthops(
    area: &Area,
    root_id: VertexId,
    parent: &Vertex,
    edge: &Edge<'_>,
    lsa: &Lsa,
) -> (BTreeSet<Nexthop>, bool) {
    // Directly connected: the outgoing interface is the one whose address
    // the root announced as link data.
    if parent.id == root_id {
        let Some(link) = edge.link else {
            return Default::default();
        };
        let Some((iface, ifindex)) = area
            .interfaces
            .values()
            .filter(|iface| !iface.is_down())
            .filter(|iface| {
                iface.system.addr.map(|addr| addr.ip()) == Some(link.link_data)
            })
            .find_map(|iface| Some((iface, iface.system.ifindex?)))
        else {
            return Default::default();
        };
        let addr = match edge.to {
            VertexId::Network(_) => None,
            VertexId::Router(router_id) => {
                iface.neighbors.get(&router_id).map(|nbr| nbr.addr)
            }
        };
        let nexthop = Nexthop {
            ifname: iface.name.clone(),
            ifindex,
            addr,
        };
        let attached = matches!(edge.to, VertexId::Network(_));
        return ([nexthop].into(), attached);
    }

    // Router on a network the root is attached to: traffic goes straight
    // to its interface address on that network.
    if let (true, VertexId::Network(net_addr), LsaBody::Router(body)) =
        (parent.attached, parent.id, &lsa.body)
    {
        let Some(link) = body.links.iter().find(|link| {
            link.link_type == LsaRouterLinkType::TransitNetwork
                && link.link_id == net_addr
        }) else {
            return Default::default();
        };
        let nexthops = parent
            .nexthops
            .iter()
            .map(|nexthop| Nexthop {
                addr: Some(link.link_data),
                ..nexthop.clone()
            })
            .collect();
        return (nexthops, false);
    }

    (parent.nexthops.clone(), false)
}

// Interfaces attached to a network announced by the root.
fn attached_nexthops(area: &Area, prefix: &Ipv4Network) -> BTreeSet<Nexthop> {
    area.interfaces
        .values()
        .filter(|iface| {
            iface
                .system
                .addr
                .is_some_and(|addr| prefix.contains(addr.ip()))
        })
        .filter_map(|iface| {
            Some(Nexthop {
                ifname: iface.name.clone(),
                ifindex: iface.system.ifindex?,
                addr: None,
            })
        })
        .collect()
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use const_addrs::{ip4, net4};
    use maplit::btreeset;

    use super::*;
    use crate::config::{AreaCfg, InterfaceCfg};
    use crate::interface::{Interface, InterfaceSys, ism};
    use crate::packet::Options;
    use crate::packet::lsa::{LsaNetwork, LsaRouter};
    use crate::tasks::messages::ProtocolInputMsg;

    const RT1: Ipv4Addr = ip4!("1.1.1.1");
    const RT2: Ipv4Addr = ip4!("2.2.2.2");
    const RT3: Ipv4Addr = ip4!("3.3.3.3");
    const DR_ADDR: Ipv4Addr = ip4!("10.0.0.1");

    fn router_lsa(router_id: Ipv4Addr, links: Vec<LsaRouterLink>) -> Lsa {
        let body = LsaBody::Router(LsaRouter {
            flags: LsaRouterFlags::empty(),
            links,
        });
        Lsa::new(0, Options::E, router_id, router_id, 0x80000001, body)
    }

    fn link(
        link_type: LsaRouterLinkType,
        link_id: Ipv4Addr,
        link_data: Ipv4Addr,
        metric: u16,
    ) -> LsaRouterLink {
        LsaRouterLink::new(link_type, link_id, link_data, metric)
    }

    // RT1 (the root) and RT2 share a broadcast network where RT1 is the DR.
    // RT2 has a stub network and a point-to-point link towards RT3.
    fn area() -> Area {
        let mut area = Area::new(Ipv4Addr::UNSPECIFIED, AreaCfg::default());
        let system = InterfaceSys {
            ifindex: Some(1),
            addr: Some(net4!("10.0.0.1/24")),
            operative: true,
            ..Default::default()
        };
        let mut iface =
            Interface::new("eth0".to_owned(), InterfaceCfg::default(), system);
        iface.state.ism = ism::State::Dr;
        area.interfaces.insert("eth0".to_owned(), iface);

        let transit = LsaRouterLinkType::TransitNetwork;
        area.lsdb.insert_plain(router_lsa(
            RT1,
            vec![link(transit, DR_ADDR, DR_ADDR, 10)],
        ));
        area.lsdb.insert_plain(router_lsa(
            RT2,
            vec![
                link(transit, DR_ADDR, ip4!("10.0.0.2"), 10),
                link(
                    LsaRouterLinkType::StubNetwork,
                    ip4!("20.0.0.0"),
                    ip4!("255.255.255.0"),
                    5,
                ),
                link(LsaRouterLinkType::PointToPoint, RT3, ip4!("30.0.0.2"), 1),
            ],
        ));
        let body = LsaBody::Network(LsaNetwork {
            mask: ip4!("255.255.255.0"),
            attached_rtrs: btreeset! { RT1, RT2 },
        });
        let network = Lsa::new(0, Options::E, DR_ADDR, RT1, 0x80000001, body);
        area.lsdb.insert_plain(network);
        area
    }

    fn routes(area: &Area) -> BTreeMap<Ipv4Network, Route> {
        let tree = shortest_paths(area, RT1);
        let mut routes = BTreeMap::new();
        let mut routers = BTreeMap::new();
        intra_area(area, RT1, &tree, &mut routes, &mut routers);
        routes
    }

    fn rt3_lsa(back_to_rt2: bool) -> Lsa {
        let mut links = vec![link(
            LsaRouterLinkType::StubNetwork,
            ip4!("40.0.0.0"),
            ip4!("255.255.255.0"),
            2,
        )];
        if back_to_rt2 {
            links.push(link(
                LsaRouterLinkType::PointToPoint,
                RT2,
                ip4!("30.0.0.3"),
                1,
            ));
        }
        router_lsa(RT3, links)
    }

    #[test]
    fn routes_through_the_dr() {
        let area = area();
        let routes = routes(&area);

        let attached = &routes[&net4!("10.0.0.0/24")];
        assert!(attached.connected);
        assert_eq!(attached.metric, 10);

        let stub = &routes[&net4!("20.0.0.0/24")];
        assert!(!stub.connected);
        assert_eq!(stub.metric, 15);
        let nexthops = stub.nexthops.iter().collect::<Vec<_>>();
        assert_eq!(nexthops.len(), 1);
        assert_eq!(nexthops[0].ifindex, 1);
        assert_eq!(nexthops[0].addr, Some(ip4!("10.0.0.2")));

        for route in routes.values() {
            assert!(route.metric < LSA_INFINITY);
        }
    }

    #[test]
    fn one_way_links_are_ignored() {
        let mut area = area();
        area.lsdb.insert_plain(rt3_lsa(false));
        assert!(!routes(&area).contains_key(&net4!("40.0.0.0/24")));

        area.lsdb.insert_plain(rt3_lsa(true));
        let routes = routes(&area);
        let route = &routes[&net4!("40.0.0.0/24")];
        assert_eq!(route.metric, 13);
        let nexthop = route.nexthops.first().unwrap();
        assert_eq!(nexthop.addr, Some(ip4!("10.0.0.2")));
    }

    #[test]
    fn withdrawn_router_takes_its_networks() {
        let mut area = area();
        area.lsdb.insert_plain(rt3_lsa(true));
        assert!(routes(&area).contains_key(&net4!("20.0.0.0/24")));

        let key = LsaKey::new(LsaTypeCode::Router.into(), RT2, RT2);
        area.lsdb.remove_plain(&key);
        let routes = routes(&area);
        assert!(!routes.contains_key(&net4!("20.0.0.0/24")));
        assert!(!routes.contains_key(&net4!("40.0.0.0/24")));
        assert!(routes.contains_key(&net4!("10.0.0.0/24")));
    }

    #[test]
    fn delay_states() {
        let (tx, mut rx) = tasks::protocol_input_channels();
        let delays = DelayCfg {
            initial: 50,
            short: 200,
            long: 5000,
            hold_down: 10000,
            time_to_learn: 500,
        };
        let mut spf = SpfScheduler::new(delays);

        assert!(!spf.process(&tx, DelayEvent::Igp));
        assert_eq!(spf.state, DelayState::ShortWait);
        assert!(matches!(
            rx.try_recv(),
            Some(ProtocolInputMsg::SpfDelay(DelayEvent::DelayTimer))
        ));

        // Further events don't postpone the pending calculation.
        assert!(!spf.process(&tx, DelayEvent::Igp));
        assert!(rx.try_recv().is_none());
        assert!(spf.process(&tx, DelayEvent::DelayTimer));

        assert!(!spf.process(&tx, DelayEvent::LearnTimer));
        assert_eq!(spf.state, DelayState::LongWait);
        assert!(!spf.process(&tx, DelayEvent::HoldDownTimer));
        assert_eq!(spf.state, DelayState::Quiet);
    }
}

//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use ospfd_utils::UnboundedSender;
use ospfd_utils::protocol::Protocol;
use ospfd_utils::southbound::{
    self, OspfRouteType, RibMsg, RouteKeyMsg, RouteMsg,
};
use serde::Serialize;

use crate::debug::Debug;
use crate::packet::lsa::LsaRouterFlags;

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Nexthop {
    pub ifname: String,
    pub ifindex: u32,
    // Unset for destinations on a directly attached network.
    pub addr: Option<Ipv4Addr>,
}

// Path types in decreasing order of preference (RFC 2328 section 11).
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize)]
pub enum PathType {
    IntraArea,
    InterArea,
    Type1External,
    Type2External,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Route {
    pub area_id: Option<Ipv4Addr>,
    pub path_type: PathType,
    pub metric: u32,
    pub type2_metric: Option<u32>,
    pub tag: Option<u32>,
    pub nexthops: BTreeSet<Nexthop>,
    // Network the router is attached to. Left to the connected routes of
    // the RIB.
    pub connected: bool,
    pub installed: bool,
}

// Path to an area border router or AS boundary router.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct RouterRoute {
    pub path_type: PathType,
    pub metric: u32,
    pub flags: LsaRouterFlags,
    pub nexthops: BTreeSet<Nexthop>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct RouteSummary {
    pub prefix: Ipv4Network,
    pub area_id: Option<Ipv4Addr>,
    pub path_type: PathType,
    pub metric: u32,
    pub type2_metric: Option<u32>,
    pub nexthops: Vec<Nexthop>,
    pub installed: bool,
}

// ===== impl PathType =====

impl From<PathType> for OspfRouteType {
    fn from(path_type: PathType) -> OspfRouteType {
        match path_type {
            PathType::IntraArea => OspfRouteType::IntraArea,
            PathType::InterArea => OspfRouteType::InterArea,
            PathType::Type1External => OspfRouteType::Type1External,
            PathType::Type2External => OspfRouteType::Type2External,
        }
    }
}

// ===== impl Route =====

impl Route {
    pub(crate) fn new(
        area_id: Option<Ipv4Addr>,
        path_type: PathType,
        metric: u32,
        nexthops: BTreeSet<Nexthop>,
    ) -> Route {
        Route {
            area_id,
            path_type,
            metric,
            type2_metric: None,
            tag: None,
            nexthops,
            connected: false,
            installed: false,
        }
    }

    // Lower is better. Type 2 external paths are compared by their
    // external cost first.
    pub(crate) fn preference(&self) -> (PathType, u32, u32) {
        (self.path_type, self.type2_metric.unwrap_or(0), self.metric)
    }

    // Metric handed to the RIB.
    pub fn rib_metric(&self) -> u32 {
        self.type2_metric.unwrap_or(self.metric)
    }

    // Whether both routes would be installed the same way.
    fn same_path(&self, other: &Route) -> bool {
        self.area_id == other.area_id
            && self.path_type == other.path_type
            && self.metric == other.metric
            && self.type2_metric == other.type2_metric
            && self.tag == other.tag
            && self.nexthops == other.nexthops
            && self.connected == other.connected
    }

    pub(crate) fn summary(&self, prefix: Ipv4Network) -> RouteSummary {
        RouteSummary {
            prefix,
            area_id: self.area_id,
            path_type: self.path_type,
            metric: self.metric,
            type2_metric: self.type2_metric,
            nexthops: self.nexthops.iter().cloned().collect(),
            installed: self.installed,
        }
    }
}

// ===== global functions =====

// Adds a path to the table, keeping the preferred one. Equal paths have
// their next-hops merged.
pub(crate) fn merge(
    routes: &mut BTreeMap<Ipv4Network, Route>,
    prefix: Ipv4Network,
    route: Route,
) {
    match routes.get_mut(&prefix) {
        None => {
            routes.insert(prefix, route);
        }
        Some(old) => match route.preference().cmp(&old.preference()) {
            std::cmp::Ordering::Less => *old = route,
            std::cmp::Ordering::Equal => {
                old.nexthops.extend(route.nexthops);
                old.connected |= route.connected;
            }
            std::cmp::Ordering::Greater => (),
        },
    }
}

// Pushes the differences between the previous and the new routing table to
// the RIB.
pub(crate) fn update_rib(
    rib_tx: &UnboundedSender<RibMsg>,
    old: &BTreeMap<Ipv4Network, Route>,
    new: &mut BTreeMap<Ipv4Network, Route>,
) {
    for (prefix, route) in new.iter_mut() {
        if route.connected || route.nexthops.is_empty() {
            continue;
        }
        let unchanged = old
            .get(prefix)
            .is_some_and(|old| old.installed && old.same_path(route));
        if !unchanged {
            route_install(rib_tx, prefix, route);
        }
        route.installed = true;
    }

    for (prefix, _) in old.iter().filter(|(_, route)| route.installed) {
        if !new.get(prefix).is_some_and(|route| route.installed) {
            route_uninstall(rib_tx, prefix);
        }
    }
}

pub(crate) fn route_install(
    rib_tx: &UnboundedSender<RibMsg>,
    prefix: &Ipv4Network,
    route: &Route,
) {
    Debug::RouteInstall(prefix, route.rib_metric()).log();

    let nexthops = route
        .nexthops
        .iter()
        .map(|nexthop| match nexthop.addr {
            Some(addr) => southbound::Nexthop::Address {
                ifindex: nexthop.ifindex,
                addr,
            },
            None => southbound::Nexthop::Interface {
                ifindex: nexthop.ifindex,
            },
        })
        .collect();
    let msg = RouteMsg {
        protocol: Protocol::OSPFV2,
        area_id: route.area_id,
        prefix: *prefix,
        metric: route.rib_metric(),
        route_type: route.path_type.into(),
        tag: route.tag,
        nexthops,
    };
    let _ = rib_tx.send(RibMsg::RouteInstall(msg));
}

pub(crate) fn route_uninstall(
    rib_tx: &UnboundedSender<RibMsg>,
    prefix: &Ipv4Network,
) {
    Debug::RouteUninstall(prefix).log();

    let msg = RouteKeyMsg {
        protocol: Protocol::OSPFV2,
        prefix: *prefix,
    };
    let _ = rib_tx.send(RibMsg::RouteUninstall(msg));
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use const_addrs::{ip4, net4};
    use maplit::{btreemap, btreeset};
    use tokio::sync::mpsc;

    use super::*;

    fn via(addr: Option<Ipv4Addr>) -> BTreeSet<Nexthop> {
        btreeset! {
            Nexthop {
                ifname: "eth0".to_owned(),
                ifindex: 1,
                addr,
            }
        }
    }

    #[test]
    fn preferred_path_wins() {
        let prefix = net4!("20.0.0.0/24");
        let mut routes = BTreeMap::new();
        let nexthops = via(Some(ip4!("10.0.0.1")));
        let inter = Route::new(None, PathType::InterArea, 5, nexthops.clone());
        let intra = Route::new(None, PathType::IntraArea, 30, nexthops);
        merge(&mut routes, prefix, inter);
        merge(&mut routes, prefix, intra.clone());
        assert_eq!(routes[&prefix], intra);

        // Equal-cost paths are combined.
        let other = Route::new(
            None,
            PathType::IntraArea,
            30,
            via(Some(ip4!("10.0.0.3"))),
        );
        merge(&mut routes, prefix, other);
        assert_eq!(routes[&prefix].nexthops.len(), 2);
    }

    #[test]
    fn type2_external_compares_external_cost_first() {
        let prefix = net4!("30.0.0.0/8");
        let mut routes = BTreeMap::new();
        let nexthops = via(Some(ip4!("10.0.0.1")));
        let mut near = Route::new(None, PathType::Type2External, 1, nexthops);
        near.type2_metric = Some(20);
        let mut far = near.clone();
        far.metric = 50;
        far.type2_metric = Some(10);
        merge(&mut routes, prefix, near);
        merge(&mut routes, prefix, far.clone());
        assert_eq!(routes[&prefix], far);
        assert_eq!(routes[&prefix].rib_metric(), 10);
    }

    #[test]
    fn rib_receives_changes_only() {
        let (rib_tx, mut rib_rx) = mpsc::unbounded_channel();
        let learned = net4!("20.0.0.0/24");
        let attached = net4!("10.0.0.0/24");

        let mut connected =
            Route::new(None, PathType::IntraArea, 10, via(None));
        connected.connected = true;
        let mut table = btreemap! {
            attached => connected,
            learned => Route::new(
                None,
                PathType::IntraArea,
                20,
                via(Some(ip4!("10.0.0.1"))),
            ),
        };
        update_rib(&rib_tx, &BTreeMap::new(), &mut table);
        let Ok(RibMsg::RouteInstall(msg)) = rib_rx.try_recv() else {
            panic!("route not installed");
        };
        assert_eq!(msg.prefix, learned);
        assert!(rib_rx.try_recv().is_err());
        assert!(table[&learned].installed);
        assert!(!table[&attached].installed);

        // Nothing changed.
        let mut same = table.clone();
        update_rib(&rib_tx, &table, &mut same);
        assert!(rib_rx.try_recv().is_err());

        // The learned network is gone.
        let mut empty = BTreeMap::new();
        update_rib(&rib_tx, &same, &mut empty);
        let Ok(RibMsg::RouteUninstall(msg)) = rib_rx.try_recv() else {
            panic!("route not uninstalled");
        };
        assert_eq!(msg.prefix, learned);
        assert!(rib_rx.try_recv().is_err());
    }
}

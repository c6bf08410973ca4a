//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};

use ipnetwork::Ipv4Network;
use ospfd_utils::ip::Ipv4NetworkExt;
use ospfd_utils::protocol::Protocol;
use ospfd_utils::southbound::{
    AsicNotification, LinkStateMsg, Nexthop, RibMsg, RouteKeyMsg, RouteMsg,
};
use tracing::{debug, info};

// Minimal routing table shared by the routing protocols.
//
// Keeps one route per (prefix, protocol) and elects as active the one whose
// protocol has the best preference. Also tracks the interface addresses
// learned from the ASIC driver, so that connected routes and link state
// changes can be derived from them.
#[derive(Debug, Default)]
pub struct Rib {
    pub routes: BTreeMap<Ipv4Network, BTreeMap<Protocol, RibRoute>>,
    pub interfaces: BTreeMap<String, RibInterface>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RibRoute {
    pub protocol: Protocol,
    pub metric: u32,
    pub nexthops: BTreeSet<Nexthop>,
}

#[derive(Debug, Default)]
pub struct RibInterface {
    pub ifindex: u32,
    pub addrs: BTreeSet<Ipv4Network>,
    pub vlan_id: Option<u16>,
}

// ===== impl Rib =====

impl Rib {
    pub(crate) fn process_route_msg(&mut self, msg: RibMsg) {
        match msg {
            RibMsg::RouteInstall(msg) => self.route_install(msg),
            RibMsg::RouteUninstall(msg) => self.route_uninstall(msg),
        }
    }

    // Processes an interface notification.
    //
    // Returns the link state change the notification implies, if any.
    pub(crate) fn process_notification(
        &mut self,
        msg: &AsicNotification,
    ) -> Option<LinkStateMsg> {
        match msg {
            AsicNotification::Ipv4InterfaceCreate {
                ifname,
                ifindex,
                addr,
                ..
            } => {
                let iface = self.interfaces.entry(ifname.clone()).or_default();
                let was_up = !iface.addrs.is_empty();
                iface.ifindex = *ifindex;
                if !iface.addrs.insert(*addr) {
                    return None;
                }

                // Install connected route.
                let route = RibRoute {
                    protocol: Protocol::DIRECT,
                    metric: 0,
                    nexthops: [Nexthop::Interface { ifindex: *ifindex }]
                        .into(),
                };
                self.add(addr.apply_mask(), route);

                (!was_up).then(|| LinkStateMsg {
                    ifname: ifname.clone(),
                    operative: true,
                })
            }
            AsicNotification::Ipv4InterfaceDelete { ifname, addr } => {
                let iface = self.interfaces.get_mut(ifname)?;
                if !iface.addrs.remove(addr) {
                    return None;
                }
                let now_down = iface.addrs.is_empty();
                if now_down && iface.vlan_id.is_none() {
                    self.interfaces.remove(ifname);
                }

                // Uninstall connected route.
                self.remove(addr.apply_mask(), Protocol::DIRECT);

                now_down.then(|| LinkStateMsg {
                    ifname: ifname.clone(),
                    operative: false,
                })
            }
            AsicNotification::VlanCreate {
                vlan_id,
                ifname,
                ifindex,
                ..
            } => {
                let iface = self.interfaces.entry(ifname.clone()).or_default();
                iface.ifindex = *ifindex;
                iface.vlan_id = Some(*vlan_id);
                None
            }
            AsicNotification::VlanDelete { ifname, .. } => {
                let iface = self.interfaces.remove(ifname)?;
                for addr in &iface.addrs {
                    self.remove(addr.apply_mask(), Protocol::DIRECT);
                }

                (!iface.addrs.is_empty()).then(|| LinkStateMsg {
                    ifname: ifname.clone(),
                    operative: false,
                })
            }
        }
    }

    // Returns the active route for the given prefix.
    pub(crate) fn best(&self, prefix: &Ipv4Network) -> Option<&RibRoute> {
        self.routes
            .get(prefix)
            .and_then(|routes| routes.values().next())
    }

    fn route_install(&mut self, msg: RouteMsg) {
        let route = RibRoute {
            protocol: msg.protocol,
            metric: msg.metric,
            nexthops: msg.nexthops,
        };
        self.add(msg.prefix, route);
    }

    fn route_uninstall(&mut self, msg: RouteKeyMsg) {
        self.remove(msg.prefix, msg.protocol);
    }

    fn add(&mut self, prefix: Ipv4Network, route: RibRoute) {
        let old_best = self.best(&prefix).cloned();
        self.routes
            .entry(prefix)
            .or_default()
            .insert(route.protocol, route);
        self.log_best_change(prefix, old_best);
    }

    fn remove(&mut self, prefix: Ipv4Network, protocol: Protocol) {
        let old_best = self.best(&prefix).cloned();
        let Some(routes) = self.routes.get_mut(&prefix) else {
            return;
        };
        if routes.remove(&protocol).is_none() {
            return;
        }
        if routes.is_empty() {
            self.routes.remove(&prefix);
        }
        self.log_best_change(prefix, old_best);
    }

    fn log_best_change(&self, prefix: Ipv4Network, old: Option<RibRoute>) {
        let new = self.best(&prefix);
        if new == old.as_ref() {
            return;
        }

        match new {
            Some(route) => {
                info!(
                    %prefix,
                    protocol = %route.protocol,
                    metric = route.metric,
                    nexthops = ?route.nexthops,
                    "active route updated"
                );
            }
            None => {
                debug!(%prefix, "active route removed");
            }
        }
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use const_addrs::{ip4, net4};
    use ospfd_utils::southbound::OspfRouteType;

    use super::*;

    fn ospf_route(prefix: Ipv4Network, metric: u32) -> RibMsg {
        RibMsg::RouteInstall(RouteMsg {
            protocol: Protocol::OSPFV2,
            area_id: Some(ip4!("0.0.0.0")),
            prefix,
            metric,
            route_type: OspfRouteType::IntraArea,
            tag: None,
            nexthops: [Nexthop::Address {
                ifindex: 1,
                addr: ip4!("10.0.0.2"),
            }]
            .into(),
        })
    }

    fn iface_create(ifname: &str, addr: Ipv4Network) -> AsicNotification {
        AsicNotification::Ipv4InterfaceCreate {
            ifname: ifname.to_owned(),
            ifindex: 1,
            addr,
            mac: None,
            mtu: None,
            loopback: false,
        }
    }

    #[test]
    fn route_install_uninstall() {
        let mut rib = Rib::default();
        let prefix = net4!("20.0.0.0/24");

        rib.process_route_msg(ospf_route(prefix, 20));
        assert_eq!(rib.best(&prefix).unwrap().metric, 20);

        // Updates replace the previous route of the same protocol.
        rib.process_route_msg(ospf_route(prefix, 30));
        assert_eq!(rib.routes[&prefix].len(), 1);
        assert_eq!(rib.best(&prefix).unwrap().metric, 30);

        rib.process_route_msg(RibMsg::RouteUninstall(RouteKeyMsg {
            protocol: Protocol::OSPFV2,
            prefix,
        }));
        assert!(rib.best(&prefix).is_none());
        assert!(rib.routes.is_empty());
    }

    #[test]
    fn connected_route_preferred() {
        let mut rib = Rib::default();
        let prefix = net4!("10.0.0.0/24");

        rib.process_route_msg(ospf_route(prefix, 10));
        rib.process_notification(&iface_create("eth0", net4!("10.0.0.1/24")));

        let best = rib.best(&prefix).unwrap();
        assert_eq!(best.protocol, Protocol::DIRECT);
        assert_eq!(
            best.nexthops.iter().collect::<Vec<_>>(),
            [&Nexthop::Interface { ifindex: 1 }]
        );

        // Removing the address makes the OSPF route active again.
        rib.process_notification(&AsicNotification::Ipv4InterfaceDelete {
            ifname: "eth0".to_owned(),
            addr: net4!("10.0.0.1/24"),
        });
        assert_eq!(rib.best(&prefix).unwrap().protocol, Protocol::OSPFV2);
    }

    #[test]
    fn link_state_changes() {
        let mut rib = Rib::default();

        // First address brings the interface up.
        let create = iface_create("eth0", net4!("10.0.0.1/24"));
        let msg = rib.process_notification(&create);
        assert_eq!(
            msg,
            Some(LinkStateMsg {
                ifname: "eth0".to_owned(),
                operative: true,
            })
        );

        // Secondary addresses and duplicates don't.
        let create = iface_create("eth0", net4!("10.0.1.1/24"));
        let msg = rib.process_notification(&create);
        assert_eq!(msg, None);
        let msg = rib.process_notification(&create);
        assert_eq!(msg, None);

        let delete = AsicNotification::Ipv4InterfaceDelete {
            ifname: "eth0".to_owned(),
            addr: net4!("10.0.1.1/24"),
        };
        let msg = rib.process_notification(&delete);
        assert_eq!(msg, None);

        // Last address gone.
        let delete = AsicNotification::Ipv4InterfaceDelete {
            ifname: "eth0".to_owned(),
            addr: net4!("10.0.0.1/24"),
        };
        let msg = rib.process_notification(&delete);
        assert_eq!(
            msg,
            Some(LinkStateMsg {
                ifname: "eth0".to_owned(),
                operative: false,
            })
        );
        assert!(rib.interfaces.is_empty());
        assert!(rib.routes.is_empty());
    }

    #[test]
    fn vlan_delete() {
        let mut rib = Rib::default();

        let msg = rib.process_notification(&AsicNotification::VlanCreate {
            vlan_id: 100,
            ifname: "vlan100".to_owned(),
            ifindex: 5,
            mac: None,
            mtu: None,
        });
        assert_eq!(msg, None);
        let create = iface_create("vlan100", net4!("30.0.0.1/24"));
        rib.process_notification(&create);
        assert!(rib.best(&net4!("30.0.0.0/24")).is_some());

        let msg = rib.process_notification(&AsicNotification::VlanDelete {
            vlan_id: 100,
            ifname: "vlan100".to_owned(),
        });
        assert_eq!(
            msg,
            Some(LinkStateMsg {
                ifname: "vlan100".to_owned(),
                operative: false,
            })
        );
        assert!(rib.best(&net4!("30.0.0.0/24")).is_none());

        // Unknown interfaces are ignored.
        let msg = rib.process_notification(&AsicNotification::VlanDelete {
            vlan_id: 200,
            ifname: "vlan200".to_owned(),
        });
        assert_eq!(msg, None);
    }
}

//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use const_addrs::{ip4, net4};
use ipnetwork::Ipv4Network;
use maplit::btreemap;
use ospfd_engine::config::{ConfigMsg, InstanceCfg, InterfaceCfg};
use ospfd_engine::instance::{Instance, ProtocolInputChannelsRx};
use ospfd_engine::neighbor::nsm;
use ospfd_protocol::{InstanceChannelsTx, ProtocolInstance};
use ospfd_utils::UnboundedReceiver;
use ospfd_utils::mac_addr::MacAddr;
use ospfd_utils::southbound::{
    AsicNotification, NetRxFrameMsg, Nexthop, RibMsg, RouteMsg,
    SouthboundMsg, TxFrameMsg,
};
use tokio::sync::mpsc;

// Upper bound on the number of exchange rounds before giving up.
const MAX_ROUNDS: usize = 1000;

// Name of the interface attached to the shared segment.
const LINK_IFNAME: &str = "eth0";

const RTR1_ID: Ipv4Addr = ip4!("10.0.0.1");
const RTR2_ID: Ipv4Addr = ip4!("10.0.0.2");

// Router running in-process, with all of its output channels captured.
struct Router {
    instance: Instance,
    protocol_input_rx: ProtocolInputChannelsRx,
    net_rx: UnboundedReceiver<TxFrameMsg>,
    rib_rx: UnboundedReceiver<RibMsg>,
    rib: BTreeMap<Ipv4Network, RouteMsg>,
}

// ===== impl Router =====

impl Router {
    fn new(
        name: &str,
        router_id: Ipv4Addr,
        ifaces: &[(&str, u32, &str)],
    ) -> Router {
        let (rib_tx, rib_rx) = mpsc::unbounded_channel();
        let (net_tx, net_rx) = mpsc::unbounded_channel();
        let (protocol_input_tx, protocol_input_rx) =
            Instance::protocol_input_channels();
        let tx = InstanceChannelsTx::new(rib_tx, net_tx, protocol_input_tx);
        let mut instance = Instance::new(name.to_owned(), tx);

        let config = InstanceCfg {
            router_id: Some(router_id),
            interfaces: ifaces
                .iter()
                .map(|(ifname, _, _)| {
                    (ifname.to_string(), InterfaceCfg::default())
                })
                .collect(),
            ..Default::default()
        };
        instance.process_config_msg(ConfigMsg::Load(config));

        let router_octet = router_id.octets()[3];
        for (ifname, ifindex, addr) in ifaces {
            let addr = addr.parse::<Ipv4Network>().unwrap();
            let msg = AsicNotification::Ipv4InterfaceCreate {
                ifname: ifname.to_string(),
                ifindex: *ifindex,
                addr,
                mac: Some(MacAddr::from([
                    0x02,
                    0x00,
                    0x00,
                    0x00,
                    router_octet,
                    *ifindex as u8,
                ])),
                mtu: None,
                loopback: false,
            };
            instance.process_southbound_msg(SouthboundMsg::Asic(msg));
        }

        Router {
            instance,
            protocol_input_rx,
            net_rx,
            rib_rx,
            rib: Default::default(),
        }
    }

    // Processes all pending internal events and RIB updates.
    //
    // Returns whether anything was processed.
    fn process_events(&mut self) -> bool {
        let mut busy = false;
        while let Some(msg) = self.protocol_input_rx.try_recv() {
            self.instance.process_protocol_msg(msg);
            busy = true;
        }
        while let Ok(msg) = self.rib_rx.try_recv() {
            match msg {
                RibMsg::RouteInstall(msg) => {
                    self.rib.insert(msg.prefix, msg);
                }
                RibMsg::RouteUninstall(msg) => {
                    self.rib.remove(&msg.prefix);
                }
            }
        }
        busy
    }

    fn process_frame(&mut self, frame: TxFrameMsg) {
        let msg = NetRxFrameMsg {
            ifname: LINK_IFNAME.to_owned(),
            frame: frame.frame,
        };
        self.instance.process_southbound_msg(SouthboundMsg::NetRx(msg));
    }
}

// ===== helper functions =====

fn topology() -> [Router; 2] {
    let rtr1 = Router::new(
        "rt1",
        RTR1_ID,
        &[(LINK_IFNAME, 1, "10.0.0.1/24"), ("eth1", 2, "20.0.0.1/24")],
    );
    let rtr2 = Router::new("rt2", RTR2_ID, &[(LINK_IFNAME, 1, "10.0.0.2/24")]);
    [rtr1, rtr2]
}

// Exchanges events and frames between both routers until there's nothing
// left to process.
fn converge(routers: &mut [Router; 2]) {
    for _ in 0..MAX_ROUNDS {
        let mut busy = false;
        for router in routers.iter_mut() {
            busy |= router.process_events();
        }

        // Relay frames sent on the shared segment to the other router.
        let mut frames = vec![];
        for (idx, router) in routers.iter_mut().enumerate() {
            while let Ok(frame) = router.net_rx.try_recv() {
                frames.push((idx, frame));
            }
        }
        for (idx, frame) in frames {
            busy = true;
            if frame.ifname == LINK_IFNAME {
                routers[1 - idx].process_frame(frame);
            }
        }

        if !busy {
            return;
        }
    }

    panic!("routers failed to converge");
}

fn assert_full(routers: &[Router; 2]) {
    let [rtr1, rtr2] = routers;
    assert_eq!(rtr1.instance.neighbor_state(RTR2_ID), Some(nsm::State::Full));
    assert_eq!(rtr2.instance.neighbor_state(RTR1_ID), Some(nsm::State::Full));
}

// ===== tests =====

#[tokio::test]
async fn test_adjacency_and_routes() {
    let mut routers = topology();
    converge(&mut routers);
    assert_full(&routers);

    // The router with the higher Router ID is the master of the database
    // exchange.
    for router in &routers {
        let summary = router.instance.summary();
        assert_eq!(summary.neighbors.len(), 1);
        assert_eq!(summary.neighbors[0].master, Some(RTR2_ID));
        assert_eq!(summary.neighbors[0].ls_request_count, 0);
    }

    // Both routers share the same area LSDB.
    let [rtr1, rtr2] = &routers;
    let lsdb1 = &rtr1.instance.summary().lsdb[0].lsas;
    let lsdb2 = &rtr2.instance.summary().lsdb[0].lsas;
    assert_eq!(lsdb1.len(), lsdb2.len());
    for (a, b) in lsdb1.iter().zip(lsdb2.iter()) {
        assert_eq!(a.key(), b.key());
        assert_eq!(a.seq_no, b.seq_no);
    }

    // Stub network learned from the neighbor.
    let prefix = net4!("20.0.0.0/24");
    let route = rtr2
        .instance
        .routes()
        .into_iter()
        .find(|route| route.prefix == prefix)
        .expect("missing route");
    assert_eq!(route.metric, 20);
    assert_eq!(route.nexthops.len(), 1);
    assert_eq!(route.nexthops[0].addr, Some(RTR1_ID));
    assert!(route.installed);

    let route = rtr2.rib.get(&prefix).expect("route not installed");
    assert_eq!(route.metric, 20);
    assert_eq!(
        route.nexthops.iter().collect::<Vec<_>>(),
        [&Nexthop::Address {
            ifindex: 1,
            addr: RTR1_ID
        }]
    );

    // Connected networks aren't handed to the RIB as next-hop routes.
    assert!(rtr1.rib.get(&prefix).is_none());

    // State dump.
    let json = rtr2.instance.state_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["router_id"], "10.0.0.2");
    assert_eq!(value["active"], true);
}

#[tokio::test]
async fn test_stub_interface_removal() {
    let mut routers = topology();
    converge(&mut routers);
    assert_full(&routers);

    let prefix = net4!("20.0.0.0/24");
    assert!(routers[1].rib.contains_key(&prefix));

    routers[0]
        .instance
        .process_config_msg(ConfigMsg::InterfaceDelete {
            ifname: "eth1".to_owned(),
        });
    converge(&mut routers);

    // The adjacency is unaffected.
    assert_full(&routers);
    assert!(!routers[1].rib.contains_key(&prefix));
    assert!(
        routers[1]
            .instance
            .routes()
            .iter()
            .all(|route| route.prefix != prefix)
    );
}

#[tokio::test]
async fn test_neighbor_shutdown_flushes_routes() {
    let mut routers = topology();
    converge(&mut routers);
    assert_full(&routers);

    let prefix = net4!("20.0.0.0/24");
    assert!(routers[1].rib.contains_key(&prefix));

    // Disabling the instance flushes its self-originated LSAs, leaving the
    // other router without any Router-LSA reaching the stub network.
    routers[0]
        .instance
        .process_config_msg(ConfigMsg::Enabled(false));
    converge(&mut routers);

    assert!(routers[0].instance.state.is_none());
    assert!(!routers[1].rib.contains_key(&prefix));
    assert!(
        routers[1]
            .instance
            .routes()
            .iter()
            .all(|route| route.prefix != prefix)
    );
}

#[tokio::test]
async fn test_interface_config_map() {
    let routers = topology();
    let [rtr1, _] = &routers;

    let expected = btreemap! {
        LINK_IFNAME.to_owned() => InterfaceCfg::default(),
        "eth1".to_owned() => InterfaceCfg::default(),
    };
    assert_eq!(rtr1.instance.config.interfaces, expected);
}

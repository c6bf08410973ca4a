//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use const_addrs::ip4;
use maplit::{btreemap, btreeset};
use ospfd_engine::config::{ConfigMsg, InstanceCfg, InterfaceCfg};
use ospfd_engine::frame::{self, Destination, MulticastAddr};
use ospfd_engine::instance::{Instance, ProtocolInputChannelsRx};
use ospfd_engine::interface::{InterfaceType, ism};
use ospfd_engine::lsdb::{LSA_INIT_SEQ_NO, LSA_MAX_AGE};
use ospfd_engine::neighbor::{Neighbor, nsm};
use ospfd_engine::packet::lsa::{
    Lsa, LsaBody, LsaKey, LsaRouter, LsaRouterFlags, LsaRouterLink,
    LsaRouterLinkType, LsaTypeCode,
};
use ospfd_engine::packet::{
    DbDesc, DbDescFlags, Hello, LsAck, LsRequest, LsUpdate, Options, Packet,
    PacketHdr, PacketType,
};
use ospfd_engine::tasks::messages::ProtocolInputMsg;
use ospfd_protocol::{InstanceChannelsTx, ProtocolInstance};
use ospfd_utils::UnboundedReceiver;
use ospfd_utils::mac_addr::MacAddr;
use ospfd_utils::southbound::{
    AsicNotification, NetRxFrameMsg, RibMsg, SouthboundMsg, TxFrameMsg,
};
use tokio::sync::mpsc;

const IFNAME: &str = "eth0";
const AREA_ID: Ipv4Addr = Ipv4Addr::UNSPECIFIED;
const RTR_ID: Ipv4Addr = ip4!("10.0.0.1");

// Neighbor played by the test. Its higher Router ID makes it the master of
// the database exchange.
const PEER_ID: Ipv4Addr = ip4!("10.0.0.2");
const PEER_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x02, 0x01];

// Router reachable only through the peer.
const REMOTE_ID: Ipv4Addr = ip4!("10.0.0.3");

// Sequence number the peer starts its database exchange with.
const PEER_DD_SEQ_NO: u32 = 1000;

struct Router {
    instance: Instance,
    protocol_input_rx: ProtocolInputChannelsRx,
    net_rx: UnboundedReceiver<TxFrameMsg>,
    _rib_rx: UnboundedReceiver<RibMsg>,
}

// ===== impl Router =====

impl Router {
    // Router with a single point-to-point interface, up and running.
    fn new() -> Router {
        let config = InstanceCfg {
            router_id: Some(RTR_ID),
            interfaces: btreemap! {
                IFNAME.to_owned() => InterfaceCfg {
                    if_type: InterfaceType::PointToPoint,
                    ..Default::default()
                },
            },
            ..Default::default()
        };
        let mut router = Router::with_config(config);
        router.southbound(AsicNotification::Ipv4InterfaceCreate {
            ifname: IFNAME.to_owned(),
            ifindex: 1,
            addr: "10.0.0.1/24".parse().unwrap(),
            mac: Some(MacAddr::from([0x02, 0x00, 0x00, 0x00, 0x01, 0x01])),
            mtu: None,
            loopback: false,
        });
        router.sent_packets();
        router
    }

    fn with_config(config: InstanceCfg) -> Router {
        let (rib_tx, rib_rx) = mpsc::unbounded_channel();
        let (net_tx, net_rx) = mpsc::unbounded_channel();
        let (protocol_input_tx, protocol_input_rx) =
            Instance::protocol_input_channels();
        let tx = InstanceChannelsTx::new(rib_tx, net_tx, protocol_input_tx);
        let mut instance = Instance::new("test".to_owned(), tx);
        instance.process_config_msg(ConfigMsg::Load(config));

        let mut router = Router {
            instance,
            protocol_input_rx,
            net_rx,
            _rib_rx: rib_rx,
        };
        router.process_events();
        router
    }

    fn process_events(&mut self) {
        while let Some(msg) = self.protocol_input_rx.try_recv() {
            self.instance.process_protocol_msg(msg);
        }
    }

    fn southbound(&mut self, msg: AsicNotification) {
        self.instance.process_southbound_msg(SouthboundMsg::Asic(msg));
        self.process_events();
    }

    // Delivers a packet sent by the peer.
    fn receive(&mut self, packet: Packet) {
        let payload = packet.encode(None);
        let frame = frame::encode_frame(
            MacAddr::from(PEER_MAC),
            ip4!("10.0.0.2"),
            Destination::Multicast(MulticastAddr::AllSpfRtrs),
            &payload,
        );
        let msg = NetRxFrameMsg {
            ifname: IFNAME.to_owned(),
            frame,
        };
        self.instance.process_southbound_msg(SouthboundMsg::NetRx(msg));
        self.process_events();
    }

    // Packets sent since the last call.
    fn sent_packets(&mut self) -> Vec<Packet> {
        let mut packets = vec![];
        while let Ok(msg) = self.net_rx.try_recv() {
            let rx = frame::decode_frame(&msg.frame).unwrap();
            let mut payload = rx.payload.clone();
            packets.push(Packet::decode(&mut payload, None).unwrap());
        }
        packets
    }

    fn neighbor(&self) -> &Neighbor {
        let state = self.instance.state.as_ref().unwrap();
        &state.areas[&AREA_ID].interfaces[IFNAME].neighbors[&PEER_ID]
    }

    fn lsa(&self, key: &LsaKey) -> Option<Lsa> {
        let state = self.instance.state.as_ref().unwrap();
        let entry = state.areas[&AREA_ID].lsdb.get(key)?;
        Some(Lsa::clone(&entry.lsa))
    }

    // Hello from the peer, listing us as a neighbor when `two_way` is set.
    fn hello(&mut self, two_way: bool) {
        let neighbors = if two_way {
            btreeset! { RTR_ID }
        } else {
            btreeset! {}
        };
        self.receive(Packet::Hello(Hello {
            hdr: hdr(PacketType::Hello),
            network_mask: ip4!("255.255.255.0"),
            hello_interval: 10,
            options: Options::E,
            priority: 1,
            dead_interval: 40,
            dr: None,
            bdr: None,
            neighbors,
        }));
    }

    fn dbdesc(&mut self, dd_flags: DbDescFlags, dd_seq_no: u32) {
        self.dbdesc_with(dd_flags, dd_seq_no, vec![]);
    }

    fn dbdesc_with(
        &mut self,
        dd_flags: DbDescFlags,
        dd_seq_no: u32,
        lsas: Vec<&Lsa>,
    ) {
        self.receive(Packet::DbDesc(DbDesc {
            hdr: hdr(PacketType::DbDesc),
            mtu: 1500,
            options: Options::E,
            dd_flags,
            dd_seq_no,
            lsa_hdrs: lsas.into_iter().map(|lsa| lsa.hdr).collect(),
        }));
    }

    // Takes the neighbor from Down to Exchange, as the slave.
    fn exchange(&mut self) {
        self.hello(true);
        assert_eq!(self.neighbor().state, nsm::State::ExStart);

        let all = DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS;
        self.dbdesc(all, PEER_DD_SEQ_NO);
        assert_eq!(self.neighbor().state, nsm::State::Exchange);
        self.sent_packets();
    }
}

// ===== helper functions =====

fn hdr(pkt_type: PacketType) -> PacketHdr {
    PacketHdr::new(pkt_type, PEER_ID, AREA_ID)
}

fn remote_router_lsa(age: u16) -> Lsa {
    let body = LsaBody::Router(LsaRouter {
        flags: LsaRouterFlags::empty(),
        links: vec![LsaRouterLink::new(
            LsaRouterLinkType::StubNetwork,
            ip4!("40.0.0.0"),
            ip4!("255.255.255.0"),
            10,
        )],
    });
    Lsa::new(age, Options::E, REMOTE_ID, REMOTE_ID, LSA_INIT_SEQ_NO, body)
}

fn router_lsa_key(router_id: Ipv4Addr) -> LsaKey {
    LsaKey::new(LsaTypeCode::Router.into(), router_id, router_id)
}

fn ls_updates(packets: &[Packet]) -> Vec<&LsUpdate> {
    packets
        .iter()
        .filter_map(|packet| match packet {
            Packet::LsUpdate(lsupd) => Some(lsupd),
            _ => None,
        })
        .collect()
}

// ===== tests =====

#[tokio::test]
async fn test_packets_ignored_before_exchange() {
    let mut router = Router::new();
    router.hello(false);
    assert_eq!(router.neighbor().state, nsm::State::Init);

    let lsa = remote_router_lsa(1);
    router.receive(Packet::LsUpdate(LsUpdate {
        hdr: hdr(PacketType::LsUpdate),
        lsas: vec![lsa.clone()],
    }));
    assert!(router.lsa(&router_lsa_key(REMOTE_ID)).is_none());
    assert_eq!(router.neighbor().state, nsm::State::Init);

    router.receive(Packet::LsRequest(LsRequest {
        hdr: hdr(PacketType::LsRequest),
        entries: vec![router_lsa_key(RTR_ID)],
    }));
    router.receive(Packet::LsAck(LsAck {
        hdr: hdr(PacketType::LsAck),
        lsa_hdrs: vec![lsa.hdr],
    }));
    assert!(ls_updates(&router.sent_packets()).is_empty());
    assert_eq!(router.neighbor().state, nsm::State::Init);
}

#[tokio::test]
async fn test_ack_clears_request() {
    let mut router = Router::new();
    router.exchange();

    // The master describes an LSA we don't have and keeps going.
    let lsa = remote_router_lsa(1);
    let flags = DbDescFlags::M | DbDescFlags::MS;
    router.dbdesc_with(flags, PEER_DD_SEQ_NO + 1, vec![&lsa]);
    assert_eq!(router.neighbor().state, nsm::State::Exchange);
    assert!(router.neighbor().ls_request().get(&lsa.hdr.key()).is_some());

    router.receive(Packet::LsAck(LsAck {
        hdr: hdr(PacketType::LsAck),
        lsa_hdrs: vec![lsa.hdr],
    }));
    assert!(router.neighbor().ls_request().is_empty());
    assert_eq!(router.neighbor().state, nsm::State::Exchange);
}

#[tokio::test]
async fn test_lsreq() {
    let mut router = Router::new();
    router.exchange();

    // Our own Router-LSA is sent back.
    let key = router_lsa_key(RTR_ID);
    router.receive(Packet::LsRequest(LsRequest {
        hdr: hdr(PacketType::LsRequest),
        entries: vec![key],
    }));
    let packets = router.sent_packets();
    let answered = ls_updates(&packets)
        .iter()
        .flat_map(|lsupd| lsupd.lsas.iter())
        .any(|lsa| lsa.hdr.key() == key);
    assert!(answered);
    assert_eq!(router.neighbor().state, nsm::State::Exchange);

    // Asking for something we don't have restarts the exchange.
    router.receive(Packet::LsRequest(LsRequest {
        hdr: hdr(PacketType::LsRequest),
        entries: vec![router_lsa_key(ip4!("10.0.0.9"))],
    }));
    assert_eq!(router.neighbor().state, nsm::State::ExStart);
    let restarted = router.sent_packets().into_iter().any(|packet| {
        matches!(packet, Packet::DbDesc(dd) if dd.dd_flags.contains(
            DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS
        ))
    });
    assert!(restarted);
}

#[tokio::test]
async fn test_seq_no_mismatch() {
    let mut router = Router::new();
    router.exchange();

    // The initialize bit only belongs to the first packet.
    let flags = DbDescFlags::I | DbDescFlags::MS;
    router.dbdesc(flags, PEER_DD_SEQ_NO + 1);
    assert_eq!(router.neighbor().state, nsm::State::ExStart);

    // Negotiate again, then skip a sequence number.
    let all = DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS;
    router.dbdesc(all, 2000);
    assert_eq!(router.neighbor().state, nsm::State::Exchange);
    router.dbdesc(DbDescFlags::M | DbDescFlags::MS, 2005);
    assert_eq!(router.neighbor().state, nsm::State::ExStart);
    assert!(router.neighbor().ls_request().is_empty());
}

#[tokio::test]
async fn test_maxage_sweep() {
    let mut router = Router::new();
    router.exchange();

    // A flushed LSA arrives while the databases are being synchronized,
    // so it has to be kept around.
    let key = router_lsa_key(REMOTE_ID);
    router.receive(Packet::LsUpdate(LsUpdate {
        hdr: hdr(PacketType::LsUpdate),
        lsas: vec![remote_router_lsa(LSA_MAX_AGE)],
    }));
    assert!(router.lsa(&key).unwrap().hdr.is_maxage());
    router.instance.process_protocol_msg(ProtocolInputMsg::MaxAgeSweep);
    assert!(router.lsa(&key).is_some());

    // End of the exchange.
    router.dbdesc(DbDescFlags::MS, PEER_DD_SEQ_NO + 1);
    router.process_events();
    assert_eq!(router.neighbor().state, nsm::State::Full);

    // Still waiting for an acknowledgment.
    let lsa = router.lsa(&key).unwrap();
    router.neighbor().ls_rxmt().insert(lsa.into());
    router.instance.process_protocol_msg(ProtocolInputMsg::MaxAgeSweep);
    assert!(router.lsa(&key).is_some());

    router.neighbor().ls_rxmt().clear();
    router.instance.process_protocol_msg(ProtocolInputMsg::MaxAgeSweep);
    assert!(router.lsa(&key).is_none());
}

#[tokio::test]
async fn test_vlan_interface() {
    let ifname = "vlan10";
    let config = InstanceCfg {
        router_id: Some(RTR_ID),
        interfaces: btreemap! {
            ifname.to_owned() => InterfaceCfg::default(),
        },
        ..Default::default()
    };
    let mut router = Router::with_config(config);
    let iface_state = |router: &Router| {
        router
            .instance
            .summary()
            .interfaces
            .into_iter()
            .find(|iface| iface.name == ifname)
            .map(|iface| iface.state)
    };

    router.southbound(AsicNotification::VlanCreate {
        vlan_id: 10,
        ifname: ifname.to_owned(),
        ifindex: 10,
        mac: None,
        mtu: None,
    });
    let system = &router.instance.system.interfaces[ifname];
    assert!(system.operative);
    assert_eq!(system.vlan_id, Some(10));
    assert_eq!(system.ifindex, Some(10));
    assert_eq!(system.mtu, Some(1500));
    // No address yet.
    assert_eq!(iface_state(&router), Some(ism::State::Down));

    router.southbound(AsicNotification::Ipv4InterfaceCreate {
        ifname: ifname.to_owned(),
        ifindex: 10,
        addr: "30.0.0.1/24".parse().unwrap(),
        mac: None,
        mtu: Some(9000),
        loopback: false,
    });
    assert_ne!(iface_state(&router), Some(ism::State::Down));
    assert_eq!(router.instance.system.interfaces[ifname].mtu, Some(9000));

    // Another VLAN going away leaves the interface alone.
    router.southbound(AsicNotification::VlanDelete {
        vlan_id: 20,
        ifname: ifname.to_owned(),
    });
    assert_ne!(iface_state(&router), Some(ism::State::Down));

    router.southbound(AsicNotification::VlanDelete {
        vlan_id: 10,
        ifname: ifname.to_owned(),
    });
    assert!(!router.instance.system.interfaces.contains_key(ifname));
    assert_eq!(iface_state(&router), Some(ism::State::Down));
}

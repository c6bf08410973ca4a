//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use bytes::Bytes;
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use crate::mac_addr::MacAddr;
use crate::protocol::Protocol;

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum Nexthop {
    Address { ifindex: u32, addr: Ipv4Addr },
    Interface { ifindex: u32 },
}

// OSPF route types in decreasing order of preference.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum OspfRouteType {
    IntraArea,
    InterArea,
    Type1External,
    Type2External,
}

// ===== RIB messages (protocol -> RIB) =====

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum RibMsg {
    RouteInstall(RouteMsg),
    RouteUninstall(RouteKeyMsg),
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RouteMsg {
    pub protocol: Protocol,
    pub area_id: Option<Ipv4Addr>,
    pub prefix: Ipv4Network,
    pub metric: u32,
    pub route_type: OspfRouteType,
    pub tag: Option<u32>,
    pub nexthops: BTreeSet<Nexthop>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RouteKeyMsg {
    pub protocol: Protocol,
    pub prefix: Ipv4Network,
}

// ===== Link-layer output (protocol -> packet transport) =====

// Complete Ethernet frame ready to be written to the given interface.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct TxFrameMsg {
    pub ifname: String,
    pub ifindex: u32,
    pub frame: Bytes,
}

// ===== Southbound messages (system -> protocol) =====

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum SouthboundMsg {
    // Link state change reported by the RIB.
    LinkState(LinkStateMsg),
    // Interface/VLAN notification published by the ASIC driver.
    Asic(AsicNotification),
    // Ethernet frame captured on an OSPF-enabled interface.
    NetRx(NetRxFrameMsg),
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LinkStateMsg {
    pub ifname: String,
    pub operative: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct NetRxFrameMsg {
    pub ifname: String,
    pub frame: Bytes,
}

// JSON-encoded ASIC/driver notification.
//
// Example:
// {"type":"ipv4-interface-create","ifname":"eth0","ifindex":2,
//  "addr":"10.0.0.1/24","mac":"00:00:00:00:01:01","mtu":1500}
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AsicNotification {
    Ipv4InterfaceCreate {
        ifname: String,
        ifindex: u32,
        addr: Ipv4Network,
        #[serde(default)]
        mac: Option<MacAddr>,
        #[serde(default)]
        mtu: Option<u16>,
        #[serde(default)]
        loopback: bool,
    },
    Ipv4InterfaceDelete {
        ifname: String,
        addr: Ipv4Network,
    },
    VlanCreate {
        vlan_id: u16,
        ifname: String,
        ifindex: u32,
        #[serde(default)]
        mac: Option<MacAddr>,
        #[serde(default)]
        mtu: Option<u16>,
    },
    VlanDelete {
        vlan_id: u16,
        ifname: String,
    },
}

// ===== impl AsicNotification =====

impl AsicNotification {
    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }

    pub fn ifname(&self) -> &str {
        match self {
            AsicNotification::Ipv4InterfaceCreate { ifname, .. }
            | AsicNotification::Ipv4InterfaceDelete { ifname, .. }
            | AsicNotification::VlanCreate { ifname, .. }
            | AsicNotification::VlanDelete { ifname, .. } => ifname,
        }
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use const_addrs::ip4;

    use super::*;

    #[test]
    fn decode_interface_create() {
        let json = r#"{"type":"ipv4-interface-create","ifname":"eth0",
            "ifindex":2,"addr":"10.0.0.1/24","mac":"00:00:00:00:01:01"}"#;
        let msg = AsicNotification::from_json(json).unwrap();
        assert_eq!(
            msg,
            AsicNotification::Ipv4InterfaceCreate {
                ifname: "eth0".to_owned(),
                ifindex: 2,
                addr: Ipv4Network::new(ip4!("10.0.0.1"), 24).unwrap(),
                mac: Some(MacAddr::from([0, 0, 0, 0, 1, 1])),
                mtu: None,
                loopback: false,
            }
        );
        assert_eq!(msg.ifname(), "eth0");
    }

    #[test]
    fn decode_vlan_delete() {
        let json = r#"{"type":"vlan-delete","vlan_id":100,"ifname":"vlan100"}"#;
        let msg = AsicNotification::from_json(json).unwrap();
        assert_eq!(
            msg,
            AsicNotification::VlanDelete {
                vlan_id: 100,
                ifname: "vlan100".to_owned(),
            }
        );
    }

    #[test]
    fn decode_malformed() {
        assert!(AsicNotification::from_json(r#"{"type":"bogus"}"#).is_err());
        assert!(AsicNotification::from_json("not json").is_err());
    }
}

//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::area::Area;
use crate::debug::{InterfaceInactiveReason, LsaFlushReason};
use crate::instance::Instance;
use crate::interface::{self, Interface, InterfaceType, ism};
use crate::lsdb::{self, LsaOrigEvent};
use crate::spf::{DelayCfg, DelayEvent};
use crate::tasks::messages::{IfaceKey, LsdbKey};

// Instance configuration.
//
// SPF delays follow RFC 8405 and are expressed in milliseconds.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstanceCfg {
    pub enabled: bool,
    pub router_id: Option<Ipv4Addr>,
    pub spf_initial_delay: u32,
    pub spf_short_delay: u32,
    pub spf_long_delay: u32,
    pub spf_hold_down: u32,
    pub spf_time_to_learn: u32,
    pub areas: BTreeMap<Ipv4Addr, AreaCfg>,
    pub interfaces: BTreeMap<String, InterfaceCfg>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AreaCfg {
    // Originate summary-LSAs into this area when acting as an ABR.
    pub summary: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct InterfaceCfg {
    pub area_id: Ipv4Addr,
    pub enabled: bool,
    pub if_type: InterfaceType,
    pub priority: u8,
    pub cost: u16,
    pub hello_interval: u16,
    pub dead_interval: u32,
    pub retransmit_interval: u16,
    pub transmit_delay: u16,
    pub auth_key: Option<String>,
}

// Configuration change delivered to a running instance.
//
// Adding an existing object updates it, and updating a missing one adds it.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum ConfigMsg {
    // Replace the whole configuration.
    Load(InstanceCfg),
    RouterId(Option<Ipv4Addr>),
    Enabled(bool),
    AreaAdd { area_id: Ipv4Addr, config: AreaCfg },
    AreaUpdate { area_id: Ipv4Addr, config: AreaCfg },
    AreaDelete { area_id: Ipv4Addr },
    InterfaceAdd { ifname: String, config: InterfaceCfg },
    InterfaceUpdate { ifname: String, config: InterfaceCfg },
    InterfaceDelete { ifname: String },
}

// ===== impl InstanceCfg =====

impl Default for InstanceCfg {
    fn default() -> InstanceCfg {
        InstanceCfg {
            enabled: true,
            router_id: None,
            spf_initial_delay: 50,
            spf_short_delay: 200,
            spf_long_delay: 5000,
            spf_hold_down: 10000,
            spf_time_to_learn: 500,
            areas: Default::default(),
            interfaces: Default::default(),
        }
    }
}

impl InstanceCfg {
    pub(crate) fn spf_delays(&self) -> DelayCfg {
        DelayCfg {
            initial: self.spf_initial_delay,
            short: self.spf_short_delay,
            long: self.spf_long_delay,
            hold_down: self.spf_hold_down,
            time_to_learn: self.spf_time_to_learn,
        }
    }
}

// ===== impl AreaCfg =====

impl Default for AreaCfg {
    fn default() -> AreaCfg {
        AreaCfg { summary: true }
    }
}

// ===== impl InterfaceCfg =====

impl Default for InterfaceCfg {
    fn default() -> InterfaceCfg {
        InterfaceCfg {
            area_id: Ipv4Addr::UNSPECIFIED,
            enabled: true,
            if_type: InterfaceType::Broadcast,
            priority: 1,
            cost: 10,
            hello_interval: 10,
            dead_interval: 40,
            retransmit_interval: 5,
            transmit_delay: 1,
            auth_key: None,
        }
    }
}

// ===== global functions =====

pub(crate) fn process_config_msg(instance: &mut Instance, msg: ConfigMsg) {
    match msg {
        ConfigMsg::Load(config) => load(instance, config),
        ConfigMsg::RouterId(router_id) => router_id_set(instance, router_id),
        ConfigMsg::Enabled(enabled) => {
            instance.config.enabled = enabled;
            instance.update();
        }
        ConfigMsg::AreaAdd { area_id, config }
        | ConfigMsg::AreaUpdate { area_id, config } => {
            area_set(instance, area_id, config)
        }
        ConfigMsg::AreaDelete { area_id } => area_delete(instance, area_id),
        ConfigMsg::InterfaceAdd { ifname, config }
        | ConfigMsg::InterfaceUpdate { ifname, config } => {
            interface_set(instance, &ifname, config)
        }
        ConfigMsg::InterfaceDelete { ifname } => {
            interface_delete(instance, &ifname)
        }
    }
}

// ===== helper functions =====

fn load(instance: &mut Instance, config: InstanceCfg) {
    // New delays apply from the next scheduled calculation on.
    instance.config.spf_initial_delay = config.spf_initial_delay;
    instance.config.spf_short_delay = config.spf_short_delay;
    instance.config.spf_long_delay = config.spf_long_delay;
    instance.config.spf_hold_down = config.spf_hold_down;
    instance.config.spf_time_to_learn = config.spf_time_to_learn;
    if let Some(state) = &mut instance.state {
        state.spf.delays = instance.config.spf_delays();
    }

    let ifnames = instance
        .config
        .interfaces
        .keys()
        .filter(|ifname| !config.interfaces.contains_key(*ifname))
        .cloned()
        .collect::<Vec<_>>();
    for ifname in ifnames {
        interface_delete(instance, &ifname);
    }
    let area_ids = instance
        .config
        .areas
        .keys()
        .filter(|area_id| !config.areas.contains_key(*area_id))
        .copied()
        .collect::<Vec<_>>();
    for area_id in area_ids {
        area_delete(instance, area_id);
    }

    for (area_id, area_cfg) in config.areas {
        area_set(instance, area_id, area_cfg);
    }
    for (ifname, iface_cfg) in config.interfaces {
        interface_set(instance, &ifname, iface_cfg);
    }

    // The instance starts with its complete configuration.
    instance.config.enabled = config.enabled;
    router_id_set(instance, config.router_id);
    instance.update();
}

fn router_id_set(instance: &mut Instance, router_id: Option<Ipv4Addr>) {
    if instance.config.router_id == router_id {
        return;
    }

    // Every adjacency and self-originated LSA carries the router ID.
    instance.config.router_id = router_id;
    instance.reset();
}

fn area_set(instance: &mut Instance, area_id: Ipv4Addr, config: AreaCfg) {
    instance.config.areas.insert(area_id, config.clone());
    let Some(state) = &mut instance.state else {
        return;
    };

    match state.areas.get_mut(&area_id) {
        None => {
            state.areas.insert(area_id, Area::new(area_id, config));
        }
        Some(area) => {
            let summary_changed = area.config.summary != config.summary;
            area.config = config;

            // Summary-LSAs are settled at the end of the calculation.
            if summary_changed {
                state.out.input.spf_delay(DelayEvent::ConfigChange);
            }
        }
    }
}

fn area_delete(instance: &mut Instance, area_id: Ipv4Addr) {
    instance.config.areas.remove(&area_id);

    let ifnames = instance
        .config
        .interfaces
        .iter()
        .filter(|(_, iface_cfg)| iface_cfg.area_id == area_id)
        .map(|(ifname, _)| ifname.clone())
        .collect::<Vec<_>>();
    for ifname in ifnames {
        interface_delete(instance, &ifname);
    }

    let Some(state) = &mut instance.state else {
        return;
    };
    if state.areas.remove(&area_id).is_some() {
        state.out.input.lsa_orig(LsaOrigEvent::AllRouterLsas);
        state.out.input.spf_delay(DelayEvent::ConfigChange);
    }
}

fn interface_set(instance: &mut Instance, ifname: &str, config: InterfaceCfg) {
    let area_id = instance
        .config
        .interfaces
        .get(ifname)
        .map(|iface_cfg| iface_cfg.area_id);
    match area_id {
        Some(area_id) if area_id == config.area_id => {
            interface_update(instance, ifname, config)
        }
        // Moving to another area takes a new interface.
        Some(_) => {
            interface_delete(instance, ifname);
            interface_add(instance, ifname, config);
        }
        None => interface_add(instance, ifname, config),
    }
}

fn interface_add(instance: &mut Instance, ifname: &str, config: InterfaceCfg) {
    instance
        .config
        .interfaces
        .insert(ifname.to_owned(), config.clone());

    // Southbound data may have arrived before the configuration.
    let system = instance
        .system
        .interfaces
        .get(ifname)
        .cloned()
        .unwrap_or_default();
    let Some(state) = &mut instance.state else {
        return;
    };

    let area_id = config.area_id;
    let area_cfg = instance
        .config
        .areas
        .get(&area_id)
        .cloned()
        .unwrap_or_default();
    let area = state
        .areas
        .entry(area_id)
        .or_insert_with(|| Area::new(area_id, area_cfg));
    let iface = Interface::new(ifname.to_owned(), config, system);
    area.interfaces.insert(ifname.to_owned(), iface);

    let key = IfaceKey {
        area_id,
        ifname: ifname.to_owned(),
    };
    if let Err(error) = interface::update(state, &key) {
        error.log();
    }
}

fn interface_update(
    instance: &mut Instance,
    ifname: &str,
    config: InterfaceCfg,
) {
    instance
        .config
        .interfaces
        .insert(ifname.to_owned(), config.clone());
    let Some(state) = &mut instance.state else {
        return;
    };
    let Some(key) = state.find_interface(ifname) else {
        return;
    };
    let Some(iface) = state
        .areas
        .get_mut(&key.area_id)
        .and_then(|area| area.interfaces.get_mut(ifname))
    else {
        return;
    };

    let old = std::mem::replace(&mut iface.config, config);
    let new = &iface.config;
    // Parameters carried in Hellos. Neighbors have to start over.
    let reset = old.if_type != new.if_type
        || old.priority != new.priority
        || old.hello_interval != new.hello_interval
        || old.dead_interval != new.dead_interval
        || old.auth_key != new.auth_key;
    let cost_change = old.cost != new.cost;
    let up = !iface.is_down();

    let result = if reset && up {
        let reason = InterfaceInactiveReason::Resetting;
        interface::fsm(state, &key, ism::Event::InterfaceDown(reason))
            .and_then(|_| interface::update(state, &key))
    } else {
        interface::update(state, &key)
    };
    if let Err(error) = result {
        error.log();
    }
    if cost_change {
        let area_id = key.area_id;
        state.out.input.lsa_orig(LsaOrigEvent::RouterLsa { area_id });
    }
}

fn interface_delete(instance: &mut Instance, ifname: &str) {
    instance.config.interfaces.remove(ifname);
    let Some(state) = &mut instance.state else {
        return;
    };
    let Some(key) = state.find_interface(ifname) else {
        return;
    };

    if state.interface(&key).is_some_and(|iface| !iface.is_down()) {
        let reason = InterfaceInactiveReason::AdminDown;
        let event = ism::Event::InterfaceDown(reason);
        if let Err(error) = interface::fsm(state, &key, event) {
            error.log();
        }
    }

    // The Network-LSA can't be settled once the interface is gone.
    let network_lsa = state
        .areas
        .get_mut(&key.area_id)
        .and_then(|area| area.interfaces.remove(ifname))
        .and_then(|iface| iface.state.network_lsa);
    if let Some(lsa_key) = network_lsa {
        let lsdb_key = LsdbKey::Area(key.area_id);
        let reason = LsaFlushReason::PrematureAging;
        if let Err(error) = lsdb::flush(state, lsdb_key, &lsa_key, reason) {
            error.log();
        }
    }
}

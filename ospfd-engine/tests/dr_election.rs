//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use const_addrs::ip4;
use ospfd_engine::interface::{DrCandidate, dr_election};

fn candidate(
    router_id: Ipv4Addr,
    net_id: Ipv4Addr,
    priority: u8,
) -> DrCandidate {
    DrCandidate {
        router_id,
        net_id,
        dr: None,
        bdr: None,
        priority,
    }
}

#[test]
fn test_dr_election_alone() {
    let myself = candidate(ip4!("1.1.1.1"), ip4!("10.0.0.1"), 1);

    let (dr, bdr) = dr_election(myself, &[]);
    assert_eq!(dr, Some(ip4!("10.0.0.1")));
    assert_eq!(bdr, None);
}

#[test]
fn test_dr_election_priority_zero_never_elected() {
    let myself = candidate(ip4!("2.2.2.2"), ip4!("10.0.0.2"), 1);
    let nbrs = [
        candidate(ip4!("1.1.1.1"), ip4!("10.0.0.1"), 1),
        candidate(ip4!("3.3.3.3"), ip4!("10.0.0.3"), 0),
    ];

    let (dr, bdr) = dr_election(myself, &nbrs);
    assert_eq!(dr, Some(ip4!("10.0.0.2")));
    assert_eq!(bdr, Some(ip4!("10.0.0.1")));
}

#[test]
fn test_dr_election_all_ineligible() {
    let myself = candidate(ip4!("1.1.1.1"), ip4!("10.0.0.1"), 0);
    let nbrs = [candidate(ip4!("2.2.2.2"), ip4!("10.0.0.2"), 0)];

    assert_eq!(dr_election(myself, &nbrs), (None, None));
}

#[test]
fn test_dr_election_no_preemption() {
    // 2.2.2.2 is the established DR. A new router with a higher priority
    // shows up and only takes over the BDR role.
    let myself = DrCandidate {
        dr: Some(ip4!("10.0.0.2")),
        ..candidate(ip4!("1.1.1.1"), ip4!("10.0.0.1"), 1)
    };
    let nbrs = [
        DrCandidate {
            dr: Some(ip4!("10.0.0.2")),
            ..candidate(ip4!("2.2.2.2"), ip4!("10.0.0.2"), 1)
        },
        candidate(ip4!("9.9.9.9"), ip4!("10.0.0.9"), 200),
    ];

    let (dr, bdr) = dr_election(myself, &nbrs);
    assert_eq!(dr, Some(ip4!("10.0.0.2")));
    assert_eq!(bdr, Some(ip4!("10.0.0.9")));
}

#[test]
fn test_dr_election_router_id_tie_break() {
    let myself = candidate(ip4!("7.7.7.7"), ip4!("10.0.0.7"), 10);
    let nbrs = [
        candidate(ip4!("5.5.5.5"), ip4!("10.0.0.5"), 10),
        candidate(ip4!("6.6.6.6"), ip4!("10.0.0.6"), 10),
    ];

    let (dr, bdr) = dr_election(myself, &nbrs);
    assert_eq!(dr, Some(ip4!("10.0.0.7")));
    assert_eq!(bdr, Some(ip4!("10.0.0.6")));
}

#[test]
fn test_dr_election_deterministic() {
    let myself = candidate(ip4!("4.4.4.4"), ip4!("10.0.0.4"), 1);
    let mut nbrs = vec![
        candidate(ip4!("1.1.1.1"), ip4!("10.0.0.1"), 1),
        candidate(ip4!("2.2.2.2"), ip4!("10.0.0.2"), 5),
        candidate(ip4!("3.3.3.3"), ip4!("10.0.0.3"), 0),
        DrCandidate {
            bdr: Some(ip4!("10.0.0.8")),
            ..candidate(ip4!("8.8.8.8"), ip4!("10.0.0.8"), 1)
        },
    ];

    let expected = dr_election(myself, &nbrs);
    for _ in 0..nbrs.len() {
        nbrs.rotate_left(1);
        assert_eq!(dr_election(myself, &nbrs), expected);
    }
    nbrs.reverse();
    assert_eq!(dr_election(myself, &nbrs), expected);
}

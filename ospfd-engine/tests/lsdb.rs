//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::sync::Arc;

use const_addrs::ip4;
use ospfd_engine::lsdb::{LSA_MAX_AGE, lsa_compare};
use ospfd_engine::neighbor::LsRxmtList;
use ospfd_engine::packet::Options;
use ospfd_engine::packet::lsa::*;

//
// Helper functions.
//

fn lsa_hdr(seq_no: u32, cksum: u16, age: u16) -> LsaHdr {
    LsaHdr {
        age,
        options: Options::E,
        lsa_type: LsaTypeCode::Router.into(),
        lsa_id: ip4!("1.1.1.1"),
        adv_rtr: ip4!("1.1.1.1"),
        seq_no,
        cksum,
        length: 24,
    }
}

fn router_lsa(lsa_id: &str, seq_no: u32) -> Arc<Lsa> {
    let lsa_id = lsa_id.parse().unwrap();
    Arc::new(Lsa::new(
        1,
        Options::E,
        lsa_id,
        lsa_id,
        seq_no,
        LsaBody::Router(LsaRouter {
            flags: LsaRouterFlags::empty(),
            links: vec![],
        }),
    ))
}

//
// Tests.
//

#[test]
fn test_lsa_compare_seq_no() {
    let a = lsa_hdr(0x80000002, 0x1000, 10);
    let b = lsa_hdr(0x80000001, 0xffff, 10);
    assert_eq!(lsa_compare(&a, &b), Ordering::Greater);
    assert_eq!(lsa_compare(&b, &a), Ordering::Less);

    // Sequence numbers are compared as signed integers.
    let a = lsa_hdr(0x00000001, 0x1000, 10);
    let b = lsa_hdr(0x80000001, 0x1000, 10);
    assert_eq!(lsa_compare(&a, &b), Ordering::Greater);
}

#[test]
fn test_lsa_compare_cksum() {
    let a = lsa_hdr(0x80000001, 0x2000, 10);
    let b = lsa_hdr(0x80000001, 0x1000, 10);
    assert_eq!(lsa_compare(&a, &b), Ordering::Greater);
    assert_eq!(lsa_compare(&b, &a), Ordering::Less);
}

#[test]
fn test_lsa_compare_maxage() {
    let a = lsa_hdr(0x80000001, 0x1000, LSA_MAX_AGE);
    let b = lsa_hdr(0x80000001, 0x1000, 10);
    assert_eq!(lsa_compare(&a, &b), Ordering::Greater);
    assert_eq!(lsa_compare(&b, &a), Ordering::Less);
}

#[test]
fn test_lsa_compare_age() {
    // Ages differing by more than MaxAgeDiff: the younger one wins.
    let a = lsa_hdr(0x80000001, 0x1000, 100);
    let b = lsa_hdr(0x80000001, 0x1000, 1100);
    assert_eq!(lsa_compare(&a, &b), Ordering::Greater);
    assert_eq!(lsa_compare(&b, &a), Ordering::Less);

    // Otherwise both are considered the same instance.
    let b = lsa_hdr(0x80000001, 0x1000, 1000);
    assert_eq!(lsa_compare(&a, &b), Ordering::Equal);
    assert_eq!(lsa_compare(&b, &a), Ordering::Equal);
}

#[test]
fn test_lsa_compare_total_order() {
    let hdrs = [
        lsa_hdr(0x80000001, 0x1000, 1),
        lsa_hdr(0x80000001, 0x2000, 1),
        lsa_hdr(0x80000001, 0x2000, LSA_MAX_AGE),
        lsa_hdr(0x80000002, 0x0001, 1),
        lsa_hdr(0x80000002, 0x0001, 2000),
        lsa_hdr(0x7fffffff, 0xffff, 1),
    ];

    for a in &hdrs {
        assert_eq!(lsa_compare(a, a), Ordering::Equal);
        for b in &hdrs {
            assert_eq!(lsa_compare(a, b), lsa_compare(b, a).reverse());
            for c in &hdrs {
                if lsa_compare(a, b) == Ordering::Greater
                    && lsa_compare(b, c) == Ordering::Greater
                {
                    assert_eq!(lsa_compare(a, c), Ordering::Greater);
                }
            }
        }
    }

    // Sorting puts the most recent instance last.
    let mut sorted = hdrs.to_vec();
    sorted.sort_by(lsa_compare);
    assert_eq!(sorted.last(), Some(&hdrs[5]));
    assert_eq!(sorted.first(), Some(&hdrs[0]));
}

#[test]
fn test_rxmt_invalidate_idempotent() {
    let mut ls_rxmt = LsRxmtList::default();
    let lsa1 = router_lsa("1.1.1.1", 0x80000001);
    let lsa2 = router_lsa("2.2.2.2", 0x80000001);
    ls_rxmt.insert(lsa1.clone());
    ls_rxmt.insert(lsa2.clone());
    assert_eq!(ls_rxmt.len(), 2);

    assert!(ls_rxmt.invalidate(&lsa1.hdr));
    assert!(!ls_rxmt.invalidate(&lsa1.hdr));
    assert_eq!(ls_rxmt.len(), 1);
    assert!(!ls_rxmt.contains_key(&lsa1.hdr.key()));
    assert!(ls_rxmt.contains_key(&lsa2.hdr.key()));

    ls_rxmt.purge();
    assert!(!ls_rxmt.invalidate(&lsa1.hdr));
    assert_eq!(ls_rxmt.len(), 1);

    assert!(ls_rxmt.invalidate(&lsa2.hdr));
    assert!(ls_rxmt.is_empty());
}

#[test]
fn test_rxmt_unknown_ack_is_noop() {
    let mut ls_rxmt = LsRxmtList::default();
    let lsa = router_lsa("1.1.1.1", 0x80000002);
    ls_rxmt.insert(lsa.clone());

    // Acknowledgment for an LSA that was never sent.
    let unknown = router_lsa("9.9.9.9", 0x80000001);
    assert!(!ls_rxmt.invalidate(&unknown.hdr));

    // Acknowledgment for an older instance of the LSA.
    let older = router_lsa("1.1.1.1", 0x80000001);
    assert!(!ls_rxmt.invalidate(&older.hdr));

    assert_eq!(ls_rxmt.len(), 1);
    assert!(ls_rxmt.iter().all(|entry| Arc::ptr_eq(entry, &lsa)));
}

#[test]
fn test_rxmt_remove_older() {
    let mut ls_rxmt = LsRxmtList::default();
    let lsa = router_lsa("1.1.1.1", 0x80000001);
    ls_rxmt.insert(lsa.clone());

    // The same instance doesn't replace anything.
    assert!(!ls_rxmt.remove_older(&lsa.hdr));
    assert_eq!(ls_rxmt.len(), 1);

    let newer = router_lsa("1.1.1.1", 0x80000002);
    assert!(ls_rxmt.remove_older(&newer.hdr));
    assert!(ls_rxmt.is_empty());
}

//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::LazyLock as Lazy;

use bytes::Bytes;
use maplit::btreeset;
use ospfd_engine::packet::error::{DecodeError, LsaValidationError};
use ospfd_engine::packet::lsa::*;
use ospfd_engine::packet::*;

//
// Helper functions.
//

fn test_encode_packet(
    bytes_expected: &[u8],
    auth: Option<&SimpleAuthKey>,
    packet: &Packet,
) {
    let bytes_actual = packet.encode(auth);
    assert_eq!(bytes_expected, bytes_actual.as_ref());
}

fn test_decode_packet(
    bytes: &[u8],
    auth: Option<&SimpleAuthKey>,
    packet_expected: &Packet,
) {
    let mut buf = Bytes::copy_from_slice(bytes);
    let packet_actual = Packet::decode(&mut buf, auth).unwrap();
    assert_eq!(*packet_expected, packet_actual);
}

fn test_encode_lsa(bytes_expected: &[u8], lsa: &Lsa) {
    assert_eq!(bytes_expected, lsa.raw.as_ref());
}

fn test_decode_lsa(bytes: &[u8], lsa_expected: &Lsa) {
    let mut bytes = Bytes::copy_from_slice(bytes);
    let lsa_actual = Lsa::decode(&mut bytes).unwrap();
    assert_eq!(*lsa_expected, lsa_actual);
}

fn addr(s: &str) -> Ipv4Addr {
    Ipv4Addr::from_str(s).unwrap()
}

//
// Test packets.
//

static HELLO1: Lazy<(Vec<u8>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x01, 0x00, 0x30, 0x02, 0x02, 0x02, 0x02, 0x00, 0x00, 0x00,
            0x01, 0xf6, 0x9e, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0xff, 0xff, 0xff, 0x00, 0x00, 0x03, 0x02, 0x01, 0x00,
            0x00, 0x00, 0x24, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x01, 0x01, 0x01, 0x01,
        ],
        Packet::Hello(Hello {
            hdr: PacketHdr {
                pkt_type: PacketType::Hello,
                router_id: addr("2.2.2.2"),
                area_id: addr("0.0.0.1"),
            },
            network_mask: addr("255.255.255.0"),
            hello_interval: 3,
            options: Options::E,
            priority: 1,
            dead_interval: 36,
            dr: None,
            bdr: None,
            neighbors: btreeset![addr("1.1.1.1")],
        }),
    )
});

static DBDESC1: Lazy<(Vec<u8>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x02, 0x00, 0x48, 0x01, 0x01, 0x01, 0x01, 0x00, 0x00, 0x00,
            0x01, 0xd8, 0x9e, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x05, 0xdc, 0x42, 0x00, 0x4e, 0xb8, 0x8f, 0x2e, 0x00,
            0x03, 0x02, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
            0x80, 0x00, 0x00, 0x02, 0x48, 0xd6, 0x00, 0x30, 0x00, 0x03, 0x02,
            0x05, 0xac, 0x10, 0x01, 0x00, 0x01, 0x01, 0x01, 0x01, 0x80, 0x00,
            0x00, 0x01, 0xfc, 0xff, 0x00, 0x24,
        ],
        Packet::DbDesc(DbDesc {
            hdr: PacketHdr {
                pkt_type: PacketType::DbDesc,
                router_id: addr("1.1.1.1"),
                area_id: addr("0.0.0.1"),
            },
            mtu: 1500,
            options: Options::E | Options::O,
            dd_flags: DbDescFlags::empty(),
            dd_seq_no: 1320718126,
            lsa_hdrs: vec![
                LsaHdr {
                    age: 3,
                    options: Options::E,
                    lsa_type: LsaTypeCode::Router.into(),
                    lsa_id: addr("1.1.1.1"),
                    adv_rtr: addr("1.1.1.1"),
                    seq_no: 0x80000002,
                    cksum: 0x48d6,
                    length: 48,
                },
                LsaHdr {
                    age: 3,
                    options: Options::E,
                    lsa_type: LsaTypeCode::AsExternal.into(),
                    lsa_id: addr("172.16.1.0"),
                    adv_rtr: addr("1.1.1.1"),
                    seq_no: 0x80000001,
                    cksum: 0xfcff,
                    length: 36,
                },
            ],
        }),
    )
});

static LSREQUEST1: Lazy<(Vec<u8>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x03, 0x00, 0x30, 0x02, 0x02, 0x02, 0x02, 0x00, 0x00, 0x00,
            0x01, 0x46, 0xab, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
            0x01, 0x01, 0x01, 0x00, 0x00, 0x00, 0x05, 0xac, 0x10, 0x01, 0x00,
            0x01, 0x01, 0x01, 0x01,
        ],
        Packet::LsRequest(LsRequest {
            hdr: PacketHdr {
                pkt_type: PacketType::LsRequest,
                router_id: addr("2.2.2.2"),
                area_id: addr("0.0.0.1"),
            },
            entries: vec![
                LsaKey {
                    lsa_type: LsaTypeCode::Router.into(),
                    adv_rtr: addr("1.1.1.1"),
                    lsa_id: addr("1.1.1.1"),
                },
                LsaKey {
                    lsa_type: LsaTypeCode::AsExternal.into(),
                    adv_rtr: addr("1.1.1.1"),
                    lsa_id: addr("172.16.1.0"),
                },
            ],
        }),
    )
});

static LSACK1: Lazy<(Vec<u8>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x05, 0x00, 0x54, 0x01, 0x01, 0x01, 0x01, 0x00, 0x00, 0x00,
            0x01, 0xa0, 0x2e, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x01, 0x02, 0x03, 0x03, 0x03, 0x03, 0x03, 0x02,
            0x02, 0x02, 0x02, 0x80, 0x00, 0x00, 0x01, 0x09, 0x36, 0x00, 0x1c,
            0x00, 0x01, 0x02, 0x03, 0x0a, 0x00, 0x03, 0x00, 0x02, 0x02, 0x02,
            0x02, 0x80, 0x00, 0x00, 0x01, 0x54, 0xdf, 0x00, 0x1c, 0x00, 0x01,
            0x02, 0x03, 0x0a, 0x00, 0x04, 0x00, 0x02, 0x02, 0x02, 0x02, 0x80,
            0x00, 0x00, 0x01, 0x49, 0xe9, 0x00, 0x1c,
        ],
        Packet::LsAck(LsAck {
            hdr: PacketHdr {
                pkt_type: PacketType::LsAck,
                router_id: addr("1.1.1.1"),
                area_id: addr("0.0.0.1"),
            },
            lsa_hdrs: ["3.3.3.3", "10.0.3.0", "10.0.4.0"]
                .into_iter()
                .zip([0x0936, 0x54df, 0x49e9])
                .map(|(lsa_id, cksum)| LsaHdr {
                    age: 1,
                    options: Options::E,
                    lsa_type: LsaTypeCode::SummaryNetwork.into(),
                    lsa_id: addr(lsa_id),
                    adv_rtr: addr("2.2.2.2"),
                    seq_no: 0x80000001,
                    cksum,
                    length: 28,
                })
                .collect(),
        }),
    )
});

//
// Test LSAs.
//

static LSA1: Lazy<(Vec<u8>, Lsa)> = Lazy::new(|| {
    (
        vec![
            0x00, 0x31, 0x02, 0x01, 0x02, 0x02, 0x02, 0x02, 0x02, 0x02, 0x02,
            0x02, 0x80, 0x00, 0x00, 0x02, 0x37, 0xf4, 0x00, 0x24, 0x01, 0x00,
            0x00, 0x01, 0x0a, 0x00, 0x01, 0x00, 0xff, 0xff, 0xff, 0x00, 0x03,
            0x00, 0x00, 0x0a,
        ],
        Lsa::new(
            49,
            Options::E,
            addr("2.2.2.2"),
            addr("2.2.2.2"),
            0x80000002,
            LsaBody::Router(LsaRouter {
                flags: LsaRouterFlags::B,
                links: vec![LsaRouterLink {
                    link_type: LsaRouterLinkType::StubNetwork,
                    link_id: addr("10.0.1.0"),
                    link_data: addr("255.255.255.0"),
                    metric: 10,
                }],
            }),
        ),
    )
});

//
// Tests.
//

#[test]
fn test_encode_hello1() {
    let (ref bytes, ref hello) = *HELLO1;
    test_encode_packet(bytes, None, hello);
}

#[test]
fn test_decode_hello1() {
    let (ref bytes, ref hello) = *HELLO1;
    test_decode_packet(bytes, None, hello);
}

#[test]
fn test_encode_dbdesc1() {
    let (ref bytes, ref dbdesc) = *DBDESC1;
    test_encode_packet(bytes, None, dbdesc);
}

#[test]
fn test_decode_dbdesc1() {
    let (ref bytes, ref dbdesc) = *DBDESC1;
    test_decode_packet(bytes, None, dbdesc);
}

#[test]
fn test_encode_lsrequest1() {
    let (ref bytes, ref request) = *LSREQUEST1;
    test_encode_packet(bytes, None, request);
}

#[test]
fn test_decode_lsrequest1() {
    let (ref bytes, ref request) = *LSREQUEST1;
    test_decode_packet(bytes, None, request);
}

#[test]
fn test_encode_lsack1() {
    let (ref bytes, ref ack) = *LSACK1;
    test_encode_packet(bytes, None, ack);
}

#[test]
fn test_decode_lsack1() {
    let (ref bytes, ref ack) = *LSACK1;
    test_decode_packet(bytes, None, ack);
}

#[test]
fn test_encode_lsa1() {
    let (ref bytes, ref lsa) = *LSA1;
    test_encode_lsa(bytes, lsa);
}

#[test]
fn test_decode_lsa1() {
    let (ref bytes, ref lsa) = *LSA1;
    test_decode_lsa(bytes, lsa);
}

#[test]
fn test_lsupdate_carries_raw_lsa() {
    let (ref lsa_bytes, ref lsa) = *LSA1;
    let packet = Packet::LsUpdate(LsUpdate {
        hdr: PacketHdr::new(
            PacketType::LsUpdate,
            addr("2.2.2.2"),
            addr("0.0.0.1"),
        ),
        lsas: vec![lsa.clone()],
    });

    let bytes = packet.encode(None);
    assert_eq!(bytes.len(), 24 + 4 + lsa_bytes.len());
    assert_eq!(&bytes[28..], lsa_bytes.as_slice());
    test_decode_packet(&bytes, None, &packet);
}

#[test]
fn test_decode_short_buffer() {
    let (ref bytes, _) = *DBDESC1;

    // Shorter than the packet header.
    let mut buf = Bytes::copy_from_slice(&bytes[..10]);
    assert_eq!(
        Packet::decode(&mut buf, None),
        Err(DecodeError::InvalidLength(10))
    );

    // Truncated before the length announced in the header.
    let mut buf = Bytes::copy_from_slice(&bytes[..bytes.len() - 4]);
    assert_eq!(
        Packet::decode(&mut buf, None),
        Err(DecodeError::InvalidLength(0x48))
    );
}

#[test]
fn test_decode_bad_checksum() {
    let (ref bytes, _) = *HELLO1;
    let mut bytes = bytes.clone();
    bytes[30] = 0x00;

    let mut buf = Bytes::from(bytes);
    assert_eq!(
        Packet::decode(&mut buf, None),
        Err(DecodeError::InvalidChecksum)
    );
}

#[test]
fn test_simple_auth() {
    let (_, ref hello) = *HELLO1;
    let key = SimpleAuthKey::new("holo");
    let bytes = hello.encode(Some(&key));

    // The password travels in clear text.
    assert_eq!(&bytes[14..16], &[0x00, 0x01]);
    assert_eq!(&bytes[16..24], b"holo\0\0\0\0");

    test_decode_packet(&bytes, Some(&key), hello);

    let mut buf = bytes.clone();
    assert_eq!(
        Packet::decode(&mut buf, None),
        Err(DecodeError::AuthTypeMismatch)
    );

    let mut buf = bytes.clone();
    let wrong_key = SimpleAuthKey::new("other");
    assert_eq!(
        Packet::decode(&mut buf, Some(&wrong_key)),
        Err(DecodeError::AuthError)
    );
}

#[test]
fn test_lsa_validate() {
    let (ref bytes, ref lsa) = *LSA1;
    assert_eq!(lsa.validate(), Ok(()));

    // Corrupted body.
    let mut corrupted = bytes.clone();
    corrupted[35] = 0x0b;
    let mut buf = Bytes::from(corrupted);
    let lsa_bad = Lsa::decode(&mut buf).unwrap();
    assert_eq!(lsa_bad.validate(), Err(LsaValidationError::BadChecksum));

    // Reserved sequence number.
    let lsa_bad = Lsa::new(
        1,
        Options::E,
        addr("2.2.2.2"),
        addr("2.2.2.2"),
        0x80000000,
        lsa.body.clone(),
    );
    assert_eq!(lsa_bad.validate(), Err(LsaValidationError::ReservedSeqNo));

    // Router-LSA whose LSA-ID doesn't match the advertising router.
    let lsa_bad = Lsa::new(
        1,
        Options::E,
        addr("3.3.3.3"),
        addr("2.2.2.2"),
        0x80000001,
        lsa.body.clone(),
    );
    assert_eq!(
        lsa_bad.validate(),
        Err(LsaValidationError::RouterIdMismatch)
    );
}

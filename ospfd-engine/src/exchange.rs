//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;

use crate::debug::{Debug, SeqNoMismatchReason};
use crate::error::Error;
use crate::frame;
use crate::instance::InstanceState;
use crate::interface::Link;
use crate::lsdb;
use crate::neighbor::{self, NbrView, Neighbor, nsm};
use crate::packet::lsa::LsaHdr;
use crate::packet::{
    DbDesc, DbDescFlags, LsRequest, Options, Packet, PacketHdr, PacketType,
};
use crate::tasks;
use crate::tasks::messages::{NbrKey, RxmtPacket};

// Interface MTU, DD flags and sequence number.
const DD_FIXED_LEN: usize = 8;

// ===== global functions =====

// Claims mastership and sends the first, empty, DD packet of an exchange.
pub(crate) fn start(link: &Link<'_>, nbr: &mut Neighbor) {
    nbr.dd_seq_no = nbr.dd_seq_no.wrapping_add(1);
    nbr.dd_flags = DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS;
    nbr.local_master = true;
    send_dbdesc(link, nbr);
    nbr.rxmt_start(link, RxmtPacket::DbDesc);
}

// Sends the next DD packet, filled with as many headers from the summary
// list as the MTU allows.
pub(crate) fn send_dbdesc(link: &Link<'_>, nbr: &mut Neighbor) {
    let mut lsa_hdrs = vec![];
    if !nbr.dd_flags.contains(DbDescFlags::I) {
        let room = usize::from(link.mtu()).saturating_sub(
            frame::IP_LEN + usize::from(PacketHdr::LENGTH) + DD_FIXED_LEN,
        ) / usize::from(LsaHdr::LENGTH);
        while lsa_hdrs.len() < room {
            let Some((_, hdr)) = nbr.db_summary.pop_first() else {
                break;
            };
            lsa_hdrs.push(hdr);
        }
        if nbr.db_summary.is_empty() {
            nbr.dd_flags.remove(DbDescFlags::M);
        }
    }

    let packet = Packet::DbDesc(DbDesc {
        hdr: link.packet_hdr(PacketType::DbDesc),
        mtu: link.mtu(),
        options: Options::E,
        dd_flags: nbr.dd_flags,
        dd_seq_no: nbr.dd_seq_no,
        lsa_hdrs,
    });
    link.send(link.unicast(nbr), &packet);
    nbr.last_sent_dd = Some(packet);
}

// RFC 2328 section 10.6.
pub(crate) fn process_dbdesc(
    state: &mut InstanceState,
    key: &NbrKey,
    dd: &DbDesc,
) -> Result<(), Error> {
    if neighbor::view(state, key)?.nbr.state == nsm::State::Init {
        neighbor::fsm(state, key, nsm::Event::TwoWayRcvd)?;
    }

    let view = neighbor::view(state, key)?;
    let (link, nbr) = (view.link, &mut *view.nbr);
    if dd.mtu > link.mtu() {
        return Err(Error::DbDescMtuMismatch(nbr.router_id, dd.mtu));
    }

    let outcome = match nbr.state {
        nsm::State::Down | nsm::State::Attempt => {
            return Err(Error::DbDescReject(nbr.router_id, nbr.state));
        }
        nsm::State::Init | nsm::State::TwoWay => return Ok(()),
        nsm::State::ExStart => {
            if !negotiate(&link, nbr, dd) {
                return Ok(());
            }
            neighbor::fsm(state, key, nsm::Event::NegotiationDone)?;
            let view = neighbor::view(state, key)?;
            accept(view, dd)
        }
        nsm::State::Exchange => {
            if nbr.dd_is_dup(dd) {
                resend_dup(&link, nbr);
                return Ok(());
            }
            match sequence_check(nbr, dd) {
                Some(reason) => Err(reason),
                None => accept(view, dd),
            }
        }
        nsm::State::Loading | nsm::State::Full => {
            if nbr.dd_is_dup(dd) {
                resend_dup(&link, nbr);
                return Ok(());
            }
            Err(SeqNoMismatchReason::UnexpectedDbDesc)
        }
    };

    match outcome {
        Ok(false) => Ok(()),
        Ok(true) => {
            let view = neighbor::view(state, key)?;
            if !view.nbr.local_master {
                // Keep the last packet around in case the master
                // retransmits.
                let task = tasks::dbdesc_free_timer(
                    &view.link.out.input,
                    key,
                    view.link.config.dead_interval,
                );
                view.nbr.tasks.dd_free = Some(task);
            }
            view.nbr.tasks.dd_rxmt = None;
            neighbor::fsm(state, key, nsm::Event::ExchangeDone)
        }
        Err(reason) => {
            Debug::SeqNoMismatch(key.router_id, reason).log();
            neighbor::fsm(state, key, nsm::Event::SeqNoMismatch)
        }
    }
}

pub(crate) fn send_lsreq(link: &Link<'_>, nbr: &mut Neighbor) {
    let room = usize::from(link.mtu())
        .saturating_sub(frame::IP_LEN + usize::from(PacketHdr::LENGTH))
        / LsRequest::ENTRY_LENGTH;
    let entries = nbr.ls_request().next_batch(room);
    if entries.is_empty() {
        return;
    }

    let packet = Packet::LsRequest(LsRequest {
        hdr: link.packet_hdr(PacketType::LsRequest),
        entries,
    });
    link.send(link.unicast(nbr), &packet);
    nbr.rxmt_start(link, RxmtPacket::LsRequest);
}

// Retransmits the last DD packet or LS Request.
pub(crate) fn rxmt(
    state: &mut InstanceState,
    key: &NbrKey,
    packet: RxmtPacket,
) -> Result<(), Error> {
    let view = neighbor::view(state, key)?;
    let (link, nbr) = (view.link, view.nbr);
    match packet {
        RxmtPacket::DbDesc => {
            let active = matches!(
                nbr.state,
                nsm::State::ExStart | nsm::State::Exchange
            );
            if let Some(packet) = nbr.last_sent_dd.as_ref().filter(|_| active)
            {
                link.send(link.unicast(nbr), packet);
            }
        }
        RxmtPacket::LsRequest => {
            let entries = nbr.ls_request().outstanding();
            if !entries.is_empty() {
                let packet = Packet::LsRequest(LsRequest {
                    hdr: link.packet_hdr(PacketType::LsRequest),
                    entries,
                });
                link.send(link.unicast(nbr), &packet);
            }
        }
        RxmtPacket::LsUpdate => crate::flood::rxmt_lsupd(&link, nbr),
    }
    Ok(())
}

// The master won't retransmit its last DD packet anymore.
pub(crate) fn dbdesc_free(
    state: &mut InstanceState,
    key: &NbrKey,
) -> Result<(), Error> {
    let view = neighbor::view(state, key)?;
    view.nbr.last_sent_dd = None;
    view.nbr.tasks.dd_free = None;
    Ok(())
}

// ===== helper functions =====

// Decides who is the master. Returns false if the packet doesn't settle
// the negotiation.
fn negotiate(link: &Link<'_>, nbr: &mut Neighbor, dd: &DbDesc) -> bool {
    let all = DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS;
    if dd.dd_flags.contains(all)
        && dd.lsa_hdrs.is_empty()
        && nbr.router_id > link.router_id
    {
        // We're the slave and adopt the master's sequence number.
        nbr.local_master = false;
        nbr.dd_seq_no = dd.dd_seq_no;
        nbr.dd_flags.remove(DbDescFlags::MS);
        nbr.tasks.dd_rxmt = None;
    } else if !dd.dd_flags.intersects(DbDescFlags::I | DbDescFlags::MS)
        && dd.dd_seq_no == nbr.dd_seq_no
        && nbr.router_id < link.router_id
    {
        nbr.local_master = true;
    } else {
        return false;
    }

    nbr.dd_flags.remove(DbDescFlags::I);
    nbr.options = dd.options;
    true
}

fn sequence_check(nbr: &Neighbor, dd: &DbDesc) -> Option<SeqNoMismatchReason> {
    let expected = if nbr.local_master {
        nbr.dd_seq_no
    } else {
        nbr.dd_seq_no.wrapping_add(1)
    };
    let options_changed = nbr
        .last_rcvd_dd
        .is_some_and(|last| last.options != dd.options);

    if dd.dd_flags.contains(DbDescFlags::MS) == nbr.local_master
        || dd.dd_flags.contains(DbDescFlags::I)
    {
        Some(SeqNoMismatchReason::InconsistentFlags)
    } else if options_changed {
        Some(SeqNoMismatchReason::InconsistentOptions)
    } else if dd.dd_seq_no != expected {
        Some(SeqNoMismatchReason::InconsistentSeqNo)
    } else {
        None
    }
}

// The master drops duplicates while the slave answers them again.
fn resend_dup(link: &Link<'_>, nbr: &Neighbor) {
    if nbr.local_master {
        return;
    }
    if let Some(packet) = &nbr.last_sent_dd {
        link.send(link.unicast(nbr), packet);
    }
}

// Processes a DD packet that is next in sequence. Returns whether both
// sides are done describing their databases.
fn accept(
    view: NbrView<'_>,
    dd: &DbDesc,
) -> Result<bool, SeqNoMismatchReason> {
    for hdr in &dd.lsa_hdrs {
        let Some(scope) = hdr.lsa_type.scope() else {
            return Err(SeqNoMismatchReason::InvalidLsaType);
        };
        let newer = match view.lsdb(scope).get(&hdr.key()) {
            Some(entry) => {
                lsdb::lsa_compare(hdr, &entry.lsa.hdr) == Ordering::Greater
            }
            None => true,
        };
        if newer {
            view.nbr.ls_request().insert(*hdr);
        }
    }

    let (link, nbr) = (view.link, view.nbr);
    nbr.last_rcvd_dd = Some(dd.into());
    let more = dd.dd_flags.contains(DbDescFlags::M);
    let done = if nbr.local_master {
        // The slave acknowledged our last packet.
        nbr.dd_seq_no = nbr.dd_seq_no.wrapping_add(1);
        let done = !more && !nbr.dd_flags.contains(DbDescFlags::M);
        if !done {
            send_dbdesc(&link, nbr);
            nbr.rxmt_start(&link, RxmtPacket::DbDesc);
        }
        done
    } else {
        nbr.dd_seq_no = dd.dd_seq_no;
        send_dbdesc(&link, nbr);
        !more && !nbr.dd_flags.contains(DbDescFlags::M)
    };

    // Requests may go out while the exchange is still in progress.
    if !nbr.ls_request().awaiting_reply() {
        send_lsreq(&link, nbr);
    }

    Ok(done)
}

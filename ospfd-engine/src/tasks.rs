//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use ospfd_protocol::MessageReceiver;
use ospfd_utils::task::{IntervalTask, TimeoutTask};
use ospfd_utils::{UnboundedReceiver, UnboundedSender};
use tokio::sync::mpsc;

use crate::interface::ism;
use crate::lsdb::LsaOrigEvent;
use crate::neighbor::{LsRxmtList, nsm};
use crate::spf;
use crate::tasks::messages::*;

// Time given to other LSAs to join a pending LS Update.
const LS_UPDATE_DELAY: Duration = Duration::from_millis(100);
// Acknowledgments are bundled for at most this long.
const DELAYED_ACK_DELAY: Duration = Duration::from_secs(1);
const MAXAGE_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

// Every event the dispatcher consumes, besides configuration and southbound
// input. Objects are referred to by key and looked up again when the event
// is processed, since they might be gone by then.
pub mod messages {
    use std::net::Ipv4Addr;

    use serde::{Deserialize, Serialize};

    use crate::interface::ism;
    use crate::lsdb::LsaOrigEvent;
    use crate::neighbor::nsm;
    use crate::packet::lsa::LsaKey;
    use crate::spf;

    #[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    pub struct IfaceKey {
        pub area_id: Ipv4Addr,
        pub ifname: String,
    }

    #[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    pub struct NbrKey {
        pub area_id: Ipv4Addr,
        pub ifname: String,
        pub router_id: Ipv4Addr,
    }

    // Flooding scope of an LSDB.
    #[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    pub enum LsdbKey {
        Area(Ipv4Addr),
        As,
    }

    #[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
    pub enum RxmtPacket {
        DbDesc,
        LsRequest,
        LsUpdate,
    }

    #[derive(Debug, Deserialize, Serialize)]
    pub struct IsmEventMsg {
        pub iface: IfaceKey,
        pub event: ism::Event,
    }

    #[derive(Debug, Deserialize, Serialize)]
    pub struct NsmEventMsg {
        pub nbr: NbrKey,
        pub event: nsm::Event,
    }

    #[derive(Clone, Debug, Deserialize, Serialize)]
    pub struct RxmtIntervalMsg {
        pub nbr: NbrKey,
        pub packet: RxmtPacket,
    }

    // Timer bound to one instance of an LSA. The sequence number tells a
    // stale timer apart from one armed for the current instance.
    #[derive(Clone, Debug, Deserialize, Serialize)]
    pub struct LsaTimerMsg {
        pub lsdb: LsdbKey,
        pub key: LsaKey,
        pub seq_no: u32,
    }

    #[derive(Debug, Deserialize, Serialize)]
    pub enum ProtocolInputMsg {
        IsmEvent(IsmEventMsg),
        NsmEvent(NsmEventMsg),
        HelloInterval(IfaceKey),
        RxmtInterval(RxmtIntervalMsg),
        DbDescFree(NbrKey),
        SendLsUpdate(IfaceKey),
        DelayedAck(IfaceKey),
        LsaOrigEvent(LsaOrigEvent),
        LsaOrigDelayed(LsaTimerMsg),
        LsaExpiry(LsaTimerMsg),
        LsaRefresh(LsaTimerMsg),
        MaxAgeSweep,
        SpfDelay(spf::DelayEvent),
    }
}

// One queue per event category.
#[derive(Clone, Debug)]
pub struct ProtocolInputChannelsTx {
    pub ism_event: UnboundedSender<IsmEventMsg>,
    pub nsm_event: UnboundedSender<NsmEventMsg>,
    pub hello: UnboundedSender<IfaceKey>,
    pub rxmt: UnboundedSender<RxmtIntervalMsg>,
    pub dbdesc_free: UnboundedSender<NbrKey>,
    pub send_lsupd: UnboundedSender<IfaceKey>,
    pub delayed_ack: UnboundedSender<IfaceKey>,
    pub lsa_orig: UnboundedSender<LsaOrigEvent>,
    pub lsa_orig_delayed: UnboundedSender<LsaTimerMsg>,
    pub lsa_expiry: UnboundedSender<LsaTimerMsg>,
    pub lsa_refresh: UnboundedSender<LsaTimerMsg>,
    pub maxage_sweep: UnboundedSender<()>,
    pub spf_delay: UnboundedSender<spf::DelayEvent>,
}

#[derive(Debug)]
pub struct ProtocolInputChannelsRx {
    ism_event: UnboundedReceiver<IsmEventMsg>,
    nsm_event: UnboundedReceiver<NsmEventMsg>,
    hello: UnboundedReceiver<IfaceKey>,
    rxmt: UnboundedReceiver<RxmtIntervalMsg>,
    dbdesc_free: UnboundedReceiver<NbrKey>,
    send_lsupd: UnboundedReceiver<IfaceKey>,
    delayed_ack: UnboundedReceiver<IfaceKey>,
    lsa_orig: UnboundedReceiver<LsaOrigEvent>,
    lsa_orig_delayed: UnboundedReceiver<LsaTimerMsg>,
    lsa_expiry: UnboundedReceiver<LsaTimerMsg>,
    lsa_refresh: UnboundedReceiver<LsaTimerMsg>,
    maxage_sweep: UnboundedReceiver<()>,
    spf_delay: UnboundedReceiver<spf::DelayEvent>,
}

// ===== impl ProtocolInputChannelsTx =====

impl ProtocolInputChannelsTx {
    // The receiving end lives as long as the instance task, so send errors
    // only happen during shutdown and are ignored.
    pub(crate) fn ism_event(&self, iface: &IfaceKey, event: ism::Event) {
        let iface = iface.clone();
        let _ = self.ism_event.send(IsmEventMsg { iface, event });
    }

    pub(crate) fn nsm_event(&self, nbr: &NbrKey, event: nsm::Event) {
        let nbr = nbr.clone();
        let _ = self.nsm_event.send(NsmEventMsg { nbr, event });
    }

    pub(crate) fn lsa_orig(&self, event: LsaOrigEvent) {
        let _ = self.lsa_orig.send(event);
    }

    pub(crate) fn spf_delay(&self, event: spf::DelayEvent) {
        let _ = self.spf_delay.send(event);
    }
}

pub(crate) fn protocol_input_channels()
-> (ProtocolInputChannelsTx, ProtocolInputChannelsRx) {
    let (ism_event_tx, ism_event_rx) = mpsc::unbounded_channel();
    let (nsm_event_tx, nsm_event_rx) = mpsc::unbounded_channel();
    let (hello_tx, hello_rx) = mpsc::unbounded_channel();
    let (rxmt_tx, rxmt_rx) = mpsc::unbounded_channel();
    let (dbdesc_free_tx, dbdesc_free_rx) = mpsc::unbounded_channel();
    let (send_lsupd_tx, send_lsupd_rx) = mpsc::unbounded_channel();
    let (delayed_ack_tx, delayed_ack_rx) = mpsc::unbounded_channel();
    let (lsa_orig_tx, lsa_orig_rx) = mpsc::unbounded_channel();
    let (lsa_orig_delayed_tx, lsa_orig_delayed_rx) =
        mpsc::unbounded_channel();
    let (lsa_expiry_tx, lsa_expiry_rx) = mpsc::unbounded_channel();
    let (lsa_refresh_tx, lsa_refresh_rx) = mpsc::unbounded_channel();
    let (maxage_sweep_tx, maxage_sweep_rx) = mpsc::unbounded_channel();
    let (spf_delay_tx, spf_delay_rx) = mpsc::unbounded_channel();

    let tx = ProtocolInputChannelsTx {
        ism_event: ism_event_tx,
        nsm_event: nsm_event_tx,
        hello: hello_tx,
        rxmt: rxmt_tx,
        dbdesc_free: dbdesc_free_tx,
        send_lsupd: send_lsupd_tx,
        delayed_ack: delayed_ack_tx,
        lsa_orig: lsa_orig_tx,
        lsa_orig_delayed: lsa_orig_delayed_tx,
        lsa_expiry: lsa_expiry_tx,
        lsa_refresh: lsa_refresh_tx,
        maxage_sweep: maxage_sweep_tx,
        spf_delay: spf_delay_tx,
    };
    let rx = ProtocolInputChannelsRx {
        ism_event: ism_event_rx,
        nsm_event: nsm_event_rx,
        hello: hello_rx,
        rxmt: rxmt_rx,
        dbdesc_free: dbdesc_free_rx,
        send_lsupd: send_lsupd_rx,
        delayed_ack: delayed_ack_rx,
        lsa_orig: lsa_orig_rx,
        lsa_orig_delayed: lsa_orig_delayed_rx,
        lsa_expiry: lsa_expiry_rx,
        lsa_refresh: lsa_refresh_rx,
        maxage_sweep: maxage_sweep_rx,
        spf_delay: spf_delay_rx,
    };
    (tx, rx)
}

// ===== impl ProtocolInputChannelsRx =====

impl MessageReceiver<ProtocolInputMsg> for ProtocolInputChannelsRx {
    // State machine events come first, so that timers and packets are
    // handled against up-to-date interface and neighbor states.
    async fn recv(&mut self) -> Option<ProtocolInputMsg> {
        use ProtocolInputMsg as Msg;

        tokio::select! {
            biased;
            msg = self.ism_event.recv() => msg.map(Msg::IsmEvent),
            msg = self.nsm_event.recv() => msg.map(Msg::NsmEvent),
            msg = self.hello.recv() => msg.map(Msg::HelloInterval),
            msg = self.rxmt.recv() => msg.map(Msg::RxmtInterval),
            msg = self.dbdesc_free.recv() => msg.map(Msg::DbDescFree),
            msg = self.send_lsupd.recv() => msg.map(Msg::SendLsUpdate),
            msg = self.delayed_ack.recv() => msg.map(Msg::DelayedAck),
            msg = self.lsa_orig.recv() => msg.map(Msg::LsaOrigEvent),
            msg = self.lsa_orig_delayed.recv() => {
                msg.map(Msg::LsaOrigDelayed)
            }
            msg = self.lsa_expiry.recv() => msg.map(Msg::LsaExpiry),
            msg = self.lsa_refresh.recv() => msg.map(Msg::LsaRefresh),
            msg = self.maxage_sweep.recv() => msg.map(|_| Msg::MaxAgeSweep),
            msg = self.spf_delay.recv() => msg.map(Msg::SpfDelay),
        }
    }
}

#[cfg(feature = "testing")]
impl ProtocolInputChannelsRx {
    // Non-blocking receive, with the same priorities as `recv`.
    pub fn try_recv(&mut self) -> Option<ProtocolInputMsg> {
        use ProtocolInputMsg as Msg;

        self.ism_event
            .try_recv()
            .map(Msg::IsmEvent)
            .or_else(|_| self.nsm_event.try_recv().map(Msg::NsmEvent))
            .or_else(|_| self.hello.try_recv().map(Msg::HelloInterval))
            .or_else(|_| self.rxmt.try_recv().map(Msg::RxmtInterval))
            .or_else(|_| self.dbdesc_free.try_recv().map(Msg::DbDescFree))
            .or_else(|_| self.send_lsupd.try_recv().map(Msg::SendLsUpdate))
            .or_else(|_| self.delayed_ack.try_recv().map(Msg::DelayedAck))
            .or_else(|_| self.lsa_orig.try_recv().map(Msg::LsaOrigEvent))
            .or_else(|_| {
                self.lsa_orig_delayed.try_recv().map(Msg::LsaOrigDelayed)
            })
            .or_else(|_| self.lsa_expiry.try_recv().map(Msg::LsaExpiry))
            .or_else(|_| self.lsa_refresh.try_recv().map(Msg::LsaRefresh))
            .or_else(|_| {
                self.maxage_sweep.try_recv().map(|_| Msg::MaxAgeSweep)
            })
            .or_else(|_| self.spf_delay.try_recv().map(Msg::SpfDelay))
            .ok()
    }
}

// ===== timers =====
//
// Timers don't touch instance state: they only enqueue events. Under the
// `testing` feature no tokio task is spawned. Timers that pace protocol
// progress fire right away and the others never fire.

pub(crate) fn hello_interval(
    tx: &ProtocolInputChannelsTx,
    iface: &IfaceKey,
    interval: u16,
) -> IntervalTask {
    let interval = Duration::from_secs(interval.into());
    every(interval, &tx.hello, iface.clone(), true)
}

pub(crate) fn wait_timer(
    tx: &ProtocolInputChannelsTx,
    iface: &IfaceKey,
    dead_interval: u32,
) -> TimeoutTask {
    let msg = IsmEventMsg {
        iface: iface.clone(),
        event: ism::Event::WaitTimer,
    };
    let timeout = Duration::from_secs(dead_interval.into());
    soon(timeout, &tx.ism_event, msg)
}

pub(crate) fn inactivity_timer(
    tx: &ProtocolInputChannelsTx,
    nbr: &NbrKey,
    dead_interval: u32,
) -> TimeoutTask {
    let msg = NsmEventMsg {
        nbr: nbr.clone(),
        event: nsm::Event::InactivityTimer,
    };
    let timeout = Duration::from_secs(dead_interval.into());
    later(timeout, &tx.nsm_event, msg)
}

pub(crate) fn rxmt_interval(
    tx: &ProtocolInputChannelsTx,
    nbr: &NbrKey,
    packet: RxmtPacket,
    interval: u16,
) -> IntervalTask {
    let msg = RxmtIntervalMsg {
        nbr: nbr.clone(),
        packet,
    };
    every(Duration::from_secs(interval.into()), &tx.rxmt, msg, false)
}

// Like `rxmt_interval`, but entries invalidated by acknowledgments are
// purged first and nothing is sent once the list has drained.
pub(crate) fn lsupd_rxmt_interval(
    tx: &ProtocolInputChannelsTx,
    nbr: &NbrKey,
    interval: u16,
    ls_rxmt: &Arc<Mutex<LsRxmtList>>,
) -> IntervalTask {
    #[cfg(not(feature = "testing"))]
    {
        let rxmt_tx = tx.rxmt.clone();
        let nbr = nbr.clone();
        let ls_rxmt = ls_rxmt.clone();
        IntervalTask::new(
            Duration::from_secs(interval.into()),
            false,
            move || {
                let pending = {
                    let mut ls_rxmt =
                        ls_rxmt.lock().unwrap_or_else(PoisonError::into_inner);
                    ls_rxmt.purge();
                    !ls_rxmt.is_empty()
                };
                let msg = pending.then(|| RxmtIntervalMsg {
                    nbr: nbr.clone(),
                    packet: RxmtPacket::LsUpdate,
                });
                let rxmt_tx = rxmt_tx.clone();
                async move {
                    if let Some(msg) = msg {
                        let _ = rxmt_tx.send(msg);
                    }
                }
            },
        )
    }
    #[cfg(feature = "testing")]
    {
        IntervalTask {}
    }
}

pub(crate) fn dbdesc_free_timer(
    tx: &ProtocolInputChannelsTx,
    nbr: &NbrKey,
    dead_interval: u32,
) -> TimeoutTask {
    let timeout = Duration::from_secs(dead_interval.into());
    later(timeout, &tx.dbdesc_free, nbr.clone())
}

pub(crate) fn ls_update_timer(
    tx: &ProtocolInputChannelsTx,
    iface: &IfaceKey,
) -> TimeoutTask {
    soon(LS_UPDATE_DELAY, &tx.send_lsupd, iface.clone())
}

pub(crate) fn delayed_ack_timer(
    tx: &ProtocolInputChannelsTx,
    iface: &IfaceKey,
) -> TimeoutTask {
    soon(DELAYED_ACK_DELAY, &tx.delayed_ack, iface.clone())
}

pub(crate) fn lsa_expiry_timer(
    tx: &ProtocolInputChannelsTx,
    msg: LsaTimerMsg,
    remaining: u16,
) -> TimeoutTask {
    let timeout = Duration::from_secs(remaining.into());
    later(timeout, &tx.lsa_expiry, msg)
}

pub(crate) fn lsa_refresh_timer(
    tx: &ProtocolInputChannelsTx,
    msg: LsaTimerMsg,
    interval: u16,
) -> TimeoutTask {
    let timeout = Duration::from_secs(interval.into());
    later(timeout, &tx.lsa_refresh, msg)
}

pub(crate) fn lsa_orig_delayed_timer(
    tx: &ProtocolInputChannelsTx,
    msg: LsaTimerMsg,
    delay: Duration,
) -> TimeoutTask {
    later(delay, &tx.lsa_orig_delayed, msg)
}

pub(crate) fn maxage_sweep_interval(
    tx: &ProtocolInputChannelsTx,
) -> IntervalTask {
    #[cfg(not(feature = "testing"))]
    {
        every(MAXAGE_SWEEP_INTERVAL, &tx.maxage_sweep, (), false)
    }
    #[cfg(feature = "testing")]
    {
        IntervalTask {}
    }
}

// Only the delay timer proper fires under `testing`. The hold-down and
// learn timers stay armed, so the delay FSM never goes back to quiet.
pub(crate) fn spf_delay_timer(
    tx: &ProtocolInputChannelsTx,
    event: spf::DelayEvent,
    delay_ms: u32,
) -> TimeoutTask {
    let timeout = Duration::from_millis(delay_ms.into());
    match event {
        spf::DelayEvent::DelayTimer => soon(timeout, &tx.spf_delay, event),
        _ => later(timeout, &tx.spf_delay, event),
    }
}

// ===== helper functions =====

// Timer whose expiry paces protocol progress.
fn soon<T>(
    timeout: Duration,
    tx: &UnboundedSender<T>,
    msg: T,
) -> TimeoutTask
where
    T: Send + 'static,
{
    #[cfg(not(feature = "testing"))]
    {
        later(timeout, tx, msg)
    }
    #[cfg(feature = "testing")]
    {
        let _ = tx.send(msg);
        TimeoutTask {}
    }
}

fn later<T>(
    timeout: Duration,
    tx: &UnboundedSender<T>,
    msg: T,
) -> TimeoutTask
where
    T: Send + 'static,
{
    #[cfg(not(feature = "testing"))]
    {
        let tx = tx.clone();
        TimeoutTask::new(timeout, move || async move {
            let _ = tx.send(msg);
        })
    }
    #[cfg(feature = "testing")]
    {
        TimeoutTask {}
    }
}

fn every<T>(
    interval: Duration,
    tx: &UnboundedSender<T>,
    msg: T,
    tick_on_start: bool,
) -> IntervalTask
where
    T: Clone + Send + Sync + 'static,
{
    #[cfg(not(feature = "testing"))]
    {
        let tx = tx.clone();
        IntervalTask::new(interval, tick_on_start, move || {
            let _ = tx.send(msg.clone());
            async {}
        })
    }
    #[cfg(feature = "testing")]
    {
        if tick_on_start {
            let _ = tx.send(msg);
        }
        IntervalTask {}
    }
}

//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use derive_new::new;
use ospfd_utils::protocol::Protocol;
use ospfd_utils::southbound::{RibMsg, SouthboundMsg, TxFrameMsg};
use ospfd_utils::task::Task;
use ospfd_utils::{Receiver, Sender, UnboundedSender};
use tokio::sync::mpsc;
use tracing::Instrument;

/// A trait for protocol instances.
pub trait ProtocolInstance
where
    Self: Send + Sized + 'static,
{
    /// Protocol type.
    const PROTOCOL: Protocol;

    type ConfigMsg: Send + std::fmt::Debug;
    type ProtocolInputMsg: Send + std::fmt::Debug;
    type ProtocolInputChannelsTx: Send;
    type ProtocolInputChannelsRx: MessageReceiver<Self::ProtocolInputMsg>;

    /// Create protocol instance.
    fn new(name: String, channels_tx: InstanceChannelsTx<Self>) -> Self;

    /// Optional protocol instance initialization routine.
    fn init(&mut self) {}

    /// Optional protocol instance shutdown routine.
    fn shutdown(self) {}

    /// Process configuration change.
    fn process_config_msg(&mut self, msg: Self::ConfigMsg);

    /// Process southbound (RIB or ASIC driver) notification.
    fn process_southbound_msg(&mut self, msg: SouthboundMsg);

    /// Process protocol message.
    fn process_protocol_msg(&mut self, msg: Self::ProtocolInputMsg);

    /// Create channels for all protocol input events.
    fn protocol_input_channels()
    -> (Self::ProtocolInputChannelsTx, Self::ProtocolInputChannelsRx);

    /// Span covering every event processed by the instance.
    fn debug_span(name: &str) -> tracing::Span;
}

/// Instance input message.
#[derive(Debug)]
pub enum InstanceMsg<P: ProtocolInstance> {
    Config(Option<P::ConfigMsg>),
    Southbound(SouthboundMsg),
    Protocol(P::ProtocolInputMsg),
}

/// Instance output channels.
#[derive(Debug, new)]
pub struct InstanceChannelsTx<P: ProtocolInstance> {
    pub rib: UnboundedSender<RibMsg>,
    pub net: UnboundedSender<TxFrameMsg>,
    pub protocol_input: P::ProtocolInputChannelsTx,
}

/// Instance input channels.
#[derive(Debug, new)]
pub struct InstanceChannelsRx<P: ProtocolInstance> {
    pub config: Receiver<P::ConfigMsg>,
    pub southbound: Receiver<SouthboundMsg>,
    pub protocol_input: P::ProtocolInputChannelsRx,
}

/// Handles returned to whoever spawns a protocol instance.
#[derive(Debug)]
pub struct InstanceHandle<P: ProtocolInstance> {
    pub config_tx: Sender<P::ConfigMsg>,
    pub southbound_tx: Sender<SouthboundMsg>,
    pub task: Task<()>,
}

pub trait MessageReceiver<T: Send>
where
    Self: Send,
{
    fn recv(&mut self) -> impl Future<Output = Option<T>> + Send;
}

// ===== helper functions =====

// Protocol instance input-event aggregator.
//
// Config and southbound events take precedence over protocol events so that
// the instance always acts on the most recent configuration.
async fn next_msg<P>(
    channels_rx: &mut InstanceChannelsRx<P>,
) -> Option<InstanceMsg<P>>
where
    P: ProtocolInstance,
{
    tokio::select! {
        biased;
        msg = channels_rx.config.recv() => {
            Some(InstanceMsg::Config(msg))
        }
        Some(msg) = channels_rx.southbound.recv() => {
            Some(InstanceMsg::Southbound(msg))
        }
        Some(msg) = channels_rx.protocol_input.recv() => {
            Some(InstanceMsg::Protocol(msg))
        }
        else => None,
    }
}

async fn event_loop<P>(instance: &mut P, mut channels_rx: InstanceChannelsRx<P>)
where
    P: ProtocolInstance,
{
    while let Some(msg) = next_msg(&mut channels_rx).await {
        match msg {
            InstanceMsg::Config(Some(msg)) => {
                instance.process_config_msg(msg);
            }
            InstanceMsg::Config(None) => {
                // Configuration channel closed: the instance was removed.
                return;
            }
            InstanceMsg::Southbound(msg) => {
                instance.process_southbound_msg(msg);
            }
            InstanceMsg::Protocol(msg) => {
                instance.process_protocol_msg(msg);
            }
        }
    }
}

async fn run<P>(
    name: String,
    rib_tx: UnboundedSender<RibMsg>,
    net_tx: UnboundedSender<TxFrameMsg>,
    config_rx: Receiver<P::ConfigMsg>,
    southbound_rx: Receiver<SouthboundMsg>,
) where
    P: ProtocolInstance,
{
    // Start protocol channels.
    let (proto_input_tx, proto_input_rx) = P::protocol_input_channels();

    // Create instance Tx/Rx channels.
    let channels_tx = InstanceChannelsTx::new(rib_tx, net_tx, proto_input_tx);
    let channels_rx =
        InstanceChannelsRx::new(config_rx, southbound_rx, proto_input_rx);

    // Create protocol instance.
    let mut instance = P::new(name, channels_tx);
    instance.init();

    // Run event loop.
    event_loop(&mut instance, channels_rx).await;

    // Ensure instance is shut down before exiting.
    instance.shutdown();
}

// ===== global functions =====

/// Spawns the main task of a protocol instance.
///
/// Every event of the instance is processed by this single task, one at a
/// time, so protocol state never needs synchronization beyond what the
/// instance itself opts into.
pub fn spawn_protocol_task<P>(
    name: String,
    rib_tx: &UnboundedSender<RibMsg>,
    net_tx: &UnboundedSender<TxFrameMsg>,
) -> InstanceHandle<P>
where
    P: ProtocolInstance,
{
    let (config_tx, config_rx) = mpsc::channel(16);
    let (southbound_tx, southbound_rx) = mpsc::channel(16);
    let rib_tx = rib_tx.clone();
    let net_tx = net_tx.clone();

    let span = P::debug_span(&name);
    let task = Task::spawn(
        async move {
            run::<P>(name, rib_tx, net_tx, config_rx, southbound_rx).await;
        }
        .instrument(span),
    );

    InstanceHandle {
        config_tx,
        southbound_tx,
        task,
    }
}

//! Control surface of a running node.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

use sdwn_flow::NodeFunction;
use sdwn_wire::{FlowTableEntry, NodeAddress, Packet};

/// Where an inbound frame entered the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Received over the air, with the measured signal strength
    Radio {
        /// Received signal strength of this frame
        rssi: u8,
    },
    /// Injected by the controller over a sink's downlink
    Controller,
}

/// Errors crossing the node's control surface
#[derive(Error, Debug)]
pub enum NodeError {
    /// The node worker has stopped
    #[error("node stopped")]
    Stopped,
}

/// Commands the worker executes between packets
pub enum NodeCommand {
    /// Install a flow rule (replace-vs-append semantics)
    InstallRule(FlowTableEntry),
    /// Remove the flow rule at a position
    RemoveRule(usize),
    /// Bind a function id to a native capability
    RegisterFunction(u8, Arc<dyn NodeFunction>),
    /// Send application data to another node
    SendData {
        /// Destination address
        dst: NodeAddress,
        /// Application payload
        payload: Vec<u8>,
    },
    /// Snapshot the node's state
    Snapshot(oneshot::Sender<NodeSnapshot>),
}

impl std::fmt::Debug for NodeCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeCommand::InstallRule(entry) => f.debug_tuple("InstallRule").field(entry).finish(),
            NodeCommand::RemoveRule(position) => {
                f.debug_tuple("RemoveRule").field(position).finish()
            }
            NodeCommand::RegisterFunction(id, _) => {
                f.debug_tuple("RegisterFunction").field(id).finish()
            }
            NodeCommand::SendData { dst, payload } => f
                .debug_struct("SendData")
                .field("dst", dst)
                .field("len", &payload.len())
                .finish(),
            NodeCommand::Snapshot(_) => f.write_str("Snapshot"),
        }
    }
}

/// Point-in-time view of a node's state, for tests and operators.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    /// Own address
    pub addr: NodeAddress,
    /// Network id
    pub net: u8,
    /// Whether the node holds a route toward a sink
    pub active: bool,
    /// Hop distance to the sink (`u8::MAX` when unknown)
    pub distance: u8,
    /// Best-known sink address
    pub sink: Option<NodeAddress>,
    /// Installed flow rules in match order
    pub rules: Vec<FlowTableEntry>,
    /// Neighbors heard since the last report
    pub neighbor_count: usize,
}

/// Cloneable ingress of a node, for transport adapters that fan frames out
/// to many nodes.
#[derive(Debug, Clone)]
pub struct NodeInbox {
    pub(crate) addr: NodeAddress,
    pub(crate) intake: mpsc::Sender<(Bytes, Origin)>,
}

impl NodeInbox {
    /// Address of the node behind this inbox
    pub fn addr(&self) -> NodeAddress {
        self.addr
    }

    /// Push one frame received over the air
    pub async fn deliver(&self, frame: Bytes, rssi: u8) -> Result<(), NodeError> {
        self.intake
            .send((frame, Origin::Radio { rssi }))
            .await
            .map_err(|_| NodeError::Stopped)
    }

    /// Push one frame from the controller (sinks only)
    pub async fn deliver_downlink(&self, frame: Bytes) -> Result<(), NodeError> {
        self.intake
            .send((frame, Origin::Controller))
            .await
            .map_err(|_| NodeError::Stopped)
    }
}

/// Cloneable command surface of a node.
#[derive(Debug, Clone)]
pub struct NodeCommander {
    pub(crate) commands: mpsc::Sender<NodeCommand>,
}

impl NodeCommander {
    /// Send application data from this node
    pub async fn send_data(&self, dst: NodeAddress, payload: Vec<u8>) -> Result<(), NodeError> {
        self.commands
            .send(NodeCommand::SendData { dst, payload })
            .await
            .map_err(|_| NodeError::Stopped)
    }

    /// Fetch a state snapshot
    pub async fn snapshot(&self) -> Result<NodeSnapshot, NodeError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(NodeCommand::Snapshot(tx))
            .await
            .map_err(|_| NodeError::Stopped)?;
        rx.await.map_err(|_| NodeError::Stopped)
    }
}

/// Handle to a spawned node worker.
#[derive(Debug)]
pub struct NodeHandle {
    pub(crate) addr: NodeAddress,
    pub(crate) net: u8,
    pub(crate) intake: mpsc::Sender<(Bytes, Origin)>,
    pub(crate) commands: mpsc::Sender<NodeCommand>,
    pub(crate) outbound: mpsc::Receiver<Bytes>,
    pub(crate) uplink: Option<mpsc::Receiver<Bytes>>,
    pub(crate) delivered: mpsc::Receiver<Packet>,
    pub(crate) stop: watch::Sender<bool>,
}

impl NodeHandle {
    /// Own address of the node
    pub fn addr(&self) -> NodeAddress {
        self.addr
    }

    /// Network id of the node
    pub fn net(&self) -> u8 {
        self.net
    }

    /// Cloneable frame ingress for transport adapters
    pub fn inbox(&self) -> NodeInbox {
        NodeInbox {
            addr: self.addr,
            intake: self.intake.clone(),
        }
    }

    /// Cloneable command surface
    pub fn commander(&self) -> NodeCommander {
        NodeCommander {
            commands: self.commands.clone(),
        }
    }

    /// Detach the outbound frame queue, e.g. to move it into a transport task
    pub fn take_outbound(&mut self) -> mpsc::Receiver<Bytes> {
        let (_, dead) = mpsc::channel(1);
        std::mem::replace(&mut self.outbound, dead)
    }

    /// Detach a sink's uplink queue; `None` for ordinary motes
    pub fn take_uplink(&mut self) -> Option<mpsc::Receiver<Bytes>> {
        self.uplink.take()
    }

    /// Push one frame received over the air; suspends while the intake
    /// queue is full.
    pub async fn deliver(&self, frame: Bytes, rssi: u8) -> Result<(), NodeError> {
        self.intake
            .send((frame, Origin::Radio { rssi }))
            .await
            .map_err(|_| NodeError::Stopped)
    }

    /// Push one frame from the controller (sinks only)
    pub async fn deliver_downlink(&self, frame: Bytes) -> Result<(), NodeError> {
        self.intake
            .send((frame, Origin::Controller))
            .await
            .map_err(|_| NodeError::Stopped)
    }

    /// Await the next frame the node wants on the air
    pub async fn next_outbound(&mut self) -> Option<Bytes> {
        self.outbound.recv().await
    }

    /// Await the next frame a sink wants forwarded to the controller
    pub async fn next_uplink(&mut self) -> Option<Bytes> {
        match self.uplink.as_mut() {
            Some(uplink) => uplink.recv().await,
            None => None,
        }
    }

    /// Await the next DATA packet addressed to this node
    pub async fn next_delivered(&mut self) -> Option<Packet> {
        self.delivered.recv().await
    }

    /// Install a flow rule
    pub async fn install_rule(&self, entry: FlowTableEntry) -> Result<(), NodeError> {
        self.command(NodeCommand::InstallRule(entry)).await
    }

    /// Bind a function id to a capability
    pub async fn register_function(
        &self,
        id: u8,
        function: Arc<dyn NodeFunction>,
    ) -> Result<(), NodeError> {
        self.command(NodeCommand::RegisterFunction(id, function))
            .await
    }

    /// Send application data from this node
    pub async fn send_data(&self, dst: NodeAddress, payload: Vec<u8>) -> Result<(), NodeError> {
        self.command(NodeCommand::SendData { dst, payload }).await
    }

    /// Fetch a state snapshot
    pub async fn snapshot(&self) -> Result<NodeSnapshot, NodeError> {
        let (tx, rx) = oneshot::channel();
        self.command(NodeCommand::Snapshot(tx)).await?;
        rx.await.map_err(|_| NodeError::Stopped)
    }

    /// Raise the cooperative stop flag; the worker exits at its next loop
    pub fn shutdown(&self) {
        let _ = self.stop.send(true);
    }

    async fn command(&self, command: NodeCommand) -> Result<(), NodeError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| NodeError::Stopped)
    }
}

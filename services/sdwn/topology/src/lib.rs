//! Directed weighted network graph maintained from periodic neighbor reports.
//!
//! The controller feeds every REPORT into this graph: nodes appear on first
//! mention, directed edges `neighbor -> reporter` carry cost
//! `255 - link quality`, stale nodes are swept by a consistency pass, and a
//! monotonic version counter advances only when the topology actually
//! changed. Version bumps are published over a watch channel consumed by
//! the router and any external visualization.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use sdwn_wire::NodeId;

/// Tuning knobs of the graph maintenance pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// A node unseen for longer than this is removed by the consistency sweep
    pub node_timeout: Duration,
    /// Edge cost changes up to this are noise, not topology changes
    pub rssi_resolution: u8,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        TopologyConfig {
            node_timeout: Duration::from_secs(30),
            rssi_resolution: 4,
        }
    }
}

/// What the graph knows about one node.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    /// Node identity
    pub id: NodeId,
    /// Battery level from the last report
    pub battery: u8,
    /// Hop distance to the sink the node advertised
    pub distance: u8,
    /// When the node last reported (mentions do not refresh this)
    pub last_seen: Instant,
}

/// Controller-side directed multigraph of the sensor network.
#[derive(Debug)]
pub struct NetworkGraph {
    config: TopologyConfig,
    nodes: HashMap<NodeId, NodeInfo>,
    /// Outgoing adjacency: `edges[a][b]` is the cost of the edge `a -> b`
    edges: HashMap<NodeId, HashMap<NodeId, u8>>,
    version: u64,
    changes: watch::Sender<u64>,
}

mod graph;
pub use graph::TopologyStats;

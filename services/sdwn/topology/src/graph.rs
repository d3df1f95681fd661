//! NetworkGraph implementation methods.

use super::{NetworkGraph, NodeInfo, TopologyConfig};
use sdwn_wire::{NeighborReport, NodeId};
use std::collections::HashSet;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info};

impl NetworkGraph {
    /// Create an empty graph
    pub fn new(config: TopologyConfig) -> Self {
        let (changes, _) = watch::channel(0);
        NetworkGraph {
            config,
            nodes: Default::default(),
            edges: Default::default(),
            version: 0,
            changes,
        }
    }

    /// Subscribe to version bumps; the payload is the new version
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Monotonic modification counter; advances only on real change
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Apply one neighbor report.
    ///
    /// Runs the consistency sweep first, then creates/updates the reporter,
    /// its mentioned neighbors, and the directed `neighbor -> reporter`
    /// edges; in-edges of the reporter absent from this report are removed.
    /// Returns whether the topology changed.
    pub fn update_from_report(&mut self, report: &NeighborReport) -> bool {
        let now = Instant::now();
        let mut changed = self.remove_stale(now) > 0;

        let reporter = report.reporter;
        match self.nodes.get_mut(&reporter) {
            Some(node) => {
                node.battery = report.battery;
                node.distance = report.distance;
                node.last_seen = now;
            }
            None => {
                debug!(node = %reporter, "node joined the topology");
                self.nodes.insert(
                    reporter,
                    NodeInfo {
                        id: reporter,
                        battery: report.battery,
                        distance: report.distance,
                        last_seen: now,
                    },
                );
                changed = true;
            }
        }

        let mut latest: HashSet<NodeId> = HashSet::with_capacity(report.links.len());
        for &(addr, rssi) in &report.links {
            let neighbor = NodeId::new(reporter.net, addr);
            latest.insert(neighbor);

            if !self.nodes.contains_key(&neighbor) {
                debug!(node = %neighbor, "node mentioned before its first report");
                self.nodes.insert(
                    neighbor,
                    NodeInfo {
                        id: neighbor,
                        battery: 0,
                        distance: u8::MAX,
                        last_seen: now,
                    },
                );
                changed = true;
            }

            let cost = 255 - rssi;
            let out = self.edges.entry(neighbor).or_default();
            match out.get_mut(&reporter) {
                Some(existing) => {
                    if existing.abs_diff(cost) > self.config.rssi_resolution {
                        *existing = cost;
                        changed = true;
                    }
                }
                None => {
                    out.insert(reporter, cost);
                    changed = true;
                }
            }
        }

        // the reporter no longer hears neighbors missing from this report
        for (&source, out) in self.edges.iter_mut() {
            if !latest.contains(&source) && out.remove(&reporter).is_some() {
                debug!(from = %source, to = %reporter, "edge no longer reported");
                changed = true;
            }
        }

        if changed {
            self.bump();
        }
        changed
    }

    /// Consistency sweep: drop nodes unseen past the timeout along with all
    /// their edges. Returns the number of nodes removed; any removal bumps
    /// the version.
    pub fn sweep(&mut self) -> usize {
        let removed = self.remove_stale(Instant::now());
        if removed > 0 {
            self.bump();
        }
        removed
    }

    fn remove_stale(&mut self, now: Instant) -> usize {
        let timeout = self.config.node_timeout;
        let stale: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|node| now.duration_since(node.last_seen) > timeout)
            .map(|node| node.id)
            .collect();

        for node in &stale {
            info!(node = %node, "node timed out, removing");
            self.nodes.remove(node);
            self.edges.remove(node);
            for out in self.edges.values_mut() {
                out.remove(node);
            }
        }
        stale.len()
    }

    fn bump(&mut self) {
        self.version += 1;
        let _ = self.changes.send(self.version);
    }

    /// Look up one node
    pub fn node(&self, id: NodeId) -> Option<&NodeInfo> {
        self.nodes.get(&id)
    }

    /// Iterate all known nodes
    pub fn nodes(&self) -> impl Iterator<Item = &NodeInfo> {
        self.nodes.values()
    }

    /// Number of known nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Outgoing edges of a node as `(target, cost)`
    pub fn out_edges(&self, id: NodeId) -> impl Iterator<Item = (NodeId, u8)> + '_ {
        self.edges
            .get(&id)
            .into_iter()
            .flat_map(|out| out.iter().map(|(&target, &cost)| (target, cost)))
    }

    /// Cost of the directed edge `from -> to`
    pub fn edge_cost(&self, from: NodeId, to: NodeId) -> Option<u8> {
        self.edges.get(&from)?.get(&to).copied()
    }

    /// Number of directed edges
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(|out| out.len()).sum()
    }

    /// Access the sweep/resolution configuration
    pub fn config(&self) -> &TopologyConfig {
        &self.config
    }
}

impl Default for NetworkGraph {
    fn default() -> Self {
        NetworkGraph::new(TopologyConfig::default())
    }
}

/// Graph statistics snapshot
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TopologyStats {
    /// Nodes currently in the graph
    pub nodes: usize,
    /// Directed edges currently in the graph
    pub edges: usize,
    /// Current modification counter
    pub version: u64,
}

impl NetworkGraph {
    /// Snapshot the graph counters
    pub fn stats(&self) -> TopologyStats {
        TopologyStats {
            nodes: self.node_count(),
            edges: self.edge_count(),
            version: self.version,
        }
    }
}

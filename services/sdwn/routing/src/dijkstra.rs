//! Single-source shortest paths over the network graph.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use sdwn_topology::NetworkGraph;
use sdwn_wire::NodeId;
use tracing::debug;

/// Shortest-path tree rooted at one source node.
#[derive(Debug, Clone)]
pub struct PathMap {
    source: NodeId,
    dist: HashMap<NodeId, u32>,
    prev: HashMap<NodeId, NodeId>,
}

impl PathMap {
    /// The source this tree was computed from
    pub fn source(&self) -> NodeId {
        self.source
    }

    /// Total cost to reach `dst`
    pub fn cost_to(&self, dst: NodeId) -> Option<u32> {
        self.dist.get(&dst).copied()
    }

    /// Ordered node list from the source to `dst`, both inclusive
    pub fn path_to(&self, dst: NodeId) -> Option<Vec<NodeId>> {
        if dst == self.source {
            return Some(vec![self.source]);
        }
        self.dist.get(&dst)?;

        let mut path = vec![dst];
        let mut current = dst;
        while let Some(&prev) = self.prev.get(&current) {
            path.push(prev);
            if prev == self.source {
                path.reverse();
                return Some(path);
            }
            current = prev;
        }
        None
    }
}

/// Compute shortest paths from `source` over the whole graph; edge weight
/// is the link cost.
pub fn shortest_paths(graph: &NetworkGraph, source: NodeId) -> PathMap {
    let mut dist: HashMap<NodeId, u32> = HashMap::new();
    let mut prev: HashMap<NodeId, NodeId> = HashMap::new();
    let mut heap: BinaryHeap<Reverse<(u32, NodeId)>> = BinaryHeap::new();

    dist.insert(source, 0);
    heap.push(Reverse((0, source)));

    while let Some(Reverse((cost, node))) = heap.pop() {
        if cost > dist.get(&node).copied().unwrap_or(u32::MAX) {
            continue;
        }
        for (next, edge_cost) in graph.out_edges(node) {
            let next_cost = cost.saturating_add(edge_cost as u32);
            if next_cost < dist.get(&next).copied().unwrap_or(u32::MAX) {
                dist.insert(next, next_cost);
                prev.insert(next, node);
                heap.push(Reverse((next_cost, next)));
            }
        }
    }

    debug!(source = %source, reachable = dist.len(), "shortest paths computed");
    PathMap { source, dist, prev }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdwn_topology::TopologyConfig;
    use sdwn_wire::{NeighborReport, NodeAddress};

    const NET: u8 = 1;

    fn id(addr: u16) -> NodeId {
        NodeId::new(NET, NodeAddress::new(addr))
    }

    /// Build a graph where each `(from, to, rssi)` is installed by feeding a
    /// report from `to` hearing `from`.
    fn graph_with(edges: &[(u16, u16, u8)]) -> NetworkGraph {
        let mut graph = NetworkGraph::new(TopologyConfig::default());
        let mut reporters: std::collections::HashMap<u16, Vec<(NodeAddress, u8)>> =
            Default::default();
        for &(from, to, rssi) in edges {
            reporters
                .entry(to)
                .or_default()
                .push((NodeAddress::new(from), rssi));
        }
        for (reporter, links) in reporters {
            graph.update_from_report(&NeighborReport {
                reporter: id(reporter),
                distance: 1,
                battery: 200,
                links,
            });
        }
        graph
    }

    #[test]
    fn test_direct_and_relayed_paths() {
        // a -> b strong, a -> c weak, c reachable cheaply through b
        let graph = graph_with(&[
            (2, 3, 250), // cost 5
            (2, 4, 100), // cost 155
            (3, 4, 250), // cost 5
        ]);
        let paths = shortest_paths(&graph, id(2));

        assert_eq!(paths.path_to(id(3)), Some(vec![id(2), id(3)]));
        assert_eq!(paths.path_to(id(4)), Some(vec![id(2), id(3), id(4)]));
        assert_eq!(paths.cost_to(id(4)), Some(10));
    }

    #[test]
    fn test_unreachable_is_none() {
        let graph = graph_with(&[(2, 3, 250), (5, 4, 250)]);
        let paths = shortest_paths(&graph, id(2));
        assert_eq!(paths.path_to(id(5)), None);
        assert_eq!(paths.cost_to(id(5)), None);
    }

    #[test]
    fn test_source_path_is_itself() {
        let graph = graph_with(&[(2, 3, 250)]);
        let paths = shortest_paths(&graph, id(2));
        assert_eq!(paths.path_to(id(2)), Some(vec![id(2)]));
    }

    #[test]
    fn test_edges_are_directed() {
        // only 3 -> 2 exists (2 reported hearing 3)
        let graph = graph_with(&[(3, 2, 250)]);
        let from_three = shortest_paths(&graph, id(3));
        assert!(from_three.path_to(id(2)).is_some());

        let from_two = shortest_paths(&graph, id(2));
        assert_eq!(from_two.path_to(id(3)), None);
    }
}

//! Route decisions with per-source caching, and OPEN_PATH construction.

use std::collections::HashMap;

use sdwn_topology::NetworkGraph;
use sdwn_wire::{NodeAddress, NodeId, OpenPathView, Packet, WireError};
use tracing::{debug, info};

use crate::dijkstra::{shortest_paths, PathMap};

/// Outcome of one routing request.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RouteOutcome {
    /// A multi-hop path exists and should be installed
    Install {
        /// Ordered node list from the requesting node to the destination
        path: Vec<NodeId>,
    },
    /// No usable route: destination unreachable, identical to the source,
    /// or already adjacent. Surfaced to the caller, never guessed around.
    NoRoute,
}

/// Answers no-route requests against the topology graph.
///
/// The shortest-path tree is recomputed only when the requesting source
/// changes or the graph's modification counter advanced; per-destination
/// extractions are cached until then.
#[derive(Debug, Default)]
pub struct RouteManager {
    paths: Option<PathMap>,
    graph_version: u64,
    cache: HashMap<NodeId, Option<Vec<NodeId>>>,
    recomputations: u64,
}

impl RouteManager {
    /// Create a manager with an empty cache
    pub fn new() -> Self {
        RouteManager::default()
    }

    /// Resolve a route from `source` to `dst`.
    pub fn route(&mut self, graph: &NetworkGraph, source: NodeId, dst: NodeId) -> RouteOutcome {
        let stale = match &self.paths {
            Some(paths) => paths.source() != source || self.graph_version != graph.version(),
            None => true,
        };
        if stale {
            debug!(source = %source, version = graph.version(), "recomputing shortest paths");
            self.paths = Some(shortest_paths(graph, source));
            self.graph_version = graph.version();
            self.cache.clear();
            self.recomputations += 1;
        }

        let paths = match &self.paths {
            Some(paths) => paths,
            None => return RouteOutcome::NoRoute,
        };
        let path = self
            .cache
            .entry(dst)
            .or_insert_with(|| paths.path_to(dst))
            .clone();

        match path {
            // a usable path has more than one hop; adjacency and self-routes
            // are not installed
            Some(path) if path.len() > 2 => {
                info!(source = %source, dst = %dst, hops = path.len() - 1, "path found");
                RouteOutcome::Install { path }
            }
            _ => {
                debug!(source = %source, dst = %dst, "no installable route");
                RouteOutcome::NoRoute
            }
        }
    }

    /// How many times the shortest-path tree was recomputed
    pub fn recomputations(&self) -> u64 {
        self.recomputations
    }
}

/// Build the OPEN_PATH packet for an installable path, addressed to the
/// path head.
pub fn open_path_packet(
    net: u8,
    controller: NodeAddress,
    path: &[NodeId],
) -> Result<Packet, WireError> {
    let addresses: Vec<NodeAddress> = path.iter().map(|id| id.addr).collect();
    OpenPathView::build(net, controller, &addresses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdwn_topology::TopologyConfig;
    use sdwn_wire::NeighborReport;

    const NET: u8 = 1;

    fn id(addr: u16) -> NodeId {
        NodeId::new(NET, NodeAddress::new(addr))
    }

    fn feed(graph: &mut NetworkGraph, reporter: u16, links: &[(u16, u8)]) {
        graph.update_from_report(&NeighborReport {
            reporter: id(reporter),
            distance: 1,
            battery: 200,
            links: links
                .iter()
                .map(|&(addr, rssi)| (NodeAddress::new(addr), rssi))
                .collect(),
        });
    }

    /// Line topology 2 - 3 - 4 with symmetric strong links.
    fn line_graph() -> NetworkGraph {
        let mut graph = NetworkGraph::new(TopologyConfig::default());
        feed(&mut graph, 2, &[(3, 250)]);
        feed(&mut graph, 3, &[(2, 250), (4, 250)]);
        feed(&mut graph, 4, &[(3, 250)]);
        graph
    }

    #[test]
    fn test_multi_hop_path_installs() {
        let graph = line_graph();
        let mut manager = RouteManager::new();
        assert_eq!(
            manager.route(&graph, id(2), id(4)),
            RouteOutcome::Install {
                path: vec![id(2), id(3), id(4)]
            }
        );
    }

    #[test]
    fn test_adjacent_and_unknown_are_no_route() {
        let graph = line_graph();
        let mut manager = RouteManager::new();
        assert_eq!(manager.route(&graph, id(2), id(3)), RouteOutcome::NoRoute);
        assert_eq!(manager.route(&graph, id(2), id(99)), RouteOutcome::NoRoute);
        assert_eq!(manager.route(&graph, id(2), id(2)), RouteOutcome::NoRoute);
    }

    #[test]
    fn test_cache_reused_within_epoch() {
        let graph = line_graph();
        let mut manager = RouteManager::new();

        manager.route(&graph, id(2), id(4));
        manager.route(&graph, id(2), id(4));
        manager.route(&graph, id(2), id(3));
        assert_eq!(manager.recomputations(), 1);
    }

    #[test]
    fn test_topology_change_invalidates_cache() {
        let mut graph = line_graph();
        let mut manager = RouteManager::new();

        manager.route(&graph, id(2), id(4));
        assert_eq!(manager.recomputations(), 1);

        // drop the 3 -> 4 half of the middle link
        feed(&mut graph, 4, &[]);
        assert_eq!(manager.route(&graph, id(2), id(4)), RouteOutcome::NoRoute);
        assert_eq!(manager.recomputations(), 2);
    }

    #[test]
    fn test_source_change_invalidates_cache() {
        let graph = line_graph();
        let mut manager = RouteManager::new();

        manager.route(&graph, id(2), id(4));
        manager.route(&graph, id(4), id(2));
        manager.route(&graph, id(2), id(4));
        assert_eq!(manager.recomputations(), 3);
    }

    #[test]
    fn test_open_path_packet_shape() {
        let path = vec![id(2), id(3), id(4)];
        let packet = open_path_packet(NET, NodeAddress::new(1), &path).unwrap();
        assert_eq!(packet.dst(), NodeAddress::new(2));

        let view = OpenPathView::new(&packet).unwrap();
        assert_eq!(
            view.path(),
            vec![
                NodeAddress::new(2),
                NodeAddress::new(3),
                NodeAddress::new(4)
            ]
        );
    }
}

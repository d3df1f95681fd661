//! Shortest-path route computation and installation for the controller.
//!
//! A node that cannot match a packet escalates it; the controller answers
//! by computing the cheapest path over the topology graph and pushing an
//! OPEN_PATH packet down the route. Single-source results are cached per
//! requesting node and invalidated by the graph's modification counter.

pub mod dijkstra;
pub mod installer;

pub use dijkstra::{shortest_paths, PathMap};
pub use installer::{open_path_packet, RouteManager, RouteOutcome};

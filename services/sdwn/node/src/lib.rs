//! Mote runtime for sdwn.
//!
//! Every node runs one worker task that owns all of its mutable state: the
//! match-action engine, the neighbor table, the routing flags, and the
//! fragmentation machinery. The task multiplexes a bounded intake queue,
//! the beacon/report/aging timers, a command channel, and the cooperative
//! stop flag; nothing else ever touches node state, so no lock is needed.
//!
//! The transport boundary is two queues of raw frames: `deliver` pushes an
//! inbound frame (with the received signal strength), `next_outbound`
//! awaits the next frame to put on the air. Sinks additionally own an
//! uplink channel pair toward the controller.
//!
//! ## Example
//!
//! ```rust,no_run
//! use sdwn_node::{Node, NodeConfig};
//! use sdwn_wire::NodeAddress;
//!
//! # async fn example() {
//! let mut sink = Node::spawn(NodeConfig {
//!     addr: NodeAddress::new(1),
//!     is_sink: true,
//!     ..NodeConfig::default()
//! });
//!
//! // shuttle frames between the node and the medium
//! while let Some(frame) = sink.next_outbound().await {
//!     // hand `frame` to every neighbor's `deliver`
//!     let _ = frame;
//! }
//! # }
//! ```

pub mod config;
pub mod handle;
pub mod runtime;

pub use config::NodeConfig;
pub use handle::{NodeCommand, NodeCommander, NodeError, NodeHandle, NodeInbox, NodeSnapshot, Origin};
pub use runtime::Node;

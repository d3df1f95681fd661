//! Controller runtime for sdwn.
//!
//! One dispatch task consumes the frames sinks forward upward: reports feed
//! the topology graph, reassembled requests drive route computation and
//! OPEN_PATH installation, and configuration replies land in a correlation
//! cache that backs the synchronous query helpers. The graph and the route
//! cache share a single coarse lock so path computation always sees a
//! consistent snapshot.

pub mod core;
pub mod correlation;

pub use crate::core::{
    Controller, ControllerConfig, ControllerError, ControllerHandle, ControllerInbox,
    ControllerStats,
};
pub use correlation::{QueryKey, ResponseCache};

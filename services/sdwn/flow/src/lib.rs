//! Per-node flow table and match-action engine for sdwn.
//!
//! A mote keeps an ordered rule list; every incoming packet is matched
//! against the rules in insertion order, the first full match wins, and the
//! winner's actions execute in list order. This crate holds that engine
//! plus the node-local state the actions touch: the status register, the
//! neighbor table, the accepted-address list, and the registry of native
//! function callbacks.

pub mod engine;
pub mod registry;
pub mod state;
pub mod table;

pub use engine::{window_matches, ActionError, EngineIo, MatchEngine};
pub use registry::{FunctionContext, FunctionRegistry, NodeFunction};
pub use state::{AcceptedAddresses, NeighborTable, StatusRegister, DEFAULT_STATUS_LEN};
pub use table::{AgingOutcome, FlowTable};

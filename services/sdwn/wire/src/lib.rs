//! Packet framing, flow-table sub-formats, and fragmentation for sdwn.
//!
//! This crate provides the byte-exact wire protocol shared by motes and the
//! controller: the fixed 10-byte packet header, the typed payload views for
//! each packet kind, the bit-packed flow-table entry format, the textual rule
//! syntax, and the fragment/reassembly logic for oversized control payloads.
//!
//! ## Wire format
//!
//! ```text
//! +-----+-----+------+------+------+-----+------+---------------+
//! | net | len | dst  | src  | type | ttl | nxh  | payload       |
//! | 1B  | 1B  | 2B   | 2B   | 1B   | 1B  | 2B   | len - 10 B    |
//! +-----+-----+------+------+------+-----+------+---------------+
//! ```
//!
//! Network ids 0..=62 identify in-network packets; anything above is a
//! foreign frame carried through unmodified. The whole packet never exceeds
//! 116 bytes, and the `len` field is maintained by the codec on every
//! mutation. The layouts in this crate interoperate with deployed node
//! firmware and must not change silently.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod addr;
pub mod entry;
pub mod error;
pub mod fragment;
pub mod packet;
pub mod parse;
pub mod views;

// Re-export main types
pub use addr::{NodeAddress, NodeId};
pub use entry::{
    Action, ArithOp, FlowTableEntry, Location, OperandSize, Operator, ResultLocation, SetAction,
    Stats, Window, RULE_TTL_PERMANENT, WINDOW_SIZE,
};
pub use error::WireError;
pub use fragment::{Fragmenter, Reassembler, FRAGMENT_HEADER_LEN, MAX_FRAGMENT_DATA};
pub use packet::{Packet, PacketType, DEFAULT_TTL, HEADER_LEN, MAX_NET_ID, MAX_PACKET_LEN};
pub use parse::ParseError;
pub use views::{
    BeaconView, ConfigProperty, ConfigView, NeighborReport, OpenPathView, ReportView, RequestView,
    ResponseView,
};

//! Flow-table entry sub-format: windows, actions, and stats.
//!
//! Entries travel inside RESPONSE and CONFIG packets as
//! `[1B window bytes][windows, 5B each][(1B length, action bytes)*][2B stats]`.
//! Every layout here is bit-exact against deployed node firmware.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

use crate::addr::NodeAddress;
use crate::error::WireError;
use crate::packet::{DST_OFFSET, TYP_OFFSET};

/// Encoded size of one window in bytes
pub const WINDOW_SIZE: usize = 5;

/// Stats TTL value marking an entry exempt from aging
pub const RULE_TTL_PERMANENT: u8 = 255;

/// Default finite lifetime for freshly installed entries
pub const RULE_TTL_DEFAULT: u8 = 100;

/// Relational operator of a window predicate
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    /// `lhs == rhs`
    Equal = 0,
    /// `lhs != rhs`
    NotEqual = 1,
    /// `lhs > rhs`
    Greater = 2,
    /// `lhs < rhs`
    Less = 3,
    /// `lhs >= rhs`
    GreaterOrEqual = 4,
    /// `lhs <= rhs`
    LessOrEqual = 5,
}

impl Operator {
    /// Apply the operator to two resolved operand values
    pub fn eval(self, lhs: u16, rhs: u16) -> bool {
        match self {
            Operator::Equal => lhs == rhs,
            Operator::NotEqual => lhs != rhs,
            Operator::Greater => lhs > rhs,
            Operator::Less => lhs < rhs,
            Operator::GreaterOrEqual => lhs >= rhs,
            Operator::LessOrEqual => lhs <= rhs,
        }
    }
}

impl TryFrom<u8> for Operator {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Operator::Equal),
            1 => Ok(Operator::NotEqual),
            2 => Ok(Operator::Greater),
            3 => Ok(Operator::Less),
            4 => Ok(Operator::GreaterOrEqual),
            5 => Ok(Operator::LessOrEqual),
            _ => Err(WireError::Operator(value)),
        }
    }
}

/// Where an operand value comes from
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Location {
    /// No operand
    None = 0,
    /// The operand field is the literal value
    Const = 1,
    /// The operand field is a byte offset into the packet
    Packet = 2,
    /// The operand field is an index into the node's status register
    Status = 3,
}

impl TryFrom<u8> for Location {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Location::None),
            1 => Ok(Location::Const),
            2 => Ok(Location::Packet),
            3 => Ok(Location::Status),
            _ => Err(WireError::Location(value)),
        }
    }
}

/// Width of a PACKET/STATUS operand read
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperandSize {
    /// Single-byte read
    One = 0,
    /// Big-endian two-byte read
    Two = 1,
}

/// One match predicate: 1 descriptor byte plus two 2-byte operands.
///
/// Descriptor bit layout: `[operator:3 @5][left:2 @3][right:2 @1][size:1 @0]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    /// Relational operator
    pub op: Operator,
    /// Left operand location
    pub lhs_loc: Location,
    /// Right operand location
    pub rhs_loc: Location,
    /// Operand read width
    pub size: OperandSize,
    /// Left operand field
    pub lhs: u16,
    /// Right operand field
    pub rhs: u16,
}

impl Window {
    /// Encode into the 5-byte wire form
    pub fn encode(&self, out: &mut Vec<u8>) {
        let descriptor = ((self.op as u8) << 5)
            | ((self.lhs_loc as u8) << 3)
            | ((self.rhs_loc as u8) << 1)
            | self.size as u8;
        out.push(descriptor);
        out.extend_from_slice(&self.lhs.to_be_bytes());
        out.extend_from_slice(&self.rhs.to_be_bytes());
    }

    /// Decode from the 5-byte wire form
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < WINDOW_SIZE {
            return Err(WireError::Malformed);
        }
        let descriptor = bytes[0];
        Ok(Window {
            op: Operator::try_from((descriptor >> 5) & 0x07)?,
            lhs_loc: Location::try_from((descriptor >> 3) & 0x03)?,
            rhs_loc: Location::try_from((descriptor >> 1) & 0x03)?,
            size: if descriptor & 0x01 == 0 {
                OperandSize::One
            } else {
                OperandSize::Two
            },
            lhs: u16::from_be_bytes([bytes[1], bytes[2]]),
            rhs: u16::from_be_bytes([bytes[3], bytes[4]]),
        })
    }

    /// Predicate `packet.dst == addr`
    pub fn dst_equals(addr: NodeAddress) -> Self {
        Window {
            op: Operator::Equal,
            lhs_loc: Location::Packet,
            rhs_loc: Location::Const,
            size: OperandSize::Two,
            lhs: DST_OFFSET as u16,
            rhs: addr.as_u16(),
        }
    }

    /// Predicate `packet.dst != addr`
    pub fn dst_differs(addr: NodeAddress) -> Self {
        Window {
            op: Operator::NotEqual,
            ..Window::dst_equals(addr)
        }
    }

    /// Predicate `packet.type == typ`
    pub fn typ_equals(typ: crate::packet::PacketType) -> Self {
        Window {
            op: Operator::Equal,
            lhs_loc: Location::Packet,
            rhs_loc: Location::Const,
            size: OperandSize::One,
            lhs: TYP_OFFSET as u16,
            rhs: typ as u16,
        }
    }
}

/// Arithmetic/bitwise operator of a SET action
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum ArithOp {
    Add = 0,
    Sub = 1,
    Mul = 2,
    Div = 3,
    Mod = 4,
    And = 5,
    Or = 6,
    Xor = 7,
}

impl ArithOp {
    /// Apply the operator; `None` on division by zero
    pub fn eval(self, lhs: u16, rhs: u16) -> Option<u16> {
        match self {
            ArithOp::Add => Some(lhs.wrapping_add(rhs)),
            ArithOp::Sub => Some(lhs.wrapping_sub(rhs)),
            ArithOp::Mul => Some(lhs.wrapping_mul(rhs)),
            ArithOp::Div => lhs.checked_div(rhs),
            ArithOp::Mod => lhs.checked_rem(rhs),
            ArithOp::And => Some(lhs & rhs),
            ArithOp::Or => Some(lhs | rhs),
            ArithOp::Xor => Some(lhs ^ rhs),
        }
    }
}

impl TryFrom<u8> for ArithOp {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ArithOp::Add),
            1 => Ok(ArithOp::Sub),
            2 => Ok(ArithOp::Mul),
            3 => Ok(ArithOp::Div),
            4 => Ok(ArithOp::Mod),
            5 => Ok(ArithOp::And),
            6 => Ok(ArithOp::Or),
            7 => Ok(ArithOp::Xor),
            _ => Err(WireError::SetOperator(value)),
        }
    }
}

/// Where a SET action writes its result
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultLocation {
    /// Write into the packet bytes at the result offset
    Packet = 0,
    /// Write into the status register at the result index
    Status = 1,
}

/// SET action body: 1 descriptor byte plus three 2-byte operands.
///
/// Descriptor bit layout: `[right:2 @6][operator:3 @3][left:2 @1][result:1 @0]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SetAction {
    /// Arithmetic operator
    pub op: ArithOp,
    /// Result write location
    pub res_loc: ResultLocation,
    /// Left operand location
    pub lhs_loc: Location,
    /// Right operand location
    pub rhs_loc: Location,
    /// Result offset/index
    pub res: u16,
    /// Left operand field
    pub lhs: u16,
    /// Right operand field
    pub rhs: u16,
}

impl SetAction {
    fn encode(&self, out: &mut Vec<u8>) {
        let descriptor = ((self.rhs_loc as u8) << 6)
            | ((self.op as u8) << 3)
            | ((self.lhs_loc as u8) << 1)
            | self.res_loc as u8;
        out.push(descriptor);
        out.extend_from_slice(&self.res.to_be_bytes());
        out.extend_from_slice(&self.lhs.to_be_bytes());
        out.extend_from_slice(&self.rhs.to_be_bytes());
    }

    fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() != 7 {
            return Err(WireError::Malformed);
        }
        let descriptor = bytes[0];
        Ok(SetAction {
            rhs_loc: Location::try_from((descriptor >> 6) & 0x03)?,
            op: ArithOp::try_from((descriptor >> 3) & 0x07)?,
            lhs_loc: Location::try_from((descriptor >> 1) & 0x03)?,
            res_loc: if descriptor & 0x01 == 0 {
                ResultLocation::Packet
            } else {
                ResultLocation::Status
            },
            res: u16::from_be_bytes([bytes[1], bytes[2]]),
            lhs: u16::from_be_bytes([bytes[3], bytes[4]]),
            rhs: u16::from_be_bytes([bytes[5], bytes[6]]),
        })
    }
}

/// One action of a flow-table entry, tagged by its wire byte
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Forward to a single next hop (tag 1)
    ForwardUnicast {
        /// Address to forward to
        next_hop: NodeAddress,
    },
    /// Forward to all neighbors (tag 2)
    ForwardBroadcast {
        /// Next-hop field placed on the wire, normally broadcast
        next_hop: NodeAddress,
    },
    /// Consume the packet (tag 3)
    Drop,
    /// Escalate the packet to the controller (tag 4)
    Ask,
    /// Invoke a registered node function (tag 5)
    Function {
        /// Registry id of the function
        id: u8,
        /// Opaque argument bytes handed to the callback
        args: Vec<u8>,
    },
    /// Patch a packet byte or status register cell (tag 6)
    Set(SetAction),
    /// Re-submit the packet for another matching pass (tag 7)
    Match,
}

impl Action {
    /// Wire tag byte of this action
    pub fn tag(&self) -> u8 {
        match self {
            Action::ForwardUnicast { .. } => 1,
            Action::ForwardBroadcast { .. } => 2,
            Action::Drop => 3,
            Action::Ask => 4,
            Action::Function { .. } => 5,
            Action::Set(_) => 6,
            Action::Match => 7,
        }
    }

    /// Encode the action body (tag included) into `out`
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.tag());
        match self {
            Action::ForwardUnicast { next_hop } | Action::ForwardBroadcast { next_hop } => {
                out.push(next_hop.hi());
                out.push(next_hop.lo());
            }
            Action::Drop | Action::Ask | Action::Match => {}
            Action::Function { id, args } => {
                out.push(*id);
                out.extend_from_slice(args);
            }
            Action::Set(set) => set.encode(out),
        }
    }

    /// Decode one action from its `(length, bytes)` body
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let (&tag, body) = bytes.split_first().ok_or(WireError::Malformed)?;
        match tag {
            1 | 2 => {
                if body.len() != 2 {
                    return Err(WireError::Malformed);
                }
                let next_hop = NodeAddress::from_bytes(body[0], body[1]);
                if tag == 1 {
                    Ok(Action::ForwardUnicast { next_hop })
                } else {
                    Ok(Action::ForwardBroadcast { next_hop })
                }
            }
            3 => {
                if !body.is_empty() {
                    return Err(WireError::Malformed);
                }
                Ok(Action::Drop)
            }
            4 => {
                if !body.is_empty() {
                    return Err(WireError::Malformed);
                }
                Ok(Action::Ask)
            }
            5 => {
                let (&id, args) = body.split_first().ok_or(WireError::Malformed)?;
                Ok(Action::Function {
                    id,
                    args: args.to_vec(),
                })
            }
            6 => Ok(Action::Set(SetAction::decode(body)?)),
            7 => {
                if !body.is_empty() {
                    return Err(WireError::Malformed);
                }
                Ok(Action::Match)
            }
            other => Err(WireError::ActionTag(other)),
        }
    }
}

/// Entry lifetime and usage counters.
///
/// On the wire stats occupy two trailing bytes: the TTL and one reserved
/// byte. The hit counter is node-local and never transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Remaining lifetime; [`RULE_TTL_PERMANENT`] exempts the entry from aging
    pub ttl: u8,
    /// Packets matched by this entry since installation
    pub count: u32,
}

impl Stats {
    /// Stats for a permanent entry
    pub const fn permanent() -> Self {
        Stats {
            ttl: RULE_TTL_PERMANENT,
            count: 0,
        }
    }

    /// Whether the entry is exempt from aging
    pub const fn is_permanent(&self) -> bool {
        self.ttl == RULE_TTL_PERMANENT
    }
}

impl Default for Stats {
    fn default() -> Self {
        Stats {
            ttl: RULE_TTL_DEFAULT,
            count: 0,
        }
    }
}

/// One flow-table entry: conjunction of windows, ordered actions, stats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowTableEntry {
    /// Match predicates; all must hold
    pub windows: SmallVec<[Window; 3]>,
    /// Actions executed in order on match
    pub actions: Vec<Action>,
    /// Lifetime and hit counter
    pub stats: Stats,
}

impl FlowTableEntry {
    /// Build an entry from its parts with default stats
    pub fn new(windows: impl IntoIterator<Item = Window>, actions: Vec<Action>) -> Self {
        FlowTableEntry {
            windows: windows.into_iter().collect(),
            actions,
            stats: Stats::default(),
        }
    }

    /// Mark the entry permanent
    pub fn permanent(mut self) -> Self {
        self.stats = Stats::permanent();
        self
    }

    /// Entry identity for replace-vs-append decisions: the window list alone.
    pub fn same_windows(&self, other: &FlowTableEntry) -> bool {
        self.windows == other.windows
    }

    /// Encode into the wire form
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(3 + self.windows.len() * WINDOW_SIZE);
        out.push((self.windows.len() * WINDOW_SIZE) as u8);
        for window in &self.windows {
            window.encode(&mut out);
        }
        for action in &self.actions {
            let mut body = Vec::new();
            action.encode(&mut body);
            out.push(body.len() as u8);
            out.extend_from_slice(&body);
        }
        out.push(self.stats.ttl);
        out.push(0); // reserved
        out
    }

    /// Decode from the wire form, consuming the whole slice
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let (&window_bytes, mut rest) = bytes.split_first().ok_or(WireError::Malformed)?;
        let window_bytes = window_bytes as usize;
        if window_bytes % WINDOW_SIZE != 0 || rest.len() < window_bytes + 2 {
            return Err(WireError::Malformed);
        }

        let mut windows = SmallVec::new();
        for chunk in rest[..window_bytes].chunks_exact(WINDOW_SIZE) {
            windows.push(Window::decode(chunk)?);
        }
        rest = &rest[window_bytes..];

        let mut actions = Vec::new();
        while rest.len() > 2 {
            let action_len = rest[0] as usize;
            if action_len == 0 || rest.len() < 1 + action_len + 2 {
                return Err(WireError::Malformed);
            }
            actions.push(Action::decode(&rest[1..1 + action_len])?);
            rest = &rest[1 + action_len..];
        }

        if rest.len() != 2 {
            return Err(WireError::Malformed);
        }
        let stats = Stats {
            ttl: rest[0],
            count: 0,
        };

        Ok(FlowTableEntry {
            windows,
            actions,
            stats,
        })
    }
}

impl fmt::Display for FlowTableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "entry[{} windows, {} actions, ttl {}]",
            self.windows.len(),
            self.actions.len(),
            self.stats.ttl
        )
    }
}

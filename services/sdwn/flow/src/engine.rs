//! Rule matching and action execution.
//!
//! Window truth is a pure function of the resolved operands: an
//! out-of-range PACKET or STATUS read makes the window false, never an
//! error. SET is stricter: a result landing outside the packet or the
//! status register aborts the remaining action chain (earlier side effects
//! stand, nothing is rolled back).

use thiserror::Error;
use tracing::{debug, warn};

use sdwn_wire::entry::{
    Action, Location, OperandSize, ResultLocation, SetAction, Window,
};
use sdwn_wire::Packet;

use crate::registry::{FunctionContext, FunctionRegistry};
use crate::state::{AcceptedAddresses, NeighborTable, StatusRegister};
use crate::table::FlowTable;

/// Fatal per-packet action failures; the chain stops, the packet loop
/// continues.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionError {
    /// SET result offset outside the packet
    #[error("set result offset {0} outside packet")]
    PacketOffset(u16),

    /// SET result index outside the status register
    #[error("set result index {0} outside status register")]
    StatusIndex(u16),

    /// SET operand could not be resolved
    #[error("set operand unresolvable")]
    Operand,

    /// Division or modulo by zero in a SET expression
    #[error("set division by zero")]
    DivideByZero,
}

fn read_operand(
    loc: Location,
    field: u16,
    size: OperandSize,
    packet: &Packet,
    status: &StatusRegister,
) -> Option<u16> {
    match (loc, size) {
        (Location::None, _) => None,
        (Location::Const, _) => Some(field),
        (Location::Packet, OperandSize::One) => packet.get_byte(field as usize).map(u16::from),
        (Location::Packet, OperandSize::Two) => packet.get_u16(field as usize),
        (Location::Status, OperandSize::One) => status.get(field).map(u16::from),
        (Location::Status, OperandSize::Two) => status.get_u16(field),
    }
}

/// Evaluate one window against a packet and status register.
pub fn window_matches(window: &Window, packet: &Packet, status: &StatusRegister) -> bool {
    let lhs = read_operand(window.lhs_loc, window.lhs, window.size, packet, status);
    let rhs = read_operand(window.rhs_loc, window.rhs, window.size, packet, status);
    match (lhs, rhs) {
        (Some(lhs), Some(rhs)) => window.op.eval(lhs, rhs),
        _ => false,
    }
}

/// Apply a SET action. Operand reads are single-byte for PACKET and STATUS
/// locations (the descriptor carries no width bit); the result's low byte
/// is written.
pub fn apply_set(
    set: &SetAction,
    packet: &mut Packet,
    status: &mut StatusRegister,
) -> Result<(), ActionError> {
    let lhs = read_operand(set.lhs_loc, set.lhs, OperandSize::One, packet, status)
        .ok_or(ActionError::Operand)?;
    let rhs = read_operand(set.rhs_loc, set.rhs, OperandSize::One, packet, status)
        .ok_or(ActionError::Operand)?;
    let value = set.op.eval(lhs, rhs).ok_or(ActionError::DivideByZero)?;

    match set.res_loc {
        ResultLocation::Packet => packet
            .set_byte(set.res as usize, value as u8)
            .map_err(|_| ActionError::PacketOffset(set.res)),
        ResultLocation::Status => {
            if status.set(set.res, value as u8) {
                Ok(())
            } else {
                Err(ActionError::StatusIndex(set.res))
            }
        }
    }
}

/// Packets an engine pass wants moved onto the node's queues.
#[derive(Debug, Default)]
pub struct EngineIo {
    /// Packets to transmit (next hop already set, TTL decremented)
    pub transmit: Vec<Packet>,
    /// Packets to put back on the intake queue
    pub resubmit: Vec<Packet>,
    /// Packets to escalate to the controller
    pub ask: Vec<Packet>,
}

/// The match-action engine: rule table, status register, and function
/// registry of one node.
#[derive(Debug, Default)]
pub struct MatchEngine {
    /// Ordered rule list
    pub table: FlowTable,
    /// Status register actions read and patch
    pub status: StatusRegister,
    /// Native capabilities reachable from FUNCTION actions
    pub functions: FunctionRegistry,
}

impl MatchEngine {
    /// Create an engine with a status register of `status_len` cells
    pub fn new(status_len: usize) -> Self {
        MatchEngine {
            table: FlowTable::new(),
            status: StatusRegister::new(status_len),
            functions: FunctionRegistry::new(),
        }
    }

    fn first_match(&self, packet: &Packet) -> Option<usize> {
        self.table.iter().position(|entry| {
            entry
                .windows
                .iter()
                .all(|window| window_matches(window, packet, &self.status))
        })
    }

    /// Run one packet through the table.
    ///
    /// The first matching rule wins and its actions execute in list order;
    /// with no match the packet comes back in `ask`, which the node treats
    /// exactly like an ASK action.
    pub fn process(
        &mut self,
        packet: Packet,
        neighbors: &mut NeighborTable,
        accepted: &mut AcceptedAddresses,
    ) -> EngineIo {
        let mut io = EngineIo::default();

        let Some(position) = self.first_match(&packet) else {
            debug!(dst = %packet.dst(), "no matching rule, escalating");
            io.ask.push(packet);
            return io;
        };

        self.table.hit(position);
        // the chain runs against a snapshot of the actions so a FUNCTION
        // callback may rewrite the table mid-execution
        let actions = match self.table.get(position) {
            Some(entry) => entry.actions.clone(),
            None => return io,
        };

        let mut packet = packet;
        for action in &actions {
            match action {
                Action::ForwardUnicast { next_hop } | Action::ForwardBroadcast { next_hop } => {
                    let mut copy = packet.clone();
                    copy.set_next_hop(*next_hop);
                    copy.decrement_ttl();
                    io.transmit.push(copy);
                }
                Action::Drop => {
                    debug!(dst = %packet.dst(), "packet dropped by rule");
                }
                Action::Ask => {
                    io.ask.push(packet.clone());
                }
                Action::Function { id, args } => match self.functions.get(*id) {
                    Some(function) => {
                        let mut ctx = FunctionContext {
                            table: &mut self.table,
                            status: &mut self.status,
                            neighbors,
                            accepted,
                            intake: &mut io.resubmit,
                            outtake: &mut io.transmit,
                        };
                        function.call(&mut ctx, args, &mut packet);
                    }
                    None => {
                        debug!(id, "no function registered, skipping");
                    }
                },
                Action::Set(set) => {
                    if let Err(error) = apply_set(set, &mut packet, &mut self.status) {
                        warn!(%error, "set action failed, aborting action chain");
                        break;
                    }
                }
                Action::Match => {
                    io.resubmit.push(packet.clone());
                }
            }
        }

        io
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdwn_wire::entry::{ArithOp, FlowTableEntry, Operator, Stats};
    use sdwn_wire::{NodeAddress, PacketType};
    use std::sync::Arc;

    const NET: u8 = 1;

    fn data_packet(dst: u16) -> Packet {
        let mut packet = Packet::new(
            NET,
            NodeAddress::new(2),
            NodeAddress::new(dst),
            PacketType::Data,
        );
        packet.set_payload(&[1, 2, 3]).unwrap();
        packet
    }

    fn forward_rule(dst: u16, hop: u16) -> FlowTableEntry {
        FlowTableEntry::new(
            [Window::dst_equals(NodeAddress::new(dst))],
            vec![Action::ForwardUnicast {
                next_hop: NodeAddress::new(hop),
            }],
        )
    }

    fn window(op: Operator, lhs_loc: Location, lhs: u16, rhs: u16) -> Window {
        Window {
            op,
            lhs_loc,
            rhs_loc: Location::Const,
            size: OperandSize::One,
            lhs,
            rhs,
        }
    }

    #[test]
    fn test_window_truth_table() {
        let packet = data_packet(9);
        let status = StatusRegister::default();

        let cases = [
            (Operator::Equal, 5u16, 5u16, true),
            (Operator::Equal, 5, 6, false),
            (Operator::NotEqual, 5, 6, true),
            (Operator::Greater, 6, 5, true),
            (Operator::Greater, 5, 5, false),
            (Operator::Less, 4, 5, true),
            (Operator::GreaterOrEqual, 5, 5, true),
            (Operator::GreaterOrEqual, 4, 5, false),
            (Operator::LessOrEqual, 5, 5, true),
        ];
        for (op, lhs, rhs, expected) in cases {
            let window = Window {
                op,
                lhs_loc: Location::Const,
                rhs_loc: Location::Const,
                size: OperandSize::One,
                lhs,
                rhs,
            };
            assert_eq!(window_matches(&window, &packet, &status), expected);
        }
    }

    #[test]
    fn test_out_of_range_read_never_matches() {
        let packet = data_packet(9);
        let status = StatusRegister::new(4);

        // packet offset far outside the buffer
        let w = window(Operator::Equal, Location::Packet, 110, 0);
        assert!(!window_matches(&w, &packet, &status));

        // status index outside the register, even for NOT_EQUAL
        let w = window(Operator::NotEqual, Location::Status, 99, 1);
        assert!(!window_matches(&w, &packet, &status));
    }

    #[test]
    fn test_first_match_wins_and_counts() {
        let mut engine = MatchEngine::new(4);
        engine.table.insert(forward_rule(9, 3));
        engine.table.insert(forward_rule(9, 4)); // same windows: replaces at 0
        engine.table.insert(forward_rule(8, 5));

        let mut neighbors = NeighborTable::new();
        let mut accepted = AcceptedAddresses::new();
        let io = engine.process(data_packet(9), &mut neighbors, &mut accepted);

        assert_eq!(io.transmit.len(), 1);
        assert_eq!(io.transmit[0].next_hop(), NodeAddress::new(4));
        assert_eq!(engine.table.get(0).unwrap().stats.count, 1);
        assert_eq!(engine.table.get(1).unwrap().stats.count, 0);
    }

    #[test]
    fn test_forward_decrements_ttl() {
        let mut engine = MatchEngine::new(4);
        engine.table.insert(forward_rule(9, 3));

        let mut packet = data_packet(9);
        packet.set_ttl(10);

        let mut neighbors = NeighborTable::new();
        let mut accepted = AcceptedAddresses::new();
        let io = engine.process(packet, &mut neighbors, &mut accepted);
        assert_eq!(io.transmit[0].ttl(), 9);
    }

    #[test]
    fn test_no_match_escalates() {
        let mut engine = MatchEngine::new(4);
        engine.table.insert(forward_rule(8, 3));

        let mut neighbors = NeighborTable::new();
        let mut accepted = AcceptedAddresses::new();
        let io = engine.process(data_packet(9), &mut neighbors, &mut accepted);
        assert!(io.transmit.is_empty());
        assert_eq!(io.ask.len(), 1);
    }

    #[test]
    fn test_set_patches_packet_bytes() {
        let mut engine = MatchEngine::new(4);
        let mut entry = forward_rule(9, 3);
        entry.actions.insert(
            0,
            Action::Set(SetAction {
                op: ArithOp::Add,
                res_loc: ResultLocation::Packet,
                lhs_loc: Location::Packet,
                rhs_loc: Location::Const,
                res: 10,
                lhs: 10,
                rhs: 1,
            }),
        );
        engine.table.insert(entry);

        let mut neighbors = NeighborTable::new();
        let mut accepted = AcceptedAddresses::new();
        let io = engine.process(data_packet(9), &mut neighbors, &mut accepted);

        // payload byte 0 (offset 10) went from 1 to 2 before forwarding
        assert_eq!(io.transmit[0].payload()[0], 2);
    }

    #[test]
    fn test_set_out_of_range_aborts_chain() {
        let mut engine = MatchEngine::new(4);
        let entry = FlowTableEntry {
            windows: [Window::dst_equals(NodeAddress::new(9))].into_iter().collect(),
            actions: vec![
                Action::Set(SetAction {
                    op: ArithOp::Add,
                    res_loc: ResultLocation::Status,
                    lhs_loc: Location::Const,
                    rhs_loc: Location::Const,
                    res: 99, // outside the register
                    lhs: 1,
                    rhs: 1,
                }),
                Action::ForwardUnicast {
                    next_hop: NodeAddress::new(3),
                },
            ],
            stats: Stats::default(),
        };
        engine.table.insert(entry);

        let mut neighbors = NeighborTable::new();
        let mut accepted = AcceptedAddresses::new();
        let io = engine.process(data_packet(9), &mut neighbors, &mut accepted);

        // the forward after the failing SET never ran
        assert!(io.transmit.is_empty());
        assert!(io.ask.is_empty());
    }

    #[test]
    fn test_earlier_effects_stand_when_chain_aborts() {
        let mut engine = MatchEngine::new(4);
        let entry = FlowTableEntry {
            windows: [Window::dst_equals(NodeAddress::new(9))].into_iter().collect(),
            actions: vec![
                Action::ForwardUnicast {
                    next_hop: NodeAddress::new(3),
                },
                Action::Set(SetAction {
                    op: ArithOp::Div,
                    res_loc: ResultLocation::Status,
                    lhs_loc: Location::Const,
                    rhs_loc: Location::Const,
                    res: 0,
                    lhs: 1,
                    rhs: 0, // divide by zero
                }),
                Action::Match,
            ],
            stats: Stats::default(),
        };
        engine.table.insert(entry);

        let mut neighbors = NeighborTable::new();
        let mut accepted = AcceptedAddresses::new();
        let io = engine.process(data_packet(9), &mut neighbors, &mut accepted);

        assert_eq!(io.transmit.len(), 1); // the forward before the abort stands
        assert!(io.resubmit.is_empty()); // the MATCH after it never ran
    }

    #[test]
    fn test_match_action_resubmits() {
        let mut engine = MatchEngine::new(4);
        let entry = FlowTableEntry::new(
            [Window::dst_equals(NodeAddress::new(9))],
            vec![Action::Match],
        );
        engine.table.insert(entry);

        let mut neighbors = NeighborTable::new();
        let mut accepted = AcceptedAddresses::new();
        let io = engine.process(data_packet(9), &mut neighbors, &mut accepted);
        assert_eq!(io.resubmit.len(), 1);
    }

    #[test]
    fn test_function_callback_sees_node_state() {
        let mut engine = MatchEngine::new(4);
        engine.functions.register(
            7,
            Arc::new(
                |ctx: &mut FunctionContext<'_>, args: &[u8], packet: &mut Packet| {
                    ctx.status.set(0, args[0]);
                    ctx.table.insert(forward_rule(8, 3));
                    let mut copy = packet.clone();
                    copy.set_next_hop(NodeAddress::new(1));
                    ctx.outtake.push(copy);
                },
            ),
        );
        let entry = FlowTableEntry::new(
            [Window::dst_equals(NodeAddress::new(9))],
            vec![Action::Function {
                id: 7,
                args: vec![42],
            }],
        );
        engine.table.insert(entry);

        let mut neighbors = NeighborTable::new();
        let mut accepted = AcceptedAddresses::new();
        let io = engine.process(data_packet(9), &mut neighbors, &mut accepted);

        assert_eq!(engine.status.get(0), Some(42));
        assert_eq!(engine.table.len(), 2);
        assert_eq!(io.transmit.len(), 1);
    }

    #[test]
    fn test_unregistered_function_is_noop() {
        let mut engine = MatchEngine::new(4);
        let entry = FlowTableEntry::new(
            [Window::dst_equals(NodeAddress::new(9))],
            vec![
                Action::Function { id: 5, args: vec![] },
                Action::ForwardUnicast {
                    next_hop: NodeAddress::new(3),
                },
            ],
        );
        engine.table.insert(entry);

        let mut neighbors = NeighborTable::new();
        let mut accepted = AcceptedAddresses::new();
        let io = engine.process(data_packet(9), &mut neighbors, &mut accepted);
        assert_eq!(io.transmit.len(), 1);
    }
}

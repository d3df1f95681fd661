//! Registry of native function callbacks invoked by FUNCTION actions.
//!
//! Capabilities are compiled in and selected at deploy time; the wire only
//! ever carries the one-byte id. Invoking an unregistered id is a no-op.

use std::collections::HashMap;
use std::sync::Arc;

use sdwn_wire::Packet;

use crate::state::{AcceptedAddresses, NeighborTable, StatusRegister};
use crate::table::FlowTable;

/// Everything a function callback may touch on its node.
///
/// `intake` and `outtake` are staging buffers the node runtime flushes to
/// its queues after the action chain finishes.
pub struct FunctionContext<'a> {
    /// The node's flow table
    pub table: &'a mut FlowTable,
    /// The node's status register
    pub status: &'a mut StatusRegister,
    /// The node's neighbor table
    pub neighbors: &'a mut NeighborTable,
    /// The node's accepted-address list
    pub accepted: &'a mut AcceptedAddresses,
    /// Packets to re-enqueue for matching
    pub intake: &'a mut Vec<Packet>,
    /// Packets to enqueue for transmission
    pub outtake: &'a mut Vec<Packet>,
}

/// A callable node capability
pub trait NodeFunction: Send + Sync {
    /// Invoke the capability on the matched packet
    fn call(&self, ctx: &mut FunctionContext<'_>, args: &[u8], packet: &mut Packet);
}

impl<F> NodeFunction for F
where
    F: Fn(&mut FunctionContext<'_>, &[u8], &mut Packet) + Send + Sync,
{
    fn call(&self, ctx: &mut FunctionContext<'_>, args: &[u8], packet: &mut Packet) {
        self(ctx, args, packet)
    }
}

/// Map from wire id to capability implementation.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<u8, Arc<dyn NodeFunction>>,
}

impl FunctionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        FunctionRegistry::default()
    }

    /// Bind `id` to a capability, replacing any previous binding
    pub fn register(&mut self, id: u8, function: Arc<dyn NodeFunction>) {
        self.functions.insert(id, function);
    }

    /// Remove the binding for `id`
    pub fn unregister(&mut self, id: u8) {
        self.functions.remove(&id);
    }

    /// Look up a capability
    pub fn get(&self, id: u8) -> Option<Arc<dyn NodeFunction>> {
        self.functions.get(&id).cloned()
    }

    /// Number of registered capabilities
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Whether no capability is registered
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<u8> = self.functions.keys().copied().collect();
        ids.sort_unstable();
        f.debug_struct("FunctionRegistry").field("ids", &ids).finish()
    }
}

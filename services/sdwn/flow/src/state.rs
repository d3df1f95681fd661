//! Node-local state touched by flow actions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sdwn_wire::NodeAddress;

/// Default status register length in cells
pub const DEFAULT_STATUS_LEN: usize = 32;

/// Fixed-size byte array actions can read and patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRegister {
    cells: Vec<u8>,
}

impl StatusRegister {
    /// Create a zeroed register of `len` cells
    pub fn new(len: usize) -> Self {
        StatusRegister {
            cells: vec![0; len],
        }
    }

    /// Read one cell
    pub fn get(&self, index: u16) -> Option<u8> {
        self.cells.get(index as usize).copied()
    }

    /// Read two adjacent cells as a big-endian value
    pub fn get_u16(&self, index: u16) -> Option<u16> {
        let hi = self.get(index)?;
        let lo = self.get(index + 1)?;
        Some(((hi as u16) << 8) | lo as u16)
    }

    /// Write one cell; `false` when the index is out of range
    pub fn set(&mut self, index: u16, value: u8) -> bool {
        match self.cells.get_mut(index as usize) {
            Some(cell) => {
                *cell = value;
                true
            }
            None => false,
        }
    }

    /// Register length in cells
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the register has no cells
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl Default for StatusRegister {
    fn default() -> Self {
        StatusRegister::new(DEFAULT_STATUS_LEN)
    }
}

/// What a node remembers about one neighbor between reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborInfo {
    /// Received signal strength of the neighbor's last beacon
    pub rssi: u8,
    /// Battery level the neighbor advertised
    pub battery: u8,
}

/// Neighbors heard since the last report, refreshed by beacons and drained
/// into each periodic REPORT.
#[derive(Debug, Clone, Default)]
pub struct NeighborTable {
    map: HashMap<NodeAddress, NeighborInfo>,
}

impl NeighborTable {
    /// Create an empty table
    pub fn new() -> Self {
        NeighborTable::default()
    }

    /// Record a beacon heard from `addr`
    pub fn observe(&mut self, addr: NodeAddress, rssi: u8, battery: u8) {
        self.map.insert(addr, NeighborInfo { rssi, battery });
    }

    /// Look up one neighbor
    pub fn get(&self, addr: NodeAddress) -> Option<NeighborInfo> {
        self.map.get(&addr).copied()
    }

    /// Snapshot `(address, rssi)` links for a report and clear the table,
    /// so each report only carries neighbors heard in the last period.
    pub fn drain_links(&mut self) -> Vec<(NodeAddress, u8)> {
        let mut links: Vec<(NodeAddress, u8)> = self
            .map
            .drain()
            .map(|(addr, info)| (addr, info.rssi))
            .collect();
        links.sort_by_key(|(addr, _)| *addr);
        links
    }

    /// Number of neighbors currently known
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether no neighbor has been heard since the last drain
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Addresses a node answers to beside its own and broadcast.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AcceptedAddresses {
    aliases: Vec<NodeAddress>,
}

impl AcceptedAddresses {
    /// Create an empty alias list
    pub fn new() -> Self {
        AcceptedAddresses::default()
    }

    /// Whether a packet addressed to `addr` concerns a node whose own
    /// address is `own`
    pub fn accepts(&self, own: NodeAddress, addr: NodeAddress) -> bool {
        addr == own || addr.is_broadcast() || self.aliases.contains(&addr)
    }

    /// Append an alias, ignoring duplicates
    pub fn add(&mut self, addr: NodeAddress) {
        if !self.aliases.contains(&addr) {
            self.aliases.push(addr);
        }
    }

    /// Remove an alias
    pub fn remove(&mut self, addr: NodeAddress) {
        self.aliases.retain(|&a| a != addr);
    }

    /// Alias at `index`, for config reads
    pub fn get(&self, index: usize) -> Option<NodeAddress> {
        self.aliases.get(index).copied()
    }

    /// Number of aliases
    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    /// Whether the alias list is empty
    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_register_bounds() {
        let mut status = StatusRegister::new(4);
        assert!(status.set(3, 9));
        assert!(!status.set(4, 9));
        assert_eq!(status.get(3), Some(9));
        assert_eq!(status.get(4), None);
        assert_eq!(status.get_u16(2), Some(9));
        assert_eq!(status.get_u16(3), None);
    }

    #[test]
    fn test_neighbor_table_drains() {
        let mut neighbors = NeighborTable::new();
        neighbors.observe(NodeAddress::new(3), 180, 250);
        neighbors.observe(NodeAddress::new(2), 190, 240);
        neighbors.observe(NodeAddress::new(3), 170, 250);

        let links = neighbors.drain_links();
        assert_eq!(
            links,
            vec![(NodeAddress::new(2), 190), (NodeAddress::new(3), 170)]
        );
        assert!(neighbors.is_empty());
    }

    #[test]
    fn test_accepted_addresses() {
        let own = NodeAddress::new(5);
        let mut accepted = AcceptedAddresses::new();
        assert!(accepted.accepts(own, own));
        assert!(accepted.accepts(own, NodeAddress::BROADCAST));
        assert!(!accepted.accepts(own, NodeAddress::new(6)));

        accepted.add(NodeAddress::new(6));
        accepted.add(NodeAddress::new(6));
        assert!(accepted.accepts(own, NodeAddress::new(6)));
        assert_eq!(accepted.len(), 1);

        accepted.remove(NodeAddress::new(6));
        assert!(!accepted.accepts(own, NodeAddress::new(6)));
    }
}

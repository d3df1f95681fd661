//! Node addressing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::parse::ParseError;

/// 2-byte node address, ordered by its unsigned integer value.
///
/// Rendered and parsed in dotted form (`hi.lo`); `255.255` is the broadcast
/// sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeAddress(u16);

impl NodeAddress {
    /// Broadcast address (`255.255`)
    pub const BROADCAST: NodeAddress = NodeAddress(u16::MAX);

    /// Create an address from its integer value
    pub const fn new(value: u16) -> Self {
        NodeAddress(value)
    }

    /// Create an address from its two wire bytes (big-endian)
    pub const fn from_bytes(hi: u8, lo: u8) -> Self {
        NodeAddress(((hi as u16) << 8) | lo as u16)
    }

    /// High wire byte
    pub const fn hi(self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// Low wire byte
    pub const fn lo(self) -> u8 {
        self.0 as u8
    }

    /// Integer value of the address
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Whether this is the broadcast sentinel
    pub const fn is_broadcast(self) -> bool {
        self.0 == u16::MAX
    }
}

impl From<u16> for NodeAddress {
    fn from(value: u16) -> Self {
        NodeAddress(value)
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.hi(), self.lo())
    }
}

impl FromStr for NodeAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some((hi, lo)) = s.split_once('.') {
            let hi: u8 = hi
                .parse()
                .map_err(|_| ParseError::BadOperand(s.to_string()))?;
            let lo: u8 = lo
                .parse()
                .map_err(|_| ParseError::BadOperand(s.to_string()))?;
            Ok(NodeAddress::from_bytes(hi, lo))
        } else {
            let value: u16 = s
                .parse()
                .map_err(|_| ParseError::BadOperand(s.to_string()))?;
            Ok(NodeAddress(value))
        }
    }
}

/// Identity of a node across the whole deployment: network id plus address.
///
/// Used as the key in the controller's topology graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId {
    /// Network id the node belongs to
    pub net: u8,
    /// Address inside that network
    pub addr: NodeAddress,
}

impl NodeId {
    /// Create a node identity
    pub const fn new(net: u8, addr: NodeAddress) -> Self {
        NodeId { net, addr }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.net, self.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_round_trip() {
        let addr = NodeAddress::from_bytes(1, 42);
        assert_eq!(addr.hi(), 1);
        assert_eq!(addr.lo(), 42);
        assert_eq!(addr.as_u16(), 298);
    }

    #[test]
    fn test_order_is_integer_order() {
        assert!(NodeAddress::new(0x0102) < NodeAddress::new(0x0201));
        assert!(NodeAddress::BROADCAST > NodeAddress::new(0xFFFE));
    }

    #[test]
    fn test_display_and_parse() {
        let addr = NodeAddress::from_bytes(3, 7);
        assert_eq!(addr.to_string(), "3.7");
        assert_eq!("3.7".parse::<NodeAddress>().unwrap(), addr);
        assert_eq!("775".parse::<NodeAddress>().unwrap(), addr);
        assert!("3.7.1".parse::<NodeAddress>().is_err());
        assert!("x.y".parse::<NodeAddress>().is_err());
    }

    #[test]
    fn test_broadcast() {
        assert!(NodeAddress::BROADCAST.is_broadcast());
        assert_eq!("255.255".parse::<NodeAddress>().unwrap(), NodeAddress::BROADCAST);
    }
}

//! Fixed-layout packet header processing.
//!
//! A packet is a single owned byte buffer carrying the 10-byte header at
//! fixed offsets followed by the payload. Typed payload accessors live in
//! [`crate::views`]; this module only knows the header and the length
//! invariant.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::addr::NodeAddress;
use crate::error::WireError;

/// Maximum total packet size in bytes
pub const MAX_PACKET_LEN: usize = 116;

/// Header size in bytes
pub const HEADER_LEN: usize = 10;

/// Highest network id that marks an in-network packet; anything above is a
/// foreign frame passed through unmodified.
pub const MAX_NET_ID: u8 = 62;

/// Default hop budget for freshly built packets
pub const DEFAULT_TTL: u8 = 100;

/// Byte offset of the network id field
pub const NET_OFFSET: usize = 0;
/// Byte offset of the length field
pub const LEN_OFFSET: usize = 1;
/// Byte offset of the destination address
pub const DST_OFFSET: usize = 2;
/// Byte offset of the source address
pub const SRC_OFFSET: usize = 4;
/// Byte offset of the packet type
pub const TYP_OFFSET: usize = 6;
/// Byte offset of the hop counter
pub const TTL_OFFSET: usize = 7;
/// Byte offset of the next-hop address
pub const NXH_OFFSET: usize = 8;

/// Packet types as defined by the wire protocol
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketType {
    /// Application data
    Data = 0,
    /// Periodic neighbor advertisement
    Beacon = 1,
    /// Neighbor report toward the controller
    Report = 2,
    /// Fragment of a packet escalated to the controller
    Request = 3,
    /// Controller-pushed flow rule
    Response = 4,
    /// Path installation along a route
    OpenPath = 5,
    /// Node parameter read/write
    Config = 6,
    /// Sink registration with the controller
    RegProxy = 7,
}

impl PacketType {
    /// Decode a type byte, `None` for values no firmware emits
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            0 => Some(PacketType::Data),
            1 => Some(PacketType::Beacon),
            2 => Some(PacketType::Report),
            3 => Some(PacketType::Request),
            4 => Some(PacketType::Response),
            5 => Some(PacketType::OpenPath),
            6 => Some(PacketType::Config),
            7 => Some(PacketType::RegProxy),
            _ => None,
        }
    }
}

impl TryFrom<u8> for PacketType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        PacketType::from_byte(value).ok_or(WireError::Type(value))
    }
}

/// One wire packet: header plus payload in a single buffer.
///
/// The `len` field is recomputed on every mutation and is never stale.
/// Foreign frames (net id above [`MAX_NET_ID`]) keep their raw bytes and
/// bypass header validation entirely; check [`Packet::is_foreign`] before
/// using any header accessor beyond `net`, since a foreign frame may be
/// shorter than a header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    buf: Vec<u8>,
}

impl Packet {
    /// Build an empty in-network packet with the default TTL and a broadcast
    /// next hop.
    pub fn new(net: u8, src: NodeAddress, dst: NodeAddress, typ: PacketType) -> Self {
        let mut buf = vec![0u8; HEADER_LEN];
        buf[NET_OFFSET] = net;
        buf[LEN_OFFSET] = HEADER_LEN as u8;
        buf[DST_OFFSET] = dst.hi();
        buf[DST_OFFSET + 1] = dst.lo();
        buf[SRC_OFFSET] = src.hi();
        buf[SRC_OFFSET + 1] = src.lo();
        buf[TYP_OFFSET] = typ as u8;
        buf[TTL_OFFSET] = DEFAULT_TTL;
        buf[NXH_OFFSET] = NodeAddress::BROADCAST.hi();
        buf[NXH_OFFSET + 1] = NodeAddress::BROADCAST.lo();
        Packet { buf }
    }

    /// Decode one frame as delivered by the transport.
    ///
    /// In-network frames must carry a header length within `[10, 116]` that
    /// matches the delivered frame exactly and a known type byte; anything
    /// else is rejected without partial state. Foreign frames only need the
    /// two framing bytes.
    pub fn decode(frame: &[u8]) -> Result<Self, WireError> {
        if frame.len() < 2 {
            return Err(WireError::Incomplete);
        }

        if frame[NET_OFFSET] > MAX_NET_ID {
            return Ok(Packet {
                buf: frame.to_vec(),
            });
        }

        if frame.len() < HEADER_LEN {
            return Err(WireError::Incomplete);
        }

        let len = frame[LEN_OFFSET];
        if (len as usize) < HEADER_LEN || (len as usize) > MAX_PACKET_LEN {
            return Err(WireError::Length(len));
        }
        if frame.len() != len as usize {
            return Err(WireError::LengthMismatch {
                frame: frame.len(),
                header: len,
            });
        }

        PacketType::try_from(frame[TYP_OFFSET])?;

        Ok(Packet {
            buf: frame.to_vec(),
        })
    }

    /// Encode to a contiguous frame
    pub fn encode(&self) -> Bytes {
        Bytes::copy_from_slice(&self.buf)
    }

    /// Raw bytes of the whole packet
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Network id
    pub fn net(&self) -> u8 {
        self.buf[NET_OFFSET]
    }

    /// Whether this frame belongs to a foreign stack and must be carried
    /// through untouched
    pub fn is_foreign(&self) -> bool {
        self.net() > MAX_NET_ID
    }

    /// Total packet length including the header
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// A packet is never empty; kept for clippy symmetry with `len`
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Destination address
    pub fn dst(&self) -> NodeAddress {
        NodeAddress::from_bytes(self.buf[DST_OFFSET], self.buf[DST_OFFSET + 1])
    }

    /// Set the destination address
    pub fn set_dst(&mut self, dst: NodeAddress) {
        self.buf[DST_OFFSET] = dst.hi();
        self.buf[DST_OFFSET + 1] = dst.lo();
    }

    /// Source address
    pub fn src(&self) -> NodeAddress {
        NodeAddress::from_bytes(self.buf[SRC_OFFSET], self.buf[SRC_OFFSET + 1])
    }

    /// Set the source address
    pub fn set_src(&mut self, src: NodeAddress) {
        self.buf[SRC_OFFSET] = src.hi();
        self.buf[SRC_OFFSET + 1] = src.lo();
    }

    /// Packet type; `None` when the type byte was patched to an unknown value
    pub fn typ(&self) -> Option<PacketType> {
        PacketType::from_byte(self.buf[TYP_OFFSET])
    }

    /// Set the packet type
    pub fn set_typ(&mut self, typ: PacketType) {
        self.buf[TYP_OFFSET] = typ as u8;
    }

    /// Remaining hop budget
    pub fn ttl(&self) -> u8 {
        self.buf[TTL_OFFSET]
    }

    /// Set the hop budget
    pub fn set_ttl(&mut self, ttl: u8) {
        self.buf[TTL_OFFSET] = ttl;
    }

    /// Decrement the hop budget toward zero, returning the new value.
    ///
    /// Exhausted packets are dropped silently by the receiver, not here.
    pub fn decrement_ttl(&mut self) -> u8 {
        let ttl = self.buf[TTL_OFFSET].saturating_sub(1);
        self.buf[TTL_OFFSET] = ttl;
        ttl
    }

    /// Next-hop address
    pub fn next_hop(&self) -> NodeAddress {
        NodeAddress::from_bytes(self.buf[NXH_OFFSET], self.buf[NXH_OFFSET + 1])
    }

    /// Set the next-hop address
    pub fn set_next_hop(&mut self, nxh: NodeAddress) {
        self.buf[NXH_OFFSET] = nxh.hi();
        self.buf[NXH_OFFSET + 1] = nxh.lo();
    }

    /// Whether the packet is addressed to everyone
    pub fn is_broadcast(&self) -> bool {
        self.dst().is_broadcast()
    }

    /// Payload slice after the header
    pub fn payload(&self) -> &[u8] {
        &self.buf[HEADER_LEN..]
    }

    /// Payload length in bytes
    pub fn payload_len(&self) -> usize {
        self.buf.len() - HEADER_LEN
    }

    /// Replace the whole payload, recomputing `len`
    pub fn set_payload(&mut self, payload: &[u8]) -> Result<(), WireError> {
        let total = HEADER_LEN + payload.len();
        if total > MAX_PACKET_LEN {
            return Err(WireError::Size(total));
        }
        self.buf.truncate(HEADER_LEN);
        self.buf.extend_from_slice(payload);
        self.buf[LEN_OFFSET] = total as u8;
        Ok(())
    }

    /// Read one payload byte by payload-relative index
    pub fn payload_at(&self, index: usize) -> Option<u8> {
        self.payload().get(index).copied()
    }

    /// Write one payload byte by payload-relative index, growing the packet
    /// (zero filled) when the write lands past the current end.
    pub fn set_payload_at(&mut self, index: usize, value: u8) -> Result<(), WireError> {
        let total = HEADER_LEN + index + 1;
        if total > MAX_PACKET_LEN {
            return Err(WireError::Size(total));
        }
        if self.buf.len() < total {
            self.buf.resize(total, 0);
            self.buf[LEN_OFFSET] = total as u8;
        }
        self.buf[HEADER_LEN + index] = value;
        Ok(())
    }

    /// Read one byte by absolute packet offset (window operand access)
    pub fn get_byte(&self, offset: usize) -> Option<u8> {
        self.buf.get(offset).copied()
    }

    /// Read a big-endian u16 by absolute packet offset
    pub fn get_u16(&self, offset: usize) -> Option<u16> {
        let hi = self.buf.get(offset).copied()?;
        let lo = self.buf.get(offset + 1).copied()?;
        Some(((hi as u16) << 8) | lo as u16)
    }

    /// Patch one byte by absolute packet offset (SET action writes).
    ///
    /// Writes never extend the packet, and the length byte is maintained by
    /// the codec alone, so both land on [`WireError::Offset`].
    pub fn set_byte(&mut self, offset: usize, value: u8) -> Result<(), WireError> {
        if offset == LEN_OFFSET || offset >= self.buf.len() {
            return Err(WireError::Offset(offset));
        }
        self.buf[offset] = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Packet {
        let mut p = Packet::new(
            1,
            NodeAddress::from_bytes(0, 2),
            NodeAddress::from_bytes(0, 9),
            PacketType::Data,
        );
        p.set_payload(&[0xAA, 0xBB, 0xCC]).unwrap();
        p
    }

    #[test]
    fn test_header_fields() {
        let p = sample();
        assert_eq!(p.net(), 1);
        assert_eq!(p.len(), 13);
        assert_eq!(p.src(), NodeAddress::from_bytes(0, 2));
        assert_eq!(p.dst(), NodeAddress::from_bytes(0, 9));
        assert_eq!(p.typ(), Some(PacketType::Data));
        assert_eq!(p.ttl(), DEFAULT_TTL);
        assert_eq!(p.next_hop(), NodeAddress::BROADCAST);
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let p = sample();
        let decoded = Packet::decode(&p.encode()).unwrap();
        assert_eq!(p, decoded);
    }

    #[test]
    fn test_decode_rejects_bad_length() {
        let mut frame = sample().encode().to_vec();
        frame[LEN_OFFSET] = 9;
        assert!(matches!(
            Packet::decode(&frame),
            Err(WireError::Length(9))
        ));

        let mut frame = sample().encode().to_vec();
        frame[LEN_OFFSET] = 117;
        assert!(matches!(Packet::decode(&frame), Err(WireError::Length(117))));
    }

    #[test]
    fn test_decode_rejects_length_mismatch() {
        let mut frame = sample().encode().to_vec();
        frame.push(0);
        assert!(matches!(
            Packet::decode(&frame),
            Err(WireError::LengthMismatch { frame: 14, header: 13 })
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let mut frame = sample().encode().to_vec();
        frame[TYP_OFFSET] = 0x7F;
        assert!(matches!(Packet::decode(&frame), Err(WireError::Type(0x7F))));
    }

    #[test]
    fn test_foreign_frame_passthrough() {
        let frame = [63u8, 0xDE, 0xAD, 0xBE, 0xEF];
        let p = Packet::decode(&frame).unwrap();
        assert!(p.is_foreign());
        assert_eq!(p.as_bytes(), &frame);
    }

    #[test]
    fn test_payload_write_grows_len() {
        let mut p = sample();
        p.set_payload_at(5, 0x42).unwrap();
        assert_eq!(p.payload_len(), 6);
        assert_eq!(p.len(), 16);
        assert_eq!(p.as_bytes()[LEN_OFFSET], 16);
        assert_eq!(p.payload(), &[0xAA, 0xBB, 0xCC, 0, 0, 0x42]);
    }

    #[test]
    fn test_payload_write_respects_max() {
        let mut p = sample();
        assert!(matches!(
            p.set_payload_at(MAX_PACKET_LEN - HEADER_LEN, 1),
            Err(WireError::Size(117))
        ));
        assert!(p.set_payload_at(MAX_PACKET_LEN - HEADER_LEN - 1, 1).is_ok());
        assert_eq!(p.len(), MAX_PACKET_LEN);
    }

    #[test]
    fn test_set_byte_guards() {
        let mut p = sample();
        assert!(p.set_byte(LEN_OFFSET, 50).is_err());
        assert!(p.set_byte(p.len(), 1).is_err());
        p.set_byte(TTL_OFFSET, 7).unwrap();
        assert_eq!(p.ttl(), 7);
    }

    #[test]
    fn test_ttl_decrement_saturates() {
        let mut p = sample();
        p.set_ttl(1);
        assert_eq!(p.decrement_ttl(), 0);
        assert_eq!(p.decrement_ttl(), 0);
    }
}

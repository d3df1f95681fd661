//! Typed payload views over the single packet buffer.
//!
//! Each packet kind gets a read view that validates the payload shape once
//! and a `build` constructor for the outbound direction. Views borrow the
//! packet; there is no per-type packet struct hierarchy.

use serde::{Deserialize, Serialize};

use crate::addr::{NodeAddress, NodeId};
use crate::entry::FlowTableEntry;
use crate::error::WireError;
use crate::packet::{Packet, PacketType};

fn expect(packet: &Packet, typ: PacketType) -> Result<(), WireError> {
    match packet.typ() {
        Some(t) if t == typ => Ok(()),
        Some(t) => Err(WireError::Type(t as u8)),
        None => Err(WireError::Malformed),
    }
}

/// Read view over a BEACON payload:
/// `[distance, battery, sink hi, sink lo]`
pub struct BeaconView<'a>(&'a Packet);

impl<'a> BeaconView<'a> {
    /// Validate and wrap a beacon packet
    pub fn new(packet: &'a Packet) -> Result<Self, WireError> {
        expect(packet, PacketType::Beacon)?;
        if packet.payload_len() < 4 {
            return Err(WireError::Malformed);
        }
        Ok(BeaconView(packet))
    }

    /// Advertised hop distance to the sink
    pub fn distance(&self) -> u8 {
        self.0.payload()[0]
    }

    /// Advertised battery level
    pub fn battery(&self) -> u8 {
        self.0.payload()[1]
    }

    /// The sink the sender routes toward
    pub fn sink(&self) -> NodeAddress {
        let payload = self.0.payload();
        NodeAddress::from_bytes(payload[2], payload[3])
    }

    /// Build a broadcast beacon
    pub fn build(net: u8, src: NodeAddress, distance: u8, battery: u8, sink: NodeAddress) -> Packet {
        let mut packet = Packet::new(net, src, NodeAddress::BROADCAST, PacketType::Beacon);
        // header-only packet plus four fixed bytes never overflows
        let _ = packet.set_payload(&[distance, battery, sink.hi(), sink.lo()]);
        packet
    }
}

/// One neighbor observation inside a report
pub type NeighborLink = (NodeAddress, u8);

/// Decoded neighbor report, the topology graph's input unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborReport {
    /// Reporting node
    pub reporter: NodeId,
    /// Reporter's hop distance to the sink
    pub distance: u8,
    /// Reporter's battery level
    pub battery: u8,
    /// Neighbors the reporter currently hears, with received signal strength
    pub links: Vec<NeighborLink>,
}

/// Read view over a REPORT payload:
/// `[distance, battery, count, (addr hi, addr lo, rssi)*]`
pub struct ReportView<'a>(&'a Packet);

impl<'a> ReportView<'a> {
    /// Validate and wrap a report packet
    pub fn new(packet: &'a Packet) -> Result<Self, WireError> {
        expect(packet, PacketType::Report)?;
        let payload = packet.payload();
        if payload.len() < 3 || payload.len() != 3 + payload[2] as usize * 3 {
            return Err(WireError::Malformed);
        }
        Ok(ReportView(packet))
    }

    /// Reporter's hop distance to the sink
    pub fn distance(&self) -> u8 {
        self.0.payload()[0]
    }

    /// Reporter's battery level
    pub fn battery(&self) -> u8 {
        self.0.payload()[1]
    }

    /// Iterate the reported neighbor links
    pub fn links(&self) -> impl Iterator<Item = NeighborLink> + '_ {
        self.0.payload()[3..]
            .chunks_exact(3)
            .map(|chunk| (NodeAddress::from_bytes(chunk[0], chunk[1]), chunk[2]))
    }

    /// Decode into the owned report consumed by the topology graph
    pub fn to_report(&self) -> NeighborReport {
        NeighborReport {
            reporter: NodeId::new(self.0.net(), self.0.src()),
            distance: self.distance(),
            battery: self.battery(),
            links: self.links().collect(),
        }
    }

    /// Build a report addressed to the sink
    pub fn build(
        net: u8,
        src: NodeAddress,
        sink: NodeAddress,
        distance: u8,
        battery: u8,
        links: &[NeighborLink],
    ) -> Result<Packet, WireError> {
        let mut payload = Vec::with_capacity(3 + links.len() * 3);
        payload.push(distance);
        payload.push(battery);
        payload.push(u8::try_from(links.len()).map_err(|_| WireError::Size(links.len()))?);
        for (addr, rssi) in links {
            payload.push(addr.hi());
            payload.push(addr.lo());
            payload.push(*rssi);
        }
        let mut packet = Packet::new(net, src, sink, PacketType::Report);
        packet.set_payload(&payload)?;
        Ok(packet)
    }
}

/// Read view over a REQUEST payload, one fragment of an escalated packet:
/// `[id, part, total, slice]`
pub struct RequestView<'a>(&'a Packet);

impl<'a> RequestView<'a> {
    /// Validate and wrap a request packet
    pub fn new(packet: &'a Packet) -> Result<Self, WireError> {
        expect(packet, PacketType::Request)?;
        if packet.payload_len() < crate::fragment::FRAGMENT_HEADER_LEN {
            return Err(WireError::Malformed);
        }
        Ok(RequestView(packet))
    }

    /// Fragment set id, scoped to the source node
    pub fn id(&self) -> u8 {
        self.0.payload()[0]
    }

    /// Zero-based fragment index
    pub fn part(&self) -> u8 {
        self.0.payload()[1]
    }

    /// Total fragments in the set
    pub fn total(&self) -> u8 {
        self.0.payload()[2]
    }

    /// Wrap one fragment payload produced by [`crate::fragment::Fragmenter`]
    pub fn build(
        net: u8,
        src: NodeAddress,
        sink: NodeAddress,
        fragment: &[u8],
    ) -> Result<Packet, WireError> {
        let mut packet = Packet::new(net, src, sink, PacketType::Request);
        packet.set_payload(fragment)?;
        Ok(packet)
    }
}

/// Read view over an OPEN_PATH payload: the ordered node list, 2 bytes per
/// address
pub struct OpenPathView<'a>(&'a Packet);

impl<'a> OpenPathView<'a> {
    /// Validate and wrap a path packet
    pub fn new(packet: &'a Packet) -> Result<Self, WireError> {
        expect(packet, PacketType::OpenPath)?;
        if packet.payload_len() < 4 || packet.payload_len() % 2 != 0 {
            return Err(WireError::Malformed);
        }
        Ok(OpenPathView(packet))
    }

    /// Ordered addresses from path start to path end
    pub fn path(&self) -> Vec<NodeAddress> {
        self.0
            .payload()
            .chunks_exact(2)
            .map(|chunk| NodeAddress::from_bytes(chunk[0], chunk[1]))
            .collect()
    }

    /// Position of an address in the path
    pub fn position_of(&self, addr: NodeAddress) -> Option<usize> {
        self.path().iter().position(|&a| a == addr)
    }

    /// Build a path-setup packet addressed to the path head
    pub fn build(net: u8, src: NodeAddress, path: &[NodeAddress]) -> Result<Packet, WireError> {
        if path.len() < 2 {
            return Err(WireError::Malformed);
        }
        let mut payload = Vec::with_capacity(path.len() * 2);
        for addr in path {
            payload.push(addr.hi());
            payload.push(addr.lo());
        }
        let mut packet = Packet::new(net, src, path[0], PacketType::OpenPath);
        packet.set_payload(&payload)?;
        Ok(packet)
    }
}

/// Read view over a RESPONSE payload: one encoded flow-table entry
pub struct ResponseView<'a>(&'a Packet);

impl<'a> ResponseView<'a> {
    /// Validate and wrap a response packet
    pub fn new(packet: &'a Packet) -> Result<Self, WireError> {
        expect(packet, PacketType::Response)?;
        Ok(ResponseView(packet))
    }

    /// Decode the carried entry
    pub fn entry(&self) -> Result<FlowTableEntry, WireError> {
        FlowTableEntry::decode(self.0.payload())
    }

    /// Build a rule-push packet
    pub fn build(
        net: u8,
        src: NodeAddress,
        dst: NodeAddress,
        entry: &FlowTableEntry,
    ) -> Result<Packet, WireError> {
        let mut packet = Packet::new(net, src, dst, PacketType::Response);
        packet.set_payload(&entry.encode())?;
        Ok(packet)
    }
}

/// Node parameters addressable through CONFIG packets
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfigProperty {
    /// Node address (u16)
    MyAddress = 0,
    /// Network id (u8 in the low value byte)
    NetworkId = 1,
    /// Beacon period in seconds (u16)
    BeaconPeriod = 2,
    /// Report period in seconds (u16)
    ReportPeriod = 3,
    /// Default lifetime for installed rules (u8 in the low value byte)
    RuleTtl = 4,
    /// Minimum signal strength accepted from beacons (u8 in the low value byte)
    RssiMin = 5,
    /// Append an accepted alias address (write, u16)
    AddAlias = 6,
    /// Remove an accepted alias address (write, u16)
    RemoveAlias = 7,
    /// Fetch the alias at an index (read, indexed)
    GetAlias = 8,
    /// Install a flow rule carried as entry bytes (write)
    AddRule = 9,
    /// Remove the flow rule at an index (write, indexed)
    RemoveRule = 10,
    /// Fetch the flow rule at an index (read, indexed)
    GetRule = 11,
    /// Reset the node's routing state (write)
    Reset = 12,
    /// Install one fragment of a function blob (write)
    AddFunction = 13,
    /// Remove a function blob (write)
    RemoveFunction = 14,
}

impl ConfigProperty {
    /// Whether read replies for this property carry a leading index byte
    pub fn is_indexed(self) -> bool {
        matches!(self, ConfigProperty::GetAlias | ConfigProperty::GetRule)
    }
}

impl TryFrom<u8> for ConfigProperty {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ConfigProperty::MyAddress),
            1 => Ok(ConfigProperty::NetworkId),
            2 => Ok(ConfigProperty::BeaconPeriod),
            3 => Ok(ConfigProperty::ReportPeriod),
            4 => Ok(ConfigProperty::RuleTtl),
            5 => Ok(ConfigProperty::RssiMin),
            6 => Ok(ConfigProperty::AddAlias),
            7 => Ok(ConfigProperty::RemoveAlias),
            8 => Ok(ConfigProperty::GetAlias),
            9 => Ok(ConfigProperty::AddRule),
            10 => Ok(ConfigProperty::RemoveRule),
            11 => Ok(ConfigProperty::GetRule),
            12 => Ok(ConfigProperty::Reset),
            13 => Ok(ConfigProperty::AddFunction),
            14 => Ok(ConfigProperty::RemoveFunction),
            _ => Err(WireError::Property(value)),
        }
    }
}

/// Write-request flag in the first CONFIG payload byte
const CONFIG_WRITE_FLAG: u8 = 0x80;

/// Read view over a CONFIG payload: `[flag|property, params...]`
pub struct ConfigView<'a>(&'a Packet);

impl<'a> ConfigView<'a> {
    /// Validate and wrap a config packet
    pub fn new(packet: &'a Packet) -> Result<Self, WireError> {
        expect(packet, PacketType::Config)?;
        let payload = packet.payload();
        let (&head, _) = payload.split_first().ok_or(WireError::Malformed)?;
        ConfigProperty::try_from(head & !CONFIG_WRITE_FLAG)?;
        Ok(ConfigView(packet))
    }

    /// Whether this is a write request
    pub fn is_write(&self) -> bool {
        self.0.payload()[0] & CONFIG_WRITE_FLAG != 0
    }

    /// Addressed property
    pub fn property(&self) -> ConfigProperty {
        // validated in new()
        ConfigProperty::try_from(self.0.payload()[0] & !CONFIG_WRITE_FLAG)
            .unwrap_or(ConfigProperty::Reset)
    }

    /// Parameter bytes after the property byte
    pub fn params(&self) -> &[u8] {
        &self.0.payload()[1..]
    }

    /// First two parameter bytes as a big-endian value
    pub fn value_u16(&self) -> Option<u16> {
        let params = self.params();
        Some(((*params.first()? as u16) << 8) | *params.get(1)? as u16)
    }

    /// Build a read request; `index` applies to indexed properties
    pub fn read_request(
        net: u8,
        src: NodeAddress,
        dst: NodeAddress,
        property: ConfigProperty,
        index: Option<u8>,
    ) -> Result<Packet, WireError> {
        let mut payload = vec![property as u8];
        if let Some(index) = index {
            payload.push(index);
        }
        let mut packet = Packet::new(net, src, dst, PacketType::Config);
        packet.set_payload(&payload)?;
        Ok(packet)
    }

    /// Build a write request with raw parameter bytes
    pub fn write_request(
        net: u8,
        src: NodeAddress,
        dst: NodeAddress,
        property: ConfigProperty,
        params: &[u8],
    ) -> Result<Packet, WireError> {
        let mut payload = Vec::with_capacity(1 + params.len());
        payload.push(property as u8 | CONFIG_WRITE_FLAG);
        payload.extend_from_slice(params);
        let mut packet = Packet::new(net, src, dst, PacketType::Config);
        packet.set_payload(&payload)?;
        Ok(packet)
    }

    /// Build the reply to a read request, echoing the property byte
    pub fn reply(
        net: u8,
        src: NodeAddress,
        dst: NodeAddress,
        property: ConfigProperty,
        params: &[u8],
    ) -> Result<Packet, WireError> {
        let mut payload = Vec::with_capacity(1 + params.len());
        payload.push(property as u8);
        payload.extend_from_slice(params);
        let mut packet = Packet::new(net, src, dst, PacketType::Config);
        packet.set_payload(&payload)?;
        Ok(packet)
    }
}

/// Build the sink's registration packet announcing itself to the controller
pub fn reg_proxy(net: u8, sink: NodeAddress) -> Packet {
    Packet::new(net, sink, sink, PacketType::RegProxy)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NET: u8 = 1;

    #[test]
    fn test_beacon_view() {
        let packet = BeaconView::build(NET, NodeAddress::new(2), 3, 200, NodeAddress::new(1));
        let view = BeaconView::new(&packet).unwrap();
        assert_eq!(view.distance(), 3);
        assert_eq!(view.battery(), 200);
        assert_eq!(view.sink(), NodeAddress::new(1));
        assert!(packet.is_broadcast());
    }

    #[test]
    fn test_report_round_trip() {
        let links = vec![
            (NodeAddress::new(3), 180),
            (NodeAddress::new(4), 140),
        ];
        let packet =
            ReportView::build(NET, NodeAddress::new(2), NodeAddress::new(1), 2, 250, &links)
                .unwrap();
        let view = ReportView::new(&packet).unwrap();
        assert_eq!(view.distance(), 2);
        assert_eq!(view.links().collect::<Vec<_>>(), links);

        let report = view.to_report();
        assert_eq!(report.reporter, NodeId::new(NET, NodeAddress::new(2)));
        assert_eq!(report.links, links);
    }

    #[test]
    fn test_report_rejects_bad_count() {
        let links = vec![(NodeAddress::new(3), 180)];
        let packet =
            ReportView::build(NET, NodeAddress::new(2), NodeAddress::new(1), 2, 250, &links)
                .unwrap();
        let mut frame = packet.encode().to_vec();
        frame[crate::packet::HEADER_LEN + 2] = 7;
        let packet = Packet::decode(&frame).unwrap();
        assert!(ReportView::new(&packet).is_err());
    }

    #[test]
    fn test_open_path_view() {
        let path: Vec<NodeAddress> = [2u16, 5, 9].iter().map(|&a| NodeAddress::new(a)).collect();
        let packet = OpenPathView::build(NET, NodeAddress::new(0), &path).unwrap();
        assert_eq!(packet.dst(), path[0]);

        let view = OpenPathView::new(&packet).unwrap();
        assert_eq!(view.path(), path);
        assert_eq!(view.position_of(NodeAddress::new(5)), Some(1));
        assert_eq!(view.position_of(NodeAddress::new(6)), None);
    }

    #[test]
    fn test_open_path_needs_two_hops() {
        assert!(OpenPathView::build(NET, NodeAddress::new(0), &[NodeAddress::new(2)]).is_err());
    }

    #[test]
    fn test_config_read_and_reply() {
        let request = ConfigView::read_request(
            NET,
            NodeAddress::new(0),
            NodeAddress::new(2),
            ConfigProperty::BeaconPeriod,
            None,
        )
        .unwrap();
        let view = ConfigView::new(&request).unwrap();
        assert!(!view.is_write());
        assert_eq!(view.property(), ConfigProperty::BeaconPeriod);

        let reply = ConfigView::reply(
            NET,
            NodeAddress::new(2),
            NodeAddress::new(0),
            ConfigProperty::BeaconPeriod,
            &[0x00, 0x0A],
        )
        .unwrap();
        let view = ConfigView::new(&reply).unwrap();
        assert_eq!(view.value_u16(), Some(10));
    }

    #[test]
    fn test_config_write_flag() {
        let request = ConfigView::write_request(
            NET,
            NodeAddress::new(0),
            NodeAddress::new(2),
            ConfigProperty::RssiMin,
            &[0, 150],
        )
        .unwrap();
        let view = ConfigView::new(&request).unwrap();
        assert!(view.is_write());
        assert_eq!(view.property(), ConfigProperty::RssiMin);
        assert_eq!(view.value_u16(), Some(150));
    }

    #[test]
    fn test_view_rejects_wrong_type() {
        let packet = BeaconView::build(NET, NodeAddress::new(2), 1, 1, NodeAddress::new(1));
        assert!(ReportView::new(&packet).is_err());
    }
}

//! Node runtime configuration.

use std::time::Duration;

use sdwn_flow::DEFAULT_STATUS_LEN;
use sdwn_wire::entry::RULE_TTL_DEFAULT;
use sdwn_wire::NodeAddress;

/// Everything a mote needs to run. Several fields are writable at runtime
/// through CONFIG packets.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Network id this node participates in
    pub net: u8,
    /// Own address
    pub addr: NodeAddress,
    /// Whether this node is a sink (gateway to the controller)
    pub is_sink: bool,
    /// Advertised battery level (energy accounting is out of scope)
    pub battery: u8,
    /// How often to broadcast a beacon
    pub beacon_period: Duration,
    /// How often to report the neighbor table toward the controller
    pub report_period: Duration,
    /// How often the aging pass runs over the flow table
    pub aging_period: Duration,
    /// TTL decrement applied by each aging pass
    pub aging_step: u8,
    /// Lifetime given to locally synthesized rules
    pub rule_ttl: u8,
    /// Minimum beacon signal strength considered for route adoption
    pub rssi_min: u8,
    /// Status register length in cells
    pub status_len: usize,
    /// Depth of the intake/outtake queues
    pub queue_depth: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            net: 1,
            addr: NodeAddress::new(0),
            is_sink: false,
            battery: 255,
            beacon_period: Duration::from_secs(2),
            report_period: Duration::from_secs(6),
            aging_period: Duration::from_secs(4),
            aging_step: 10,
            rule_ttl: RULE_TTL_DEFAULT,
            rssi_min: 180,
            status_len: DEFAULT_STATUS_LEN,
            queue_depth: 64,
        }
    }
}

//! The per-node worker task.
//!
//! One task owns all mutable state of a node and multiplexes its intake
//! queue, timers, and command channel. Packets generated while handling an
//! event (forward copies, re-submissions, escalations, replies) go through
//! a local staging deque drained before the next `select!` pass, so the
//! externally observable order stays FIFO per queue.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use sdwn_flow::{AcceptedAddresses, MatchEngine, NeighborTable};
use sdwn_wire::{
    BeaconView, ConfigProperty, ConfigView, FlowTableEntry, Fragmenter, NodeAddress, NodeId,
    OpenPathView, Packet, PacketType, Reassembler, RequestView, ResponseView, Window,
    entry::{Action, Stats},
    views,
};

use crate::config::NodeConfig;
use crate::handle::{NodeCommand, NodeHandle, NodeSnapshot, Origin};

/// Spawns node workers.
pub struct Node;

impl Node {
    /// Spawn a node worker on the current tokio runtime and return its
    /// control handle.
    pub fn spawn(config: NodeConfig) -> NodeHandle {
        let depth = config.queue_depth;
        let (intake_tx, intake_rx) = mpsc::channel(depth);
        let (command_tx, command_rx) = mpsc::channel(depth);
        let (outbound_tx, outbound_rx) = mpsc::channel(depth);
        let (delivered_tx, delivered_rx) = mpsc::channel(depth);
        let (stop_tx, stop_rx) = watch::channel(false);

        let (uplink_tx, uplink_rx) = if config.is_sink {
            let (tx, rx) = mpsc::channel(depth);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let handle = NodeHandle {
            addr: config.addr,
            net: config.net,
            intake: intake_tx,
            commands: command_tx,
            outbound: outbound_rx,
            uplink: uplink_rx,
            delivered: delivered_rx,
            stop: stop_tx,
        };

        let worker = NodeWorker::new(config, outbound_tx, uplink_tx, delivered_tx);
        tokio::spawn(worker.run(intake_rx, command_rx, stop_rx));

        handle
    }
}

/// Where a packet being dispatched came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Radio { rssi: u8 },
    Controller,
    Local,
}

struct NodeWorker {
    cfg: NodeConfig,
    engine: MatchEngine,
    neighbors: NeighborTable,
    accepted: AcceptedAddresses,
    fragmenter: Fragmenter,
    reassembler: Reassembler,
    /// Reassembled function blobs by function id, awaiting a registered
    /// capability for that id
    blobs: HashMap<u8, Vec<u8>>,
    active: bool,
    distance: u8,
    sink: Option<NodeAddress>,
    pending: VecDeque<(Packet, Source)>,
    timers_dirty: bool,
    outbound: mpsc::Sender<Bytes>,
    uplink: Option<mpsc::Sender<Bytes>>,
    delivered: mpsc::Sender<Packet>,
}

impl NodeWorker {
    fn new(
        cfg: NodeConfig,
        outbound: mpsc::Sender<Bytes>,
        uplink: Option<mpsc::Sender<Bytes>>,
        delivered: mpsc::Sender<Packet>,
    ) -> Self {
        let is_sink = cfg.is_sink;
        let addr = cfg.addr;
        NodeWorker {
            engine: MatchEngine::new(cfg.status_len),
            neighbors: NeighborTable::new(),
            accepted: AcceptedAddresses::new(),
            fragmenter: Fragmenter::new(),
            reassembler: Reassembler::new(),
            blobs: HashMap::new(),
            active: is_sink,
            distance: if is_sink { 0 } else { u8::MAX },
            sink: if is_sink { Some(addr) } else { None },
            pending: VecDeque::new(),
            timers_dirty: false,
            cfg,
            outbound,
            uplink,
            delivered,
        }
    }

    fn timer(period: std::time::Duration) -> Interval {
        let mut timer = interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer
    }

    async fn run(
        mut self,
        mut intake: mpsc::Receiver<(Bytes, Origin)>,
        mut commands: mpsc::Receiver<NodeCommand>,
        mut stop: watch::Receiver<bool>,
    ) {
        let mut beacon = Self::timer(self.cfg.beacon_period);
        let mut report = Self::timer(self.cfg.report_period);
        let mut aging = Self::timer(self.cfg.aging_period);

        info!(addr = %self.cfg.addr, sink = self.cfg.is_sink, "node started");
        if self.cfg.is_sink {
            self.send_uplink(views::reg_proxy(self.cfg.net, self.cfg.addr))
                .await;
        }

        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                frame = intake.recv() => match frame {
                    Some((frame, origin)) => self.handle_frame(frame, origin).await,
                    None => break,
                },
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                _ = beacon.tick() => self.emit_beacon().await,
                _ = report.tick() => self.emit_report().await,
                _ = aging.tick() => self.run_aging(),
            }

            self.drain_pending().await;

            if self.timers_dirty {
                beacon = Self::timer(self.cfg.beacon_period);
                report = Self::timer(self.cfg.report_period);
                self.timers_dirty = false;
            }
        }

        info!(addr = %self.cfg.addr, "node stopped");
    }

    async fn handle_frame(&mut self, frame: Bytes, origin: Origin) {
        let packet = match Packet::decode(&frame) {
            Ok(packet) => packet,
            Err(error) => {
                warn!(%error, "dropping malformed frame");
                return;
            }
        };

        if packet.is_foreign() {
            // foreign stacks ride through unmodified
            self.send_outbound(frame).await;
            return;
        }
        if packet.net() != self.cfg.net {
            debug!(net = packet.net(), "wrong network, dropped");
            return;
        }
        if packet.ttl() == 0 {
            debug!(src = %packet.src(), "hop budget exhausted, dropped");
            return;
        }

        let source = match origin {
            Origin::Radio { rssi } => {
                // process only traffic addressed through or at this node
                if !self.accepted.accepts(self.cfg.addr, packet.next_hop())
                    && !packet.is_broadcast()
                {
                    return;
                }
                Source::Radio { rssi }
            }
            Origin::Controller => Source::Controller,
        };

        self.dispatch(packet, source).await;
    }

    async fn drain_pending(&mut self) {
        // a MATCH rule that always re-matches its own packet keeps this
        // loop busy forever; installing such a rule is an operator error
        while let Some((packet, source)) = self.pending.pop_front() {
            self.dispatch(packet, source).await;
        }
    }

    async fn dispatch(&mut self, packet: Packet, source: Source) {
        let typ = match packet.typ() {
            Some(typ) => typ,
            None => {
                debug!("unknown packet type, dropped");
                return;
            }
        };

        if typ == PacketType::Beacon {
            if let Source::Radio { rssi } = source {
                self.handle_beacon(&packet, rssi);
            }
            return;
        }

        if self.accepted.accepts(self.cfg.addr, packet.dst()) {
            self.handle_for_me(packet, typ, source).await;
        } else {
            self.engine_process(packet).await;
        }
    }

    async fn handle_for_me(&mut self, packet: Packet, typ: PacketType, source: Source) {
        match typ {
            PacketType::Data => {
                let _ = self.delivered.send(packet).await;
            }
            PacketType::Request | PacketType::Report | PacketType::RegProxy => {
                if self.cfg.is_sink {
                    self.send_uplink(packet).await;
                } else {
                    debug!(typ = ?typ, "controller-bound packet at a non-sink, dropped");
                }
            }
            PacketType::Config => {
                // at a sink, radio-side CONFIG traffic is in transit to the
                // controller; only downlink and local traffic is for the
                // sink itself
                if self.cfg.is_sink && source != Source::Controller {
                    self.send_uplink(packet).await;
                } else {
                    self.handle_config(&packet);
                }
            }
            PacketType::Response => match ResponseView::new(&packet).and_then(|v| v.entry()) {
                Ok(entry) => {
                    debug!(addr = %self.cfg.addr, "installing pushed rule");
                    self.engine.table.insert(entry);
                }
                Err(error) => warn!(%error, "bad rule push, dropped"),
            },
            PacketType::OpenPath => self.handle_open_path(&packet).await,
            // beacons are handled before the for-me split
            PacketType::Beacon => {}
        }
    }

    fn handle_beacon(&mut self, packet: &Packet, rssi: u8) {
        let view = match BeaconView::new(packet) {
            Ok(view) => view,
            Err(error) => {
                warn!(%error, "bad beacon, dropped");
                return;
            }
        };

        self.neighbors
            .observe(packet.src(), rssi, view.battery());

        if self.cfg.is_sink || rssi < self.cfg.rssi_min || view.distance() >= self.distance {
            return;
        }

        let next_hop = packet.src();
        let sink = view.sink();
        self.distance = view.distance().saturating_add(1);
        self.sink = Some(sink);
        self.active = true;

        // default route: sink-bound traffic follows the beacon tree; anything
        // else misses the table and is escalated to the controller
        let mut entry = FlowTableEntry::new(
            [Window::dst_equals(sink)],
            vec![Action::ForwardUnicast { next_hop }],
        );
        entry.stats = Stats {
            ttl: self.cfg.rule_ttl,
            count: 0,
        };
        self.engine.table.install_default(entry);

        debug!(
            addr = %self.cfg.addr,
            distance = self.distance,
            via = %next_hop,
            "adopted route toward sink"
        );
    }

    async fn handle_open_path(&mut self, packet: &Packet) {
        let view = match OpenPathView::new(packet) {
            Ok(view) => view,
            Err(error) => {
                warn!(%error, "bad path packet, dropped");
                return;
            }
        };
        let path = view.path();
        let Some(position) = path.iter().position(|&a| a == self.cfg.addr) else {
            warn!(addr = %self.cfg.addr, "path packet for a path not containing this node");
            return;
        };

        let stats = Stats {
            ttl: self.cfg.rule_ttl,
            count: 0,
        };

        if position > 0 {
            let mut toward_start = FlowTableEntry::new(
                [Window::dst_equals(path[0])],
                vec![Action::ForwardUnicast {
                    next_hop: path[position - 1],
                }],
            );
            toward_start.stats = stats;
            self.engine.table.insert(toward_start);
        }
        if position + 1 < path.len() {
            let mut toward_end = FlowTableEntry::new(
                [Window::dst_equals(path[path.len() - 1])],
                vec![Action::ForwardUnicast {
                    next_hop: path[position + 1],
                }],
            );
            toward_end.stats = stats;
            self.engine.table.insert(toward_end);

            // pass the path along to the next node on it
            let mut onward = packet.clone();
            onward.set_dst(path[position + 1]);
            onward.set_next_hop(path[position + 1]);
            onward.decrement_ttl();
            self.send_outbound(onward.encode()).await;
        }

        info!(addr = %self.cfg.addr, hops = path.len() - 1, "path installed");
    }

    fn handle_config(&mut self, packet: &Packet) {
        let view = match ConfigView::new(packet) {
            Ok(view) => view,
            Err(error) => {
                warn!(%error, "bad config packet, dropped");
                return;
            }
        };
        let property = view.property();
        let params = view.params().to_vec();

        if view.is_write() {
            self.apply_config_write(packet, property, &params);
            return;
        }

        let reply = self.config_read(property, &params);
        if let Some(reply_params) = reply {
            match ConfigView::reply(
                self.cfg.net,
                self.cfg.addr,
                packet.src(),
                property,
                &reply_params,
            ) {
                Ok(reply) => self.pending.push_back((reply, Source::Local)),
                Err(error) => warn!(%error, "config reply too large, dropped"),
            }
        }
    }

    fn apply_config_write(&mut self, packet: &Packet, property: ConfigProperty, params: &[u8]) {
        let value = Self::params_u16(params);
        match property {
            ConfigProperty::MyAddress => {
                if let Some(value) = value {
                    self.cfg.addr = NodeAddress::new(value);
                }
            }
            ConfigProperty::NetworkId => {
                if let Some(value) = value {
                    let net = value as u8;
                    if net <= sdwn_wire::MAX_NET_ID {
                        self.cfg.net = net;
                    }
                }
            }
            ConfigProperty::BeaconPeriod => {
                if let Some(value) = value {
                    self.cfg.beacon_period = std::time::Duration::from_secs(value as u64);
                    self.timers_dirty = true;
                }
            }
            ConfigProperty::ReportPeriod => {
                if let Some(value) = value {
                    self.cfg.report_period = std::time::Duration::from_secs(value as u64);
                    self.timers_dirty = true;
                }
            }
            ConfigProperty::RuleTtl => {
                if let Some(value) = value {
                    self.cfg.rule_ttl = value as u8;
                }
            }
            ConfigProperty::RssiMin => {
                if let Some(value) = value {
                    self.cfg.rssi_min = value as u8;
                }
            }
            ConfigProperty::AddAlias => {
                if let Some(value) = value {
                    self.accepted.add(NodeAddress::new(value));
                }
            }
            ConfigProperty::RemoveAlias => {
                if let Some(value) = value {
                    self.accepted.remove(NodeAddress::new(value));
                }
            }
            ConfigProperty::AddRule => match FlowTableEntry::decode(params) {
                Ok(entry) => {
                    self.engine.table.insert(entry);
                }
                Err(error) => warn!(%error, "bad rule in config write"),
            },
            ConfigProperty::RemoveRule => {
                if let Some(&position) = params.first() {
                    if let Some(outcome) = self.engine.table.remove_at(position as usize) {
                        if outcome.default_route_lost && !self.cfg.is_sink {
                            warn!(addr = %self.cfg.addr, "default route removed by config");
                            self.reset_routing();
                        }
                    }
                }
            }
            ConfigProperty::Reset => {
                info!(addr = %self.cfg.addr, "routing state reset by controller");
                self.engine.table.clear();
                self.reset_routing();
            }
            ConfigProperty::AddFunction => {
                let source = NodeId::new(packet.net(), packet.src());
                match self.reassembler.feed(source, params) {
                    Ok(Some(blob)) => {
                        let id = params[0];
                        info!(id, bytes = blob.len(), "function blob installed");
                        self.blobs.insert(id, blob);
                    }
                    Ok(None) => {}
                    Err(error) => warn!(%error, "bad function fragment"),
                }
            }
            ConfigProperty::RemoveFunction => {
                if let Some(&id) = params.first() {
                    self.blobs.remove(&id);
                    self.engine.functions.unregister(id);
                }
            }
            // read-only selectors carry nothing to write
            ConfigProperty::GetAlias | ConfigProperty::GetRule => {}
        }
    }

    fn config_read(&mut self, property: ConfigProperty, params: &[u8]) -> Option<Vec<u8>> {
        match property {
            ConfigProperty::MyAddress => {
                Some(vec![self.cfg.addr.hi(), self.cfg.addr.lo()])
            }
            ConfigProperty::NetworkId => Some(vec![0, self.cfg.net]),
            ConfigProperty::BeaconPeriod => {
                Some((self.cfg.beacon_period.as_secs() as u16).to_be_bytes().to_vec())
            }
            ConfigProperty::ReportPeriod => {
                Some((self.cfg.report_period.as_secs() as u16).to_be_bytes().to_vec())
            }
            ConfigProperty::RuleTtl => Some(vec![0, self.cfg.rule_ttl]),
            ConfigProperty::RssiMin => Some(vec![0, self.cfg.rssi_min]),
            ConfigProperty::GetAlias => {
                let index = *params.first()?;
                let alias = self.accepted.get(index as usize)?;
                Some(vec![index, alias.hi(), alias.lo()])
            }
            ConfigProperty::GetRule => {
                let index = *params.first()?;
                let entry = self.engine.table.get(index as usize)?;
                let mut reply = vec![index];
                reply.extend_from_slice(&entry.encode());
                Some(reply)
            }
            // write-only properties have no readable value; the caller's
            // query times out, which it must treat as unknown
            _ => None,
        }
    }

    async fn engine_process(&mut self, packet: Packet) {
        let io = self
            .engine
            .process(packet, &mut self.neighbors, &mut self.accepted);
        for packet in io.transmit {
            self.send_outbound(packet.encode()).await;
        }
        for packet in io.resubmit {
            self.pending.push_back((packet, Source::Local));
        }
        for packet in io.ask {
            self.escalate(packet).await;
        }
    }

    /// Fragment an unmatched packet into REQUEST parts toward the sink.
    async fn escalate(&mut self, packet: Packet) {
        let Some(sink) = self.sink.filter(|_| self.active) else {
            debug!(addr = %self.cfg.addr, "no sink known, escalation dropped");
            return;
        };
        let fragments = match self.fragmenter.split(packet.as_bytes()) {
            Ok(fragments) => fragments,
            Err(error) => {
                warn!(%error, "packet not fragmentable, dropped");
                return;
            }
        };
        for fragment in fragments {
            match RequestView::build(self.cfg.net, self.cfg.addr, sink, &fragment) {
                Ok(request) => self.pending.push_back((request, Source::Local)),
                Err(error) => warn!(%error, "request fragment too large, dropped"),
            }
        }
    }

    async fn emit_beacon(&mut self) {
        let Some(sink) = self.sink.filter(|_| self.active) else {
            return;
        };
        let beacon = BeaconView::build(
            self.cfg.net,
            self.cfg.addr,
            self.distance,
            self.cfg.battery,
            sink,
        );
        self.send_outbound(beacon.encode()).await;
    }

    async fn emit_report(&mut self) {
        let Some(sink) = self.sink.filter(|_| self.active) else {
            return;
        };
        let links = self.neighbors.drain_links();
        match sdwn_wire::ReportView::build(
            self.cfg.net,
            self.cfg.addr,
            sink,
            self.distance,
            self.cfg.battery,
            &links,
        ) {
            Ok(report) => self.pending.push_back((report, Source::Local)),
            Err(error) => warn!(%error, "report too large, dropped"),
        }
    }

    fn run_aging(&mut self) {
        let outcome = self.engine.table.age(self.cfg.aging_step);
        if outcome.default_route_lost && !self.cfg.is_sink {
            warn!(addr = %self.cfg.addr, "default route aged out, resetting");
            self.reset_routing();
        }
        let _ = self
            .reassembler
            .expire_older_than(self.cfg.report_period * 4);
    }

    fn reset_routing(&mut self) {
        self.active = false;
        self.distance = u8::MAX;
        self.sink = None;
    }

    async fn handle_command(&mut self, command: NodeCommand) {
        match command {
            NodeCommand::InstallRule(entry) => {
                self.engine.table.insert(entry);
            }
            NodeCommand::RemoveRule(position) => {
                if let Some(outcome) = self.engine.table.remove_at(position) {
                    if outcome.default_route_lost && !self.cfg.is_sink {
                        self.reset_routing();
                    }
                }
            }
            NodeCommand::RegisterFunction(id, function) => {
                self.engine.functions.register(id, function);
            }
            NodeCommand::SendData { dst, payload } => {
                let mut packet =
                    Packet::new(self.cfg.net, self.cfg.addr, dst, PacketType::Data);
                match packet.set_payload(&payload) {
                    Ok(()) => self.pending.push_back((packet, Source::Local)),
                    Err(error) => warn!(%error, "application payload too large, dropped"),
                }
            }
            NodeCommand::Snapshot(reply) => {
                let _ = reply.send(NodeSnapshot {
                    addr: self.cfg.addr,
                    net: self.cfg.net,
                    active: self.active,
                    distance: self.distance,
                    sink: self.sink,
                    rules: self.engine.table.iter().cloned().collect(),
                    neighbor_count: self.neighbors.len(),
                });
            }
        }
    }

    async fn send_outbound(&self, frame: Bytes) {
        let _ = self.outbound.send(frame).await;
    }

    fn params_u16(params: &[u8]) -> Option<u16> {
        Some(((*params.first()? as u16) << 8) | *params.get(1)? as u16)
    }

    async fn send_uplink(&self, packet: Packet) {
        match &self.uplink {
            Some(uplink) => {
                let _ = uplink.send(packet.encode()).await;
            }
            None => debug!("uplink frame at a node without an uplink, dropped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const NET: u8 = 1;

    fn sink_config() -> NodeConfig {
        NodeConfig {
            addr: NodeAddress::new(1),
            is_sink: true,
            ..NodeConfig::default()
        }
    }

    fn mote_config(addr: u16) -> NodeConfig {
        NodeConfig {
            addr: NodeAddress::new(addr),
            ..NodeConfig::default()
        }
    }

    async fn wait_active(handle: &NodeHandle) -> NodeSnapshot {
        for _ in 0..100 {
            let snapshot = handle.snapshot().await.unwrap();
            if snapshot.active {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("node never became active");
    }

    /// Pull outbound frames until one decodes to the wanted type.
    async fn next_of_type(handle: &mut NodeHandle, typ: PacketType) -> Packet {
        for _ in 0..50 {
            let frame = tokio::time::timeout(Duration::from_secs(30), handle.next_outbound())
                .await
                .expect("no outbound frame")
                .expect("outbound closed");
            let packet = Packet::decode(&frame).unwrap();
            if packet.typ() == Some(typ) {
                return packet;
            }
        }
        panic!("wanted packet type never emitted");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_starts_active_and_beacons() {
        let mut sink = Node::spawn(sink_config());

        let snapshot = wait_active(&sink).await;
        assert_eq!(snapshot.distance, 0);
        assert_eq!(snapshot.sink, Some(NodeAddress::new(1)));

        let beacon = next_of_type(&mut sink, PacketType::Beacon).await;
        let view = BeaconView::new(&beacon).unwrap();
        assert_eq!(view.distance(), 0);
        assert_eq!(view.sink(), NodeAddress::new(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_registers_with_controller() {
        let mut sink = Node::spawn(sink_config());
        let frame = sink.next_uplink().await.unwrap();
        let packet = Packet::decode(&frame).unwrap();
        assert_eq!(packet.typ(), Some(PacketType::RegProxy));
    }

    #[tokio::test(start_paused = true)]
    async fn test_beacon_adoption_installs_default_route() {
        let mote = Node::spawn(mote_config(2));

        let beacon = BeaconView::build(NET, NodeAddress::new(1), 0, 255, NodeAddress::new(1));
        mote.deliver(beacon.encode(), 220).await.unwrap();

        let snapshot = wait_active(&mote).await;
        assert_eq!(snapshot.distance, 1);
        assert_eq!(snapshot.sink, Some(NodeAddress::new(1)));
        assert_eq!(snapshot.rules.len(), 1);
        assert_eq!(
            snapshot.rules[0].windows[0],
            Window::dst_equals(NodeAddress::new(1))
        );
        assert_eq!(snapshot.neighbor_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_weak_beacon_is_not_adopted() {
        let mote = Node::spawn(mote_config(2));

        let beacon = BeaconView::build(NET, NodeAddress::new(1), 0, 255, NodeAddress::new(1));
        mote.deliver(beacon.encode(), 10).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let snapshot = mote.snapshot().await.unwrap();
        assert!(!snapshot.active);
        // the neighbor is still recorded for reporting
        assert_eq!(snapshot.neighbor_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_route_forwards_sink_bound_traffic() {
        let mut mote = Node::spawn(mote_config(2));

        let beacon = BeaconView::build(NET, NodeAddress::new(1), 0, 255, NodeAddress::new(1));
        mote.deliver(beacon.encode(), 220).await.unwrap();
        wait_active(&mote).await;

        // sink-bound traffic routed through this node follows the default route
        let mut data = Packet::new(
            NET,
            NodeAddress::new(9),
            NodeAddress::new(1),
            PacketType::Data,
        );
        data.set_next_hop(NodeAddress::new(2));
        data.set_payload(b"x").unwrap();
        mote.deliver(data.encode(), 200).await.unwrap();

        let forwarded = next_of_type(&mut mote, PacketType::Data).await;
        assert_eq!(forwarded.next_hop(), NodeAddress::new(1));
        assert_eq!(forwarded.ttl(), sdwn_wire::DEFAULT_TTL - 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_destination_escalates_to_sink() {
        let mut mote = Node::spawn(mote_config(2));

        let beacon = BeaconView::build(NET, NodeAddress::new(1), 0, 255, NodeAddress::new(1));
        mote.deliver(beacon.encode(), 220).await.unwrap();
        wait_active(&mote).await;

        // no rule covers dst 9, so the packet is fragmented into REQUESTs
        // addressed to the sink, which the default route then forwards
        mote.send_data(NodeAddress::new(9), b"hello".to_vec())
            .await
            .unwrap();

        let request = next_of_type(&mut mote, PacketType::Request).await;
        assert_eq!(request.dst(), NodeAddress::new(1));
        assert_eq!(request.next_hop(), NodeAddress::new(1));

        let mut reassembler = Reassembler::new();
        let inner = reassembler
            .feed(NodeId::new(NET, request.src()), request.payload())
            .unwrap()
            .expect("single-fragment request");
        let original = Packet::decode(&inner).unwrap();
        assert_eq!(original.dst(), NodeAddress::new(9));
        assert_eq!(original.payload(), b"hello");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_escalates_unmatched_traffic() {
        let mut sink = Node::spawn(sink_config());
        let _registration = sink.next_uplink().await.unwrap();

        // a sink has no default route; unknown traffic becomes REQUEST
        // fragments carrying the raw packet up to the controller
        let mut data = Packet::new(
            NET,
            NodeAddress::new(2),
            NodeAddress::new(9),
            PacketType::Data,
        );
        data.set_next_hop(NodeAddress::new(1));
        data.set_payload(b"lost").unwrap();
        sink.deliver(data.encode(), 200).await.unwrap();

        let frame = sink.next_uplink().await.unwrap();
        let request = Packet::decode(&frame).unwrap();
        assert_eq!(request.typ(), Some(PacketType::Request));
        assert_eq!(request.src(), NodeAddress::new(1));

        // the reassembled fragment set is the original frame
        let mut reassembler = Reassembler::new();
        let inner = reassembler
            .feed(
                NodeId::new(NET, request.src()),
                request.payload(),
            )
            .unwrap()
            .expect("single-fragment request");
        assert_eq!(inner, data.as_bytes());
    }

    #[tokio::test(start_paused = true)]
    async fn test_data_for_me_is_delivered() {
        let mut mote = Node::spawn(mote_config(2));

        let mut data = Packet::new(
            NET,
            NodeAddress::new(9),
            NodeAddress::new(2),
            PacketType::Data,
        );
        data.set_next_hop(NodeAddress::new(2));
        data.set_payload(b"ping").unwrap();
        mote.deliver(data.encode(), 200).await.unwrap();

        let delivered = mote.next_delivered().await.unwrap();
        assert_eq!(delivered.payload(), b"ping");
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_path_installs_both_rules_and_forwards() {
        let mut mote = Node::spawn(mote_config(3));

        // path 2 - 3 - 4, this node in the middle
        let path = vec![
            NodeAddress::new(2),
            NodeAddress::new(3),
            NodeAddress::new(4),
        ];
        let mut packet = OpenPathView::build(NET, NodeAddress::new(1), &path).unwrap();
        packet.set_dst(NodeAddress::new(3));
        packet.set_next_hop(NodeAddress::new(3));
        mote.deliver(packet.encode(), 200).await.unwrap();

        let onward = next_of_type(&mut mote, PacketType::OpenPath).await;
        assert_eq!(onward.dst(), NodeAddress::new(4));

        let snapshot = mote.snapshot().await.unwrap();
        assert_eq!(snapshot.rules.len(), 2);
        assert_eq!(
            snapshot.rules[0].windows[0],
            Window::dst_equals(NodeAddress::new(2))
        );
        assert_eq!(
            snapshot.rules[1].windows[0],
            Window::dst_equals(NodeAddress::new(4))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_round_trip_over_downlink() {
        let mut sink = Node::spawn(sink_config());

        // skip the registration frame
        let _ = sink.next_uplink().await.unwrap();

        let query = ConfigView::read_request(
            NET,
            NodeAddress::new(1),
            NodeAddress::new(1),
            ConfigProperty::MyAddress,
            None,
        )
        .unwrap();
        sink.deliver_downlink(query.encode()).await.unwrap();

        let frame = sink.next_uplink().await.unwrap();
        let reply = Packet::decode(&frame).unwrap();
        let view = ConfigView::new(&reply).unwrap();
        assert_eq!(view.property(), ConfigProperty::MyAddress);
        assert_eq!(view.value_u16(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_route_ages_out_and_resets() {
        let mote = Node::spawn(NodeConfig {
            aging_period: Duration::from_secs(1),
            aging_step: 50,
            rule_ttl: 100,
            ..mote_config(2)
        });

        let beacon = BeaconView::build(NET, NodeAddress::new(1), 0, 255, NodeAddress::new(1));
        mote.deliver(beacon.encode(), 220).await.unwrap();
        wait_active(&mote).await;

        // two aging passes with no fresh beacon remove the default route
        tokio::time::sleep(Duration::from_secs(5)).await;
        let snapshot = mote.snapshot().await.unwrap();
        assert!(!snapshot.active);
        assert_eq!(snapshot.distance, u8::MAX);
        assert_eq!(snapshot.sink, None);
        assert!(snapshot.rules.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreign_frames_pass_through() {
        let mut mote = Node::spawn(mote_config(2));

        let frame = Bytes::from_static(&[70, 1, 2, 3, 4]);
        mote.deliver(frame.clone(), 200).await.unwrap();

        let out = mote.next_outbound().await.unwrap();
        assert_eq!(out, frame);
    }
}

//! Controller dispatch loop and synchronous query helpers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::interval;
use tracing::{debug, info, warn};

use sdwn_routing::{open_path_packet, RouteManager, RouteOutcome};
use sdwn_topology::{NetworkGraph, TopologyConfig, TopologyStats};
use sdwn_wire::{
    ConfigProperty, ConfigView, FlowTableEntry, Fragmenter, NodeAddress, NodeId, Packet,
    PacketType, Reassembler, ReportView, RequestView, ResponseView, WireError,
};

use crate::correlation::{QueryKey, ResponseCache};

/// Controller tuning knobs.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Fixed wait of the synchronous query helpers
    pub query_timeout: Duration,
    /// Lifetime of parked replies in the correlation cache
    pub reply_ttl: Duration,
    /// Period of the background sweeps (cache, graph, reassembly)
    pub sweep_interval: Duration,
    /// Incomplete fragment sets older than this are discarded
    pub fragment_timeout: Duration,
    /// Depth of the inbound/outbound frame queues
    pub queue_depth: usize,
    /// Topology graph maintenance settings
    pub topology: TopologyConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            query_timeout: Duration::from_secs(2),
            reply_ttl: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(1),
            fragment_timeout: Duration::from_secs(30),
            queue_depth: 64,
            topology: TopologyConfig::default(),
        }
    }
}

/// Controller-side errors
#[derive(Error, Debug)]
pub enum ControllerError {
    /// The query wait elapsed with no reply parked. This means "unknown",
    /// never "no": the reply may simply have been lost or late.
    #[error("query timed out")]
    QueryTimeout,

    /// No sink has registered for the addressed network
    #[error("no sink registered for network {0}")]
    NoSink(u8),

    /// The controller task has stopped
    #[error("controller stopped")]
    Stopped,

    /// Wire-format failure while building or reading a packet
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Counters exposed for operators and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerStats {
    /// Reports folded into the topology graph
    pub reports: u64,
    /// Requests fully reassembled
    pub requests: u64,
    /// Paths computed and installed
    pub paths_installed: u64,
    /// Requests answered with "no route available"
    pub no_route: u64,
}

#[derive(Debug, Default)]
struct Counters {
    reports: AtomicU64,
    requests: AtomicU64,
    paths_installed: AtomicU64,
    no_route: AtomicU64,
}

/// Graph, route cache, reassembly, and sink registry behind one lock, so
/// route computation always sees a consistent topology snapshot.
struct ControlPlane {
    graph: NetworkGraph,
    routes: RouteManager,
    reassembler: Reassembler,
    sinks: HashMap<u8, NodeAddress>,
}

struct ControllerInner {
    cfg: ControllerConfig,
    control: Mutex<ControlPlane>,
    replies: ResponseCache,
    outbound: mpsc::Sender<Bytes>,
    counters: Counters,
}

/// Spawns the controller dispatch task.
pub struct Controller;

impl Controller {
    /// Spawn a controller on the current tokio runtime.
    pub fn spawn(cfg: ControllerConfig) -> ControllerHandle {
        let depth = cfg.queue_depth;
        let (inbound_tx, inbound_rx) = mpsc::channel(depth);
        let (outbound_tx, outbound_rx) = mpsc::channel(depth);
        let (stop_tx, stop_rx) = watch::channel(false);

        let graph = NetworkGraph::new(cfg.topology.clone());
        let topology_changes = graph.subscribe();
        let replies = ResponseCache::new(cfg.reply_ttl, cfg.sweep_interval);

        let inner = Arc::new(ControllerInner {
            control: Mutex::new(ControlPlane {
                graph,
                routes: RouteManager::new(),
                reassembler: Reassembler::new(),
                sinks: HashMap::new(),
            }),
            replies,
            outbound: outbound_tx,
            counters: Counters::default(),
            cfg,
        });

        tokio::spawn(dispatch(Arc::clone(&inner), inbound_rx, stop_rx));

        ControllerHandle {
            inbound: inbound_tx,
            outbound: outbound_rx,
            topology_changes,
            inner,
            stop: stop_tx,
        }
    }
}

async fn dispatch(
    inner: Arc<ControllerInner>,
    mut inbound: mpsc::Receiver<Bytes>,
    mut stop: watch::Receiver<bool>,
) {
    let mut sweep = interval(inner.cfg.sweep_interval);
    info!("controller started");

    loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            frame = inbound.recv() => match frame {
                Some(frame) => inner.handle_frame(frame).await,
                None => break,
            },
            _ = sweep.tick() => {
                let mut control = inner.control.lock().await;
                control.graph.sweep();
                control
                    .reassembler
                    .expire_older_than(inner.cfg.fragment_timeout);
            }
        }
    }

    info!("controller stopped");
}

impl ControllerInner {
    async fn handle_frame(&self, frame: Bytes) {
        let packet = match Packet::decode(&frame) {
            Ok(packet) => packet,
            Err(error) => {
                warn!(%error, "dropping malformed frame");
                return;
            }
        };
        if packet.is_foreign() {
            debug!("foreign frame at the controller, dropped");
            return;
        }

        match packet.typ() {
            Some(PacketType::RegProxy) => {
                info!(net = packet.net(), sink = %packet.src(), "sink registered");
                let mut control = self.control.lock().await;
                control.sinks.insert(packet.net(), packet.src());
            }
            Some(PacketType::Report) => self.handle_report(&packet).await,
            Some(PacketType::Request) => self.handle_request(&packet).await,
            Some(PacketType::Config) => self.cache_reply(&packet),
            Some(other) => {
                debug!(typ = ?other, "unexpected packet at the controller, dropped");
            }
            None => debug!("unknown packet type, dropped"),
        }
    }

    async fn handle_report(&self, packet: &Packet) {
        let report = match ReportView::new(packet) {
            Ok(view) => view.to_report(),
            Err(error) => {
                warn!(%error, "bad report, dropped");
                return;
            }
        };

        let mut control = self.control.lock().await;
        let changed = control.graph.update_from_report(&report);
        self.counters.reports.fetch_add(1, Ordering::Relaxed);
        if changed {
            debug!(
                reporter = %report.reporter,
                version = control.graph.version(),
                "topology changed"
            );
        }
    }

    async fn handle_request(&self, packet: &Packet) {
        if let Err(error) = RequestView::new(packet) {
            warn!(%error, "bad request fragment, dropped");
            return;
        }

        let source = NodeId::new(packet.net(), packet.src());
        let mut control = self.control.lock().await;
        // reborrow once so the route call can split the guard's fields
        let control = &mut *control;
        let complete = match control.reassembler.feed(source, packet.payload()) {
            Ok(complete) => complete,
            Err(error) => {
                warn!(%error, "bad request fragment, dropped");
                return;
            }
        };
        let Some(original) = complete else {
            return;
        };
        self.counters.requests.fetch_add(1, Ordering::Relaxed);

        let original = match Packet::decode(&original) {
            Ok(original) => original,
            Err(error) => {
                warn!(%error, "reassembled request is not a packet, dropped");
                return;
            }
        };

        let net = original.net();
        let src = NodeId::new(net, original.src());
        let dst = NodeId::new(net, original.dst());

        match control.routes.route(&control.graph, src, dst) {
            RouteOutcome::Install { path } => {
                let controller_addr = control
                    .sinks
                    .get(&net)
                    .copied()
                    .unwrap_or_else(|| NodeAddress::new(0));

                match open_path_packet(net, controller_addr, &path) {
                    Ok(open_path) => self.send(open_path).await,
                    Err(error) => {
                        warn!(%error, "path too long to install, dropped");
                        return;
                    }
                }

                // re-send the escalated packet toward its destination via
                // the now-known first hop
                let mut resent = original;
                resent.set_next_hop(path[1].addr);
                self.send(resent).await;

                self.counters.paths_installed.fetch_add(1, Ordering::Relaxed);
            }
            RouteOutcome::NoRoute => {
                self.counters.no_route.fetch_add(1, Ordering::Relaxed);
                warn!(src = %src, dst = %dst, "no route available");
            }
        }
    }

    fn cache_reply(&self, packet: &Packet) {
        let view = match ConfigView::new(packet) {
            Ok(view) => view,
            Err(error) => {
                warn!(%error, "bad config reply, dropped");
                return;
            }
        };
        if view.is_write() {
            debug!("config write echoed to the controller, dropped");
            return;
        }

        let property = view.property();
        let params = view.params();
        let index = if property.is_indexed() {
            params.first().copied()
        } else {
            None
        };

        let key = QueryKey {
            net: packet.net(),
            addr: packet.src(),
            property,
            index,
        };
        debug!(node = %packet.src(), property = ?property, "reply cached");
        self.replies.insert(key, params.to_vec());
    }

    async fn send(&self, packet: Packet) {
        let _ = self.outbound.send(packet.encode()).await;
    }

    async fn sink_for(&self, net: u8) -> Result<NodeAddress, ControllerError> {
        let control = self.control.lock().await;
        control
            .sinks
            .get(&net)
            .copied()
            .ok_or(ControllerError::NoSink(net))
    }
}

/// Handle to a spawned controller.
pub struct ControllerHandle {
    inbound: mpsc::Sender<Bytes>,
    outbound: mpsc::Receiver<Bytes>,
    topology_changes: watch::Receiver<u64>,
    inner: Arc<ControllerInner>,
    stop: watch::Sender<bool>,
}

/// Cloneable frame ingress of the controller, for sink adapters.
#[derive(Debug, Clone)]
pub struct ControllerInbox {
    inbound: mpsc::Sender<Bytes>,
}

impl ControllerInbox {
    /// Push one frame a sink forwarded upward
    pub async fn deliver(&self, frame: Bytes) -> Result<(), ControllerError> {
        self.inbound
            .send(frame)
            .await
            .map_err(|_| ControllerError::Stopped)
    }
}

impl ControllerHandle {
    /// Push one frame a sink forwarded upward; suspends while the inbound
    /// queue is full.
    pub async fn deliver(&self, frame: Bytes) -> Result<(), ControllerError> {
        self.inbound
            .send(frame)
            .await
            .map_err(|_| ControllerError::Stopped)
    }

    /// Cloneable frame ingress for sink adapters
    pub fn inbox(&self) -> ControllerInbox {
        ControllerInbox {
            inbound: self.inbound.clone(),
        }
    }

    /// Detach the outbound frame queue, e.g. to move it into a sink adapter
    pub fn take_outbound(&mut self) -> mpsc::Receiver<Bytes> {
        let (_, dead) = mpsc::channel(1);
        std::mem::replace(&mut self.outbound, dead)
    }

    /// Await the next frame to hand to a sink's downlink
    pub async fn next_outbound(&mut self) -> Option<Bytes> {
        self.outbound.recv().await
    }

    /// Subscribe to topology version bumps
    pub fn topology_changes(&self) -> watch::Receiver<u64> {
        self.topology_changes.clone()
    }

    /// Raise the cooperative stop flag
    pub fn shutdown(&self) {
        let _ = self.stop.send(true);
    }

    /// Counter snapshot
    pub fn stats(&self) -> ControllerStats {
        let counters = &self.inner.counters;
        ControllerStats {
            reports: counters.reports.load(Ordering::Relaxed),
            requests: counters.requests.load(Ordering::Relaxed),
            paths_installed: counters.paths_installed.load(Ordering::Relaxed),
            no_route: counters.no_route.load(Ordering::Relaxed),
        }
    }

    /// Topology graph counters
    pub async fn topology_stats(&self) -> TopologyStats {
        self.inner.control.lock().await.graph.stats()
    }

    /// Read a configuration property from a node: send the query, wait the
    /// fixed timeout, then poll the correlation cache once. Absence is a
    /// [`ControllerError::QueryTimeout`], which callers must treat as
    /// "unknown", not "no".
    pub async fn query_config(
        &self,
        net: u8,
        addr: NodeAddress,
        property: ConfigProperty,
        index: Option<u8>,
    ) -> Result<Vec<u8>, ControllerError> {
        let sink = self.inner.sink_for(net).await?;
        let request = ConfigView::read_request(net, sink, addr, property, index)?;
        self.inner.send(request).await;

        tokio::time::sleep(self.inner.cfg.query_timeout).await;

        let key = QueryKey {
            net,
            addr,
            property,
            index,
        };
        self.inner
            .replies
            .take(&key)
            .ok_or(ControllerError::QueryTimeout)
    }

    /// Read a scalar property as its big-endian value
    pub async fn read_value(
        &self,
        net: u8,
        addr: NodeAddress,
        property: ConfigProperty,
    ) -> Result<u16, ControllerError> {
        let params = self.query_config(net, addr, property, None).await?;
        if params.len() < 2 {
            return Err(WireError::Malformed.into());
        }
        Ok(((params[0] as u16) << 8) | params[1] as u16)
    }

    /// Fetch the flow rule installed at `index` on a node
    pub async fn get_rule(
        &self,
        net: u8,
        addr: NodeAddress,
        index: u8,
    ) -> Result<FlowTableEntry, ControllerError> {
        let params = self
            .query_config(net, addr, ConfigProperty::GetRule, Some(index))
            .await?;
        if params.len() < 2 {
            return Err(WireError::Malformed.into());
        }
        Ok(FlowTableEntry::decode(&params[1..])?)
    }

    /// Write a configuration property on a node (fire and forget)
    pub async fn write_config(
        &self,
        net: u8,
        addr: NodeAddress,
        property: ConfigProperty,
        params: &[u8],
    ) -> Result<(), ControllerError> {
        let sink = self.inner.sink_for(net).await?;
        let request = ConfigView::write_request(net, sink, addr, property, params)?;
        self.inner.send(request).await;
        Ok(())
    }

    /// Push one flow rule onto a node
    pub async fn push_rule(
        &self,
        net: u8,
        addr: NodeAddress,
        entry: &FlowTableEntry,
    ) -> Result<(), ControllerError> {
        let sink = self.inner.sink_for(net).await?;
        let response = ResponseView::build(net, sink, addr, entry)?;
        self.inner.send(response).await;
        Ok(())
    }

    /// Install a function blob on a node, fragmented over CONFIG packets
    /// exactly like data-plane escalations are fragmented.
    pub async fn install_function(
        &self,
        net: u8,
        addr: NodeAddress,
        id: u8,
        blob: &[u8],
    ) -> Result<(), ControllerError> {
        let sink = self.inner.sink_for(net).await?;
        let mut fragmenter = Fragmenter::new();
        for fragment in fragmenter.split_with_id(Some(id), blob)? {
            let request =
                ConfigView::write_request(net, sink, addr, ConfigProperty::AddFunction, &fragment)?;
            self.inner.send(request).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdwn_node::{Node, NodeConfig, NodeHandle};
    use sdwn_wire::{views, BeaconView};

    const NET: u8 = 1;

    fn addr(a: u16) -> NodeAddress {
        NodeAddress::new(a)
    }

    fn report_frame(reporter: u16, links: &[(u16, u8)]) -> Bytes {
        let links: Vec<(NodeAddress, u8)> =
            links.iter().map(|&(a, rssi)| (addr(a), rssi)).collect();
        ReportView::build(NET, addr(reporter), addr(1), 1, 200, &links)
            .unwrap()
            .encode()
    }

    async fn register_sink(controller: &ControllerHandle) {
        controller
            .deliver(views::reg_proxy(NET, addr(1)).encode())
            .await
            .unwrap();
        // dispatch is asynchronous; wait for the registration to land
        for _ in 0..100 {
            if controller.inner.control.lock().await.sinks.contains_key(&NET) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("sink never registered");
    }

    /// Line topology 2 - 3 - 4 fed as three reports.
    async fn feed_line_topology(controller: &ControllerHandle) {
        for frame in [
            report_frame(2, &[(3, 250)]),
            report_frame(3, &[(2, 250), (4, 250)]),
            report_frame(4, &[(3, 250)]),
        ] {
            controller.deliver(frame).await.unwrap();
        }
        // dispatch is asynchronous; wait for the reports to land
        for _ in 0..100 {
            if controller.stats().reports == 3 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("reports never processed");
    }

    async fn next_of_type(controller: &mut ControllerHandle, typ: PacketType) -> Packet {
        for _ in 0..50 {
            let frame =
                tokio::time::timeout(Duration::from_secs(30), controller.next_outbound())
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

    async fn node_next_of_type(handle: &mut NodeHandle, typ: PacketType) -> Packet {
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

    async fn activate(handle: &NodeHandle) {
        let beacon = BeaconView::build(NET, addr(1), 0, 255, addr(1));
        handle.deliver(beacon.encode(), 220).await.unwrap();
        for _ in 0..100 {
            if handle.snapshot().await.unwrap().active {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("node never became active");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_build_topology() {
        let controller = Controller::spawn(ControllerConfig::default());
        let mut changes = controller.topology_changes();

        feed_line_topology(&controller).await;

        let stats = controller.topology_stats().await;
        assert_eq!(stats.nodes, 3);
        assert_eq!(stats.edges, 4);
        assert!(*changes.borrow_and_update() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_route_is_surfaced_not_guessed() {
        let controller = Controller::spawn(ControllerConfig::default());
        register_sink(&controller).await;
        feed_line_topology(&controller).await;

        // destination 9 is not in the graph
        let mut lost = Packet::new(NET, addr(2), addr(9), PacketType::Data);
        lost.set_payload(b"x").unwrap();
        let mut fragmenter = Fragmenter::new();
        for fragment in fragmenter.split(lost.as_bytes()).unwrap() {
            let request = RequestView::build(NET, addr(2), addr(1), &fragment).unwrap();
            controller.deliver(request.encode()).await.unwrap();
        }

        for _ in 0..100 {
            if controller.stats().no_route == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(controller.stats().no_route, 1);
        assert_eq!(controller.stats().paths_installed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_round_trip_and_timeout() {
        let mut controller = Controller::spawn(ControllerConfig::default());
        register_sink(&controller).await;

        // the handle is mutably borrowed by next_outbound below, so run the
        // query against the shared inner state from its own task
        let inner = Arc::clone(&controller.inner);
        let query = tokio::spawn(async move {
            let request = ConfigView::read_request(
                NET,
                addr(1),
                addr(2),
                ConfigProperty::BeaconPeriod,
                None,
            )
            .unwrap();
            inner.send(request).await;
            tokio::time::sleep(inner.cfg.query_timeout).await;
            inner
                .replies
                .take(&QueryKey {
                    net: NET,
                    addr: addr(2),
                    property: ConfigProperty::BeaconPeriod,
                    index: None,
                })
                .ok_or(ControllerError::QueryTimeout)
        });

        // the query goes out
        let outbound = next_of_type(&mut controller, PacketType::Config).await;
        let view = ConfigView::new(&outbound).unwrap();
        assert!(!view.is_write());
        assert_eq!(outbound.dst(), addr(2));

        // the node's reply arrives out of band before the timeout
        let reply = ConfigView::reply(NET, addr(2), addr(1), ConfigProperty::BeaconPeriod, &[0, 10])
            .unwrap();
        controller.deliver(reply.encode()).await.unwrap();

        let value = query.await.unwrap().unwrap();
        assert_eq!(value, vec![0, 10]);

        // a query nobody answers times out with a typed error
        let missing = controller
            .query_config(NET, addr(7), ConfigProperty::BeaconPeriod, None)
            .await;
        assert!(matches!(missing, Err(ControllerError::QueryTimeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_route_installation() {
        let mut controller = Controller::spawn(ControllerConfig::default());
        register_sink(&controller).await;
        feed_line_topology(&controller).await;

        // node A with only the default route toward the sink
        let mut a = Node::spawn(NodeConfig {
            addr: addr(2),
            ..NodeConfig::default()
        });
        activate(&a).await;

        // A gets data for the unknown destination B and escalates
        a.send_data(addr(4), b"hello".to_vec()).await.unwrap();
        let request = node_next_of_type(&mut a, PacketType::Request).await;
        assert_eq!(request.dst(), addr(1));
        controller.deliver(request.encode()).await.unwrap();

        // the controller answers with a path install plus the re-sent data
        let open_path = next_of_type(&mut controller, PacketType::OpenPath).await;
        assert_eq!(open_path.dst(), addr(2));
        let view = sdwn_wire::OpenPathView::new(&open_path).unwrap();
        assert_eq!(view.path(), vec![addr(2), addr(3), addr(4)]);

        let resent = next_of_type(&mut controller, PacketType::Data).await;
        assert_eq!(resent.dst(), addr(4));
        assert_eq!(resent.next_hop(), addr(3));
        assert_eq!(resent.payload(), b"hello");
        assert_eq!(controller.stats().paths_installed, 1);

        // A installs the forward rule and passes the path to C
        a.deliver(open_path.encode(), 210).await.unwrap();
        let onward = node_next_of_type(&mut a, PacketType::OpenPath).await;
        assert_eq!(onward.dst(), addr(3));

        let snapshot = a.snapshot().await.unwrap();
        assert!(snapshot
            .rules
            .iter()
            .any(|rule| rule.windows[0] == sdwn_wire::Window::dst_equals(addr(4))));

        // C, mid-path, installs both rules and forwards the data to B
        let mut c = Node::spawn(NodeConfig {
            addr: addr(3),
            ..NodeConfig::default()
        });
        activate(&c).await;
        c.deliver(onward.encode(), 210).await.unwrap();
        let _onward_to_b = node_next_of_type(&mut c, PacketType::OpenPath).await;

        c.deliver(resent.encode(), 210).await.unwrap();
        let forwarded = node_next_of_type(&mut c, PacketType::Data).await;
        assert_eq!(forwarded.dst(), addr(4));
        assert_eq!(forwarded.next_hop(), addr(4));

        let snapshot = c.snapshot().await.unwrap();
        assert!(snapshot
            .rules
            .iter()
            .any(|rule| rule.windows[0] == sdwn_wire::Window::dst_equals(addr(2))));
        assert!(snapshot
            .rules
            .iter()
            .any(|rule| rule.windows[0] == sdwn_wire::Window::dst_equals(addr(4))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rule_push_reaches_the_wire() {
        let mut controller = Controller::spawn(ControllerConfig::default());
        register_sink(&controller).await;

        let entry: FlowTableEntry = "if P.DST == 0.9 then DROP".parse().unwrap();
        controller.push_rule(NET, addr(2), &entry).await.unwrap();

        let packet = next_of_type(&mut controller, PacketType::Response).await;
        assert_eq!(packet.dst(), addr(2));
        assert_eq!(
            ResponseView::new(&packet).unwrap().entry().unwrap(),
            entry
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_function_install_is_fragmented() {
        let mut controller = Controller::spawn(ControllerConfig::default());
        register_sink(&controller).await;

        let blob = vec![7u8; 300];
        controller
            .install_function(NET, addr(2), 9, &blob)
            .await
            .unwrap();

        let mut reassembler = Reassembler::new();
        let mut fragments = 0;
        loop {
            let packet = next_of_type(&mut controller, PacketType::Config).await;
            let view = ConfigView::new(&packet).unwrap();
            assert!(view.is_write());
            assert_eq!(view.property(), ConfigProperty::AddFunction);
            fragments += 1;

            if let Some(reassembled) = reassembler
                .feed(NodeId::new(NET, packet.src()), view.params())
                .unwrap()
            {
                assert_eq!(reassembled, blob);
                break;
            }
        }
        assert!(fragments > 1);
    }
}

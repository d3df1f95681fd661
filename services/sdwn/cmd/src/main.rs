//! sdwn binary: a controller and an emulated sensor network in one process.
//!
//! Spawns the controller, one sink, and the configured motes, then wires
//! their frame queues through an emulated radio medium (per-link delivery
//! with a configured signal strength). The sink's uplink feeds the
//! controller, the controller's outbound frames enter the sink's downlink.
//! Socket transports are deliberately not part of the core; this binary is
//! the reference wiring.

use anyhow::Result;
use clap::Parser;
use sdwn_controller::{Controller, ControllerConfig, ControllerHandle};
use sdwn_node::{Node, NodeCommander, NodeConfig, NodeHandle, NodeInbox};
use sdwn_wire::NodeAddress;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::SdwnConfig;
use logging::SdwnLogFormatter;

/// Software-defined sensor network demo harness
#[derive(Parser, Debug)]
#[command(name = "sdwn", version, about = "SDN sensor network with an emulated radio medium")]
struct Args {
    /// Path to the deployment YAML
    #[arg(long, default_value = "sdwn.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Stop after this long, e.g. 45s (runs until ctrl-c when absent)
    #[arg(long)]
    run_for: Option<humantime::Duration>,

    /// Status line period, e.g. 15s
    #[arg(long, default_value = "15s")]
    status_interval: humantime::Duration,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone()));
    tracing_subscriber::fmt()
        .event_format(SdwnLogFormatter::new("sdwn".to_string()))
        .with_env_filter(filter)
        .init();

    let config = SdwnConfig::load_from_file(&args.config)?;
    let network = build_network(&config);

    if config.traffic_period_secs > 0 && config.motes.len() >= 2 {
        spawn_traffic_generator(&config, &network);
    }
    spawn_status_loop(args.status_interval.into(), Arc::clone(&network.controller));

    match args.run_for {
        Some(duration) => tokio::time::sleep(duration.into()).await,
        None => {
            tokio::signal::ctrl_c().await?;
        }
    }

    info!("shutting down");
    network.controller.shutdown();
    Ok(())
}

struct EmulatedNetwork {
    controller: Arc<ControllerHandle>,
    commanders: HashMap<u16, NodeCommander>,
}

fn node_config(config: &SdwnConfig, addr: u16, is_sink: bool) -> NodeConfig {
    NodeConfig {
        net: config.network,
        addr: NodeAddress::new(addr),
        is_sink,
        beacon_period: config.beacon_period(),
        report_period: config.report_period(),
        aging_period: config.aging_period(),
        ..NodeConfig::default()
    }
}

/// Spawn the controller and every node, then wire the frame queues.
fn build_network(config: &SdwnConfig) -> EmulatedNetwork {
    let mut controller = Controller::spawn(ControllerConfig::default());

    let mut handles: Vec<NodeHandle> = Vec::with_capacity(1 + config.motes.len());
    handles.push(Node::spawn(node_config(config, config.sink, true)));
    for &mote in &config.motes {
        handles.push(Node::spawn(node_config(config, mote, false)));
    }

    let inboxes: HashMap<NodeAddress, NodeInbox> = handles
        .iter()
        .map(|handle| (handle.addr(), handle.inbox()))
        .collect();

    // symmetric adjacency of the emulated medium
    let mut adjacency: HashMap<NodeAddress, Vec<(NodeInbox, u8)>> = HashMap::new();
    for link in &config.links {
        let a = NodeAddress::new(link.a);
        let b = NodeAddress::new(link.b);
        if let Some(inbox) = inboxes.get(&b) {
            adjacency.entry(a).or_default().push((inbox.clone(), link.rssi));
        }
        if let Some(inbox) = inboxes.get(&a) {
            adjacency.entry(b).or_default().push((inbox.clone(), link.rssi));
        }
    }

    let mut commanders = HashMap::new();
    for mut handle in handles {
        let addr = handle.addr();
        commanders.insert(addr.as_u16(), handle.commander());

        // radio: everything a node emits reaches each link neighbor with
        // that link's signal strength
        let neighbors = adjacency.remove(&addr).unwrap_or_default();
        let mut outbound = handle.take_outbound();
        tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                for (inbox, rssi) in &neighbors {
                    let _ = inbox.deliver(frame.clone(), *rssi).await;
                }
            }
        });

        // sink uplink feeds the controller
        if let Some(mut uplink) = handle.take_uplink() {
            let controller_inbox = controller.inbox();
            tokio::spawn(async move {
                while let Some(frame) = uplink.recv().await {
                    let _ = controller_inbox.deliver(frame).await;
                }
            });
        }

        // application sink: log whatever reaches this node
        tokio::spawn(async move {
            while let Some(packet) = handle.next_delivered().await {
                component_info!(
                    "node",
                    "data delivered at {}: {} bytes from {}",
                    packet.dst(),
                    packet.payload_len(),
                    packet.src()
                );
            }
        });
    }

    // controller downlink enters the network at the sink
    if let Some(sink_inbox) = inboxes.get(&NodeAddress::new(config.sink)).cloned() {
        let mut downlink = controller.take_outbound();
        tokio::spawn(async move {
            while let Some(frame) = downlink.recv().await {
                let _ = sink_inbox.deliver_downlink(frame).await;
            }
        });
    }

    EmulatedNetwork {
        controller: Arc::new(controller),
        commanders,
    }
}

/// Rotate demo DATA packets through the motes so routes get requested,
/// installed, aged out, and requested again.
fn spawn_traffic_generator(config: &SdwnConfig, network: &EmulatedNetwork) {
    let motes = config.motes.clone();
    let period = Duration::from_secs(config.traffic_period_secs);
    let commanders: Vec<(u16, NodeCommander)> = motes
        .iter()
        .filter_map(|&addr| {
            network
                .commanders
                .get(&addr)
                .map(|commander| (addr, commander.clone()))
        })
        .collect();

    tokio::spawn(async move {
        let mut tick = tokio::time::interval(period);
        let mut round = 0usize;
        loop {
            tick.tick().await;
            let (src, commander) = &commanders[round % commanders.len()];
            let (dst, _) = &commanders[(round + 1) % commanders.len()];
            let payload = format!("demo {}", round).into_bytes();

            component_info!("traffic", "sending {} -> {}", src, dst);
            if commander
                .send_data(NodeAddress::new(*dst), payload)
                .await
                .is_err()
            {
                component_warn!("traffic", "node {} is gone, stopping generator", src);
                break;
            }
            round += 1;
        }
    });
}

fn spawn_status_loop(period: Duration, controller: Arc<ControllerHandle>) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(period);
        loop {
            tick.tick().await;
            let stats = controller.stats();
            let topology = controller.topology_stats().await;
            component_info!(
                "controller",
                "nodes={} edges={} version={} reports={} requests={} paths={} no_route={}",
                topology.nodes,
                topology.edges,
                topology.version,
                stats.reports,
                stats.requests,
                stats.paths_installed,
                stats.no_route
            );
        }
    });
}

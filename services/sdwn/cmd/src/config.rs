//! Configuration handling for the sdwn binary.
//!
//! The deployment is described by a YAML file (network id, sink, motes, and
//! the emulated radio links between them) with environment variables taking
//! precedence over the file.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// One emulated radio link with its signal strength, symmetric by default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// One endpoint address (integer form)
    pub a: u16,
    /// Other endpoint address (integer form)
    pub b: u16,
    /// Received signal strength on this link
    #[serde(default = "default_rssi")]
    pub rssi: u8,
}

fn default_rssi() -> u8 {
    220
}

/// Deployment description loaded at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SdwnConfig {
    /// Network id (0..=62)
    pub network: u8,
    /// Address of the sink node
    pub sink: u16,
    /// Addresses of the ordinary motes
    pub motes: Vec<u16>,
    /// Emulated links between nodes
    pub links: Vec<LinkConfig>,
    /// Beacon period in seconds
    pub beacon_period_secs: u64,
    /// Report period in seconds
    pub report_period_secs: u64,
    /// Flow-table aging period in seconds
    pub aging_period_secs: u64,
    /// Demo traffic period in seconds; 0 disables the generator
    pub traffic_period_secs: u64,
}

impl Default for SdwnConfig {
    fn default() -> Self {
        SdwnConfig {
            network: 1,
            sink: 1,
            motes: vec![2, 3, 4],
            links: vec![
                LinkConfig { a: 1, b: 2, rssi: 230 },
                LinkConfig { a: 2, b: 3, rssi: 220 },
                LinkConfig { a: 3, b: 4, rssi: 210 },
            ],
            beacon_period_secs: 2,
            report_period_secs: 6,
            aging_period_secs: 4,
            traffic_period_secs: 10,
        }
    }
}

impl SdwnConfig {
    /// Load configuration from a YAML file, then apply environment
    /// variable overrides.
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        if let Ok(content) = std::fs::read_to_string(&config_path) {
            match serde_yaml::from_str::<SdwnConfig>(&content) {
                Ok(parsed) => {
                    config = parsed;
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(error) => {
                    warn!(
                        "Failed to parse config file {:?} ({error}), using defaults",
                        config_path.as_ref()
                    );
                }
            }
        } else {
            warn!(
                "Config file {:?} not found, using defaults",
                config_path.as_ref()
            );
        }

        config.apply_environment_overrides();
        config.validate()?;

        info!(
            "Final configuration: network={}, sink={}, {} motes, {} links",
            config.network,
            config.sink,
            config.motes.len(),
            config.links.len()
        );

        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_environment_overrides(&mut self) {
        if let Ok(network) = std::env::var("SDWN_NETWORK") {
            if let Ok(net) = network.parse::<u8>() {
                self.network = net;
                info!("Network id overridden by environment: {}", net);
            }
        }

        if let Ok(sink) = std::env::var("SDWN_SINK") {
            if let Ok(addr) = sink.parse::<u16>() {
                self.sink = addr;
                info!("Sink address overridden by environment: {}", addr);
            }
        }

        if let Ok(period) = std::env::var("SDWN_BEACON_PERIOD_SECS") {
            if let Ok(secs) = period.parse::<u64>() {
                self.beacon_period_secs = secs;
                info!("Beacon period overridden by environment: {}s", secs);
            }
        }

        if let Ok(period) = std::env::var("SDWN_REPORT_PERIOD_SECS") {
            if let Ok(secs) = period.parse::<u64>() {
                self.report_period_secs = secs;
                info!("Report period overridden by environment: {}s", secs);
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.network > sdwn_wire::MAX_NET_ID {
            anyhow::bail!(
                "network id {} above the in-network maximum {}",
                self.network,
                sdwn_wire::MAX_NET_ID
            );
        }
        if self.motes.contains(&self.sink) {
            anyhow::bail!("sink address {} also listed as a mote", self.sink);
        }
        for link in &self.links {
            for end in [link.a, link.b] {
                if end != self.sink && !self.motes.contains(&end) {
                    anyhow::bail!("link endpoint {} is not a configured node", end);
                }
            }
        }
        Ok(())
    }

    /// Beacon period as a duration
    pub fn beacon_period(&self) -> Duration {
        Duration::from_secs(self.beacon_period_secs)
    }

    /// Report period as a duration
    pub fn report_period(&self) -> Duration {
        Duration::from_secs(self.report_period_secs)
    }

    /// Aging period as a duration
    pub fn aging_period(&self) -> Duration {
        Duration::from_secs(self.aging_period_secs)
    }
}

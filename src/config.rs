//! Configuration for the bus
//!
//! Every field has a default, so an empty (or missing) TOML file gives a working
//! LAN setup. Durations are stored in milliseconds.
//!
//! ```toml
//! [ports]
//! source = 5075
//! sink = 5076
//! discovery = 5077
//!
//! [broker]
//! beacon_interval_ms = 500
//!
//! [client]
//! reconnect_grace_ms = 5000
//! fallback = { address = "192.168.0.10" }
//! ```

use crate::error::{BusError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

/// Well-known port publishers connect to
pub const SOURCE_PORT: u16 = 5075;
/// Well-known port subscribers connect to
pub const SINK_PORT: u16 = 5076;
/// Well-known UDP port for the discovery beacon
pub const DISCOVERY_PORT: u16 = 5077;

/// Top-level bus configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BusConfig {
    pub ports: PortConfig,
    pub broker: BrokerConfig,
    pub client: ClientConfig,
}

impl BusConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| BusError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| BusError::Config(e.to_string()))
    }
}

/// Broker ports shared by both sides of the bus
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct PortConfig {
    pub source: u16,
    pub sink: u16,
    pub discovery: u16,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            source: SOURCE_PORT,
            sink: SINK_PORT,
            discovery: DISCOVERY_PORT,
        }
    }
}

/// Broker process settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Interface the source and sink listeners bind to
    pub bind_ip: IpAddr,
    /// Whether to run the discovery beacon thread
    pub beacon_enabled: bool,
    pub beacon_interval_ms: u64,
    /// Destination of beacon datagrams, the LAN broadcast address by default
    pub beacon_target: IpAddr,
    pub heartbeat_interval_ms: u64,
    /// Cadence of the throughput monitor
    pub monitor_interval_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            beacon_enabled: true,
            beacon_interval_ms: 500,
            beacon_target: IpAddr::V4(Ipv4Addr::BROADCAST),
            heartbeat_interval_ms: 1000,
            monitor_interval_ms: 200,
        }
    }
}

impl BrokerConfig {
    pub fn beacon_interval(&self) -> Duration {
        Duration::from_millis(self.beacon_interval_ms.max(1))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms.max(1))
    }
}

/// What a client does when no beacon arrives in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Give up with `BusError::DiscoveryFailed`
    #[default]
    Fail,
    /// Use this broker address
    Address(IpAddr),
    /// Ask on the terminal. Only for interactive tools.
    Prompt,
}

/// Sender/Receiver settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Static broker address; skips discovery when set
    pub broker: Option<IpAddr>,
    pub discovery_timeout_ms: u64,
    pub fallback: FallbackPolicy,
    /// Receive silence after which a receiver rebuilds its connection
    pub reconnect_grace_ms: u64,
    /// Delay between reconnect attempts while the broker is unreachable
    pub reconnect_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            broker: None,
            discovery_timeout_ms: 600,
            fallback: FallbackPolicy::Fail,
            reconnect_grace_ms: 5000,
            reconnect_interval_ms: 1000,
        }
    }
}

impl ClientConfig {
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn reconnect_grace(&self) -> Duration {
        Duration::from_millis(self.reconnect_grace_ms.max(1))
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms.max(1))
    }
}

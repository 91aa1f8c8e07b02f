//! Peer topology configuration.

use std::time::Duration;

#[cfg(feature = "config")]
use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};

/// Default membership marker for cluster instances.
pub const DEFAULT_CLUSTER_TAG: &str = "server-type=image-proxy";

/// Which pool variant runs on this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum PeerMode {
    /// Single node, owns every key.
    #[default]
    Standalone,
    /// Multi-node with discovery and a consistent-hash ring.
    Clustered,
}

/// Where clustered nodes learn about each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryKind {
    /// EC2 instance inventory filtered by the cluster tag.
    #[default]
    Ec2,
    /// A fixed list of addresses.
    Static,
}

/// Peer topology settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
pub struct PeerConfig {
    /// Pool variant.
    #[cfg_attr(
        feature = "config",
        arg(long = "peer-mode", env = "VIP_PEER_MODE", value_enum, default_value = "standalone")
    )]
    #[serde(default)]
    pub mode: PeerMode,

    /// Port serving the cache protocol to peers.
    #[cfg_attr(
        feature = "config",
        arg(long = "cache-port", env = "VIP_CACHE_PORT", default_value_t = 9001)
    )]
    #[serde(default = "default_cache_port")]
    pub cache_port: u16,

    /// Port serving the peer control protocol.
    #[cfg_attr(
        feature = "config",
        arg(long = "control-port", env = "VIP_CONTROL_PORT", default_value_t = 7001)
    )]
    #[serde(default = "default_control_port")]
    pub control_port: u16,

    /// Membership marker as `key=value`.
    #[cfg_attr(
        feature = "config",
        arg(long = "cluster-tag", env = "VIP_CLUSTER_TAG", default_value = DEFAULT_CLUSTER_TAG)
    )]
    #[serde(default = "default_cluster_tag")]
    pub cluster_tag: String,

    /// Region queried by EC2 discovery.
    #[cfg_attr(
        feature = "config",
        arg(long = "cluster-region", env = "VIP_CLUSTER_REGION", default_value = "us-east-1")
    )]
    #[serde(default = "default_region")]
    pub cluster_region: String,

    /// Virtual points per member on the hash ring.
    #[cfg_attr(
        feature = "config",
        arg(long = "ring-replicas", env = "VIP_RING_REPLICAS", default_value_t = 50)
    )]
    #[serde(default = "default_replicas")]
    pub ring_replicas: usize,

    /// Address other members know this node by; detected when unset.
    #[cfg_attr(feature = "config", arg(long = "advertise-addr", env = "VIP_ADVERTISE_ADDR"))]
    #[serde(default)]
    pub advertise_addr: Option<String>,

    /// Membership source for clustered mode.
    #[cfg_attr(
        feature = "config",
        arg(long = "discovery", env = "VIP_DISCOVERY", value_enum, default_value = "ec2")
    )]
    #[serde(default)]
    pub discovery: DiscoveryKind,

    /// Member addresses for static discovery.
    #[cfg_attr(
        feature = "config",
        arg(long = "peers", env = "VIP_PEERS", value_delimiter = ',')
    )]
    #[serde(default)]
    pub peers: Vec<String>,

    /// Seconds between self-initiated refreshes; `0` disables them.
    #[cfg_attr(
        feature = "config",
        arg(
            long = "peer-refresh-interval",
            env = "VIP_PEER_REFRESH_INTERVAL",
            default_value_t = 0
        )
    )]
    #[serde(default)]
    pub refresh_interval: u64,

    /// Timeout in seconds for requests to peers.
    #[cfg_attr(
        feature = "config",
        arg(long = "peer-timeout", env = "VIP_PEER_TIMEOUT", default_value_t = 10)
    )]
    #[serde(default = "default_peer_timeout")]
    pub peer_timeout: u64,
}

fn default_cache_port() -> u16 {
    9001
}

fn default_control_port() -> u16 {
    7001
}

fn default_cluster_tag() -> String {
    DEFAULT_CLUSTER_TAG.to_owned()
}

fn default_region() -> String {
    "us-east-1".to_owned()
}

fn default_replicas() -> usize {
    50
}

fn default_peer_timeout() -> u64 {
    10
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            mode: PeerMode::default(),
            cache_port: default_cache_port(),
            control_port: default_control_port(),
            cluster_tag: default_cluster_tag(),
            cluster_region: default_region(),
            ring_replicas: default_replicas(),
            advertise_addr: None,
            discovery: DiscoveryKind::default(),
            peers: Vec::new(),
            refresh_interval: 0,
            peer_timeout: default_peer_timeout(),
        }
    }
}

impl PeerConfig {
    /// Splits the cluster tag into its key and value.
    pub fn cluster_tag(&self) -> Option<(&str, &str)> {
        self.cluster_tag
            .split_once('=')
            .filter(|(key, value)| !key.is_empty() && !value.is_empty())
    }

    /// Peer request timeout as a `Duration`.
    #[must_use]
    pub const fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout)
    }

    /// Self-refresh period, if enabled.
    #[must_use]
    pub const fn refresh_interval(&self) -> Option<Duration> {
        match self.refresh_interval {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

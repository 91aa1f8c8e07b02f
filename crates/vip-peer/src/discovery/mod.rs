//! Cluster membership discovery.

#[cfg(feature = "ec2")]
#[cfg_attr(docsrs, doc(cfg(feature = "ec2")))]
mod ec2;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

#[cfg(feature = "ec2")]
pub use self::ec2::Ec2Discovery;
use crate::{DiscoveryKind, Error, PeerConfig, Result};

/// Tracing target for discovery.
pub const TRACING_TARGET: &str = "vip_peer::discovery";

/// Lists the addresses of running cluster members.
#[async_trait]
pub trait Discovery: Send + Sync + 'static {
    /// Returns member addresses, sorted and without duplicates.
    async fn discover(&self) -> Result<Vec<String>>;
}

/// A fixed member list.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    members: Vec<String>,
}

impl StaticDiscovery {
    /// Creates a discovery that always answers `members`.
    pub fn new<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            members: normalize(members.into_iter().map(Into::into)),
        }
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn discover(&self) -> Result<Vec<String>> {
        Ok(self.members.clone())
    }
}

/// Builds the discovery selected by `config`.
pub async fn from_config(config: &PeerConfig) -> Result<Arc<dyn Discovery>> {
    match config.discovery {
        DiscoveryKind::Static => {
            if config.peers.is_empty() {
                return Err(Error::config("static discovery requires at least one peer"));
            }
            Ok(Arc::new(StaticDiscovery::new(config.peers.iter().cloned())))
        }
        #[cfg(feature = "ec2")]
        DiscoveryKind::Ec2 => {
            let (key, value) = config
                .cluster_tag()
                .ok_or_else(|| Error::config("cluster tag must look like key=value"))?;
            let discovery = Ec2Discovery::connect(&config.cluster_region, key, value).await;
            Ok(Arc::new(discovery))
        }
        #[cfg(not(feature = "ec2"))]
        DiscoveryKind::Ec2 => Err(Error::config(
            "ec2 discovery is not available in this build",
        )),
    }
}

pub(crate) fn normalize(addresses: impl Iterator<Item = String>) -> Vec<String> {
    addresses
        .map(|address| address.trim().to_owned())
        .filter(|address| !address.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_members_are_normalized() {
        let discovery = StaticDiscovery::new([" 10.0.0.2", "10.0.0.1", "", "10.0.0.2 "]);
        assert_eq!(
            discovery.discover().await.unwrap(),
            vec!["10.0.0.1".to_owned(), "10.0.0.2".to_owned()]
        );
    }

    #[tokio::test]
    async fn static_discovery_needs_peers() {
        let config = PeerConfig {
            discovery: DiscoveryKind::Static,
            ..PeerConfig::default()
        };
        assert!(matches!(from_config(&config).await, Err(Error::Config(_))));

        let config = PeerConfig {
            peers: vec!["10.0.0.1".into()],
            ..config
        };
        let discovery = from_config(&config).await.unwrap();
        assert_eq!(discovery.discover().await.unwrap(), vec!["10.0.0.1"]);
    }
}

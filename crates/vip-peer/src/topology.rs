//! Immutable routing snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Client;
use vip_cache::PeerGetter;

use crate::ring::HashRing;
use crate::{HttpPeer, Result};

/// One consistent view of the cluster: the discovered addresses, the ring
/// over their cache-serving URLs, and a client for every other member.
#[derive(Debug, Clone)]
pub struct Topology {
    addresses: Vec<String>,
    ring: HashRing,
    self_url: String,
    peers: HashMap<Arc<str>, Arc<HttpPeer>>,
}

impl Topology {
    /// Builds a snapshot from discovered member addresses.
    ///
    /// Every address `a` is placed on the ring as `http://{a}:{cache_port}`.
    pub fn build(
        self_addr: &str,
        addresses: Vec<String>,
        cache_port: u16,
        replicas: usize,
        client: &Client,
    ) -> Result<Self> {
        let self_url = member_url(self_addr, cache_port);
        let ring = HashRing::new(
            replicas,
            addresses.iter().map(|address| member_url(address, cache_port)),
        );
        let peers = ring
            .members()
            .iter()
            .filter(|&member| &**member != self_url.as_str())
            .map(|member| {
                let peer = HttpPeer::new(member, client.clone())?;
                Ok((Arc::clone(member), Arc::new(peer)))
            })
            .collect::<Result<_>>()?;

        Ok(Self {
            addresses,
            ring,
            self_url,
            peers,
        })
    }

    /// A snapshot where this node is the only member.
    pub fn solo(self_addr: &str, cache_port: u16, replicas: usize) -> Self {
        let self_url = member_url(self_addr, cache_port);
        Self {
            addresses: vec![self_addr.to_owned()],
            ring: HashRing::new(replicas, [&self_url]),
            self_url,
            peers: HashMap::new(),
        }
    }

    /// Member addresses as discovered.
    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    /// The ring.
    pub fn ring(&self) -> &HashRing {
        &self.ring
    }

    /// This node's cache-serving URL.
    pub fn self_url(&self) -> &str {
        &self.self_url
    }

    /// The member that owns `key`.
    pub fn owner(&self, key: &str) -> Option<&str> {
        self.ring.get(key)
    }

    /// The remote owner of `key`, or `None` when it is this node.
    pub fn pick(&self, key: &str) -> Option<Arc<dyn PeerGetter>> {
        let owner = self.ring.get(key)?;
        if owner == self.self_url {
            return None;
        }
        self.peers
            .get(owner)
            .map(|peer| Arc::clone(peer) as Arc<dyn PeerGetter>)
    }
}

/// URL of a member on the cache-serving port.
pub fn member_url(address: &str, cache_port: u16) -> String {
    format!("http://{address}:{cache_port}")
}

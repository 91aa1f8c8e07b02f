//! HTTP clients for the cache and control protocols.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use url::Url;
use vip_cache::PeerGetter;

use crate::{Error, Result};

/// Tracing target for peer clients.
pub const TRACING_TARGET: &str = "vip_peer::client";

/// Builds the HTTP client shared by all peers.
pub(crate) fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("vip/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|err| Error::config(format!("cannot build peer http client: {err}")))
}

/// A remote member reached over the cache-serving protocol.
#[derive(Debug, Clone)]
pub struct HttpPeer {
    base: Url,
    address: String,
    client: Client,
}

impl HttpPeer {
    /// Creates a peer rooted at `base`, e.g. `http://10.0.0.7:9001`.
    pub fn new(base: &str, client: Client) -> Result<Self> {
        let url = Url::parse(base)
            .map_err(|err| Error::config(format!("invalid peer url '{base}': {err}")))?;
        if url.cannot_be_a_base() {
            return Err(Error::config(format!("peer url '{base}' cannot be a base")));
        }
        Ok(Self {
            base: url,
            address: base.to_owned(),
            client,
        })
    }

    /// The URL of `key` in `group` on this peer.
    pub fn key_url(&self, group: &str, key: &str) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(group).extend(key.split('/'));
        }
        url
    }
}

#[async_trait]
impl PeerGetter for HttpPeer {
    async fn fetch(&self, group: &str, key: &str) -> vip_cache::Result<Bytes> {
        let url = self.key_url(group, key);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| vip_cache::Error::peer_with_source(&self.address, "fetch failed", err))?;

        response
            .bytes()
            .await
            .map_err(|err| vip_cache::Error::peer_with_source(&self.address, "body read failed", err))
    }

    fn address(&self) -> &str {
        &self.address
    }
}

/// Calls `RefreshPeers()` on other members.
#[derive(Debug, Clone)]
pub struct ControlClient {
    client: Client,
    port: u16,
}

impl ControlClient {
    /// Creates a client that reaches members on `port`.
    pub fn new(client: Client, port: u16) -> Self {
        Self { client, port }
    }

    /// Asks the member at `address` to re-run its own discovery.
    pub async fn refresh_peers(&self, address: &str) -> Result<()> {
        let url = format!("http://{address}:{}/refresh", self.port);
        self.client
            .post(&url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| {
                let message = if err.is_connect() {
                    "dial failed"
                } else {
                    "refresh call failed"
                };
                Error::transport(address, message, Some(Box::new(err)))
            })?;

        tracing::debug!(target: TRACING_TARGET, peer = address, "refresh acknowledged");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Client {
        http_client(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn key_urls_keep_the_key_path() {
        let peer = HttpPeer::new("http://10.0.0.7:9001", client()).unwrap();
        assert_eq!(
            peer.key_url("ImageProxyCache", "photos/abc/c/s/250").as_str(),
            "http://10.0.0.7:9001/ImageProxyCache/photos/abc/c/s/250"
        );

        let peer = HttpPeer::new("http://10.0.0.7:9001/", client()).unwrap();
        assert_eq!(
            peer.key_url("g", "b/i").as_str(),
            "http://10.0.0.7:9001/g/b/i"
        );
    }

    #[test]
    fn invalid_peer_urls_are_rejected() {
        assert!(HttpPeer::new("not a url", client()).is_err());
        assert!(HttpPeer::new("mailto:ops@example.com", client()).is_err());
    }
}

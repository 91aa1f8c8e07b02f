//! Multi-node pool with discovery and peer refresh.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use futures::future::join_all;
use reqwest::Client;
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vip_cache::{CacheGroup, PeerGetter, PeerPicker};

use super::{CachePool, ContextHook, PoolCore, TRACING_TARGET};
use crate::client::http_client;
use crate::discovery::Discovery;
use crate::{ControlClient, Error, PeerConfig, Result, Topology};

struct Inner {
    core: PoolCore,
    discovery: Arc<dyn Discovery>,
    control: ControlClient,
    http: Client,
    self_addr: String,
    control_port: u16,
    replicas: usize,
    refresh_interval: Option<Duration>,
}

/// A pool whose membership comes from discovery.
///
/// Routing reads an atomically swapped [`Topology`]; every refresh builds a
/// new snapshot from scratch and replaces the old one wholesale.
#[derive(Clone)]
pub struct ClusteredPool {
    inner: Arc<Inner>,
}

impl ClusteredPool {
    /// Runs the first discovery, works out this node's address, and builds
    /// the initial ring.
    pub async fn start(
        config: &PeerConfig,
        discovery: Arc<dyn Discovery>,
        max_width: u32,
    ) -> Result<Self> {
        let http = http_client(config.peer_timeout())?;
        let addresses = discovery.discover().await?;

        let self_addr = match &config.advertise_addr {
            Some(address) => address.clone(),
            None => detect_self(&addresses, config.cache_port).await?,
        };
        if !addresses.contains(&self_addr) {
            tracing::warn!(
                target: TRACING_TARGET,
                self_addr = %self_addr,
                "this node is not among the discovered peers and will own no keys"
            );
        }

        let topology = Topology::build(
            &self_addr,
            addresses,
            config.cache_port,
            config.ring_replicas,
            &http,
        )?;
        tracing::info!(
            target: TRACING_TARGET,
            self_url = topology.self_url(),
            peers = ?topology.ring().members(),
            "clustered pool ready"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                core: PoolCore::new(topology, config.cache_port, max_width),
                discovery,
                control: ControlClient::new(http.clone(), config.control_port),
                http,
                self_addr,
                control_port: config.control_port,
                replicas: config.ring_replicas,
                refresh_interval: config.refresh_interval(),
            }),
        })
    }

    /// The address this node is known by.
    pub fn self_addr(&self) -> &str {
        &self.inner.self_addr
    }

    /// Handles `RefreshPeers()`: re-runs discovery and swaps in a new ring.
    ///
    /// On failure the current ring stays in place. Returns the member count.
    pub async fn refresh(&self) -> Result<usize> {
        let inner = &self.inner;
        let addresses = match inner.discovery.discover().await {
            Ok(addresses) => addresses,
            Err(err) => {
                tracing::warn!(
                    target: TRACING_TARGET,
                    error = %err,
                    "discovery failed, keeping current peers"
                );
                return Err(err);
            }
        };

        let topology = match Topology::build(
            &inner.self_addr,
            addresses,
            inner.core.cache_port,
            inner.replicas,
            &inner.http,
        ) {
            Ok(topology) => topology,
            Err(err) => {
                tracing::warn!(
                    target: TRACING_TARGET,
                    error = %err,
                    "discovered peers are unusable, keeping current peers"
                );
                return Err(err);
            }
        };
        let members = topology.ring().len();
        tracing::info!(
            target: TRACING_TARGET,
            peers = ?topology.ring().members(),
            "peers refreshed"
        );
        inner.core.swap(topology);
        Ok(members)
    }

    /// Calls `RefreshPeers()` on every other known member concurrently.
    ///
    /// Unreachable members are logged and skipped. Returns how many
    /// acknowledged.
    pub async fn broadcast(&self) -> usize {
        let topology = self.inner.core.topology.load_full();
        let calls = topology
            .addresses()
            .iter()
            .filter(|address| **address != self.inner.self_addr)
            .map(|address| async move {
                match self.inner.control.refresh_peers(address).await {
                    Ok(()) => {
                        tracing::info!(target: TRACING_TARGET, peer = %address, "refreshed peer");
                        true
                    }
                    Err(err) => {
                        tracing::warn!(
                            target: TRACING_TARGET,
                            peer = %address,
                            error = %err,
                            "peer refresh failed, skipping"
                        );
                        false
                    }
                }
            });

        join_all(calls).await.into_iter().filter(|ok| *ok).count()
    }

    /// Re-runs discovery on the configured interval until `shutdown`.
    pub fn spawn_refresh_loop(&self, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        let period = self.inner.refresh_interval?;
        let pool = self.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        // `refresh` logs its own failures and keeps the old ring.
                        let _ = pool.refresh().await;
                    }
                }
            }
        }))
    }

    /// Router for the control port.
    pub fn control_router(&self) -> Router {
        crate::handler::control_router(self.clone())
    }
}

impl PeerPicker for ClusteredPool {
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>> {
        self.inner.core.pick(key)
    }
}

#[async_trait]
impl CachePool for ClusteredPool {
    async fn listen(&self, shutdown: CancellationToken) -> Result<Option<JoinHandle<()>>> {
        let address = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.inner.control_port);
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| Error::Bind { address, source })?;
        tracing::info!(target: TRACING_TARGET, %address, "control listener bound");

        let router = self.control_router();
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(err) = served {
                tracing::error!(target: TRACING_TARGET, error = %err, "control listener failed");
            }
        });
        Ok(Some(handle))
    }

    fn port(&self) -> u16 {
        self.inner.core.cache_port
    }

    fn set_context(&self, hook: ContextHook) {
        self.inner.core.set_context(hook);
    }

    fn router(&self, group: Arc<CacheGroup>) -> Router {
        self.inner.core.router(group)
    }

    fn topology(&self) -> Arc<Topology> {
        self.inner.core.topology.load_full()
    }

    async fn announce(&self) -> usize {
        self.broadcast().await
    }

    fn spawn_refresh(&self, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        self.spawn_refresh_loop(shutdown)
    }
}

/// Picks the discovered address that this host routes from.
///
/// Connecting a UDP socket sends nothing; it only makes the kernel choose
/// the source address it would use toward that peer.
async fn detect_self(addresses: &[String], port: u16) -> Result<String> {
    for address in addresses {
        let Ok(socket) = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await else {
            continue;
        };
        if socket.connect((address.as_str(), port)).await.is_err() {
            continue;
        }
        let Ok(local) = socket.local_addr() else {
            continue;
        };
        let local = local.ip().to_string();
        if addresses.contains(&local) {
            tracing::info!(target: TRACING_TARGET, self_addr = %local, "detected own address");
            return Ok(local);
        }
    }

    Err(Error::config(
        "cannot find this node among the discovered peers, set --advertise-addr",
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::routing::post;

    use super::*;
    use crate::{PeerMode, StaticDiscovery};

    /// Discovery whose answer can be changed or broken between calls.
    #[derive(Default)]
    struct Scripted {
        answer: Mutex<Option<Vec<String>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn set(&self, answer: Option<&[&str]>) {
            *self.answer.lock().unwrap() =
                answer.map(|a| a.iter().map(|s| (*s).to_owned()).collect());
        }
    }

    #[async_trait]
    impl Discovery for Scripted {
        async fn discover(&self) -> Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| Error::upstream("inventory down", std::io::Error::other("503")))
        }
    }

    fn config(self_addr: &str) -> PeerConfig {
        PeerConfig {
            mode: PeerMode::Clustered,
            advertise_addr: Some(self_addr.to_owned()),
            ..PeerConfig::default()
        }
    }

    #[tokio::test]
    async fn start_builds_ring_from_discovery() {
        let discovery = Arc::new(StaticDiscovery::new(["10.0.0.2", "10.0.0.1", "10.0.0.3"]));
        let pool = ClusteredPool::start(&config("10.0.0.1"), discovery, 720)
            .await
            .unwrap();

        let topology = pool.topology();
        assert_eq!(topology.self_url(), "http://10.0.0.1:9001");
        assert_eq!(topology.ring().len(), 3);

        let remote = (0..200)
            .filter(|i| pool.pick_peer(&format!("photos/{i}")).is_some())
            .count();
        assert!(remote > 0 && remote < 200);
    }

    #[tokio::test]
    async fn independent_nodes_agree_on_owners() {
        let members = ["10.0.0.1", "10.0.0.2", "10.0.0.3"];
        let a = ClusteredPool::start(&config("10.0.0.1"), Arc::new(StaticDiscovery::new(members)), 720)
            .await
            .unwrap();
        let b = ClusteredPool::start(&config("10.0.0.2"), Arc::new(StaticDiscovery::new(members)), 720)
            .await
            .unwrap();

        for i in 0..500 {
            let key = format!("photos/img-{i}/s/100");
            assert_eq!(a.topology().owner(&key), b.topology().owner(&key));
        }
    }

    #[tokio::test]
    async fn refresh_swaps_ring_and_keeps_it_on_failure() {
        let discovery = Arc::new(Scripted::default());
        discovery.set(Some(&["10.0.0.1"]));
        let pool = ClusteredPool::start(&config("10.0.0.1"), discovery.clone(), 720)
            .await
            .unwrap();
        assert_eq!(pool.topology().ring().len(), 1);

        discovery.set(Some(&["10.0.0.1", "10.0.0.2"]));
        assert_eq!(pool.refresh().await.unwrap(), 2);
        assert_eq!(pool.topology().ring().len(), 2);

        discovery.set(None);
        assert!(matches!(
            pool.refresh().await,
            Err(Error::UpstreamUnavailable { .. })
        ));
        assert_eq!(pool.topology().ring().len(), 2);
        assert_eq!(discovery.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn refresh_keeps_ring_when_discovered_address_is_unusable() {
        let discovery = Arc::new(Scripted::default());
        discovery.set(Some(&["10.0.0.1", "10.0.0.2"]));
        let pool = ClusteredPool::start(&config("10.0.0.1"), discovery.clone(), 720)
            .await
            .unwrap();

        discovery.set(Some(&["10.0.0.1", "bad host"]));
        assert!(matches!(pool.refresh().await, Err(Error::Config(_))));

        let topology = pool.topology();
        assert_eq!(topology.ring().len(), 2);
        assert!(topology.addresses().iter().any(|a| a == "10.0.0.2"));
    }

    #[tokio::test]
    async fn startup_discovery_failure_is_fatal() {
        let discovery = Arc::new(Scripted::default());
        let result = ClusteredPool::start(&config("10.0.0.1"), discovery, 720).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn undetectable_self_address_is_a_config_error() {
        let discovery = Arc::new(StaticDiscovery::new(["192.0.2.10"]));
        let config = PeerConfig {
            mode: PeerMode::Clustered,
            ..PeerConfig::default()
        };
        let result = ClusteredPool::start(&config, discovery, 720).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn broadcast_skips_self_and_unreachable_peers() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let fake_peer = Router::new().route(
            "/refresh",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    axum::http::StatusCode::NO_CONTENT
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let control_port = listener.local_addr().unwrap().port();
        tokio::spawn(async move { axum::serve(listener, fake_peer).await });

        // 127.0.0.3 is on loopback but nothing listens there.
        let discovery = Arc::new(StaticDiscovery::new(["127.0.0.1", "127.0.0.2", "127.0.0.3"]));
        let config = PeerConfig {
            control_port,
            ..config("127.0.0.2")
        };
        let pool = ClusteredPool::start(&config, discovery, 720).await.unwrap();

        assert_eq!(pool.broadcast().await, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn control_bind_conflict_is_reported() {
        let taken = TcpListener::bind("0.0.0.0:0").await.unwrap();
        let control_port = taken.local_addr().unwrap().port();
        let discovery = Arc::new(StaticDiscovery::new(["10.0.0.1"]));
        let config = PeerConfig {
            control_port,
            ..config("10.0.0.1")
        };
        let pool = ClusteredPool::start(&config, discovery, 720).await.unwrap();

        let result = pool.listen(CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::Bind { .. })));
    }

    #[tokio::test]
    async fn listen_serves_until_shutdown() {
        let discovery = Arc::new(StaticDiscovery::new(["10.0.0.1"]));
        let probe = TcpListener::bind("0.0.0.0:0").await.unwrap();
        let control_port = probe.local_addr().unwrap().port();
        drop(probe);

        let config = PeerConfig {
            control_port,
            ..config("10.0.0.1")
        };
        let pool = ClusteredPool::start(&config, discovery, 720).await.unwrap();
        let shutdown = CancellationToken::new();
        let handle = pool.listen(shutdown.clone()).await.unwrap().unwrap();

        let control = ControlClient::new(http_client(Duration::from_secs(5)).unwrap(), control_port);
        control.refresh_peers("127.0.0.1").await.unwrap();

        shutdown.cancel();
        handle.await.unwrap();
    }
}

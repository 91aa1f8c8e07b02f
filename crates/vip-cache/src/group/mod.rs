//! Memoizing cache group with peer routing.
//!
//! A [`CacheGroup`] answers lookups from a local memo first. On a miss it
//! asks the [`PeerPicker`] for the owner of the key; a remote owner is
//! fetched through its [`PeerGetter`], and when this node owns the key (or
//! the owner fails) the local [`Getter`] computes the value.

mod stats;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use moka::future::Cache;
use vip_core::DerivativeRequest;

pub use self::stats::{GroupStats, StatsSnapshot};
use self::stats::bump;
use crate::Result;

/// Tracing target for cache group operations.
pub const TRACING_TARGET: &str = "vip_cache::group";

/// Computes a value on this node.
#[async_trait]
pub trait Getter: Send + Sync + 'static {
    /// Loads the bytes for `request`.
    async fn load(&self, request: &DerivativeRequest) -> Result<Bytes>;
}

/// A remote member of the cluster.
#[async_trait]
pub trait PeerGetter: Send + Sync + 'static {
    /// Fetches `key` of `group` from the peer.
    async fn fetch(&self, group: &str, key: &str) -> Result<Bytes>;

    /// The peer's address, for logs.
    fn address(&self) -> &str;
}

/// Routes a key to its owning peer.
pub trait PeerPicker: Send + Sync + 'static {
    /// Returns the remote owner of `key`, or `None` when this node owns it.
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>>;
}

/// The memoizing front end of the derivative cache.
pub struct CacheGroup {
    name: String,
    getter: Arc<dyn Getter>,
    picker: Option<Arc<dyn PeerPicker>>,
    main: Cache<String, Bytes>,
    hot: Cache<String, Bytes>,
    stats: GroupStats,
}

impl CacheGroup {
    /// Creates a group that holds up to `capacity` bytes of values.
    ///
    /// One eighth of the budget is reserved for values owned by peers.
    pub fn new(name: impl Into<String>, capacity: u64, getter: Arc<dyn Getter>) -> Self {
        let hot_capacity = capacity / 8;
        Self {
            name: name.into(),
            getter,
            picker: None,
            main: weighted_cache(capacity - hot_capacity),
            hot: weighted_cache(hot_capacity),
            stats: GroupStats::default(),
        }
    }

    /// Routes misses through `picker`.
    pub fn with_picker(mut self, picker: Arc<dyn PeerPicker>) -> Self {
        self.picker = Some(picker);
        self
    }

    /// The group name used on the wire.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Live counters.
    pub fn stats(&self) -> &GroupStats {
        &self.stats
    }

    /// Looks up `request`, routing a miss to its owner.
    pub async fn get(&self, request: &DerivativeRequest) -> Result<Bytes> {
        bump(&self.stats.gets);
        let key = request.cache_key();
        if let Some(value) = self.lookup(&key).await {
            return Ok(value);
        }

        let peer = self.picker.as_ref().and_then(|picker| picker.pick_peer(&key));
        if let Some(peer) = peer {
            match peer.fetch(&self.name, &key).await {
                Ok(value) => {
                    bump(&self.stats.peer_loads);
                    tracing::debug!(
                        target: TRACING_TARGET,
                        key = %key,
                        peer = peer.address(),
                        "loaded from peer"
                    );
                    self.hot.insert(key, value.clone()).await;
                    return Ok(value);
                }
                Err(err) => {
                    bump(&self.stats.peer_errors);
                    tracing::warn!(
                        target: TRACING_TARGET,
                        key = %key,
                        peer = peer.address(),
                        error = %err,
                        "peer load failed, computing locally"
                    );
                }
            }
        }

        self.load_locally(key, request).await
    }

    /// Looks up `request` on behalf of a peer that routed it here.
    ///
    /// Never re-routes, so peers with diverging membership cannot bounce a
    /// key between each other.
    pub async fn get_owned(&self, request: &DerivativeRequest) -> Result<Bytes> {
        bump(&self.stats.gets);
        bump(&self.stats.server_requests);
        let key = request.cache_key();
        if let Some(value) = self.lookup(&key).await {
            return Ok(value);
        }
        self.load_locally(key, request).await
    }

    async fn lookup(&self, key: &str) -> Option<Bytes> {
        let value = match self.main.get(key).await {
            Some(value) => Some(value),
            None => self.hot.get(key).await,
        };
        match value {
            Some(value) => {
                bump(&self.stats.cache_hits);
                Some(value)
            }
            None => {
                tracing::debug!(target: TRACING_TARGET, key, "cache miss");
                None
            }
        }
    }

    async fn load_locally(&self, key: String, request: &DerivativeRequest) -> Result<Bytes> {
        match self.getter.load(request).await {
            Ok(value) => {
                bump(&self.stats.local_loads);
                self.main.insert(key, value.clone()).await;
                Ok(value)
            }
            Err(err) => {
                bump(&self.stats.local_load_errors);
                Err(err)
            }
        }
    }
}

impl fmt::Debug for CacheGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheGroup")
            .field("name", &self.name)
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

fn weighted_cache(capacity: u64) -> Cache<String, Bytes> {
    Cache::builder()
        .max_capacity(capacity)
        .weigher(|key: &String, value: &Bytes| {
            u32::try_from(key.len() + value.len()).unwrap_or(u32::MAX)
        })
        .build()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::Error;

    /// Getter that echoes the cache key and counts invocations.
    #[derive(Default)]
    struct Echo {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Getter for Echo {
        async fn load(&self, request: &DerivativeRequest) -> Result<Bytes> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if request.image_id() == "missing" {
                return Err(Error::OriginMissing {
                    bucket: request.bucket().to_owned(),
                    image_id: request.image_id().to_owned(),
                });
            }
            Ok(Bytes::from(format!("local:{}", request.cache_key())))
        }
    }

    struct FakePeer {
        fail: bool,
        seen: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl PeerGetter for FakePeer {
        async fn fetch(&self, group: &str, key: &str) -> Result<Bytes> {
            self.seen
                .lock()
                .unwrap()
                .push((group.to_owned(), key.to_owned()));
            if self.fail {
                Err(Error::peer("http://fake:9001", "connection refused"))
            } else {
                Ok(Bytes::from(format!("remote:{key}")))
            }
        }

        fn address(&self) -> &str {
            "http://fake:9001"
        }
    }

    /// Sends every key with a `remote` image id to the fake peer.
    struct ByImageId(Arc<FakePeer>);

    impl PeerPicker for ByImageId {
        fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>> {
            key.contains("/remote")
                .then(|| Arc::clone(&self.0) as Arc<dyn PeerGetter>)
        }
    }

    fn request(id: &str, width: u32) -> DerivativeRequest {
        DerivativeRequest::new("photos", id, width, false, 720).unwrap()
    }

    fn group(peer_fails: bool) -> (CacheGroup, Arc<Echo>, Arc<FakePeer>) {
        let echo = Arc::new(Echo::default());
        let peer = Arc::new(FakePeer {
            fail: peer_fails,
            seen: Mutex::new(Vec::new()),
        });
        let group = CacheGroup::new("ImageProxyCache", 1 << 20, echo.clone())
            .with_picker(Arc::new(ByImageId(peer.clone())));
        (group, echo, peer)
    }

    #[tokio::test]
    async fn local_values_are_memoized() {
        let (group, echo, _) = group(false);
        let req = request("abc", 100);

        let first = group.get(&req).await.unwrap();
        let second = group.get(&req).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, Bytes::from_static(b"local:photos/abc/s/100"));
        assert_eq!(echo.calls.load(Ordering::SeqCst), 1);

        let stats = group.stats().snapshot();
        assert_eq!(stats.gets, 2);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.local_loads, 1);
    }

    #[tokio::test]
    async fn remote_keys_go_to_their_owner() {
        let (group, echo, peer) = group(false);

        let value = group.get(&request("remote", 50)).await.unwrap();
        assert_eq!(value, Bytes::from_static(b"remote:photos/remote/s/50"));
        assert_eq!(echo.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            peer.seen.lock().unwrap().as_slice(),
            &[("ImageProxyCache".to_owned(), "photos/remote/s/50".to_owned())]
        );

        group.get(&request("remote", 50)).await.unwrap();
        assert_eq!(peer.seen.lock().unwrap().len(), 1);
        assert_eq!(group.stats().snapshot().peer_loads, 1);
    }

    #[tokio::test]
    async fn failing_peer_falls_back_to_local() {
        let (group, echo, _) = group(true);

        let value = group.get(&request("remote", 50)).await.unwrap();
        assert_eq!(value, Bytes::from_static(b"local:photos/remote/s/50"));
        assert_eq!(echo.calls.load(Ordering::SeqCst), 1);

        let stats = group.stats().snapshot();
        assert_eq!(stats.peer_errors, 1);
        assert_eq!(stats.local_loads, 1);
    }

    #[tokio::test]
    async fn owned_lookups_never_reroute() {
        let (group, echo, peer) = group(false);

        let value = group.get_owned(&request("remote", 50)).await.unwrap();
        assert_eq!(value, Bytes::from_static(b"local:photos/remote/s/50"));
        assert!(peer.seen.lock().unwrap().is_empty());
        assert_eq!(echo.calls.load(Ordering::SeqCst), 1);
        assert_eq!(group.stats().snapshot().server_requests, 1);
    }

    #[tokio::test]
    async fn errors_are_not_memoized() {
        let (group, echo, _) = group(false);
        let req = request("missing", 10);

        assert!(group.get(&req).await.is_err());
        assert!(group.get(&req).await.is_err());
        assert_eq!(echo.calls.load(Ordering::SeqCst), 2);
        assert_eq!(group.stats().snapshot().local_load_errors, 2);
    }

    #[tokio::test]
    async fn group_without_picker_computes_locally() {
        let echo = Arc::new(Echo::default());
        let group = CacheGroup::new("g", 1 << 20, echo.clone());
        group.get(&request("remote", 10)).await.unwrap();
        assert_eq!(echo.calls.load(Ordering::SeqCst), 1);
        assert_eq!(group.name(), "g");
    }
}

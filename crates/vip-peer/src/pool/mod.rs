//! Standalone and clustered cache pools.

mod clustered;
mod standalone;

use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use axum::Router;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vip_cache::{CacheGroup, PeerGetter, PeerPicker};
use vip_core::DerivativeRequest;

pub use self::clustered::ClusteredPool;
pub use self::standalone::StandalonePool;
use crate::discovery;
use crate::{PeerConfig, PeerMode, Result, Topology};

/// Tracing target for pool operations.
pub const TRACING_TARGET: &str = "vip_peer::pool";

/// Turns the cache key of an inbound peer request into the derivative
/// request the cache group computes.
pub type ContextHook =
    Arc<dyn Fn(&str) -> vip_core::Result<DerivativeRequest> + Send + Sync + 'static>;

/// Parses `{bucket}/{derivative_key}` and re-applies the width clamp.
pub fn default_context(max_width: u32) -> ContextHook {
    Arc::new(move |key: &str| {
        let parsed = DerivativeRequest::from_cache_key(key)?;
        DerivativeRequest::new(
            parsed.bucket(),
            parsed.image_id(),
            parsed.width(),
            parsed.crop(),
            max_width,
        )
    })
}

/// The capabilities every pool variant offers.
#[async_trait]
pub trait CachePool: PeerPicker {
    /// Starts the control listener, if the variant has one.
    ///
    /// Binding happens before this returns, so a bind failure is reported
    /// here; serving continues on a spawned task until `shutdown` fires.
    async fn listen(&self, shutdown: CancellationToken) -> Result<Option<JoinHandle<()>>>;

    /// The cache-serving port.
    fn port(&self) -> u16;

    /// Replaces the hook used to interpret inbound peer requests.
    fn set_context(&self, hook: ContextHook);

    /// Router for the cache-serving port.
    fn router(&self, group: Arc<CacheGroup>) -> Router;

    /// The routing snapshot currently in effect.
    fn topology(&self) -> Arc<Topology>;

    /// Asks every other member to refresh its membership.
    ///
    /// Returns how many acknowledged.
    async fn announce(&self) -> usize {
        0
    }

    /// Starts periodic self-refresh, if the variant does it.
    fn spawn_refresh(&self, _shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        None
    }
}

/// State shared by both variants: the swappable routing snapshot and the
/// context hook.
pub(crate) struct PoolCore {
    topology: ArcSwap<Topology>,
    context: Arc<ArcSwap<ContextHook>>,
    cache_port: u16,
}

impl PoolCore {
    fn new(topology: Topology, cache_port: u16, max_width: u32) -> Self {
        Self {
            topology: ArcSwap::from_pointee(topology),
            context: Arc::new(ArcSwap::from_pointee(default_context(max_width))),
            cache_port,
        }
    }

    fn pick(&self, key: &str) -> Option<Arc<dyn PeerGetter>> {
        self.topology.load().pick(key)
    }

    fn set_context(&self, hook: ContextHook) {
        self.context.store(Arc::new(hook));
    }

    fn router(&self, group: Arc<CacheGroup>) -> Router {
        crate::handler::cache_router(group, Arc::clone(&self.context))
    }

    fn swap(&self, topology: Topology) {
        self.topology.store(Arc::new(topology));
    }
}

/// Builds the pool selected by `config`.
///
/// A clustered pool runs its first discovery here; failing that is fatal.
pub async fn from_config(config: &PeerConfig, max_width: u32) -> Result<Arc<dyn CachePool>> {
    match config.mode {
        PeerMode::Standalone => Ok(Arc::new(StandalonePool::new(config, max_width))),
        PeerMode::Clustered => {
            let discovery = discovery::from_config(config).await?;
            let pool = ClusteredPool::start(config, discovery, max_width).await?;
            Ok(Arc::new(pool))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_context_parses_and_clamps() {
        let hook = default_context(300);
        let request = hook("photos/abc/c/s/500").unwrap();
        assert_eq!(request.bucket(), "photos");
        assert_eq!(request.image_id(), "abc");
        assert!(request.crop());
        assert_eq!(request.width(), 300);

        assert!(hook("photos").is_err());
    }
}

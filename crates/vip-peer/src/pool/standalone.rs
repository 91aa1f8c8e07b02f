//! Single-node pool.

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vip_cache::{CacheGroup, PeerGetter, PeerPicker};

use super::{CachePool, ContextHook, PoolCore, TRACING_TARGET};
use crate::{PeerConfig, Result, Topology};

/// Address a standalone node knows itself by.
const LOCALHOST: &str = "localhost";

/// A pool of one: every key is owned locally and there is no discovery.
pub struct StandalonePool {
    core: PoolCore,
}

impl StandalonePool {
    /// Creates a pool whose only member is `http://localhost:{cache_port}`.
    pub fn new(config: &PeerConfig, max_width: u32) -> Self {
        let topology = Topology::solo(LOCALHOST, config.cache_port, config.ring_replicas);
        tracing::info!(
            target: TRACING_TARGET,
            self_url = topology.self_url(),
            "standalone pool ready"
        );
        Self {
            core: PoolCore::new(topology, config.cache_port, max_width),
        }
    }
}

impl PeerPicker for StandalonePool {
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>> {
        self.core.pick(key)
    }
}

#[async_trait]
impl CachePool for StandalonePool {
    async fn listen(&self, _shutdown: CancellationToken) -> Result<Option<JoinHandle<()>>> {
        Ok(None)
    }

    fn port(&self) -> u16 {
        self.core.cache_port
    }

    fn set_context(&self, hook: ContextHook) {
        self.core.set_context(hook);
    }

    fn router(&self, group: Arc<CacheGroup>) -> Router {
        self.core.router(group)
    }

    fn topology(&self) -> Arc<Topology> {
        self.core.topology.load_full()
    }
}

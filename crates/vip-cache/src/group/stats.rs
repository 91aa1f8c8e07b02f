//! Cache group counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters for one [`CacheGroup`](super::CacheGroup).
#[derive(Debug, Default)]
pub struct GroupStats {
    pub(crate) gets: AtomicU64,
    pub(crate) cache_hits: AtomicU64,
    pub(crate) peer_loads: AtomicU64,
    pub(crate) peer_errors: AtomicU64,
    pub(crate) local_loads: AtomicU64,
    pub(crate) local_load_errors: AtomicU64,
    pub(crate) server_requests: AtomicU64,
}

/// Point-in-time copy of [`GroupStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Lookups of any origin.
    pub gets: u64,
    /// Lookups answered from the local memo.
    pub cache_hits: u64,
    /// Values obtained from the owning peer.
    pub peer_loads: u64,
    /// Peer fetches that failed and fell back to local computation.
    pub peer_errors: u64,
    /// Values computed on this node.
    pub local_loads: u64,
    /// Local computations that failed.
    pub local_load_errors: u64,
    /// Lookups that arrived from peers.
    pub server_requests: u64,
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl GroupStats {
    /// Copies the current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            gets: load(&self.gets),
            cache_hits: load(&self.cache_hits),
            peer_loads: load(&self.peer_loads),
            peer_errors: load(&self.peer_errors),
            local_loads: load(&self.local_loads),
            local_load_errors: load(&self.local_load_errors),
            server_requests: load(&self.server_requests),
        }
    }
}

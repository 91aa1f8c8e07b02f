//! Application state and dependency injection.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use url::Url;
use vip_cache::CacheGroup;
use vip_worker::JobQueue;

/// Where warmup jobs send their requests.
#[derive(Debug, Clone)]
pub struct WarmupTarget {
    client: Client,
    base: Url,
}

impl WarmupTarget {
    /// Targets the public endpoint at `base` with a client bounded by `timeout`.
    pub fn new(base: Url, timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("vip-warmup/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, base })
    }

    /// The HTTP client shared by warmup jobs.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The public endpoint base URL.
    pub fn base(&self) -> &Url {
        &self.base
    }
}

/// Application state.
///
/// Used for the [`State`] extraction (dependency injection).
///
/// [`State`]: axum::extract::State
#[must_use = "state does nothing unless you use it"]
#[derive(Clone)]
pub struct ServiceState {
    group: Arc<CacheGroup>,
    queue: Arc<JobQueue>,
    warmup: WarmupTarget,
    max_width: u32,
}

impl ServiceState {
    /// Assembles the state from already running components.
    pub fn new(
        group: Arc<CacheGroup>,
        queue: Arc<JobQueue>,
        warmup: WarmupTarget,
        max_width: u32,
    ) -> Self {
        Self {
            group,
            queue,
            warmup,
            max_width,
        }
    }

    /// The largest width served.
    pub fn max_width(&self) -> u32 {
        self.max_width
    }
}

macro_rules! impl_di {
    ($($f:ident: $t:ty),+) => {$(
        impl axum::extract::FromRef<ServiceState> for $t {
            fn from_ref(state: &ServiceState) -> Self {
                state.$f.clone()
            }
        }
    )+};
}

impl_di!(group: Arc<CacheGroup>);
impl_di!(queue: Arc<JobQueue>);
impl_di!(warmup: WarmupTarget);

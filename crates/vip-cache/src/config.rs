//! Cache configuration.

use std::time::Duration;

#[cfg(feature = "config")]
use clap::Args;
use serde::{Deserialize, Serialize};
use vip_core::DEFAULT_MAX_WIDTH;

/// Default cache group name, shared by every node in a cluster.
pub const DEFAULT_GROUP_NAME: &str = "ImageProxyCache";

/// Default local memo capacity in bytes.
pub const DEFAULT_CACHE_BYTES: u64 = 64 << 20;

/// Cache and orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
pub struct CacheConfig {
    /// Largest derivative width served; wider requests are clamped.
    #[cfg_attr(
        feature = "config",
        arg(long = "max-width", env = "VIP_MAX_WIDTH", default_value_t = DEFAULT_MAX_WIDTH)
    )]
    #[serde(default = "default_max_width")]
    pub max_width: u32,

    /// Cache group name used on the peer wire protocol.
    #[cfg_attr(
        feature = "config",
        arg(long = "cache-group", env = "VIP_CACHE_GROUP", default_value = DEFAULT_GROUP_NAME)
    )]
    #[serde(default = "default_group_name")]
    pub group_name: String,

    /// Local memo capacity in bytes.
    #[cfg_attr(
        feature = "config",
        arg(long = "cache-bytes", env = "VIP_CACHE_BYTES", default_value_t = DEFAULT_CACHE_BYTES)
    )]
    #[serde(default = "default_cache_bytes")]
    pub cache_bytes: u64,

    /// Origin read timeout in seconds.
    #[cfg_attr(
        feature = "config",
        arg(long = "fetch-timeout", env = "VIP_FETCH_TIMEOUT", default_value_t = 30)
    )]
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout: u64,

    /// Transform timeout in seconds.
    #[cfg_attr(
        feature = "config",
        arg(long = "transform-timeout", env = "VIP_TRANSFORM_TIMEOUT", default_value_t = 60)
    )]
    #[serde(default = "default_transform_timeout")]
    pub transform_timeout: u64,
}

fn default_max_width() -> u32 {
    DEFAULT_MAX_WIDTH
}

fn default_group_name() -> String {
    DEFAULT_GROUP_NAME.to_owned()
}

fn default_cache_bytes() -> u64 {
    DEFAULT_CACHE_BYTES
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_transform_timeout() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_width: default_max_width(),
            group_name: default_group_name(),
            cache_bytes: default_cache_bytes(),
            fetch_timeout: default_fetch_timeout(),
            transform_timeout: default_transform_timeout(),
        }
    }
}

impl CacheConfig {
    /// Origin read timeout as a `Duration`.
    #[must_use]
    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout)
    }

    /// Transform timeout as a `Duration`.
    #[must_use]
    pub const fn transform_timeout(&self) -> Duration {
        Duration::from_secs(self.transform_timeout)
    }
}

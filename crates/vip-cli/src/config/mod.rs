//! CLI configuration management.
//!
//! ```text
//! Cli
//! ├── server: ServerConfig      # Public listener, shutdown budget
//! ├── recovery: RecoveryConfig  # Per-request timeout
//! ├── cache: CacheConfig        # Width clamp, memo size, stage timeouts
//! ├── peer: PeerConfig          # Pool mode, ports, discovery
//! ├── storage: StorageConfig    # S3, local or memory backend
//! └── queue: QueueConfig        # Warmup intake and workers
//! ```
//!
//! All configuration can be provided via CLI arguments or environment variables.
//! Use `--help` to see all available options.

mod server;

use std::collections::HashSet;
use std::process;

use anyhow::{Context, anyhow, ensure};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
pub use server::ServerConfig;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use vip_cache::CacheConfig;
use vip_object::{StorageBackend, StorageConfig};
use vip_peer::{PeerConfig, PeerMode};
use vip_server::middleware::RecoveryConfig;
use vip_worker::QueueConfig;

use crate::{TRACING_TARGET_CONFIG, TRACING_TARGET_SERVER_STARTUP};

/// Upper bound for every timeout flag, in seconds.
const MAX_TIMEOUT_SECS: u64 = 300;

/// Output format of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Complete CLI configuration.
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(name = "vip")]
#[command(about = "Image derivative cache and proxy")]
#[command(version)]
pub struct Cli {
    /// Public listener and shutdown configuration.
    #[clap(flatten)]
    pub server: ServerConfig,

    /// Request timeout enforcement.
    #[clap(flatten)]
    pub recovery: RecoveryConfig,

    /// Derivative cache and orchestration.
    #[clap(flatten)]
    pub cache: CacheConfig,

    /// Peer topology.
    #[clap(flatten)]
    pub peer: PeerConfig,

    /// Origin and derivative storage.
    #[clap(flatten)]
    pub storage: StorageConfig,

    /// Warmup job queue.
    #[clap(flatten)]
    pub queue: QueueConfig,

    /// Log line format.
    #[arg(long, env = "VIP_LOG_FORMAT", value_enum, default_value = "text")]
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Cli {
    /// Loads environment variables from .env file (if enabled) and parses CLI arguments.
    ///
    /// The .env file is loaded first so clap's `env` fallbacks can see it.
    pub fn init() -> Self {
        Self::load_dotenv();
        Self::parse()
    }

    /// Loads environment variables from .env file if the dotenv feature is enabled.
    #[cfg(feature = "dotenv")]
    fn load_dotenv() {
        if let Err(err) = dotenvy::dotenv()
            && !err.not_found()
        {
            eprintln!("Warning: failed to load .env file: {err}");
        }
    }

    /// No-op when dotenv feature is disabled.
    #[cfg(not(feature = "dotenv"))]
    fn load_dotenv() {}

    /// Initializes tracing with environment-based filtering.
    ///
    /// `RUST_LOG` selects what is logged; `info` otherwise.
    pub fn init_tracing(&self) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let registry = tracing_subscriber::registry().with(filter);

        match self.log_format {
            LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
            LogFormat::Json => registry
                .with(tracing_subscriber::fmt::layer().json())
                .init(),
        }
    }

    /// Validates all configuration values.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.server
            .validate()
            .context("invalid server configuration")?;
        validate_timeout("request timeout", self.recovery.request_timeout)
            .context("invalid recovery configuration")?;
        validate_cache(&self.cache).context("invalid cache configuration")?;
        validate_peer(&self.peer).context("invalid peer configuration")?;
        validate_queue(&self.queue).context("invalid queue configuration")?;
        self.validate_ports()
    }

    /// Public, cache-serving, and control ports must all differ.
    fn validate_ports(&self) -> anyhow::Result<()> {
        let ports = [
            ("public", self.server.port),
            ("cache", self.peer.cache_port),
            ("control", self.peer.control_port),
        ];

        let mut seen = HashSet::new();
        for (name, port) in ports {
            ensure!(
                port >= 1024,
                "{name} port {port} is below 1024. Use ports 1024-65535."
            );
            ensure!(
                seen.insert(port),
                "{name} port {port} is already used by another listener"
            );
        }
        Ok(())
    }

    /// Logs build information at debug level.
    fn log_build_info() {
        tracing::debug!(
            target: TRACING_TARGET_SERVER_STARTUP,
            version = env!("CARGO_PKG_VERSION"),
            pid = process::id(),
            arch = std::env::consts::ARCH,
            os = std::env::consts::OS,
            features = ?Self::enabled_features(),
            "Build information"
        );
    }

    /// Logs configuration (no credentials).
    pub fn log(&self) {
        Self::log_build_info();
        self.server.log();

        tracing::info!(
            target: TRACING_TARGET_CONFIG,
            request_timeout_secs = self.recovery.request_timeout,
            max_width = self.cache.max_width,
            group = %self.cache.group_name,
            cache_bytes = self.cache.cache_bytes,
            fetch_timeout_secs = self.cache.fetch_timeout,
            transform_timeout_secs = self.cache.transform_timeout,
            "Cache configuration"
        );

        tracing::info!(
            target: TRACING_TARGET_CONFIG,
            mode = ?self.peer.mode,
            cache_port = self.peer.cache_port,
            control_port = self.peer.control_port,
            discovery = ?self.peer.discovery,
            cluster_tag = %self.peer.cluster_tag,
            ring_replicas = self.peer.ring_replicas,
            refresh_interval_secs = self.peer.refresh_interval,
            "Peer configuration"
        );

        tracing::info!(
            target: TRACING_TARGET_CONFIG,
            backend = ?self.storage.backend,
            root = %self.storage.root.display(),
            s3_region = %self.storage.s3.region,
            s3_endpoint = ?self.storage.s3.endpoint,
            queue_capacity = self.queue.capacity,
            queue_workers = self.queue.workers,
            "Storage and queue configuration"
        );
    }

    /// Returns a list of enabled compile-time features.
    fn enabled_features() -> Vec<&'static str> {
        [
            cfg!(feature = "ec2").then_some("ec2"),
            cfg!(feature = "dotenv").then_some("dotenv"),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

fn validate_timeout(name: &str, secs: u64) -> anyhow::Result<()> {
    ensure!(
        (1..=MAX_TIMEOUT_SECS).contains(&secs),
        "{name} {secs} seconds is invalid. Must be between 1 and {MAX_TIMEOUT_SECS} seconds."
    );
    Ok(())
}

fn validate_cache(config: &CacheConfig) -> anyhow::Result<()> {
    ensure!(config.max_width >= 1, "max width must be at least 1");
    ensure!(config.cache_bytes >= 1, "cache capacity must be at least 1 byte");
    ensure!(!config.group_name.is_empty(), "cache group name must not be empty");
    validate_timeout("fetch timeout", config.fetch_timeout)?;
    validate_timeout("transform timeout", config.transform_timeout)
}

fn validate_peer(config: &PeerConfig) -> anyhow::Result<()> {
    if config.cluster_tag().is_none() {
        return Err(anyhow!(
            "cluster tag {:?} must have the form key=value",
            config.cluster_tag
        ));
    }
    ensure!(config.ring_replicas >= 1, "ring replicas must be at least 1");
    validate_timeout("peer timeout", config.peer_timeout)?;
    if config.refresh_interval > 0 {
        ensure!(
            config.mode == PeerMode::Clustered,
            "peer refresh interval only applies to clustered mode"
        );
    }
    Ok(())
}

fn validate_queue(config: &QueueConfig) -> anyhow::Result<()> {
    ensure!(config.workers >= 1, "queue workers must be at least 1");
    ensure!(config.capacity >= 1, "queue capacity must be at least 1");
    Ok(())
}

/// Describes the storage backend for startup logs.
pub fn storage_label(config: &StorageConfig) -> &'static str {
    match config.backend {
        StorageBackend::S3 => "s3",
        StorageBackend::Local => "local",
        StorageBackend::Memory => "memory",
    }
}

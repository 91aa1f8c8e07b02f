#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod config;
mod server;

use std::process;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tokio_util::sync::CancellationToken;
use url::Url;
use vip_cache::{CacheGroup, Getter, Orchestrator, PeerPicker};
use vip_object::{ImageStore, ObjectImageStore};
use vip_peer::{CachePool, default_context};
use vip_server::handler::routes;
use vip_server::middleware::{RouterObservabilityExt, RouterRecoveryExt};
use vip_server::service::{ServiceState, WarmupTarget};
use vip_worker::JobQueue;

use crate::config::{Cli, storage_label};

// Tracing target constants
pub const TRACING_TARGET_SERVER_STARTUP: &str = "vip_cli::server::startup";
pub const TRACING_TARGET_SERVER_SHUTDOWN: &str = "vip_cli::server::shutdown";
pub const TRACING_TARGET_CONFIG: &str = "vip_cli::config";

#[tokio::main]
async fn main() {
    let Err(error) = run().await else {
        tracing::info!(
            target: TRACING_TARGET_SERVER_SHUTDOWN,
            "application terminated successfully"
        );
        process::exit(0);
    };

    if tracing::enabled!(tracing::Level::ERROR) {
        tracing::error!(
            target: TRACING_TARGET_SERVER_SHUTDOWN,
            error = %error,
            "application terminated with error"
        );
    } else {
        eprintln!("Error: {error:#}");
    }

    process::exit(1);
}

/// Main application entry point.
async fn run() -> anyhow::Result<()> {
    let cli = Cli::init();

    cli.init_tracing();
    cli.log();
    cli.validate()?;

    let store = ObjectImageStore::from_config(&cli.storage).context("failed to open storage")?;
    tracing::info!(
        target: TRACING_TARGET_SERVER_STARTUP,
        backend = storage_label(&cli.storage),
        "storage ready"
    );
    let store: Arc<dyn ImageStore> = Arc::new(store);
    let orchestrator = Arc::new(Orchestrator::new(store, &cli.cache));

    let pool = vip_peer::pool::from_config(&cli.peer, cli.cache.max_width)
        .await
        .context("failed to start peer pool")?;
    let picker: Arc<dyn PeerPicker> = pool.clone();
    let getter: Arc<dyn Getter> = orchestrator.clone();
    let group = Arc::new(
        CacheGroup::new(&cli.cache.group_name, cli.cache.cache_bytes, getter).with_picker(picker),
    );

    let queue = Arc::new(JobQueue::start(&cli.queue));
    let warmup = create_warmup_target(&cli)?;

    let shutdown = CancellationToken::new();
    let control = start_peering(pool.as_ref(), &cli, shutdown.clone()).await?;
    let refresh = pool.spawn_refresh(shutdown.clone());

    let state = ServiceState::new(group.clone(), queue.clone(), warmup, cli.cache.max_width);
    let public = create_router(state, &cli);
    let cache = pool.router(group).with_observability();

    tokio::spawn(server::shutdown_signal(
        shutdown.clone(),
        cli.server.shutdown_timeout(),
    ));
    let served = server::serve(public, cache, &cli.server, pool.port(), shutdown.clone()).await;
    shutdown.cancel();

    drain(&cli, &queue, &orchestrator).await;
    for task in [control, refresh].into_iter().flatten() {
        let _ = task.await;
    }

    served.context("server failed")
}

/// Builds the public router with all middleware layers applied.
///
/// Recovery is outermost, then observability, then the routes.
fn create_router(state: ServiceState, cli: &Cli) -> Router {
    routes(state)
        .with_observability()
        .with_recovery(&cli.recovery)
}

/// Warmup jobs call back into this node's own public listener.
fn create_warmup_target(cli: &Cli) -> anyhow::Result<WarmupTarget> {
    let base = Url::parse(&format!("http://{}", cli.server.local_addr()))
        .context("invalid warmup base url")?;
    WarmupTarget::new(base, cli.recovery.request_timeout()).context("failed to build warmup client")
}

/// Installs the context hook, starts the control listener, and announces
/// this node to the other members.
async fn start_peering(
    pool: &dyn CachePool,
    cli: &Cli,
    shutdown: CancellationToken,
) -> anyhow::Result<Option<tokio::task::JoinHandle<()>>> {
    pool.set_context(default_context(cli.cache.max_width));

    let control = pool
        .listen(shutdown)
        .await
        .context("failed to start control listener")?;

    let topology = pool.topology();
    let acknowledged = pool.announce().await;
    tracing::info!(
        target: TRACING_TARGET_SERVER_STARTUP,
        self_url = topology.self_url(),
        members = topology.addresses().len(),
        acknowledged,
        "peer pool ready"
    );

    Ok(control)
}

/// Lets queued jobs finish and pending write-backs land.
async fn drain(cli: &Cli, queue: &JobQueue, orchestrator: &Orchestrator) {
    let budget = cli.server.shutdown_timeout();

    if !queue.shutdown(budget).await {
        tracing::warn!(
            target: TRACING_TARGET_SERVER_SHUTDOWN,
            pending = queue.pending(),
            "job queue did not drain in time"
        );
    }

    if !orchestrator.drain(budget).await {
        tracing::warn!(
            target: TRACING_TARGET_SERVER_SHUTDOWN,
            "write-backs did not drain in time"
        );
    }
}

//! Liveness and cache statistics.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use vip_cache::{CacheGroup, StatsSnapshot};

use crate::service::ServiceState;

async fn ping() -> &'static str {
    "pong"
}

async fn stats(State(group): State<Arc<CacheGroup>>) -> Json<StatsSnapshot> {
    Json(group.stats().snapshot())
}

/// Returns a [`Router`] with monitoring routes.
pub fn routes() -> Router<ServiceState> {
    Router::new()
        .route("/ping", get(ping))
        .route("/stats", get(stats))
}

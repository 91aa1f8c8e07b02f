//! Routers for the cache-serving and control ports.
//!
//! | Port    | Route                   | Success                      |
//! |---------|-------------------------|------------------------------|
//! | cache   | `GET /{group}/{*key}`   | `200`, derivative bytes      |
//! | control | `POST /refresh`         | `204` after the ring rebuild |

use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use vip_cache::{CacheGroup, ErrorKind};

use crate::pool::{ClusteredPool, ContextHook};

/// Tracing target for inbound peer requests.
pub const TRACING_TARGET: &str = "vip_peer::handler";

#[derive(Clone)]
struct CacheState {
    group: Arc<CacheGroup>,
    context: Arc<ArcSwap<ContextHook>>,
}

/// Serves values of `group` to peers that routed a key here.
pub fn cache_router(group: Arc<CacheGroup>, context: Arc<ArcSwap<ContextHook>>) -> Router {
    Router::new()
        .route("/{group}/{*key}", get(serve_key))
        .with_state(CacheState { group, context })
}

async fn serve_key(
    State(state): State<CacheState>,
    Path((group, key)): Path<(String, String)>,
) -> Response {
    if group != state.group.name() {
        return (StatusCode::NOT_FOUND, format!("no such group: {group}")).into_response();
    }

    let hook = state.context.load_full();
    let request = match (*hook)(&key) {
        Ok(request) => request,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };

    match state.group.get_owned(&request).await {
        Ok(value) => ([(header::CONTENT_TYPE, "application/octet-stream")], value).into_response(),
        Err(err) => {
            tracing::warn!(
                target: TRACING_TARGET,
                key = %key,
                error = %err,
                "peer request failed"
            );
            (status_for(err.kind()), err.to_string()).into_response()
        }
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::UnsupportedFormat => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        ErrorKind::Decode => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Serves `RefreshPeers()` for `pool`.
pub fn control_router(pool: ClusteredPool) -> Router {
    Router::new()
        .route("/refresh", post(refresh_peers))
        .with_state(pool)
}

async fn refresh_peers(State(pool): State<ClusteredPool>) -> StatusCode {
    match pool.refresh().await {
        Ok(_) => StatusCode::NO_CONTENT,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

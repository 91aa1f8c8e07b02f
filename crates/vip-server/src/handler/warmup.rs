//! Derivative warmup.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;
use vip_core::DerivativeRequest;
use vip_worker::{JobQueue, WarmupJob};

use crate::handler::Result;
use crate::service::{ServiceState, WarmupTarget};

/// Tracing target for warmup requests.
const TRACING_TARGET: &str = "vip_server::handler::warmup";

/// Each value is the query string of one derivative to warm up.
pub const WARMUP_HEADER: &str = "x-vip-warmup";

/// Body of an accepted warmup request.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct WarmupResponse {
    /// Jobs placed on the queue.
    pub queued: usize,
}

async fn warmup(
    State(state): State<ServiceState>,
    State(queue): State<Arc<JobQueue>>,
    State(target): State<WarmupTarget>,
    Path((bucket, image_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<WarmupResponse>)> {
    // Rejects ids that could not be served later anyway.
    DerivativeRequest::new(bucket.as_str(), image_id.as_str(), 0, false, state.max_width())?;

    let mut queued = 0;
    for value in headers.get_all(WARMUP_HEADER) {
        let Ok(query) = value.to_str() else {
            tracing::warn!(
                target: TRACING_TARGET,
                bucket = %bucket,
                image_id = %image_id,
                "skipping non-ascii warmup header"
            );
            continue;
        };

        let job = WarmupJob::new(
            target.client().clone(),
            target.base(),
            &bucket,
            &image_id,
            query,
        );
        queue.push(job).await?;
        queued += 1;
    }

    tracing::debug!(
        target: TRACING_TARGET,
        bucket = %bucket,
        image_id = %image_id,
        queued,
        "warmup accepted"
    );
    Ok((StatusCode::ACCEPTED, Json(WarmupResponse { queued })))
}

/// Returns a [`Router`] with warmup routes.
pub fn routes() -> Router<ServiceState> {
    Router::new().route("/warmup/{bucket}/{image_id}", post(warmup))
}

//! Image delivery.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Deserialize;
use vip_cache::CacheGroup;
use vip_core::{DerivativeRequest, sniff_content_type};

use crate::handler::Result;
use crate::service::ServiceState;

/// Tracing target for image delivery.
const TRACING_TARGET: &str = "vip_server::handler::images";

/// Derivatives are immutable, so clients may keep them for a year.
const CACHE_CONTROL: &str = "public, max-age=31536000";

/// Fixed modification date advertised for every derivative.
const LAST_MODIFIED: &str = "Tue, 10 Nov 2009 23:00:00 GMT";

/// Query parameters of an image request.
#[derive(Debug, Default, Deserialize)]
pub struct ImageQuery {
    /// Requested width.
    #[serde(default)]
    s: Option<String>,
    /// Crop to a centered square.
    #[serde(default)]
    c: Option<String>,
}

impl ImageQuery {
    /// The requested width; missing or unparseable values mean the original.
    pub fn width(&self) -> u32 {
        self.s
            .as_deref()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Whether a square crop was requested.
    pub fn crop(&self) -> bool {
        self.c.as_deref().is_some_and(|c| {
            let c = c.trim();
            c.eq_ignore_ascii_case("true") || c == "1" || c.eq_ignore_ascii_case("yes")
        })
    }
}

#[tracing::instrument(skip_all, fields(bucket = %bucket, image_id = %image_id))]
async fn get_image(
    State(state): State<ServiceState>,
    State(group): State<Arc<CacheGroup>>,
    Path((bucket, image_id)): Path<(String, String)>,
    Query(query): Query<ImageQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    if headers.contains_key(header::IF_MODIFIED_SINCE) {
        return Ok((
            StatusCode::NOT_MODIFIED,
            [(header::CACHE_CONTROL, CACHE_CONTROL)],
        )
            .into_response());
    }

    let request = DerivativeRequest::new(
        bucket,
        image_id,
        query.width(),
        query.crop(),
        state.max_width(),
    )?;

    let started = Instant::now();
    let data = group.get(&request).await?;
    let content_type = sniff_content_type(&data).unwrap_or("application/octet-stream");

    tracing::debug!(
        target: TRACING_TARGET,
        key = %request,
        size = data.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "served derivative"
    );

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, CACHE_CONTROL),
            (header::LAST_MODIFIED, LAST_MODIFIED),
        ],
        data,
    )
        .into_response())
}

/// Returns a [`Router`] with image routes.
pub fn routes() -> Router<ServiceState> {
    Router::new().route("/{bucket}/{image_id}", get(get_image))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(s: Option<&str>, c: Option<&str>) -> ImageQuery {
        ImageQuery {
            s: s.map(str::to_owned),
            c: c.map(str::to_owned),
        }
    }

    #[test]
    fn width_parsing() {
        assert_eq!(query(Some("250"), None).width(), 250);
        assert_eq!(query(Some(" 42 "), None).width(), 42);
        assert_eq!(query(Some("abc"), None).width(), 0);
        assert_eq!(query(Some("-5"), None).width(), 0);
        assert_eq!(query(None, None).width(), 0);
    }

    #[test]
    fn crop_parsing() {
        for yes in ["true", "TRUE", "1", "yes"] {
            assert!(query(None, Some(yes)).crop());
        }
        for no in ["false", "0", "", "nope"] {
            assert!(!query(None, Some(no)).crop());
        }
        assert!(!query(None, None).crop());
    }
}

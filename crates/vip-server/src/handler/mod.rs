//! All `axum::`[`Router`]s with related `axum::`[`Handler`]s.
//!
//! [`Router`]: axum::routing::Router
//! [`Handler`]: axum::handler::Handler

mod error;
mod images;
mod monitors;
mod response;
mod warmup;

use axum::Router;
use axum::response::{IntoResponse, Response};

pub use crate::handler::error::{Error, ErrorKind, Result};
pub use crate::handler::images::ImageQuery;
pub use crate::handler::warmup::{WARMUP_HEADER, WarmupResponse};
use crate::service::ServiceState;

#[inline]
async fn handler() -> Response {
    ErrorKind::NotFound.into_response()
}

/// Returns a [`Router`] with all public routes.
pub fn routes(state: ServiceState) -> Router {
    Router::new()
        .merge(monitors::routes())
        .merge(warmup::routes())
        .merge(images::routes())
        .fallback(handler)
        .with_state(state)
}

#[cfg(test)]
mod test {
    use std::io::Cursor;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::http::{HeaderName, HeaderValue, StatusCode, header};
    use axum_test::TestServer;
    use bytes::Bytes;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use url::Url;
    use vip_cache::{CacheConfig, CacheGroup, Orchestrator};
    use vip_object::{ImageStore, ObjectImageStore};
    use vip_worker::{JobQueue, QueueConfig};

    use super::*;
    use crate::service::WarmupTarget;

    fn jpeg(width: u32, height: u32) -> Bytes {
        let image = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image)
            .write_to(&mut out, ImageFormat::Jpeg)
            .unwrap();
        Bytes::from(out.into_inner())
    }

    /// Returns a [`TestServer`] over an in-memory store seeded with
    /// `photos/portrait` (612x816 JPEG) and `photos/broken` (not an image).
    pub async fn create_test_server() -> anyhow::Result<(TestServer, Arc<ObjectImageStore>)> {
        let store = Arc::new(ObjectImageStore::in_memory());
        store
            .write("photos", "portrait", jpeg(612, 816), "image/jpeg")
            .await?;
        store
            .write("photos", "broken", Bytes::from_static(b"not an image"), "image/jpeg")
            .await?;

        let config = CacheConfig::default();
        let orchestrator = Orchestrator::new(store.clone(), &config);
        let group = CacheGroup::new(&config.group_name, config.cache_bytes, Arc::new(orchestrator));
        let queue = JobQueue::start(&QueueConfig::default());
        // Nothing listens here; warmup jobs fail and log.
        let base = Url::parse("http://127.0.0.1:9")?;
        let warmup = WarmupTarget::new(base, Duration::from_millis(200))?;

        let state = ServiceState::new(Arc::new(group), Arc::new(queue), warmup, config.max_width);
        let server = TestServer::new(routes(state))?;
        Ok((server, store))
    }

    #[tokio::test]
    async fn ping() -> anyhow::Result<()> {
        let (server, _) = create_test_server().await?;
        let response = server.get("/ping").await;
        response.assert_status_ok();
        response.assert_text("pong");
        Ok(())
    }

    #[tokio::test]
    async fn serves_the_original_verbatim() -> anyhow::Result<()> {
        let (server, store) = create_test_server().await?;
        let response = server.get("/photos/portrait").await;
        response.assert_status_ok();
        response.assert_header(header::CONTENT_TYPE, "image/jpeg");
        response.assert_header(header::CACHE_CONTROL, "public, max-age=31536000");
        assert_eq!(response.as_bytes(), &store.read("photos", "portrait").await?);
        Ok(())
    }

    #[tokio::test]
    async fn resizes_and_writes_back() -> anyhow::Result<()> {
        let (server, store) = create_test_server().await?;
        let response = server.get("/photos/portrait").add_query_param("s", "100").await;
        response.assert_status_ok();

        let resized = image::load_from_memory(response.as_bytes())?;
        assert_eq!(resized.width(), 100);
        assert!((132..=134).contains(&resized.height()));

        let written = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(data) = store.read("photos", "portrait/s/100").await {
                    break data;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await?;
        assert_eq!(written, response.as_bytes());
        Ok(())
    }

    #[tokio::test]
    async fn crops_and_clamps() -> anyhow::Result<()> {
        let (server, _) = create_test_server().await?;
        let response = server
            .get("/photos/portrait")
            .add_query_param("s", "5000")
            .add_query_param("c", "true")
            .await;
        response.assert_status_ok();

        // Clamped to 720, then limited by the shorter edge.
        let cropped = image::load_from_memory(response.as_bytes())?;
        assert_eq!((cropped.width(), cropped.height()), (612, 612));
        Ok(())
    }

    #[tokio::test]
    async fn conditional_requests_are_not_modified() -> anyhow::Result<()> {
        let (server, _) = create_test_server().await?;
        let response = server
            .get("/photos/does-not-exist")
            .add_header(header::IF_MODIFIED_SINCE, "Tue, 10 Nov 2009 23:00:00 GMT")
            .await;
        response.assert_status(StatusCode::NOT_MODIFIED);
        assert!(response.as_bytes().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn maps_failures_to_statuses() -> anyhow::Result<()> {
        let (server, _) = create_test_server().await?;

        server
            .get("/photos/missing")
            .expect_failure()
            .await
            .assert_status(StatusCode::NOT_FOUND);
        server
            .get("/photos/broken")
            .add_query_param("s", "100")
            .expect_failure()
            .await
            .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        server
            .get("/a/b/c/d")
            .expect_failure()
            .await
            .assert_status(StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test]
    async fn warmup_queues_one_job_per_header() -> anyhow::Result<()> {
        let (server, _) = create_test_server().await?;
        let warmup = HeaderName::from_static(WARMUP_HEADER);

        let response = server
            .post("/warmup/photos/portrait")
            .add_header(warmup.clone(), HeaderValue::from_static("s=250"))
            .add_header(warmup, HeaderValue::from_static("s=100&c=true"))
            .await;
        response.assert_status(StatusCode::ACCEPTED);
        response.assert_json(&serde_json::json!({ "queued": 2 }));

        let response = server.post("/warmup/photos/portrait").await;
        response.assert_status(StatusCode::ACCEPTED);
        response.assert_json(&serde_json::json!({ "queued": 0 }));
        Ok(())
    }

    #[tokio::test]
    async fn stats_count_lookups() -> anyhow::Result<()> {
        let (server, _) = create_test_server().await?;
        server.get("/photos/portrait").await.assert_status_ok();
        server.get("/photos/portrait").await.assert_status_ok();

        let stats: serde_json::Value = server.get("/stats").await.json();
        assert_eq!(stats["gets"], 2);
        assert_eq!(stats["cache_hits"], 1);
        assert_eq!(stats["local_loads"], 1);
        Ok(())
    }
}

//! Computes a derivative on a confirmed local cache miss.
//!
//! The flow for one request:
//!
//! 1. Read the variant at its derivative key. If present, return it.
//! 2. Read the original. If absent, fail with [`Error::OriginMissing`].
//! 3. A request for the original itself returns those bytes untouched.
//! 4. Probe the stored content type and pick the GIF or plain resize path.
//! 5. Transform on the blocking pool, then write the result back in a
//!    detached task whose outcome is only logged.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::task::TaskTracker;
use vip_core::DerivativeRequest;
use vip_core::transform::{self, Encoded};
use vip_object::ImageStore;

use crate::group::Getter;
use crate::{CacheConfig, Error, Result};

/// Tracing target for orchestrator operations.
pub const TRACING_TARGET: &str = "vip_cache::orchestrator";

/// The cache-miss compute function.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn ImageStore>,
    fetch_timeout: Duration,
    transform_timeout: Duration,
    write_backs: TaskTracker,
}

impl Orchestrator {
    /// Creates an orchestrator over `store`.
    pub fn new(store: Arc<dyn ImageStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            fetch_timeout: config.fetch_timeout(),
            transform_timeout: config.transform_timeout(),
            write_backs: TaskTracker::new(),
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<dyn ImageStore> {
        &self.store
    }

    /// Produces the bytes for `request`, computing and persisting the
    /// variant when it is not stored yet.
    pub async fn compute(&self, request: &DerivativeRequest) -> Result<Bytes> {
        let bucket = request.bucket();
        let key = request.derivative_key();

        if !request.is_original() {
            match self.read(bucket, &key).await {
                Ok(bytes) => {
                    tracing::debug!(target: TRACING_TARGET, %request, "stored variant hit");
                    return Ok(bytes);
                }
                Err(Error::Storage(err)) if err.is_not_found() => {}
                Err(err) => {
                    tracing::warn!(
                        target: TRACING_TARGET,
                        %request,
                        error = %err,
                        "variant read failed, recomputing"
                    );
                }
            }
        }

        let original = match self.read(bucket, request.image_id()).await {
            Ok(bytes) => bytes,
            Err(Error::Storage(err)) if err.is_not_found() => {
                return Err(Error::OriginMissing {
                    bucket: bucket.to_owned(),
                    image_id: request.image_id().to_owned(),
                });
            }
            Err(err) => return Err(err),
        };

        if request.is_original() {
            return Ok(original);
        }

        let animated = self.is_animated(request, &original).await;
        let started = Instant::now();
        let encoded = self
            .transform(original, request.width(), request.crop(), animated)
            .await?;

        tracing::info!(
            target: TRACING_TARGET,
            %request,
            animated,
            width = encoded.width,
            height = encoded.height,
            size = encoded.data.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "computed derivative"
        );

        let data = encoded.data.clone();
        self.write_back(bucket.to_owned(), key, encoded);
        Ok(data)
    }

    /// Waits for in-flight write-backs, giving up after `timeout`.
    ///
    /// Returns `false` when the budget ran out first.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.write_backs.close();
        let pending = self.write_backs.len();
        if pending > 0 {
            tracing::info!(target: TRACING_TARGET, pending, "draining write-backs");
        }
        tokio::time::timeout(timeout, self.write_backs.wait())
            .await
            .is_ok()
    }

    async fn read(&self, bucket: &str, key: &str) -> Result<Bytes> {
        bounded("fetch", self.fetch_timeout, self.store.read(bucket, key))
            .await?
            .map_err(Error::from)
    }

    /// Decides between the GIF and the plain resize path.
    ///
    /// A failed probe is not fatal and selects the plain path. A backend that
    /// records no content type is answered by sniffing the bytes.
    async fn is_animated(&self, request: &DerivativeRequest, original: &[u8]) -> bool {
        let probe = self.store.probe(request.bucket(), request.image_id());
        let probed = bounded("probe", self.fetch_timeout, probe)
            .await
            .and_then(|result| result.map_err(Error::from));

        match probed {
            Ok(Some(content_type)) => transform::is_animated(&content_type),
            Ok(None) => {
                transform::sniff_content_type(original).is_some_and(transform::is_animated)
            }
            Err(err) => {
                tracing::warn!(
                    target: TRACING_TARGET,
                    %request,
                    error = %err,
                    "content type probe failed"
                );
                false
            }
        }
    }

    async fn transform(
        &self,
        original: Bytes,
        width: u32,
        crop: bool,
        animated: bool,
    ) -> Result<Encoded> {
        let task = tokio::task::spawn_blocking(move || {
            if animated {
                transform::resize_animated(&original, width, crop)
            } else {
                transform::resize(&original, width, crop)
            }
        });

        let encoded = bounded("transform", self.transform_timeout, task).await???;
        Ok(encoded)
    }

    fn write_back(&self, bucket: String, key: String, encoded: Encoded) {
        let store = Arc::clone(&self.store);
        self.write_backs.spawn(async move {
            let content_type = encoded.content_type();
            match store.write(&bucket, &key, encoded.data, content_type).await {
                Ok(()) => tracing::debug!(
                    target: TRACING_TARGET,
                    bucket = %bucket,
                    key = %key,
                    "wrote back derivative"
                ),
                Err(err) => tracing::warn!(
                    target: TRACING_TARGET,
                    bucket = %bucket,
                    key = %key,
                    error = %err,
                    "write-back failed"
                ),
            }
        });
    }
}

async fn bounded<F: Future>(stage: &'static str, after: Duration, fut: F) -> Result<F::Output> {
    tokio::time::timeout(after, fut)
        .await
        .map_err(|_| Error::Timeout { stage, after })
}

#[async_trait]
impl Getter for Orchestrator {
    async fn load(&self, request: &DerivativeRequest) -> Result<Bytes> {
        self.compute(request).await
    }
}

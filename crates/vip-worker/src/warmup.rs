//! Cache warmup through the public endpoint.

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use crate::Job;

/// Tracing target for warmup jobs.
pub const TRACING_TARGET: &str = "vip_worker::warmup";

/// Requests one derivative so that it is computed and cached ahead of demand.
#[derive(Debug, Clone)]
pub struct WarmupJob {
    client: Client,
    url: Url,
}

impl WarmupJob {
    /// Targets `{base}/{bucket}/{image_id}?{query}`.
    ///
    /// `query` is passed through as given, e.g. `s=250&c=true`.
    pub fn new(client: Client, base: &Url, bucket: &str, image_id: &str, query: &str) -> Self {
        let mut url = base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(bucket).push(image_id);
        }
        let query = query.trim_start_matches('?');
        url.set_query((!query.is_empty()).then_some(query));
        Self { client, url }
    }

    /// The URL this job requests.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Job for WarmupJob {
    async fn run(&self) {
        let result = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .and_then(|response| response.error_for_status());

        match result {
            Ok(response) => {
                tracing::info!(
                    target: TRACING_TARGET,
                    url = %self.url,
                    status = response.status().as_u16(),
                    "warmed up derivative"
                );
            }
            Err(err) => {
                tracing::warn!(
                    target: TRACING_TARGET,
                    url = %self.url,
                    error = %err,
                    "warmup failed"
                );
            }
        }
    }

    fn name(&self) -> &str {
        "warmup"
    }
}

//! HTTP [`RecordStore`]: POSTs a JSON [`QueryRequest`] to `{base_url}/query`.

use anyhow::{bail, Context};
use async_trait::async_trait;
use runlens_core::{PageResult, QueryRequest, RecordStore};

use crate::config::StoreConfig;

/// Record store reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRecordStore {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRecordStore {
    /// Builds a client with the configured transport timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be constructed.
    pub fn new(config: &StoreConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: query_endpoint(&config.base_url),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn query_endpoint(base_url: &str) -> String {
    format!("{}/query", base_url.trim_end_matches('/'))
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    async fn query(&self, request: &QueryRequest) -> anyhow::Result<PageResult> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .with_context(|| format!("POST {}", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("store returned {status}: {body}");
        }
        response
            .json::<PageResult>()
            .await
            .context("malformed page result")
    }
}

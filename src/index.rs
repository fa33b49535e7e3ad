//! Document index client.
//!
//! The [`DocumentIndex`] trait is the seam between the gateway and the
//! search engine that holds ingested documents. [`ElasticsearchIndex`]
//! sends a [`SearchRequest`] to `POST {url}/{index}/_search` and decodes
//! the reply once into typed hits; a reply that does not match the schema
//! is an [`IndexError::Decode`], never a panic.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::IndexConfig;
use crate::models::DocumentHit;
use crate::query::SearchRequest;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index configuration error: {0}")]
    Configuration(String),

    #[error("index request failed: {0}")]
    Upstream(String),

    #[error("malformed index response: {0}")]
    Decode(String),

    #[error("index request timed out")]
    Timeout,
}

/// Ranked hits for one query, in the index's relevance order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchResults {
    pub total: Option<u64>,
    pub hits: Vec<DocumentHit>,
}

#[async_trait]
pub trait DocumentIndex: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResults, IndexError>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: HitsEnvelope,
}

#[derive(Debug, Deserialize)]
struct HitsEnvelope {
    #[serde(default)]
    total: Option<TotalHits>,
    #[serde(default)]
    hits: Vec<DocumentHit>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TotalHits {
    Count(u64),
    Detailed { value: u64 },
}

impl TotalHits {
    fn value(&self) -> u64 {
        match self {
            TotalHits::Count(v) | TotalHits::Detailed { value: v } => *v,
        }
    }
}

fn parse_search_response(body: &[u8]) -> Result<SearchResults, IndexError> {
    let resp: SearchResponse =
        serde_json::from_slice(body).map_err(|e| IndexError::Decode(e.to_string()))?;
    Ok(SearchResults {
        total: resp.hits.total.as_ref().map(TotalHits::value),
        hits: resp.hits.hits,
    })
}

/// Elasticsearch-compatible search client.
pub struct ElasticsearchIndex {
    client: reqwest::Client,
    base_url: String,
    index_name: Option<String>,
    api_key: Option<String>,
    max_retries: u32,
}

impl ElasticsearchIndex {
    pub fn new(
        config: &IndexConfig,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, IndexError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IndexError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            index_name: config.name.clone().filter(|n| !n.is_empty()),
            api_key: api_key.filter(|k| !k.is_empty()),
            max_retries: config.max_retries,
        })
    }

    /// Builds the client, reading the API key from `index.api_key_env`.
    pub fn from_env(config: &IndexConfig, timeout: Duration) -> Result<Self, IndexError> {
        let api_key = std::env::var(&config.api_key_env).ok();
        if config.name.is_none() {
            warn!("index.name is not set; document listing and search will fail");
        }
        Self::new(config, api_key, timeout)
    }
}

#[async_trait]
impl DocumentIndex for ElasticsearchIndex {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResults, IndexError> {
        let index_name = self
            .index_name
            .as_deref()
            .ok_or_else(|| IndexError::Configuration("index name not configured".to_string()))?;
        let url = format!("{}/{}/_search", self.base_url, index_name);

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut builder = self.client.post(&url).json(request);
            if let Some(key) = &self.api_key {
                builder = builder.header("Authorization", format!("ApiKey {}", key));
            }

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let bytes = response
                            .bytes()
                            .await
                            .map_err(|e| IndexError::Upstream(e.to_string()))?;
                        let results = parse_search_response(&bytes)?;
                        debug!(hits = results.hits.len(), total = ?results.total, "index search");
                        return Ok(results);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = IndexError::Upstream(format!("status {}: {}", status, body_text));

                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(attempt, %status, "index search failed, retrying");
                        last_err = Some(err);
                        continue;
                    }

                    return Err(err);
                }
                Err(e) if e.is_timeout() => {
                    last_err = Some(IndexError::Timeout);
                    continue;
                }
                Err(e) => {
                    last_err = Some(IndexError::Upstream(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| IndexError::Upstream("search failed after retries".into())))
    }
}

//! Embedding client.
//!
//! Defines the [`Embedder`] trait and its implementations:
//! - **[`DisabledEmbedder`]**: fails with a configuration error; used when
//!   `embedding.provider = "disabled"`.
//! - **[`OpenAiEmbedder`]**: calls an OpenAI-compatible embeddings endpoint
//!   with retry and backoff.
//!
//! A query vector is only accepted when its length equals the configured
//! dimension. Zero embeddings in a successful response is its own failure
//! ([`EmbeddingError::EmptyResult`]); it is never replaced by a zero vector.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;

/// Fixed-dimension embedding of query text. Computed per request, never stored.
pub type QueryVector = Vec<f32>;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("query text must not be empty")]
    EmptyInput,

    #[error("embedding configuration error: {0}")]
    Configuration(String),

    #[error("embedding provider error: {0}")]
    Upstream(String),

    #[error("embedding provider returned no embeddings")]
    EmptyResult,

    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding request timed out")]
    Timeout,
}

/// Converts query text into a [`QueryVector`].
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embeds a single, non-empty text.
    async fn embed(&self, text: &str) -> Result<QueryVector, EmbeddingError>;
}

// ============ Disabled Provider ============

pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _text: &str) -> Result<QueryVector, EmbeddingError> {
        Err(EmbeddingError::Configuration(
            "embedding provider is disabled".to_string(),
        ))
    }
}

// ============ OpenAI Provider ============

/// Embedding client for the OpenAI `POST /v1/embeddings` API.
///
/// The API key is resolved once at construction. A missing key does not
/// prevent construction; every [`embed`](Embedder::embed) call then fails
/// with [`EmbeddingError::Configuration`].
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dims: usize,
    api_key: Option<String>,
    max_retries: u32,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig, api_key: Option<String>) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            dims: config.dims,
            api_key: api_key.filter(|k| !k.is_empty()),
            max_retries: config.max_retries,
        })
    }

    /// Builds the client, reading the key from the variable named by
    /// `embedding.api_key_env`.
    pub fn from_env(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            warn!(
                "{} is not set; semantic search will fail until it is",
                config.api_key_env
            );
        }
        Self::new(config, api_key)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<QueryVector, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| EmbeddingError::Configuration("API key not configured".to_string()))?;

        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.endpoint)
                .bearer_auth(api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let bytes = response
                            .bytes()
                            .await
                            .map_err(|e| EmbeddingError::Upstream(e.to_string()))?;
                        let vector = parse_embedding_response(&bytes, self.dims)?;
                        debug!(dims = vector.len(), model = %self.model, "embedded query");
                        return Ok(vector);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err =
                        EmbeddingError::Upstream(format!("API error {}: {}", status, body_text));

                    // Rate limited or server error, retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(attempt, %status, "embedding request failed, retrying");
                        last_err = Some(err);
                        continue;
                    }

                    // Client error other than 429, no retry
                    return Err(err);
                }
                Err(e) if e.is_timeout() => {
                    last_err = Some(EmbeddingError::Timeout);
                    continue;
                }
                Err(e) => {
                    last_err = Some(EmbeddingError::Upstream(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| EmbeddingError::Upstream("embedding failed after retries".into())))
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

/// Decodes an embeddings response and returns the first vector by `index`,
/// checking it against the expected dimension.
fn parse_embedding_response(body: &[u8], expected_dims: usize) -> Result<QueryVector, EmbeddingError> {
    let resp: EmbeddingResponse = serde_json::from_slice(body)
        .map_err(|e| EmbeddingError::Upstream(format!("malformed response: {}", e)))?;

    let first = resp
        .data
        .into_iter()
        .min_by_key(|d| d.index)
        .ok_or(EmbeddingError::EmptyResult)?;

    if first.embedding.len() != expected_dims {
        return Err(EmbeddingError::DimensionMismatch {
            expected: expected_dims,
            actual: first.embedding.len(),
        });
    }

    Ok(first.embedding)
}

/// Create the appropriate [`Embedder`] based on configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"openai"` | [`OpenAiEmbedder`] |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAiEmbedder::from_env(config)?)),
        other => Err(EmbeddingError::Configuration(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

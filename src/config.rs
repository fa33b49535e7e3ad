use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_request_timeout_secs() -> u64 {
    30
}
fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}
fn default_max_upload_bytes() -> usize {
    32 << 20
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Connection and query-shape settings for the document index.
///
/// The tag fields must be exact-match (keyword) fields: they carry the
/// tenant filter that keeps every listing and search inside one
/// owner/table pair.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_index_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_table_field")]
    pub table_field: String,
    #[serde(default = "default_owner_field")]
    pub owner_field: String,
    #[serde(default = "default_vector_field")]
    pub vector_field: String,
    #[serde(default = "default_list_size")]
    pub list_size: usize,
    #[serde(default = "default_knn_k")]
    pub knn_k: usize,
    #[serde(default = "default_knn_num_candidates")]
    pub knn_num_candidates: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_index_api_key_env() -> String {
    "ELASTICSEARCH_API_KEY".to_string()
}
fn default_table_field() -> String {
    "properties.properties.table_id.keyword".to_string()
}
fn default_owner_field() -> String {
    "properties.properties.user_id.keyword".to_string()
}
fn default_vector_field() -> String {
    "embedding".to_string()
}
fn default_list_size() -> usize {
    1000
}
fn default_knn_k() -> usize {
    10
}
fn default_knn_num_candidates() -> usize {
    100
}
fn default_max_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_embedding_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            dims: default_dims(),
            endpoint: default_endpoint(),
            api_key_env: default_embedding_api_key_env(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_endpoint() -> String {
    "https://api.openai.com/v1/embeddings".to_string()
}
fn default_embedding_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default)]
    pub script: Option<PathBuf>,
    #[serde(default = "default_ingest_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How long finished jobs stay readable through `/ingest/{job_id}`.
    #[serde(default = "default_job_retention_secs")]
    pub job_retention_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            script: None,
            timeout_secs: default_ingest_timeout_secs(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            job_retention_secs: default_job_retention_secs(),
        }
    }
}

fn default_interpreter() -> String {
    "python3".to_string()
}
fn default_ingest_timeout_secs() -> u64 {
    300
}
fn default_workers() -> usize {
    2
}
fn default_queue_capacity() -> usize {
    1024
}
fn default_job_retention_secs() -> u64 {
    3600
}

impl IngestConfig {
    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.db.max_connections == 0 {
        anyhow::bail!("db.max_connections must be > 0");
    }

    // Validate server
    if config.server.request_timeout_secs == 0 {
        anyhow::bail!("server.request_timeout_secs must be > 0");
    }
    if config.server.max_upload_bytes == 0 {
        anyhow::bail!("server.max_upload_bytes must be > 0");
    }

    // Validate index
    if !(config.index.url.starts_with("http://") || config.index.url.starts_with("https://")) {
        anyhow::bail!("index.url must start with http:// or https://");
    }
    if config.index.list_size == 0 {
        anyhow::bail!("index.list_size must be >= 1");
    }
    if config.index.knn_k == 0 {
        anyhow::bail!("index.knn_k must be >= 1");
    }
    if config.index.knn_num_candidates < config.index.knn_k {
        anyhow::bail!("index.knn_num_candidates must be >= index.knn_k");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.embedding.is_enabled() && config.embedding.dims == 0 {
        anyhow::bail!(
            "embedding.dims must be > 0 when provider is '{}'",
            config.embedding.provider
        );
    }

    // Validate ingest
    if config.ingest.timeout_secs == 0 {
        anyhow::bail!("ingest.timeout_secs must be > 0");
    }
    if config.ingest.workers == 0 {
        anyhow::bail!("ingest.workers must be > 0");
    }
    if config.ingest.queue_capacity == 0 {
        anyhow::bail!("ingest.queue_capacity must be > 0");
    }

    Ok(config)
}

//! HTTP server and composition root.
//!
//! [`run_server`] opens the metadata store, runs migrations, constructs
//! every collaborator once, and serves the router until Ctrl-C, closing the
//! pool on the way out. [`build_router`] is separate so tests can serve an
//! [`AppState`] assembled from fakes.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/es/all?table_id=ID` | List documents of one of the caller's tables |
//! | `GET`  | `/es/search?q=TEXT&table_id=ID` | Semantic search within a table |
//! | `POST` | `/create_table` | Create (or resolve) a table and queue document ingestion |
//! | `GET`  | `/tables` | The caller's tables, by name |
//! | `GET`  | `/table?table_id=ID` | One visible table |
//! | `PATCH`| `/table/{id}/visibility` | Owner-only visibility change |
//! | `POST` | `/upload` | Store a multipart `file` |
//! | `GET`  | `/ingest/{job_id}` | Ingestion job status |
//! | `GET`  | `/health` | Metadata store liveness and pool statistics |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted. Every `OPTIONS`
//! request is answered `204 No Content` before routing.

use anyhow::Context;
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Request, State},
    http::{header, Method, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, patch, post},
    Json, Router,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::Config;
use crate::embedding::{self, Embedder};
use crate::handlers;
use crate::index::{DocumentIndex, ElasticsearchIndex};
use crate::ingest::{IngestQueue, ScriptIngestor};
use crate::query::QueryBuilder;
use crate::registry::TableRegistry;
use crate::{db, migrate};

/// Request-independent settings handlers read on every call.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub request_timeout: Duration,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub max_connections: u32,
}

impl GatewaySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            request_timeout: config.server.request_timeout(),
            upload_dir: config.server.upload_dir.clone(),
            max_upload_bytes: config.server.max_upload_bytes,
            max_connections: config.db.max_connections,
        }
    }
}

/// Shared application state passed to all route handlers via Axum's `State` extractor.
///
/// Every field is either `Arc`-backed or pool-backed, so cloning per request is cheap.
#[derive(Clone)]
pub struct AppState {
    pub registry: TableRegistry,
    pub embedder: Arc<dyn Embedder>,
    pub index: Arc<dyn DocumentIndex>,
    pub queries: Arc<QueryBuilder>,
    pub ingest: IngestQueue,
    pub settings: Arc<GatewaySettings>,
}

impl AppState {
    /// Builds the production collaborators from configuration.
    ///
    /// Must run inside a tokio runtime; the ingestion workers are spawned here.
    pub fn from_config(config: &Config, registry: TableRegistry) -> anyhow::Result<Self> {
        let embedder = embedding::create_embedder(&config.embedding)?;
        info!(
            model = embedder.model_name(),
            dims = embedder.dims(),
            "embedding provider ready"
        );
        let index = ElasticsearchIndex::from_env(&config.index, config.server.request_timeout())?;
        let ingestor = ScriptIngestor::from_config(&config.ingest);
        let ingest = IngestQueue::start(
            Arc::new(ingestor),
            config.ingest.workers,
            config.ingest.queue_capacity,
            config.ingest.job_retention(),
        );

        Ok(Self {
            registry,
            embedder,
            index: Arc::new(index),
            queries: Arc::new(QueryBuilder::from_config(&config.index)),
            ingest,
            settings: Arc::new(GatewaySettings::from_config(config)),
        })
    }
}

/// Assembles the router with CORS, request tracing, and the preflight rule.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let upload_limit = DefaultBodyLimit::max(state.settings.max_upload_bytes);

    Router::new()
        .route("/es/all", get(handlers::list_documents))
        .route("/es/search", get(handlers::search_documents))
        .route("/create_table", post(handlers::create_table))
        .route("/tables", get(handlers::list_tables))
        .route("/table", get(handlers::get_table))
        .route("/table/{id}/visibility", patch(handlers::update_visibility))
        .route("/upload", post(handlers::upload).layer(upload_limit))
        .route("/ingest/{job_id}", get(handlers::ingest_status))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(middleware::from_fn(preflight_no_content))
        .with_state(state)
}

/// Answers every `OPTIONS` request with `204` and an empty body, keeping
/// the CORS headers added further in.
async fn preflight_no_content(req: Request, next: Next) -> Response {
    let is_options = req.method() == Method::OPTIONS;
    let response = next.run(req).await;
    if !is_options {
        return response;
    }

    let (mut parts, _) = response.into_parts();
    parts.status = StatusCode::NO_CONTENT;
    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.remove(header::CONTENT_TYPE);
    Response::from_parts(parts, Body::empty())
}

/// Starts the gateway and serves until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config)
        .await
        .with_context(|| format!("Failed to open database: {}", config.db.path.display()))?;
    migrate::run_migrations(&pool).await?;

    let state = AppState::from_config(config, TableRegistry::new(pool.clone()))?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    info!("gateway listening on http://{}", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.close().await;
    info!("database pool closed: {}", config.db.path.display());
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

// ============ GET /health ============

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub open_connections: u32,
    pub in_use: u32,
    pub idle: u32,
}

/// Handler for `GET /health`.
///
/// Pings the metadata store with a one-second deadline and reports pool
/// statistics. A failed ping answers `503` with `status: "down"`.
async fn handle_health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let pool = state.registry.pool();
    let open = pool.size();
    let idle = u32::try_from(pool.num_idle()).unwrap_or(u32::MAX).min(open);
    let in_use = open - idle;

    let ping = tokio::time::timeout(
        Duration::from_secs(1),
        sqlx::query("SELECT 1").execute(pool),
    )
    .await;

    let failure = match ping {
        Ok(Ok(_)) => None,
        Ok(Err(e)) => Some(format!("db down: {}", e)),
        Err(_) => Some("db down: ping timed out".to_string()),
    };

    if let Some(err) = failure {
        error!("{}", err);
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "down",
                message: "The database is unreachable.".to_string(),
                error: Some(err),
                open_connections: open,
                in_use,
                idle,
            }),
        );
    }

    let message = if heavy_load(open, state.settings.max_connections) {
        "The database is experiencing heavy load."
    } else {
        "It's healthy"
    };

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "up",
            message: message.to_string(),
            error: None,
            open_connections: open,
            in_use,
            idle,
        }),
    )
}

/// More than 80% of the allowed connections are open.
fn heavy_load(open: u32, max_connections: u32) -> bool {
    u64::from(open) * 5 > u64::from(max_connections) * 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heavy_load_threshold() {
        assert!(!heavy_load(0, 5));
        assert!(!heavy_load(4, 5));
        assert!(heavy_load(5, 5));
        assert!(!heavy_load(8, 10));
        assert!(heavy_load(9, 10));
    }

    #[test]
    fn test_heavy_load_large_pool_does_not_overflow() {
        assert!(!heavy_load(u32::MAX / 2, u32::MAX));
        assert!(heavy_load(u32::MAX, u32::MAX));
        assert!(heavy_load(u32::MAX, u32::MAX / 5 + 1));
    }
}

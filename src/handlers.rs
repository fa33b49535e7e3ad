//! Request handlers.
//!
//! Each handler walks the same path: the [`Identity`] extractor
//! authenticates (401 on failure), parameters are validated (400), and then
//! the registry, embedding client, and index are called in turn, each under
//! the configured per-request deadline. Any collaborator error becomes an
//! [`ApiError`] with the matching status.

use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::{JsonRejection, QueryRejection},
        Multipart, Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use std::future::Future;
use std::path::{Component, Path as FsPath};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::auth::{self, Identity};
use crate::embedding::EmbeddingError;
use crate::error::ApiError;
use crate::ingest::{IngestJob, IngestTask};
use crate::models::{
    CreateTableRequest, CreateTableResponse, DocumentHit, DocumentRef, PendingDocument,
    SearchQuery, TableQuery, TableRecord, UploadResponse, VisibilityRequest,
};
use crate::query::TenantScope;
use crate::server::AppState;
use crate::upload;

/// Runs a collaborator call under `limit`, converting its error and
/// reporting expiry as [`ApiError::Timeout`].
pub(crate) async fn with_deadline<T, E, F>(limit: Duration, what: &str, call: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, E>>,
    ApiError: From<E>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(_) => Err(ApiError::Timeout(format!(
            "{} timed out after {}s",
            what,
            limit.as_secs()
        ))),
    }
}

fn required_param(value: Option<String>, name: &str) -> Result<String, ApiError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("Query parameter '{}' is required", name)))
}

fn query_params<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    params
        .map(|Query(p)| p)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e.body_text())))
}

// ============ GET /es/all ============

pub async fn list_documents(
    State(state): State<AppState>,
    identity: Identity,
    params: Result<Query<TableQuery>, QueryRejection>,
) -> Result<Json<Vec<DocumentHit>>, ApiError> {
    let params = query_params(params)?;
    let table_id = required_param(params.table_id, "table_id")?;
    let scope = TenantScope::new(&table_id, &identity)
        .ok_or_else(|| ApiError::BadRequest("Query parameter 'table_id' is required".into()))?;

    let request = state.queries.listing(&scope);
    let results = with_deadline(
        state.settings.request_timeout,
        "document listing",
        state.index.search(&request),
    )
    .await?;

    debug!(table_id = %table_id, hits = results.hits.len(), "listed documents");
    Ok(Json(results.hits))
}

// ============ GET /es/search ============

pub async fn search_documents(
    State(state): State<AppState>,
    identity: Identity,
    params: Result<Query<SearchQuery>, QueryRejection>,
) -> Result<Json<Vec<DocumentHit>>, ApiError> {
    let params = query_params(params)?;
    let query = required_param(params.q, "q")?;
    let table_id = required_param(params.table_id, "table_id")?;
    let scope = TenantScope::new(&table_id, &identity)
        .ok_or_else(|| ApiError::BadRequest("Query parameter 'table_id' is required".into()))?;

    let timeout = state.settings.request_timeout;
    let vector = with_deadline(timeout, "query embedding", state.embedder.embed(&query)).await?;
    if vector.len() != state.embedder.dims() {
        return Err(EmbeddingError::DimensionMismatch {
            expected: state.embedder.dims(),
            actual: vector.len(),
        }
        .into());
    }
    debug!(dims = vector.len(), model = state.embedder.model_name(), "query embedded");

    let request = state.queries.hybrid(&scope, vector);
    let results = with_deadline(timeout, "document search", state.index.search(&request)).await?;

    info!(table_id = %table_id, hits = results.hits.len(), total = ?results.total, "search complete");
    Ok(Json(results.hits))
}

// ============ POST /create_table ============

pub async fn create_table(
    State(state): State<AppState>,
    identity: Identity,
    payload: Result<Json<CreateTableRequest>, JsonRejection>,
) -> Result<Json<CreateTableResponse>, ApiError> {
    let req = json_body(payload)?;
    let table_name = req.table_name.trim();
    if table_name.is_empty() {
        return Err(ApiError::BadRequest("table_name must not be empty".into()));
    }
    for doc in &req.documents {
        check_document_ref(&state.settings.upload_dir, &identity, doc)?;
    }

    let timeout = state.settings.request_timeout;
    let table_id = if req.skip_table_creation {
        with_deadline(
            timeout,
            "table lookup",
            state.registry.find_table_by_name(identity.as_str(), table_name),
        )
        .await?
        .map(|table| table.table_id)
        .ok_or_else(|| ApiError::NotFound("Table not found".into()))?
    } else {
        let table_id = with_deadline(
            timeout,
            "table creation",
            state
                .registry
                .create_table(identity.as_str(), table_name, req.is_public),
        )
        .await?;
        info!(table_id = %table_id, table_name, "created table");
        table_id
    };

    let mut documents = Vec::with_capacity(req.documents.len());
    for doc in req.documents {
        let job: IngestJob = state
            .ingest
            .submit(IngestTask {
                file_path: doc.file_path,
                file_name: doc.file_name,
                owner_id: identity.as_str().to_string(),
                table_id: table_id.clone(),
            })
            .await;
        documents.push(PendingDocument {
            job_id: job.job_id,
            file_name: job.file_name,
            status: job.status,
        });
    }

    Ok(Json(CreateTableResponse {
        table_id,
        documents,
    }))
}

/// Attached files must come from the caller's own upload directory.
fn check_document_ref(
    upload_dir: &FsPath,
    identity: &Identity,
    doc: &DocumentRef,
) -> Result<(), ApiError> {
    let rejected = || {
        ApiError::BadRequest(format!(
            "document '{}' is not one of your uploads",
            doc.file_name
        ))
    };

    let path = FsPath::new(&doc.file_path);
    let climbs = path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::CurDir));

    let own_dir = upload::owner_dir(upload_dir, identity.as_str());
    if doc.file_name.trim().is_empty() || climbs || !path.starts_with(own_dir) {
        return Err(rejected());
    }
    Ok(())
}

// ============ GET /tables ============

pub async fn list_tables(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<Json<Vec<TableRecord>>, ApiError> {
    let tables = with_deadline(
        state.settings.request_timeout,
        "table listing",
        state.registry.list_tables(identity.as_str()),
    )
    .await?;
    Ok(Json(tables))
}

// ============ GET /table ============

pub async fn get_table(
    State(state): State<AppState>,
    identity: Identity,
    params: Result<Query<TableQuery>, QueryRejection>,
) -> Result<Json<TableRecord>, ApiError> {
    let params = query_params(params)?;
    let table_id = required_param(params.table_id, "table_id")?;

    let table = with_deadline(
        state.settings.request_timeout,
        "table lookup",
        state.registry.get_table_by_id(&table_id),
    )
    .await?
    .filter(|table| auth::authorize(&identity, table))
    .ok_or_else(|| ApiError::NotFound("Table not found".into()))?;

    Ok(Json(table))
}

// ============ PATCH /table/{id}/visibility ============

pub async fn update_visibility(
    State(state): State<AppState>,
    identity: Identity,
    Path(table_id): Path<String>,
    payload: Result<Json<VisibilityRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let req = json_body(payload)?;
    let timeout = state.settings.request_timeout;

    let table = with_deadline(
        timeout,
        "table lookup",
        state.registry.get_table_by_id(&table_id),
    )
    .await?
    .filter(|table| auth::authorize(&identity, table))
    .ok_or_else(|| ApiError::NotFound("Table not found".into()))?;

    if !auth::is_owner(&identity, &table) {
        return Err(ApiError::Forbidden(
            "Only the table owner can change its visibility".into(),
        ));
    }

    with_deadline(
        timeout,
        "visibility update",
        state.registry.set_visibility(&table_id, req.is_public),
    )
    .await?;

    info!(table_id = %table_id, is_public = req.is_public, "updated table visibility");
    Ok(StatusCode::OK)
}

// ============ POST /upload ============

pub async fn upload(
    State(state): State<AppState>,
    identity: Identity,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut multipart = multipart
        .map_err(|e| ApiError::BadRequest(format!("Failed to parse form: {}", e.body_text())))?;

    loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to parse form: {}", e.body_text())))?
            .ok_or_else(|| ApiError::BadRequest("Failed to get file from form".into()))?;

        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        let dest = upload::upload_path(&state.settings.upload_dir, identity.as_str(), &file_name)
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;

        let size = upload::store_field(&dest, field).await.map_err(|e| match e {
            upload::UploadError::Io(_) => ApiError::Internal(e.to_string()),
            _ => ApiError::BadRequest(e.to_string()),
        })?;

        let file_path = dest.to_string_lossy().into_owned();
        info!(file = %file_path, bytes = size, "stored upload");
        return Ok(Json(UploadResponse { file_path }));
    }
}

// ============ GET /ingest/{job_id} ============

pub async fn ingest_status(
    State(state): State<AppState>,
    identity: Identity,
    Path(job_id): Path<String>,
) -> Result<Json<IngestJob>, ApiError> {
    let job = state
        .ingest
        .status(&job_id)
        .await
        .filter(|job| job.owner_id == identity.as_str())
        .ok_or_else(|| {
            warn!(job_id = %job_id, "ingest status requested for unknown job");
            ApiError::NotFound("Ingestion job not found".into())
        })?;
    Ok(Json(job))
}

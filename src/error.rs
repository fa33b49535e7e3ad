//! HTTP error taxonomy.
//!
//! Every failure a handler can produce is an [`ApiError`]. Collaborator
//! errors convert into the nearest transport outcome, and every response
//! carries the same JSON body:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "Query parameter 'q' is required" } }
//! ```
//!
//! | Variant | Status | Code |
//! |---------|--------|------|
//! | `Unauthenticated` | 401 | `unauthenticated` |
//! | `BadRequest` | 400 | `bad_request` |
//! | `Forbidden` | 403 | `forbidden` |
//! | `NotFound` | 404 | `not_found` |
//! | `Conflict` | 409 | `conflict` |
//! | `Upstream` | 500 | `upstream_error` |
//! | `Configuration` | 500 | `configuration_error` |
//! | `Timeout` | 500 | `timeout` |
//! | `Internal` | 500 | `internal` |

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::auth::AuthError;
use crate::embedding::EmbeddingError;
use crate::index::IndexError;
use crate::registry::RegistryError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid or missing Authorization header: {0}")]
    Unauthenticated(#[from] AuthError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    Configuration(String),

    #[error("{0}")]
    Timeout(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Upstream(_)
            | ApiError::Configuration(_)
            | ApiError::Timeout(_)
            | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated(_) => "unauthenticated",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::Upstream(_) => "upstream_error",
            ApiError::Configuration(_) => "configuration_error",
            ApiError::Timeout(_) => "timeout",
            ApiError::Internal(_) => "internal",
        }
    }
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.code(), "{}", self);
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Conflict(_) => ApiError::Conflict(err.to_string()),
            RegistryError::NotFound(_) => ApiError::NotFound("Table not found".to_string()),
            RegistryError::Database(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<EmbeddingError> for ApiError {
    fn from(err: EmbeddingError) -> Self {
        let message = format!("Failed to process query: {}", err);
        match err {
            EmbeddingError::EmptyInput => ApiError::BadRequest(message),
            EmbeddingError::Configuration(_) => ApiError::Configuration(message),
            EmbeddingError::Timeout => ApiError::Timeout(message),
            EmbeddingError::Upstream(_)
            | EmbeddingError::EmptyResult
            | EmbeddingError::DimensionMismatch { .. } => ApiError::Upstream(message),
        }
    }
}

impl From<IndexError> for ApiError {
    fn from(err: IndexError) -> Self {
        let message = format!("Failed to search documents: {}", err);
        match err {
            IndexError::Configuration(_) => ApiError::Configuration(message),
            IndexError::Timeout => ApiError::Timeout(message),
            IndexError::Upstream(_) | IndexError::Decode(_) => ApiError::Upstream(message),
        }
    }
}

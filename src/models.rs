//! Core data models used throughout the gateway.
//!
//! These types describe the table registry rows, the request and response
//! bodies of the HTTP surface, and the document hits returned by the index.

use serde::{Deserialize, Serialize};

use crate::ingest::JobStatus;

/// A named, owner-scoped, visibility-flagged document collection.
///
/// Serializes to the public wire shape `{table_id, table_name, public}`;
/// the owner is never echoed back to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableRecord {
    pub table_id: String,
    #[serde(skip_serializing)]
    pub owner_id: String,
    pub table_name: String,
    #[serde(rename = "public")]
    pub is_public: bool,
}

/// A document hit as returned by the index, projected to
/// `properties` and `text_representation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentHit {
    #[serde(rename = "_index", default)]
    pub index: String,
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_score", default)]
    pub score: Option<f64>,
    #[serde(rename = "_source", default)]
    pub source: HitSource,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HitSource {
    #[serde(default)]
    pub properties: serde_json::Value,
    #[serde(default)]
    pub text_representation: Option<String>,
}

/// Reference to a previously uploaded file, attached to a table at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub file_path: String,
    pub file_name: String,
}

/// Body of `POST /create_table`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateTableRequest {
    #[serde(default)]
    pub table_name: String,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub documents: Vec<DocumentRef>,
    #[serde(default)]
    pub skip_table_creation: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTableResponse {
    pub table_id: String,
    pub documents: Vec<PendingDocument>,
}

/// Per-document acknowledgement returned before ingestion runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingDocument {
    pub job_id: String,
    pub file_name: String,
    pub status: JobStatus,
}

/// Body of `PATCH /table/{id}/visibility`.
#[derive(Debug, Clone, Deserialize)]
pub struct VisibilityRequest {
    pub is_public: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub file_path: String,
}

/// Query string for `/es/all` and `/table`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TableQuery {
    pub table_id: Option<String>,
}

/// Query string for `/es/search`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub table_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_record_wire_shape_hides_owner() {
        let record = TableRecord {
            table_id: "t1".to_string(),
            owner_id: "u1".to_string(),
            table_name: "Notes".to_string(),
            is_public: false,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"table_id": "t1", "table_name": "Notes", "public": false})
        );
    }

    #[test]
    fn test_create_table_request_defaults() {
        let req: CreateTableRequest = serde_json::from_str(r#"{"table_name": "Notes"}"#).unwrap();
        assert_eq!(req.table_name, "Notes");
        assert!(!req.is_public);
        assert!(req.documents.is_empty());
        assert!(!req.skip_table_creation);
    }

    #[test]
    fn test_hit_tolerates_missing_score_and_text() {
        let hit: DocumentHit =
            serde_json::from_str(r#"{"_index": "docs", "_id": "1", "_source": {"properties": {}}}"#)
                .unwrap();
        assert_eq!(hit.score, None);
        assert_eq!(hit.source.text_representation, None);
    }
}

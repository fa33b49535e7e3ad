//! Index query construction.
//!
//! Two shapes are produced, both as immutable [`SearchRequest`] values that
//! serialize to the index's JSON search body:
//!
//! - **Listing**: a boolean filter on the table and owner tags, page size
//!   `index.list_size`, projected to `properties` and `text_representation`.
//! - **Hybrid**: a `knn` clause over the vector field with `k` /
//!   `num_candidates`, whose `filter` carries the same tag filter so the
//!   neighbours are drawn only from the caller's table.
//!
//! Both require a [`TenantScope`]; there is no way to build an unscoped
//! query. Retries are the caller's concern.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::auth::Identity;
use crate::config::IndexConfig;
use crate::embedding::QueryVector;

/// Source fields returned for every hit.
pub const SOURCE_FIELDS: [&str; 2] = ["properties", "text_representation"];

/// The owner/table pair every query is confined to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantScope {
    table_id: String,
    owner_id: String,
}

impl TenantScope {
    /// Returns `None` when `table_id` is blank.
    pub fn new(table_id: &str, owner: &Identity) -> Option<Self> {
        let table_id = table_id.trim();
        if table_id.is_empty() {
            return None;
        }
        Some(Self {
            table_id: table_id.to_string(),
            owner_id: owner.as_str().to_string(),
        })
    }

    pub fn table_id(&self) -> &str {
        &self.table_id
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    query: Option<Query>,
    #[serde(skip_serializing_if = "Option::is_none")]
    knn: Option<KnnClause>,
    #[serde(rename = "_source")]
    source: Vec<&'static str>,
    size: usize,
    track_total_hits: bool,
}

impl SearchRequest {
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_hybrid(&self) -> bool {
        self.knn.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Query {
    #[serde(rename = "bool")]
    boolean: BoolQuery,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct BoolQuery {
    filter: Vec<TermFilter>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct TermFilter {
    term: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct KnnClause {
    field: String,
    query_vector: QueryVector,
    k: usize,
    num_candidates: usize,
    filter: Query,
}

/// Builds listing and hybrid queries with fixed, configured bounds.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    table_field: String,
    owner_field: String,
    vector_field: String,
    list_size: usize,
    k: usize,
    num_candidates: usize,
}

impl QueryBuilder {
    pub fn from_config(config: &IndexConfig) -> Self {
        Self {
            table_field: config.table_field.clone(),
            owner_field: config.owner_field.clone(),
            vector_field: config.vector_field.clone(),
            list_size: config.list_size,
            k: config.knn_k,
            num_candidates: config.knn_num_candidates,
        }
    }

    pub fn listing(&self, scope: &TenantScope) -> SearchRequest {
        SearchRequest {
            query: Some(self.tenant_filter(scope)),
            knn: None,
            source: SOURCE_FIELDS.to_vec(),
            size: self.list_size,
            track_total_hits: true,
        }
    }

    pub fn hybrid(&self, scope: &TenantScope, vector: QueryVector) -> SearchRequest {
        SearchRequest {
            query: None,
            knn: Some(KnnClause {
                field: self.vector_field.clone(),
                query_vector: vector,
                k: self.k,
                num_candidates: self.num_candidates,
                filter: self.tenant_filter(scope),
            }),
            source: SOURCE_FIELDS.to_vec(),
            size: self.k,
            track_total_hits: true,
        }
    }

    fn tenant_filter(&self, scope: &TenantScope) -> Query {
        let term = |field: &str, value: &str| TermFilter {
            term: BTreeMap::from([(field.to_string(), value.to_string())]),
        };
        Query {
            boolean: BoolQuery {
                filter: vec![
                    term(&self.table_field, &scope.table_id),
                    term(&self.owner_field, &scope.owner_id),
                ],
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use serde_json::{json, Value};

    fn builder() -> QueryBuilder {
        let config = parse_config(
            "[db]\npath = \"x\"\n[server]\nbind = \"127.0.0.1:0\"\n[index]\nurl = \"http://localhost:9200\"\n",
        )
        .unwrap();
        QueryBuilder::from_config(&config.index)
    }

    fn scope(table: &str, owner: &str) -> TenantScope {
        TenantScope::new(table, &Identity::new(owner).unwrap()).unwrap()
    }

    /// Applies the serialized term filters to a flat tag map, the way the
    /// index evaluates an exact-match filter.
    fn admits(filter: &Value, tags: &BTreeMap<&str, &str>) -> bool {
        filter["bool"]["filter"]
            .as_array()
            .unwrap()
            .iter()
            .all(|clause| {
                clause["term"]
                    .as_object()
                    .unwrap()
                    .iter()
                    .all(|(field, value)| tags.get(field.as_str()) == value.as_str().as_ref())
            })
    }

    #[test]
    fn test_blank_table_id_has_no_scope() {
        let owner = Identity::new("u1").unwrap();
        assert!(TenantScope::new("", &owner).is_none());
        assert!(TenantScope::new("  ", &owner).is_none());
    }

    #[test]
    fn test_listing_shape() {
        let req = builder().listing(&scope("T", "U"));
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            json!({
                "query": {"bool": {"filter": [
                    {"term": {"properties.properties.table_id.keyword": "T"}},
                    {"term": {"properties.properties.user_id.keyword": "U"}}
                ]}},
                "_source": ["properties", "text_representation"],
                "size": 1000,
                "track_total_hits": true
            })
        );
        assert!(!req.is_hybrid());
    }

    #[test]
    fn test_hybrid_shape() {
        let req = builder().hybrid(&scope("T", "U"), vec![0.25; 1536]);
        let json = serde_json::to_value(&req).unwrap();
        let knn = &json["knn"];
        assert_eq!(knn["field"], "embedding");
        assert_eq!(knn["k"], 10);
        assert_eq!(knn["num_candidates"], 100);
        assert_eq!(knn["query_vector"].as_array().unwrap().len(), 1536);
        assert_eq!(
            knn["filter"]["bool"]["filter"][0]["term"]["properties.properties.table_id.keyword"],
            "T"
        );
        assert_eq!(
            knn["filter"]["bool"]["filter"][1]["term"]["properties.properties.user_id.keyword"],
            "U"
        );
        assert!(json.get("query").is_none());
        assert_eq!(json["size"], 10);
        assert!(req.is_hybrid());
    }

    #[test]
    fn test_listing_filter_isolates_tenant() {
        let req = builder().listing(&scope("T", "U"));
        let json = serde_json::to_value(&req).unwrap();
        let filter = &json["query"];

        let table_field = "properties.properties.table_id.keyword";
        let owner_field = "properties.properties.user_id.keyword";
        let corpus = [("T", "U", true), ("T", "V", false), ("S", "U", false), ("S", "V", false)];

        for (table, owner, expected) in corpus {
            let tags = BTreeMap::from([(table_field, table), (owner_field, owner)]);
            assert_eq!(admits(filter, &tags), expected, "table={} owner={}", table, owner);
        }

        // Untagged documents never match
        assert!(!admits(filter, &BTreeMap::new()));
    }

    #[test]
    fn test_requests_are_deterministic() {
        let b = builder();
        let s = scope("T", "U");
        assert_eq!(b.listing(&s), b.listing(&s));
        assert_eq!(b.hybrid(&s, vec![1.0, 2.0]), b.hybrid(&s, vec![1.0, 2.0]));
    }
}

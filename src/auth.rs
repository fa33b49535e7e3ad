//! Request identity and table visibility rules.
//!
//! The caller's identity is the raw value of an `Authorization: Bearer <token>`
//! header. No signature or expiry is checked: any non-empty token is an
//! identity, and that identity is the tenant key for every table and
//! document access.
//!
//! Handlers take an [`Identity`] argument to require authentication; the
//! extractor rejects the request with 401 before the handler body runs.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use thiserror::Error;

use crate::error::ApiError;
use crate::models::TableRecord;

const BEARER_PREFIX: &str = "Bearer ";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing Authorization header")]
    MissingHeader,

    #[error("Authorization header must use the Bearer scheme")]
    MalformedScheme,

    #[error("bearer token is empty")]
    EmptyToken,
}

/// Opaque tenant key derived from a bearer credential. Never empty.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            None
        } else {
            Some(Self(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// The identity is the credential itself, so keep it out of logs.
impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Identity(..)")
    }
}

/// Parses an `Authorization` header value.
pub fn parse_bearer(value: &str) -> Result<Identity, AuthError> {
    let token = value
        .strip_prefix(BEARER_PREFIX)
        .ok_or(AuthError::MalformedScheme)?;
    Identity::new(token).ok_or(AuthError::EmptyToken)
}

pub fn resolve_identity(headers: &HeaderMap) -> Result<Identity, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingHeader)?
        .to_str()
        .map_err(|_| AuthError::MalformedScheme)?;
    parse_bearer(value)
}

/// A table is visible to its owner and, when public, to everyone.
pub fn authorize(identity: &Identity, table: &TableRecord) -> bool {
    is_owner(identity, table) || table.is_public
}

/// Mutations are owner-only; public visibility grants read access only.
pub fn is_owner(identity: &Identity, table: &TableRecord) -> bool {
    table.owner_id == identity.0
}

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        resolve_identity(&parts.headers).map_err(ApiError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn table(owner: &str, is_public: bool) -> TableRecord {
        TableRecord {
            table_id: "t1".to_string(),
            owner_id: owner.to_string(),
            table_name: "Notes".to_string(),
            is_public,
        }
    }

    #[test]
    fn test_parse_bearer_accepts_any_token() {
        assert_eq!(parse_bearer("Bearer u1").unwrap().as_str(), "u1");
        assert_eq!(
            parse_bearer("Bearer someone@example.com").unwrap().as_str(),
            "someone@example.com"
        );
    }

    #[test]
    fn test_parse_bearer_rejections() {
        assert_eq!(parse_bearer("").unwrap_err(), AuthError::MalformedScheme);
        assert_eq!(parse_bearer("u1").unwrap_err(), AuthError::MalformedScheme);
        assert_eq!(parse_bearer("Basic dTE6cA==").unwrap_err(), AuthError::MalformedScheme);
        assert_eq!(parse_bearer("bearer u1").unwrap_err(), AuthError::MalformedScheme);
        assert_eq!(parse_bearer("Bearer ").unwrap_err(), AuthError::EmptyToken);
        assert_eq!(parse_bearer("Bearer    ").unwrap_err(), AuthError::EmptyToken);
    }

    #[test]
    fn test_resolve_identity_from_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(resolve_identity(&headers).unwrap_err(), AuthError::MissingHeader);

        headers.insert(AUTHORIZATION, HeaderValue::from_static(""));
        assert_eq!(resolve_identity(&headers).unwrap_err(), AuthError::MalformedScheme);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer u1"));
        assert_eq!(resolve_identity(&headers).unwrap().as_str(), "u1");
    }

    #[test]
    fn test_authorize_owner_or_public() {
        let u1 = Identity::new("u1").unwrap();
        let u2 = Identity::new("u2").unwrap();

        assert!(authorize(&u1, &table("u1", false)));
        assert!(!authorize(&u2, &table("u1", false)));
        assert!(authorize(&u2, &table("u1", true)));
    }

    #[test]
    fn test_public_does_not_grant_ownership() {
        let u2 = Identity::new("u2").unwrap();
        assert!(!is_owner(&u2, &table("u1", true)));
        assert!(is_owner(&Identity::new("u1").unwrap(), &table("u1", false)));
    }

    #[test]
    fn test_identity_debug_hides_token() {
        let id = Identity::new("secret-token").unwrap();
        assert!(!format!("{:?}", id).contains("secret"));
    }
}

//! Contract with the remote vector-search service.
//!
//! [`RemoteClient`] is the pure operation set the rest of the crate is
//! written against; [`http::HttpClient`] implements it over HTTP. Tests
//! substitute their own implementations.
//!
//! Two properties of the service are load-bearing for the buffer design:
//! upserts are **idempotent on id** (re-sending a batch after an
//! indeterminate response is safe), and vectors become searchable in
//! insertion order (which is what makes a fetched checkpoint
//! representative a proof that everything older is searchable too).

pub mod filter;
pub mod http;

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::id::HeapRef;
use crate::vector::{Metric, is_zero_vector};

pub use filter::{FilterOp, ScanKey, build_filter};

/// How a remote request failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// The service answered with a non-success status.
    Api,
    /// The service refused the request as unauthorized.
    Unauthorized,
    /// An index with the requested name already exists.
    AlreadyExists,
    /// The creation spec was rejected.
    InvalidSpec,
    /// The request never completed (connection, TLS, cancellation).
    Transport,
    /// The request timed out.
    Timeout,
    /// The response body was not the JSON shape the contract promises.
    Malformed,
}

impl std::fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RemoteErrorKind::Api => "api",
            RemoteErrorKind::Unauthorized => "unauthorized",
            RemoteErrorKind::AlreadyExists => "already-exists",
            RemoteErrorKind::InvalidSpec => "invalid-spec",
            RemoteErrorKind::Transport => "transport",
            RemoteErrorKind::Timeout => "timeout",
            RemoteErrorKind::Malformed => "malformed",
        };
        f.write_str(name)
    }
}

/// A failed remote operation, with enough context to diagnose it without
/// ever dumping a full response body into logs.
#[derive(Debug, Error, Diagnostic)]
#[error("remote {kind} error{}", self.detail())]
#[diagnostic(code(remora::remote::request_failed))]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub http_status: Option<u16>,
    pub body_excerpt: Option<String>,
}

impl RemoteError {
    #[must_use]
    pub fn new(kind: RemoteErrorKind) -> Self {
        Self {
            kind,
            http_status: None,
            body_excerpt: None,
        }
    }

    fn detail(&self) -> String {
        let mut out = String::new();
        if let Some(status) = self.http_status {
            out.push_str(&format!(" (http {status})"));
        }
        if let Some(body) = &self.body_excerpt {
            out.push_str(&format!(": {body}"));
        }
        out
    }

    /// A batch whose response was indeterminate must be treated as not
    /// applied; the flusher retries it because upserts are idempotent.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            RemoteErrorKind::Transport | RemoteErrorKind::Timeout | RemoteErrorKind::Api
        )
    }
}

/// Scalar metadata attached to a vector: the non-vector indexed columns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Float(f64),
    Text(String),
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::Text(v.to_string())
    }
}

/// One vector as the remote service stores it.
#[derive(Clone, Debug, Serialize)]
pub struct RemoteVector {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: BTreeMap<String, MetadataValue>,
}

impl RemoteVector {
    /// Build the payload for one row. Rejects the all-zero vector, which
    /// the service refuses for every metric.
    pub fn new(
        heap_ref: HeapRef,
        values: Vec<f32>,
        metadata: BTreeMap<String, MetadataValue>,
    ) -> Result<Self, ZeroVector> {
        if is_zero_vector(&values) {
            return Err(ZeroVector { heap_ref });
        }
        Ok(Self {
            id: heap_ref.vector_id(),
            values,
            metadata,
        })
    }
}

/// Insert of an all-zero vector, refused before anything reaches the
/// buffer or the service.
#[derive(Debug, Error, Diagnostic)]
#[error("zero vector at {heap_ref}")]
#[diagnostic(
    code(remora::remote::zero_vector),
    help("the remote service rejects dense vectors that are zero in every dimension")
)]
pub struct ZeroVector {
    pub heap_ref: HeapRef,
}

/// One scored match from a query.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct QueryMatch {
    pub id: String,
    pub score: f64,
}

/// Control-plane status of a remote index.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct IndexStatus {
    pub ready: bool,
    pub host: Option<String>,
}

/// The operations the crate needs from the remote service.
///
/// Implementations hold no state beyond a pooled HTTP client and the API
/// key. All operations apply the configured per-request timeout;
/// dropping a returned future cancels the request.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Create a remote index and return its data-plane host.
    async fn create_index(
        &self,
        name: &str,
        dimensions: u32,
        metric: Metric,
        spec: &serde_json::Value,
    ) -> Result<String, RemoteError>;

    /// Describe an index by name.
    async fn describe_index(&self, name: &str) -> Result<IndexStatus, RemoteError>;

    /// List the names of all remote indexes.
    async fn list_indexes(&self) -> Result<Vec<String>, RemoteError>;

    /// Delete a remote index by name.
    async fn delete_index(&self, name: &str) -> Result<(), RemoteError>;

    /// Upsert a batch of vectors, idempotently on id. Implementations may
    /// split the batch into pipelined requests; the batch succeeded only
    /// if every request did.
    async fn upsert_batch(&self, host: &str, vectors: &[RemoteVector]) -> Result<(), RemoteError>;

    /// Top-k similarity query. Matches arrive best-first in the service's
    /// score order.
    async fn query(
        &self,
        host: &str,
        top_k: u32,
        vector: &[f32],
        filter: &serde_json::Value,
    ) -> Result<Vec<QueryMatch>, RemoteError>;

    /// Fetch by id, returning the subset of `ids` the service has
    /// indexed.
    async fn fetch_by_ids(
        &self,
        host: &str,
        ids: &[String],
    ) -> Result<FxHashSet<String>, RemoteError>;

    /// Delete every vector in the index.
    async fn delete_all(&self, host: &str) -> Result<(), RemoteError>;

    /// Delete the given vector ids.
    async fn delete_ids(&self, host: &str, ids: &[String]) -> Result<(), RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_vector_rejects_zero() {
        let err = RemoteVector::new(HeapRef::new(0, 1), vec![0.0, 0.0], BTreeMap::new())
            .unwrap_err();
        assert_eq!(err.heap_ref, HeapRef::new(0, 1));
    }

    #[test]
    fn remote_vector_serializes_wire_shape() {
        let mut metadata = BTreeMap::new();
        metadata.insert("live".to_string(), MetadataValue::Bool(true));
        metadata.insert("price".to_string(), MetadataValue::Float(9.5));
        let vector = RemoteVector::new(HeapRef::new(1, 2), vec![0.5, 0.25], metadata).unwrap();
        let json = serde_json::to_value(&vector).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": "000000010002",
                "values": [0.5, 0.25],
                "metadata": {"live": true, "price": 9.5}
            })
        );
    }

    #[test]
    fn error_display_includes_status_and_excerpt() {
        let err = RemoteError {
            kind: RemoteErrorKind::Api,
            http_status: Some(500),
            body_excerpt: Some("boom".into()),
        };
        assert_eq!(err.to_string(), "remote api error (http 500): boom");
    }
}

//! HTTP implementation of the [`RemoteClient`] contract.
//!
//! Control-plane calls (create/describe/list/delete index) go to the
//! configured control URL; data-plane calls go straight to the index
//! host. Batched upserts are split into `vectors_per_request`-sized
//! requests pipelined `requests_per_batch` wide; each request owns its
//! response, and dropping the batch future cancels everything in flight.

use futures_util::{StreamExt, TryStreamExt, stream};
use reqwest::{Method, StatusCode};
use rustc_hash::FxHashSet;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::config::Config;
use crate::remote::{
    IndexStatus, QueryMatch, RemoteClient, RemoteError, RemoteErrorKind, RemoteVector,
};
use crate::vector::Metric;

/// Longest response-body excerpt carried inside a [`RemoteError`].
const BODY_EXCERPT_MAX: usize = 200;

/// Pooled HTTP client for the remote service.
pub struct HttpClient {
    http: reqwest::Client,
    api_key: String,
    control_url: Option<String>,
    vectors_per_request: usize,
    requests_per_batch: usize,
}

impl HttpClient {
    /// Build a client from the process configuration. The underlying
    /// connection pool is shared by every clone of the inner client.
    pub fn new(config: &Config) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| transport_error(&e))?;
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            control_url: config
                .control_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
            vectors_per_request: config.vectors_per_request as usize,
            requests_per_batch: config.requests_per_batch as usize,
        })
    }

    fn control_url(&self) -> Result<&str, RemoteError> {
        self.control_url.as_deref().ok_or_else(|| RemoteError {
            kind: RemoteErrorKind::Transport,
            http_status: None,
            body_excerpt: Some("control url not configured".into()),
        })
    }

    fn data_url(host: &str, path: &str) -> String {
        if host.starts_with("http://") || host.starts_with("https://") {
            format!("{host}{path}")
        } else {
            format!("https://{host}{path}")
        }
    }

    async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, RemoteError> {
        let mut request = self
            .http
            .request(method, url)
            .header("Api-Key", &self.api_key)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(|e| transport_error(&e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        tracing::debug!(%url, %status, "remote request failed: {}", excerpt(&body));
        Err(RemoteError {
            kind: kind_for_status(status),
            http_status: Some(status.as_u16()),
            body_excerpt: Some(excerpt(&body)),
        })
    }

    async fn parse<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, RemoteError> {
        response.json::<T>().await.map_err(|e| RemoteError {
            kind: RemoteErrorKind::Malformed,
            http_status: None,
            body_excerpt: Some(excerpt(&e.to_string())),
        })
    }

    async fn send_upsert(&self, host: &str, chunk: &[RemoteVector]) -> Result<(), RemoteError> {
        let url = Self::data_url(host, "/vectors/upsert");
        let body = json!({ "vectors": chunk });
        self.request(Method::POST, &url, Some(&body)).await?;
        Ok(())
    }
}

fn excerpt(text: &str) -> String {
    text.chars().take(BODY_EXCERPT_MAX).collect()
}

fn transport_error(error: &reqwest::Error) -> RemoteError {
    RemoteError {
        kind: if error.is_timeout() {
            RemoteErrorKind::Timeout
        } else {
            RemoteErrorKind::Transport
        },
        http_status: error.status().map(|s| s.as_u16()),
        body_excerpt: Some(excerpt(&error.to_string())),
    }
}

fn kind_for_status(status: StatusCode) -> RemoteErrorKind {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteErrorKind::Unauthorized,
        StatusCode::CONFLICT => RemoteErrorKind::AlreadyExists,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => RemoteErrorKind::InvalidSpec,
        _ => RemoteErrorKind::Api,
    }
}

#[derive(Deserialize)]
struct CreateIndexResponse {
    host: String,
}

#[derive(Deserialize)]
struct DescribeStatus {
    ready: bool,
}

#[derive(Deserialize)]
struct DescribeResponse {
    host: Option<String>,
    status: DescribeStatus,
}

#[derive(Deserialize)]
struct IndexEntry {
    name: String,
}

#[derive(Deserialize)]
struct ListIndexesResponse {
    indexes: Vec<IndexEntry>,
}

#[derive(Deserialize)]
struct QueryResponse {
    matches: Vec<QueryMatch>,
}

#[derive(Deserialize)]
struct FetchResponse {
    vectors: serde_json::Map<String, serde_json::Value>,
}

#[async_trait::async_trait]
impl RemoteClient for HttpClient {
    async fn create_index(
        &self,
        name: &str,
        dimensions: u32,
        metric: Metric,
        spec: &serde_json::Value,
    ) -> Result<String, RemoteError> {
        let url = format!("{}/indexes", self.control_url()?);
        let body = json!({
            "name": name,
            "dimension": dimensions,
            "metric": metric.remote_name(),
            "spec": spec,
        });
        let response = self.request(Method::POST, &url, Some(&body)).await?;
        let created: CreateIndexResponse = Self::parse(response).await?;
        Ok(created.host)
    }

    async fn describe_index(&self, name: &str) -> Result<IndexStatus, RemoteError> {
        let url = format!("{}/indexes/{name}", self.control_url()?);
        let response = self.request(Method::GET, &url, None).await?;
        let described: DescribeResponse = Self::parse(response).await?;
        Ok(IndexStatus {
            ready: described.status.ready,
            host: described.host,
        })
    }

    async fn list_indexes(&self) -> Result<Vec<String>, RemoteError> {
        let url = format!("{}/indexes", self.control_url()?);
        let response = self.request(Method::GET, &url, None).await?;
        let listed: ListIndexesResponse = Self::parse(response).await?;
        Ok(listed.indexes.into_iter().map(|e| e.name).collect())
    }

    async fn delete_index(&self, name: &str) -> Result<(), RemoteError> {
        let url = format!("{}/indexes/{name}", self.control_url()?);
        self.request(Method::DELETE, &url, None).await?;
        Ok(())
    }

    async fn upsert_batch(&self, host: &str, vectors: &[RemoteVector]) -> Result<(), RemoteError> {
        if vectors.is_empty() {
            return Ok(());
        }
        tracing::debug!(
            host,
            vectors = vectors.len(),
            requests = vectors.len().div_ceil(self.vectors_per_request),
            "upserting batch"
        );
        let futures: Vec<_> = vectors
            .chunks(self.vectors_per_request)
            .map(|chunk| self.send_upsert(host, chunk))
            .collect();
        stream::iter(futures)
            .buffer_unordered(self.requests_per_batch)
            .try_collect::<Vec<()>>()
            .await?;
        Ok(())
    }

    async fn query(
        &self,
        host: &str,
        top_k: u32,
        vector: &[f32],
        filter: &serde_json::Value,
    ) -> Result<Vec<QueryMatch>, RemoteError> {
        let url = Self::data_url(host, "/query");
        let body = json!({
            "topK": top_k,
            "vector": vector,
            "filter": filter,
            "includeValues": false,
            "includeMetadata": false,
        });
        tracing::debug!(host, top_k, "querying remote index");
        let response = self.request(Method::POST, &url, Some(&body)).await?;
        let parsed: QueryResponse = Self::parse(response).await?;
        Ok(parsed.matches)
    }

    async fn fetch_by_ids(
        &self,
        host: &str,
        ids: &[String],
    ) -> Result<FxHashSet<String>, RemoteError> {
        if ids.is_empty() {
            return Ok(FxHashSet::default());
        }
        let mut url = Url::parse(&Self::data_url(host, "/vectors/fetch")).map_err(|e| {
            RemoteError {
                kind: RemoteErrorKind::Transport,
                http_status: None,
                body_excerpt: Some(excerpt(&e.to_string())),
            }
        })?;
        url.query_pairs_mut()
            .extend_pairs(ids.iter().map(|id| ("ids", id)));
        let response = self.request(Method::GET, url.as_str(), None).await?;
        let fetched: FetchResponse = Self::parse(response).await?;
        Ok(fetched.vectors.into_iter().map(|(id, _)| id).collect())
    }

    async fn delete_all(&self, host: &str) -> Result<(), RemoteError> {
        let url = Self::data_url(host, "/vectors/delete");
        let body = json!({ "deleteAll": true });
        self.request(Method::POST, &url, Some(&body)).await?;
        Ok(())
    }

    async fn delete_ids(&self, host: &str, ids: &[String]) -> Result<(), RemoteError> {
        let url = Self::data_url(host, "/vectors/delete");
        let body = json!({ "ids": ids });
        self.request(Method::POST, &url, Some(&body)).await?;
        Ok(())
    }
}

//! HTTP implementation of the graph store client.
//!
//! Thin gateway over the store's REST surface: namespace-scoped endpoints,
//! optional bearer auth, a per-call timeout, and bounded exponential backoff
//! on transport failures. 4xx responses are terminal immediately; transport
//! errors and 5xx responses are retried up to the configured limit.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::error::{EdgeFailure, Error, Result};
use crate::model::{EdgeDraft, NodeDraft, NodeKind, RelatedArtifact, SearchFilters, SearchHit};

use super::{sort_hits, GraphStore};

pub struct HttpGraphStore {
    http: Client,
    config: StoreConfig,
}

#[derive(Debug, Deserialize)]
struct NodeWriteResponse {
    node_id: String,
}

#[derive(Debug, Serialize)]
struct SearchRequestBody<'a> {
    vector: &'a [f32],
    top_k: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    filters: Option<&'a SearchFilters>,
}

#[derive(Debug, Deserialize)]
struct SearchResponseBody {
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct NeighborResponseBody {
    neighbors: Vec<RelatedArtifact>,
}

#[derive(Debug, Serialize)]
struct HashLookupBody<'a> {
    payload_hash: &'a str,
}

#[derive(Debug, Deserialize)]
struct HashLookupResponse {
    #[serde(default)]
    node_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct DeleteByNameBody<'a> {
    kind: NodeKind,
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct DeleteByNameResponse {
    deleted: u64,
}

impl HttpGraphStore {
    pub fn new(config: StoreConfig) -> Result<Self> {
        let timeout = Duration::from_millis(config.http_timeout_ms.max(1));
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build store HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    fn endpoint(&self, path: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        format!(
            "{}/api/v1/namespaces/{}/{}",
            base,
            self.config.namespace,
            path.trim_start_matches('/')
        )
    }

    fn apply_auth(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Doubling backoff delay for the given attempt (1-based), saturating
    /// instead of overflowing for absurd retry configurations.
    fn backoff_delay_ms(&self, attempt: u32) -> u64 {
        self.config
            .retry_base_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
    }

    /// Send a request with bounded exponential backoff, parsing the JSON
    /// response body on success.
    async fn execute<R, F>(&self, operation: &str, build: F) -> Result<R>
    where
        R: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let body = self.execute_raw(operation, build).await?;
        serde_json::from_str(&body).map_err(|e| {
            Error::network(
                operation,
                1,
                format!("Failed to deserialize response: {}", e),
            )
        })
    }

    async fn execute_raw<F>(&self, operation: &str, build: F) -> Result<String>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = self.backoff_delay_ms(attempt);
                debug!(operation, attempt, delay_ms = delay, "Retrying store call");
                sleep(Duration::from_millis(delay)).await;
            }

            let response = match self.apply_auth(build()).send().await {
                Ok(response) => response,
                Err(e) => {
                    last_error = Some(format!("transport error: {}", e));
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                return response.text().await.map_err(|e| {
                    Error::network(operation, attempt + 1, format!("body read failed: {}", e))
                });
            }

            let body = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                last_error = Some(format!("status {}: {}", status, body));
                continue;
            }

            // Client errors are not retried; the request will not get better.
            return Err(Error::network(
                operation,
                attempt + 1,
                format!("status {}: {}", status, body),
            ));
        }

        Err(Error::network(
            operation,
            self.config.max_retries + 1,
            last_error.unwrap_or_else(|| "unknown store failure".to_string()),
        ))
    }
}

#[async_trait]
impl GraphStore for HttpGraphStore {
    async fn write_node(&self, draft: &NodeDraft) -> Result<String> {
        let url = self.endpoint("nodes");
        let response: NodeWriteResponse = self
            .execute("write_node", || self.http.post(&url).json(draft))
            .await?;
        Ok(response.node_id)
    }

    async fn write_edges(&self, edges: &[EdgeDraft]) -> Result<Vec<EdgeFailure>> {
        let url = self.endpoint("edges");
        let mut failures = Vec::new();

        for edge in edges {
            // One request per edge so a failure names exactly which edge
            // is missing; earlier edges stay written.
            let result = self
                .execute_raw("write_edge", || self.http.post(&url).json(edge))
                .await;

            if let Err(err) = result {
                warn!(relation = %edge.relation, from = %edge.from, to = %edge.to,
                      "Edge write failed");
                failures.push(EdgeFailure {
                    relation: edge.relation.clone(),
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                    message: err.to_string(),
                });
            }
        }

        Ok(failures)
    }

    async fn semantic_search(
        &self,
        vector: &[f32],
        top_k: usize,
        filters: Option<&SearchFilters>,
    ) -> Result<Vec<SearchHit>> {
        let url = self.endpoint("search");
        let body = SearchRequestBody {
            vector,
            top_k,
            filters,
        };

        let response: SearchResponseBody = self
            .execute("semantic_search", || self.http.post(&url).json(&body))
            .await?;

        // Re-sort locally so the ordering contract holds even if the store
        // returns ties in arbitrary order.
        let mut hits = response.hits;
        sort_hits(&mut hits);
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn neighborhood(&self, id: &str, depth: usize) -> Result<Vec<RelatedArtifact>> {
        if depth == 0 {
            return Ok(Vec::new());
        }

        let url = self.endpoint(&format!("nodes/{}/neighbors?depth={}", id, depth));
        let response: NeighborResponseBody = self
            .execute("neighborhood", || self.http.get(&url))
            .await?;
        Ok(response.neighbors)
    }

    async fn find_chunk_by_hash(&self, payload_hash: &str) -> Result<Option<String>> {
        let url = self.endpoint("chunks/by-hash");
        let body = HashLookupBody { payload_hash };
        let response: HashLookupResponse = self
            .execute("find_chunk_by_hash", || self.http.post(&url).json(&body))
            .await?;
        Ok(response.node_id)
    }

    async fn delete_by_name(&self, kind: NodeKind, name: &str) -> Result<u64> {
        let url = self.endpoint("nodes/delete-by-name");
        let body = DeleteByNameBody { kind, name };
        let response: DeleteByNameResponse = self
            .execute("delete_by_name", || self.http.post(&url).json(&body))
            .await?;
        Ok(response.deleted)
    }

    async fn delete_node(&self, id: &str) -> Result<()> {
        let url = self.endpoint(&format!("nodes/{}", id));

        // NOT_FOUND is success for deletes; the node is gone either way.
        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                sleep(Duration::from_millis(self.backoff_delay_ms(attempt))).await;
            }

            match self.apply_auth(self.http.delete(&url)).send().await {
                Ok(response)
                    if response.status().is_success()
                        || response.status() == StatusCode::NOT_FOUND =>
                {
                    return Ok(());
                }
                Ok(response) => {
                    last_error = Some(format!("status {}", response.status()));
                    if response.status().is_client_error() {
                        break;
                    }
                }
                Err(e) => last_error = Some(format!("transport error: {}", e)),
            }
        }

        Err(Error::network(
            "delete_node",
            self.config.max_retries + 1,
            last_error.unwrap_or_else(|| "unknown store failure".to_string()),
        ))
    }

    async fn health_check(&self) -> Result<()> {
        let base = self.config.base_url.trim_end_matches('/');
        let url = format!("{}/health", base);

        let response = self
            .apply_auth(self.http.get(&url))
            .send()
            .await
            .map_err(|e| Error::network("health_check", 1, e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::network(
                "health_check",
                1,
                format!("status {}", response.status()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_namespace() {
        let store = HttpGraphStore::new(
            StoreConfig::default()
                .with_base_url("http://store:6969/")
                .with_namespace("tenant-a"),
        )
        .unwrap();

        assert_eq!(
            store.endpoint("/nodes"),
            "http://store:6969/api/v1/namespaces/tenant-a/nodes"
        );
        assert_eq!(
            store.endpoint("nodes/n1/neighbors?depth=2"),
            "http://store:6969/api/v1/namespaces/tenant-a/nodes/n1/neighbors?depth=2"
        );
    }

    #[test]
    fn test_backoff_doubles_and_saturates() {
        let store = HttpGraphStore::new(StoreConfig::default()).unwrap();

        assert_eq!(store.backoff_delay_ms(1), 200);
        assert_eq!(store.backoff_delay_ms(2), 400);
        assert_eq!(store.backoff_delay_ms(3), 800);
        // attempts past the u64 exponent range clamp instead of panicking
        assert_eq!(store.backoff_delay_ms(200), u64::MAX);
    }
}

//! Graph store client boundary.
//!
//! The graph/vector store is remote; everything here is a stateless gateway
//! over its HTTP surface. The trait contract mirrors the logical operations
//! the pipelines need, not the store's wire protocol.

mod http;
mod memory;

pub use http::HttpGraphStore;
pub use memory::{InMemoryGraphStore, StoreCounters};

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{EdgeFailure, Result};
use crate::model::{EdgeDraft, NodeDraft, NodeKind, RelatedArtifact, SearchFilters, SearchHit};

/// Client contract for the remote graph+vector store.
///
/// All operations are network calls bounded by a per-call timeout. Node
/// writes are retried with bounded exponential backoff; edge batches are
/// best-effort and report per-edge failures instead of rolling back.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Persist one node, returning the store-assigned id.
    async fn write_node(&self, draft: &NodeDraft) -> Result<String>;

    /// Best-effort edge batch. Returns the edges that failed; an empty list
    /// means every edge was written. Previously written edges are not
    /// rolled back on failure.
    async fn write_edges(&self, edges: &[EdgeDraft]) -> Result<Vec<EdgeFailure>>;

    /// Vector similarity search, ordered by score descending with ties
    /// broken by timestamp descending (most recent first).
    async fn semantic_search(
        &self,
        vector: &[f32],
        top_k: usize,
        filters: Option<&SearchFilters>,
    ) -> Result<Vec<SearchHit>>;

    /// Bounded-depth breadth traversal from a node. Depth 0 is a no-op and
    /// must return empty without issuing a network call.
    async fn neighborhood(&self, id: &str, depth: usize) -> Result<Vec<RelatedArtifact>>;

    /// Look up a chunk by payload hash; used by the dedupe probe.
    async fn find_chunk_by_hash(&self, payload_hash: &str) -> Result<Option<String>>;

    /// Delete every node of the given kind matching the name. Returns how
    /// many were removed. Half of the documented non-atomic upsert-by-name.
    async fn delete_by_name(&self, kind: NodeKind, name: &str) -> Result<u64>;

    /// Delete a single node by id. Compensating deletion after a cancelled
    /// write is the caller's responsibility.
    async fn delete_node(&self, id: &str) -> Result<()>;

    /// Probe store reachability; useful before a batch of writes.
    async fn health_check(&self) -> Result<()>;
}

pub type SharedGraphStore = Arc<dyn GraphStore>;

/// Sort hits into the contract order: score descending, then timestamp
/// descending. Shared by store implementations.
pub(crate) fn sort_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.timestamp.cmp(&a.timestamp))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn hit(id: &str, score: f32, ts_secs: i64) -> SearchHit {
        SearchHit {
            id: id.to_string(),
            score,
            agent_name: "researcher".to_string(),
            topic: "ckb".to_string(),
            project: "cortex".to_string(),
            summary: "notes".to_string(),
            timestamp: Utc.timestamp_opt(ts_secs, 0).unwrap(),
            chunk_id: None,
            artifact_id: None,
            payload_hash: None,
        }
    }

    #[test]
    fn test_sort_hits_score_then_recency() {
        let mut hits = vec![hit("old", 0.9, 100), hit("low", 0.4, 999), hit("new", 0.9, 200)];
        sort_hits(&mut hits);

        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old", "low"]);
    }
}

//! Retrieval pipeline: embed the query, rank by similarity, hydrate
//! neighborhood context.
//!
//! Search failures are terminal; neighbor hydration failures are not. A
//! degraded hydration downgrades the response to bare hits and logs once per
//! session instead of spamming every request.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::config::RetrievalConfig;
use crate::embed::SharedEmbedder;
use crate::error::Result;
use crate::evolution::{AccessEvent, AccessKey, AccessSender};
use crate::model::{RetrievedRecord, SearchFilters};
use crate::store::SharedGraphStore;

const MIN_LIMIT: usize = 1;
const MAX_LIMIT: usize = 50;

/// A retrieval request. The limit is clamped to a sane window at execution
/// time rather than rejected.
#[derive(Debug, Clone)]
pub struct MemoryQuery {
    pub text: String,
    pub limit: usize,
    pub filters: SearchFilters,
}

impl MemoryQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            limit: 10,
            filters: SearchFilters::default(),
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn clamped_limit(&self) -> usize {
        self.limit.clamp(MIN_LIMIT, MAX_LIMIT)
    }
}

pub struct RetrievalPipeline {
    store: SharedGraphStore,
    embedder: SharedEmbedder,
    config: RetrievalConfig,
    access: Option<AccessSender>,
    /// Set once the first hydration failure has been logged this session
    degradation_logged: AtomicBool,
}

impl RetrievalPipeline {
    pub fn new(store: SharedGraphStore, embedder: SharedEmbedder, config: RetrievalConfig) -> Self {
        Self {
            store,
            embedder,
            config,
            access: None,
            degradation_logged: AtomicBool::new(false),
        }
    }

    /// Wire the access-event feed to an evolution tracker.
    pub fn with_access_sender(mut self, sender: AccessSender) -> Self {
        self.access = Some(sender);
        self
    }

    /// Execute a query end to end: embed, search, floor, hydrate.
    ///
    /// Hits come back in rank order (score descending, recency breaking
    /// ties) and stay in that order through hydration.
    pub async fn search(&self, query: &MemoryQuery) -> Result<Vec<RetrievedRecord>> {
        let vector = self.embedder.embed(&query.text).await?;
        let limit = query.clamped_limit();

        let filters = if query.filters.is_empty() {
            None
        } else {
            Some(&query.filters)
        };

        let hits: Vec<_> = self
            .store
            .semantic_search(&vector, limit, filters)
            .await?
            .into_iter()
            .filter(|hit| hit.score >= self.config.min_score)
            .collect();

        debug!(query = %query.text, hits = hits.len(), "Semantic search complete");
        self.emit_access_events(&hits);

        if self.config.neighbor_depth == 0 {
            return Ok(hits
                .into_iter()
                .map(|hit| RetrievedRecord {
                    hit,
                    neighbors: Vec::new(),
                })
                .collect());
        }

        // hydrate every hit concurrently; join_all keeps rank order
        let fetched = futures::future::join_all(
            hits.iter()
                .map(|hit| self.store.neighborhood(&hit.id, self.config.neighbor_depth)),
        )
        .await;

        let mut records = Vec::with_capacity(hits.len());
        let mut seen_neighbors: HashSet<String> = HashSet::new();

        for (hit, result) in hits.into_iter().zip(fetched) {
            let neighbors = match result {
                Ok(neighbors) => neighbors
                    .into_iter()
                    // a neighbor shared by several hits attaches to the
                    // highest-ranked one only
                    .filter(|n| seen_neighbors.insert(n.id.clone()))
                    .collect(),
                Err(err) => {
                    if !self.degradation_logged.swap(true, Ordering::Relaxed) {
                        warn!(error = %err,
                              "Neighbor hydration degraded, returning bare hits");
                    }
                    Vec::new()
                }
            };

            records.push(RetrievedRecord { hit, neighbors });
        }

        Ok(records)
    }

    /// One event per hit, even when hits share a key; the tracker's counter
    /// aggregation is per access, not per query.
    fn emit_access_events(&self, hits: &[crate::model::SearchHit]) {
        let Some(sender) = &self.access else {
            return;
        };

        let now = chrono::Utc::now();
        for hit in hits {
            sender.record(AccessEvent {
                key: AccessKey {
                    topic: hit.topic.clone(),
                    project: hit.project.clone(),
                    agent_name: hit.agent_name.clone(),
                },
                at: now,
            });
        }
    }
}

//! In-memory graph store.
//!
//! Backs tests and store-less smoke runs: cosine search over stored chunk
//! vectors, breadth-first neighborhood traversal, per-operation call
//! counters, and failure injection for partial-write and degradation tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::embed::cosine_similarity;
use crate::error::{EdgeFailure, Error, Result};
use crate::model::{EdgeDraft, NodeDraft, NodeKind, RelatedArtifact, SearchFilters, SearchHit};

use super::{sort_hits, GraphStore};

/// A node as held by the in-memory store.
#[derive(Debug, Clone)]
pub struct StoredNode {
    pub id: String,
    pub kind: NodeKind,
    pub external_id: Option<String>,
    pub properties: Value,
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    nodes: HashMap<String, StoredNode>,
    edges: Vec<EdgeDraft>,
}

/// Per-operation invocation counters, readable by tests.
#[derive(Default)]
pub struct StoreCounters {
    pub write_node: AtomicU64,
    pub write_edges: AtomicU64,
    pub semantic_search: AtomicU64,
    pub neighborhood: AtomicU64,
}

#[derive(Default)]
pub struct InMemoryGraphStore {
    state: Mutex<State>,
    id_counter: AtomicU64,
    counters: StoreCounters,
    fail_relations: Mutex<HashSet<String>>,
    fail_neighborhood: AtomicBool,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> String {
        let id = self.id_counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("node-{}", id)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| Error::Internal("store state lock poisoned".to_string()))
    }

    /// Make subsequent writes of edges with this relation fail.
    pub fn fail_edges_with_relation(&self, relation: impl Into<String>) {
        if let Ok(mut failing) = self.fail_relations.lock() {
            failing.insert(relation.into());
        }
    }

    /// Make subsequent neighborhood calls fail.
    pub fn fail_neighborhood(&self, fail: bool) {
        self.fail_neighborhood.store(fail, Ordering::Relaxed);
    }

    pub fn counters(&self) -> &StoreCounters {
        &self.counters
    }

    /// Fetch a stored node by id.
    pub fn node(&self, id: &str) -> Option<StoredNode> {
        self.state.lock().ok()?.nodes.get(id).cloned()
    }

    pub fn count_nodes_of_kind(&self, kind: NodeKind) -> usize {
        self.state
            .lock()
            .map(|state| state.nodes.values().filter(|n| n.kind == kind).count())
            .unwrap_or(0)
    }

    pub fn edge_exists(&self, relation: &str, from: &str, to: &str) -> bool {
        self.state
            .lock()
            .map(|state| {
                state
                    .edges
                    .iter()
                    .any(|e| e.relation == relation && e.from == from && e.to == to)
            })
            .unwrap_or(false)
    }

    pub fn edge_count(&self) -> usize {
        self.state.lock().map(|state| state.edges.len()).unwrap_or(0)
    }

    fn prop_str(properties: &Value, key: &str) -> String {
        properties
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }

    fn hit_from_node(node: &StoredNode, score: f32) -> SearchHit {
        let timestamp = node
            .properties
            .get("timestamp")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(node.created_at);

        SearchHit {
            id: node.id.clone(),
            score,
            agent_name: Self::prop_str(&node.properties, "agent_name"),
            topic: Self::prop_str(&node.properties, "topic"),
            project: Self::prop_str(&node.properties, "project"),
            summary: Self::prop_str(&node.properties, "summary"),
            timestamp,
            chunk_id: node
                .properties
                .get("chunk_id")
                .and_then(|v| v.as_str())
                .map(String::from),
            artifact_id: node
                .properties
                .get("artifact_id")
                .and_then(|v| v.as_str())
                .map(String::from),
            payload_hash: node
                .properties
                .get("payload_hash")
                .and_then(|v| v.as_str())
                .map(String::from),
        }
    }

    fn related_from_node(node: &StoredNode) -> RelatedArtifact {
        let summary = ["summary", "label", "name", "status"]
            .iter()
            .find_map(|key| node.properties.get(*key).and_then(|v| v.as_str()))
            .unwrap_or_default()
            .to_string();

        RelatedArtifact {
            id: node.id.clone(),
            kind: node.kind.to_string(),
            summary,
        }
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn write_node(&self, draft: &NodeDraft) -> Result<String> {
        self.counters.write_node.fetch_add(1, Ordering::Relaxed);

        let id = self.next_id();
        let node = StoredNode {
            id: id.clone(),
            kind: draft.kind,
            external_id: draft.external_id.clone(),
            properties: draft.properties.clone(),
            embedding: draft.embedding.clone(),
            created_at: Utc::now(),
        };

        self.lock()?.nodes.insert(id.clone(), node);
        Ok(id)
    }

    async fn write_edges(&self, edges: &[EdgeDraft]) -> Result<Vec<EdgeFailure>> {
        self.counters.write_edges.fetch_add(1, Ordering::Relaxed);

        let failing = self
            .fail_relations
            .lock()
            .map(|set| set.clone())
            .unwrap_or_default();

        let mut failures = Vec::new();
        let mut state = self.lock()?;
        for edge in edges {
            if failing.contains(&edge.relation) {
                failures.push(EdgeFailure {
                    relation: edge.relation.clone(),
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                    message: "injected edge failure".to_string(),
                });
                continue;
            }
            state.edges.push(edge.clone());
        }

        Ok(failures)
    }

    async fn semantic_search(
        &self,
        vector: &[f32],
        top_k: usize,
        filters: Option<&SearchFilters>,
    ) -> Result<Vec<SearchHit>> {
        self.counters.semantic_search.fetch_add(1, Ordering::Relaxed);

        let state = self.lock()?;
        let mut hits: Vec<SearchHit> = state
            .nodes
            .values()
            .filter(|node| node.kind == NodeKind::MemoryChunk)
            .filter_map(|node| {
                let embedding = node.embedding.as_ref()?;
                let score = cosine_similarity(vector, embedding);
                Some(Self::hit_from_node(node, score))
            })
            .filter(|hit| filters.is_none_or(|f| f.matches(hit)))
            .collect();

        sort_hits(&mut hits);
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn neighborhood(&self, id: &str, depth: usize) -> Result<Vec<RelatedArtifact>> {
        if depth == 0 {
            return Ok(Vec::new());
        }

        self.counters.neighborhood.fetch_add(1, Ordering::Relaxed);

        if self.fail_neighborhood.load(Ordering::Relaxed) {
            return Err(Error::network(
                "neighborhood",
                1,
                "injected neighborhood failure",
            ));
        }

        let state = self.lock()?;
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(id.to_string());

        let mut frontier: VecDeque<(String, usize)> = VecDeque::new();
        frontier.push_back((id.to_string(), 0));

        let mut related = Vec::new();
        while let Some((current, dist)) = frontier.pop_front() {
            if dist >= depth {
                continue;
            }

            for edge in &state.edges {
                let next = if edge.from == current {
                    &edge.to
                } else if edge.to == current {
                    &edge.from
                } else {
                    continue;
                };

                if visited.insert(next.clone()) {
                    if let Some(node) = state.nodes.get(next) {
                        related.push(Self::related_from_node(node));
                    }
                    frontier.push_back((next.clone(), dist + 1));
                }
            }
        }

        Ok(related)
    }

    async fn find_chunk_by_hash(&self, payload_hash: &str) -> Result<Option<String>> {
        let state = self.lock()?;
        Ok(state
            .nodes
            .values()
            .find(|node| {
                node.kind == NodeKind::MemoryChunk
                    && node
                        .properties
                        .get("payload_hash")
                        .and_then(|v| v.as_str())
                        .is_some_and(|h| h == payload_hash)
            })
            .map(|node| node.id.clone()))
    }

    async fn delete_by_name(&self, kind: NodeKind, name: &str) -> Result<u64> {
        let mut state = self.lock()?;
        let doomed: Vec<String> = state
            .nodes
            .values()
            .filter(|node| {
                node.kind == kind
                    && node
                        .properties
                        .get("name")
                        .and_then(|v| v.as_str())
                        .is_some_and(|n| n == name)
            })
            .map(|node| node.id.clone())
            .collect();

        for id in &doomed {
            state.nodes.remove(id);
            state.edges.retain(|e| e.from != *id && e.to != *id);
        }

        Ok(doomed.len() as u64)
    }

    async fn delete_node(&self, id: &str) -> Result<()> {
        let mut state = self.lock()?;
        state.nodes.remove(id);
        state.edges.retain(|e| e.from != id && e.to != id);
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

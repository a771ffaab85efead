//! Shared node, edge, and record shapes used by every pipeline.
//!
//! Entries are immutable once created; a correction is a new entry linked to
//! the old one by a `SUPERSEDES` edge. Reference nodes (agent, topic,
//! project) are upserted by name, with at most one live node per name within
//! a namespace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Edge relation labels used across the graph.
pub mod relation {
    pub const CHUNK_OF: &str = "CHUNK_OF";
    pub const RELATES_TO_TOPIC: &str = "RELATES_TO_TOPIC";
    pub const PART_OF_PROJECT: &str = "PART_OF_PROJECT";
    pub const RECORDED_BY: &str = "RECORDED_BY";
    pub const BELONGS_TO_ARTIFACT: &str = "BELONGS_TO_ARTIFACT";
    pub const SUPERSEDES: &str = "SUPERSEDES";
}

/// Node kinds stored in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    MemoryEntry,
    MemoryChunk,
    Artifact,
    Agent,
    Topic,
    Project,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            NodeKind::MemoryEntry => "memory_entry",
            NodeKind::MemoryChunk => "memory_chunk",
            NodeKind::Artifact => "artifact",
            NodeKind::Agent => "agent",
            NodeKind::Topic => "topic",
            NodeKind::Project => "project",
        };
        write!(f, "{}", label)
    }
}

/// Canonical memory record. Never mutated in place once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Store-assigned id; `None` before the first write
    pub id: Option<String>,
    pub agent_name: String,
    pub topic: String,
    pub project: String,
    pub summary: String,
    pub full_content: String,
    /// Immutable creation timestamp
    pub timestamp: DateTime<Utc>,
    /// Confidence in [0, 1]
    pub confidence: f32,
    #[serde(default)]
    pub open_questions: Vec<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Vector-bearing counterpart of an entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryChunk {
    pub chunk_id: String,
    pub artifact_id: String,
    /// The vector travels in the node draft's dedicated field, not in the
    /// serialized properties
    #[serde(default, skip_serializing)]
    pub embedding: Vec<f32>,
    pub agent_name: String,
    pub topic: String,
    pub project: String,
    pub summary: String,
    pub timestamp: DateTime<Utc>,
    /// Content fingerprint, unique per namespace when dedupe is enabled
    pub payload_hash: String,
}

/// Logical grouping of one or more chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub artifact_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// A freshly materialized artifact with a generated id.
    pub fn materialized() -> Self {
        Self {
            artifact_id: format!("artifact-{}", Uuid::new_v4()),
            status: "materialized".to_string(),
            created_at: Utc::now(),
        }
    }
}

/// A node payload ready for persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDraft {
    pub kind: NodeKind,
    /// Stable external id used for upsert-by-name reference nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub properties: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl NodeDraft {
    pub fn new(kind: NodeKind, properties: Value) -> Self {
        Self {
            kind,
            external_id: None,
            properties,
            embedding: None,
        }
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// A typed relation between two persisted nodes. Edges are never mutated;
/// a changed relation is a delete followed by a recreate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDraft {
    pub relation: String,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
}

impl EdgeDraft {
    pub fn new(relation: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            from: from.into(),
            to: to.into(),
            properties: None,
        }
    }

    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = Some(properties);
        self
    }
}

/// Minimal projection of a neighboring node, constructed on read only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedArtifact {
    pub id: String,
    pub kind: String,
    pub summary: String,
}

/// Property filters applied to a semantic search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    pub agent_name: Option<String>,
    pub topic: Option<String>,
    pub project: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

impl SearchFilters {
    pub fn matches(&self, hit: &SearchHit) -> bool {
        self.agent_name
            .as_ref()
            .is_none_or(|needle| hit.agent_name == *needle)
            && self.topic.as_ref().is_none_or(|needle| hit.topic == *needle)
            && self
                .project
                .as_ref()
                .is_none_or(|needle| hit.project == *needle)
            && self.since.as_ref().is_none_or(|since| hit.timestamp >= *since)
    }

    pub fn is_empty(&self) -> bool {
        self.agent_name.is_none()
            && self.topic.is_none()
            && self.project.is_none()
            && self.since.is_none()
    }
}

/// A ranked chunk returned by semantic search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// Node id of the chunk
    pub id: String,
    pub score: f32,
    pub agent_name: String,
    pub topic: String,
    pub project: String,
    pub summary: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub chunk_id: Option<String>,
    #[serde(default)]
    pub artifact_id: Option<String>,
    #[serde(default)]
    pub payload_hash: Option<String>,
}

/// A search hit with its hydrated graph-neighborhood context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedRecord {
    pub hit: SearchHit,
    #[serde(default)]
    pub neighbors: Vec<RelatedArtifact>,
}

/// Normalize content for hashing and embedding: trimmed summary and body
/// joined with a blank line, interior whitespace runs collapsed.
pub fn normalized_payload(summary: &str, full_content: &str) -> String {
    let collapse = |text: &str| {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    };
    format!("{}\n\n{}", collapse(summary), collapse(full_content))
}

/// Sha256 hex fingerprint of normalized content, prefixed with the scheme.
pub fn payload_hash(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("sha256:{:x}", hasher.finalize())
}

/// Lowercase a name into a stable slug for upsert-by-name external ids.
pub fn slugify(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "unnamed".to_string();
    }

    let mut slug: String = trimmed
        .chars()
        .map(|ch| match ch {
            'A'..='Z' => ch.to_ascii_lowercase(),
            'a'..='z' | '0'..='9' => ch,
            _ => '-',
        })
        .collect();

    while slug.contains("--") {
        slug = slug.replace("--", "-");
    }

    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "unnamed".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_payload_hash_is_stable() {
        let normalized = normalized_payload("notes", "full body here");
        let h1 = payload_hash(&normalized);
        let h2 = payload_hash(&normalized);
        assert_eq!(h1, h2);
        assert!(h1.starts_with("sha256:"));
    }

    #[test]
    fn test_normalization_collapses_whitespace() {
        let a = normalized_payload("notes  on\tckb", "body   text");
        let b = normalized_payload("notes on ckb", "body text");
        assert_eq!(a, b);
        assert_eq!(payload_hash(&a), payload_hash(&b));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Cortex Graph!"), "cortex-graph");
        assert_eq!(slugify("  "), "unnamed");
        assert_eq!(slugify("a--b"), "a-b");
    }

    #[test]
    fn test_filters_match() {
        let hit = SearchHit {
            id: "chunk-1".to_string(),
            score: 0.9,
            agent_name: "researcher".to_string(),
            topic: "ckb".to_string(),
            project: "cortex".to_string(),
            summary: "notes".to_string(),
            timestamp: Utc::now(),
            chunk_id: None,
            artifact_id: None,
            payload_hash: None,
        };

        let mut filters = SearchFilters::default();
        assert!(filters.matches(&hit));

        filters.topic = Some("ckb".to_string());
        assert!(filters.matches(&hit));

        filters.agent_name = Some("someone-else".to_string());
        assert!(!filters.matches(&hit));
    }

    #[test]
    fn test_node_draft_builder() {
        let draft = NodeDraft::new(NodeKind::Topic, serde_json::json!({ "label": "ckb" }))
            .with_external_id("topic::ckb");
        assert_eq!(draft.kind, NodeKind::Topic);
        assert_eq!(draft.external_id.as_deref(), Some("topic::ckb"));
        assert!(draft.embedding.is_none());
    }
}

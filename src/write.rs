//! Write pipeline: validate, fingerprint, embed, persist, link.
//!
//! Entries are validated before any network call so a rejected write costs
//! nothing. Content is fingerprinted with a normalized Sha256 hash and
//! deduped against the store; a duplicate is a skip outcome, not an error.
//! Persistence order is entry, chunk, artifact, references, then the edge
//! batch, so a failure partway leaves the most valuable nodes behind.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::RetrievalConfig;
use crate::embed::SharedEmbedder;
use crate::error::{Error, Result};
use crate::model::{
    normalized_payload, payload_hash, relation, slugify, Artifact, EdgeDraft, MemoryChunk,
    MemoryEntry, NodeDraft, NodeKind,
};
use crate::store::SharedGraphStore;

/// Caller-supplied artifact to persist. Built incrementally; validated as a
/// whole when submitted.
#[derive(Debug, Clone, Default)]
pub struct ArtifactDraft {
    pub agent_name: String,
    pub topic: String,
    pub project: String,
    pub summary: String,
    pub full_content: String,
    /// Confidence in [0, 1]; clamped on write
    pub confidence: f32,
    pub open_questions: Vec<String>,
    pub conversation_id: Option<String>,
    pub metadata: Option<Value>,
    /// Precomputed content fingerprint; computed from normalized content
    /// when absent
    pub payload_hash: Option<String>,
    /// Entry id this draft corrects. Entries are immutable; a correction is
    /// a new entry linked to the old one
    pub supersedes: Option<String>,
    /// Creation timestamp; now() when absent
    pub timestamp: Option<DateTime<Utc>>,
}

impl ArtifactDraft {
    pub fn new(
        agent_name: impl Into<String>,
        topic: impl Into<String>,
        project: impl Into<String>,
        summary: impl Into<String>,
        full_content: impl Into<String>,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            topic: topic.into(),
            project: project.into(),
            summary: summary.into(),
            full_content: full_content.into(),
            confidence: 1.0,
            ..Self::default()
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_open_questions(mut self, questions: Vec<String>) -> Self {
        self.open_questions = questions;
        self
    }

    pub fn with_conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_payload_hash(mut self, hash: impl Into<String>) -> Self {
        self.payload_hash = Some(hash.into());
        self
    }

    pub fn with_supersedes(mut self, entry_id: impl Into<String>) -> Self {
        self.supersedes = Some(entry_id.into());
        self
    }

    /// Reject the draft if any required field is blank, naming every missing
    /// field at once.
    fn validate(&self) -> Result<()> {
        let required = [
            ("agent_name", &self.agent_name),
            ("topic", &self.topic),
            ("project", &self.project),
            ("summary", &self.summary),
            ("full_content", &self.full_content),
        ];

        let missing: Vec<String> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| name.to_string())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::validation(missing))
        }
    }
}

/// Ids assigned by a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub entry_id: String,
    pub chunk_id: String,
    pub artifact_id: String,
    pub payload_hash: String,
}

/// Result of submitting a draft. A dedupe skip is an expected outcome and
/// carries the id of the chunk that already holds this content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written(WriteReceipt),
    DedupeSkip {
        payload_hash: String,
        existing_chunk_id: String,
    },
}

pub struct WritePipeline {
    store: SharedGraphStore,
    embedder: SharedEmbedder,
    config: RetrievalConfig,
    /// Serializes same-name reference upserts within this process. The
    /// delete-then-insert upsert is not atomic at the store; see module docs.
    name_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl WritePipeline {
    pub fn new(store: SharedGraphStore, embedder: SharedEmbedder, config: RetrievalConfig) -> Self {
        Self {
            store,
            embedder,
            config,
            name_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn name_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.name_locks.lock().await;
        locks.entry(key.to_string()).or_default().clone()
    }

    /// Evict the lock entry unless another writer still holds a clone.
    /// Clones are only handed out under the map mutex, so the strong count
    /// is stable while we hold it: 2 means the map's copy plus ours.
    async fn release_name_lock(&self, key: &str, lock: &Arc<Mutex<()>>) {
        let mut locks = self.name_locks.lock().await;
        if Arc::strong_count(lock) == 2 {
            locks.remove(key);
        }
    }

    /// Upsert a reference node by name: delete any live node of this kind
    /// with the name, then insert a fresh one. Non-atomic at the store; a
    /// per-name lock keeps writers in this process from interleaving.
    async fn upsert_reference(&self, kind: NodeKind, name: &str) -> Result<String> {
        let slug = slugify(name);
        let key = format!("{}::{}", kind, slug);
        let lock = self.name_lock(&key).await;

        let result = {
            let _guard = lock.lock().await;
            async {
                let deleted = self.store.delete_by_name(kind, name).await?;
                if deleted > 0 {
                    debug!(kind = %kind, name, deleted, "Replaced reference node");
                }

                let draft = NodeDraft::new(
                    kind,
                    json!({
                        "name": name,
                        "label": name,
                    }),
                )
                .with_external_id(&key);

                self.store.write_node(&draft).await
            }
            .await
        };

        self.release_name_lock(&key, &lock).await;
        result
    }

    #[cfg(test)]
    async fn name_lock_count(&self) -> usize {
        self.name_locks.lock().await.len()
    }

    /// Persist one artifact draft end to end.
    pub async fn write_artifact(&self, draft: &ArtifactDraft) -> Result<WriteOutcome> {
        draft.validate()?;

        let normalized = normalized_payload(&draft.summary, &draft.full_content);
        let hash = draft
            .payload_hash
            .clone()
            .unwrap_or_else(|| payload_hash(&normalized));

        if self.config.dedupe_enabled {
            if let Some(existing) = self.store.find_chunk_by_hash(&hash).await? {
                info!(payload_hash = %hash, existing_chunk_id = %existing,
                      "Duplicate content, skipping write");
                return Ok(WriteOutcome::DedupeSkip {
                    payload_hash: hash,
                    existing_chunk_id: existing,
                });
            }
        }

        let embedding = self.embedder.embed(&normalized).await?;
        let timestamp = draft.timestamp.unwrap_or_else(Utc::now);
        let confidence = draft.confidence.clamp(0.0, 1.0);

        let entry = MemoryEntry {
            id: None,
            agent_name: draft.agent_name.clone(),
            topic: draft.topic.clone(),
            project: draft.project.clone(),
            summary: draft.summary.clone(),
            full_content: draft.full_content.clone(),
            timestamp,
            confidence,
            open_questions: draft.open_questions.clone(),
            conversation_id: draft.conversation_id.clone(),
            metadata: draft.metadata.clone(),
        };
        let entry_id = self
            .store
            .write_node(&NodeDraft::new(
                NodeKind::MemoryEntry,
                serde_json::to_value(&entry)?,
            ))
            .await?;

        let artifact = Artifact::materialized();
        let chunk = MemoryChunk {
            chunk_id: format!("chunk-{}", entry_id),
            artifact_id: artifact.artifact_id.clone(),
            embedding,
            agent_name: draft.agent_name.clone(),
            topic: draft.topic.clone(),
            project: draft.project.clone(),
            summary: draft.summary.clone(),
            timestamp,
            payload_hash: hash.clone(),
        };
        let chunk_id = self
            .store
            .write_node(
                &NodeDraft::new(NodeKind::MemoryChunk, serde_json::to_value(&chunk)?)
                    .with_embedding(chunk.embedding.clone()),
            )
            .await?;

        let artifact_node_id = self
            .store
            .write_node(&NodeDraft::new(
                NodeKind::Artifact,
                serde_json::to_value(&artifact)?,
            ))
            .await?;

        let agent_id = self
            .upsert_reference(NodeKind::Agent, &draft.agent_name)
            .await?;
        let topic_id = self.upsert_reference(NodeKind::Topic, &draft.topic).await?;
        let project_id = self
            .upsert_reference(NodeKind::Project, &draft.project)
            .await?;

        let mut edges = vec![
            EdgeDraft::new(relation::CHUNK_OF, &chunk_id, &entry_id),
            EdgeDraft::new(relation::BELONGS_TO_ARTIFACT, &entry_id, &artifact_node_id),
            EdgeDraft::new(relation::RECORDED_BY, &entry_id, &agent_id),
            EdgeDraft::new(relation::RELATES_TO_TOPIC, &entry_id, &topic_id),
            EdgeDraft::new(relation::PART_OF_PROJECT, &entry_id, &project_id),
        ];
        if let Some(old_entry) = &draft.supersedes {
            edges.push(EdgeDraft::new(relation::SUPERSEDES, &entry_id, old_entry));
        }

        let failures = self.store.write_edges(&edges).await?;
        if !failures.is_empty() {
            // Written nodes stay; a retry dedupes on the payload hash and
            // only the missing edges need repair.
            return Err(Error::partial_write(entry_id, failures));
        }

        info!(entry_id = %entry_id, chunk_id = %chunk_id, topic = %draft.topic,
              "Artifact written");

        Ok(WriteOutcome::Written(WriteReceipt {
            entry_id,
            chunk_id,
            artifact_id: artifact_node_id,
            payload_hash: hash,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashingEmbedder;
    use crate::store::InMemoryGraphStore;
    use std::sync::atomic::Ordering;

    fn pipeline(store: Arc<InMemoryGraphStore>) -> WritePipeline {
        WritePipeline::new(
            store,
            Arc::new(HashingEmbedder::new(32)),
            RetrievalConfig::default(),
        )
    }

    fn draft() -> ArtifactDraft {
        ArtifactDraft::new(
            "researcher",
            "ckb",
            "cortex",
            "notes on the ckb store",
            "longer body describing the store layout",
        )
    }

    #[tokio::test]
    async fn test_write_produces_full_node_and_edge_shape() {
        let store = Arc::new(InMemoryGraphStore::new());
        let pipeline = pipeline(store.clone());

        let outcome = pipeline.write_artifact(&draft()).await.unwrap();
        let receipt = match outcome {
            WriteOutcome::Written(receipt) => receipt,
            other => panic!("expected written, got {:?}", other),
        };

        assert_eq!(store.count_nodes_of_kind(NodeKind::MemoryEntry), 1);
        assert_eq!(store.count_nodes_of_kind(NodeKind::MemoryChunk), 1);
        assert_eq!(store.count_nodes_of_kind(NodeKind::Artifact), 1);
        assert_eq!(store.count_nodes_of_kind(NodeKind::Agent), 1);
        assert_eq!(store.count_nodes_of_kind(NodeKind::Topic), 1);
        assert_eq!(store.count_nodes_of_kind(NodeKind::Project), 1);
        assert_eq!(store.edge_count(), 5);

        let chunk = store.node(&receipt.chunk_id).unwrap();
        assert!(chunk.embedding.is_some());
        assert!(receipt.payload_hash.starts_with("sha256:"));
    }

    #[tokio::test]
    async fn test_duplicate_write_is_skipped() {
        let store = Arc::new(InMemoryGraphStore::new());
        let pipeline = pipeline(store.clone());

        let first = pipeline.write_artifact(&draft()).await.unwrap();
        let writes_after_first = store.counters().write_node.load(Ordering::Relaxed);

        let second = pipeline.write_artifact(&draft()).await.unwrap();
        match (first, second) {
            (
                WriteOutcome::Written(receipt),
                WriteOutcome::DedupeSkip {
                    payload_hash,
                    existing_chunk_id,
                },
            ) => {
                assert_eq!(payload_hash, receipt.payload_hash);
                assert_eq!(existing_chunk_id, receipt.chunk_id);
            }
            other => panic!("expected written then skip, got {:?}", other),
        }

        // the duplicate write reached the store zero times
        assert_eq!(
            store.counters().write_node.load(Ordering::Relaxed),
            writes_after_first
        );
        assert_eq!(store.count_nodes_of_kind(NodeKind::MemoryEntry), 1);
    }

    #[tokio::test]
    async fn test_dedupe_disabled_writes_again() {
        let store = Arc::new(InMemoryGraphStore::new());
        let pipeline = WritePipeline::new(
            store.clone(),
            Arc::new(HashingEmbedder::new(32)),
            RetrievalConfig::default().with_dedupe(false),
        );

        pipeline.write_artifact(&draft()).await.unwrap();
        pipeline.write_artifact(&draft()).await.unwrap();
        assert_eq!(store.count_nodes_of_kind(NodeKind::MemoryEntry), 2);
    }

    #[tokio::test]
    async fn test_validation_names_every_missing_field() {
        let store = Arc::new(InMemoryGraphStore::new());
        let pipeline = pipeline(store.clone());

        let bad = ArtifactDraft::new("researcher", "", "cortex", "  ", "body");
        let err = pipeline.write_artifact(&bad).await.unwrap_err();

        match err {
            Error::Validation { missing } => {
                assert_eq!(missing, vec!["topic".to_string(), "summary".to_string()]);
            }
            other => panic!("expected validation error, got {:?}", other),
        }
        // rejected before any store call
        assert_eq!(store.counters().write_node.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_partial_write_keeps_nodes_and_names_edges() {
        let store = Arc::new(InMemoryGraphStore::new());
        store.fail_edges_with_relation(relation::RELATES_TO_TOPIC);
        let pipeline = pipeline(store.clone());

        let err = pipeline.write_artifact(&draft()).await.unwrap_err();
        match err {
            Error::PartialWrite {
                node_id,
                failed_edges,
            } => {
                assert_eq!(failed_edges.len(), 1);
                assert_eq!(failed_edges[0].relation, relation::RELATES_TO_TOPIC);
                // the entry node survives the edge failure
                assert!(store.node(&node_id).is_some());
            }
            other => panic!("expected partial write, got {:?}", other),
        }

        // the four healthy edges were written
        assert_eq!(store.edge_count(), 4);
    }

    #[tokio::test]
    async fn test_correction_links_supersedes_edge() {
        let store = Arc::new(InMemoryGraphStore::new());
        let pipeline = pipeline(store.clone());

        let first = pipeline.write_artifact(&draft()).await.unwrap();
        let WriteOutcome::Written(receipt) = first else {
            panic!("expected written outcome");
        };

        let correction = ArtifactDraft::new(
            "researcher",
            "ckb",
            "cortex",
            "corrected notes on the ckb store",
            "the earlier layout description was wrong; chunks nest under artifacts",
        )
        .with_supersedes(receipt.entry_id.clone());

        let WriteOutcome::Written(corrected) =
            pipeline.write_artifact(&correction).await.unwrap()
        else {
            panic!("expected written outcome");
        };

        assert!(store.edge_exists(
            relation::SUPERSEDES,
            &corrected.entry_id,
            &receipt.entry_id
        ));
        // the superseded entry is untouched
        assert!(store.node(&receipt.entry_id).is_some());
    }

    #[tokio::test]
    async fn test_name_locks_do_not_accumulate() {
        let store = Arc::new(InMemoryGraphStore::new());
        let pipeline = pipeline(store.clone());

        for topic in ["ckb", "routing", "decay", "backoff"] {
            let draft = ArtifactDraft::new(
                "researcher",
                topic,
                "cortex",
                format!("notes on {}", topic),
                format!("body text about {}", topic),
            );
            pipeline.write_artifact(&draft).await.unwrap();
        }

        // every per-name lock was released once its writer finished
        assert_eq!(pipeline.name_lock_count().await, 0);
    }

    #[tokio::test]
    async fn test_reference_upsert_replaces_by_name() {
        let store = Arc::new(InMemoryGraphStore::new());
        let pipeline = pipeline(store.clone());

        pipeline.write_artifact(&draft()).await.unwrap();
        let mut second = draft();
        second.full_content = "a different body entirely".to_string();
        pipeline.write_artifact(&second).await.unwrap();

        // same topic/project/agent names: still one live node of each kind
        assert_eq!(store.count_nodes_of_kind(NodeKind::Topic), 1);
        assert_eq!(store.count_nodes_of_kind(NodeKind::Project), 1);
        assert_eq!(store.count_nodes_of_kind(NodeKind::Agent), 1);
        assert_eq!(store.count_nodes_of_kind(NodeKind::MemoryEntry), 2);
    }
}

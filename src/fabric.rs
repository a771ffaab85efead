//! Caller-facing facade wiring the pipelines together.
//!
//! `MemoryFabric` owns one store handle, one embedder, the write and
//! retrieval pipelines, the router, and (when enabled) the evolution
//! tracker. Construction either follows the environment or falls back to a
//! fully in-process fabric for tests and smoke runs.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::config::{FabricConfig, StoreConfig};
use crate::embed::{HashingEmbedder, HttpEmbeddingClient, SharedEmbedder};
use crate::error::Result;
use crate::evolution::{self, EvolutionHandle, PruneRecommendation};
use crate::retrieval::{MemoryQuery, RetrievalPipeline};
use crate::router::{RoutingDecision, SemanticRouter, SpecialistRegistry};
use crate::store::{HttpGraphStore, InMemoryGraphStore, SharedGraphStore};
use crate::write::{ArtifactDraft, WriteOutcome, WritePipeline};

pub struct MemoryFabric {
    store: SharedGraphStore,
    writer: WritePipeline,
    retrieval: RetrievalPipeline,
    router: SemanticRouter,
    evolution: Option<EvolutionHandle>,
    prune_reports: Option<mpsc::Receiver<PruneRecommendation>>,
}

impl MemoryFabric {
    /// Assemble a fabric from explicit collaborators. Spawns the evolution
    /// tracker when the config enables it, so this needs a running runtime
    /// in that case.
    pub fn new(
        config: FabricConfig,
        store: SharedGraphStore,
        embedder: SharedEmbedder,
        registry: SpecialistRegistry,
    ) -> Self {
        let (evolution, prune_reports, access) = if config.evolution.enabled {
            let (handle, reports) = evolution::spawn(config.evolution.clone());
            let sender = handle.access_sender();
            (Some(handle), Some(reports), Some(sender))
        } else {
            (None, None, None)
        };

        let writer = WritePipeline::new(store.clone(), embedder.clone(), config.retrieval.clone());
        let mut retrieval =
            RetrievalPipeline::new(store.clone(), embedder.clone(), config.retrieval.clone());
        if let Some(sender) = access {
            retrieval = retrieval.with_access_sender(sender);
        }
        let router = SemanticRouter::new(registry, embedder, config.routing.clone());

        Self {
            store,
            writer,
            retrieval,
            router,
            evolution,
            prune_reports,
        }
    }

    /// Build from the environment. Without a configured store URL the
    /// fabric runs fully in process, which is what local development and
    /// smoke tests want.
    pub fn from_env(registry: SpecialistRegistry) -> Result<Self> {
        let config = FabricConfig::from_env();

        if StoreConfig::is_configured() {
            let store: SharedGraphStore = Arc::new(HttpGraphStore::new(config.store.clone())?);
            let embedder: SharedEmbedder =
                Arc::new(HttpEmbeddingClient::new(config.embedding.clone())?);
            Ok(Self::new(config, store, embedder, registry))
        } else {
            info!("No store configured, running with the in-memory fabric");
            Ok(Self::in_memory_with_config(config, registry))
        }
    }

    /// Fully in-process fabric with a deterministic embedder.
    pub fn in_memory(registry: SpecialistRegistry) -> Self {
        Self::in_memory_with_config(FabricConfig::default(), registry)
    }

    pub fn in_memory_with_config(config: FabricConfig, registry: SpecialistRegistry) -> Self {
        let store: SharedGraphStore = Arc::new(InMemoryGraphStore::new());
        let embedder: SharedEmbedder =
            Arc::new(HashingEmbedder::new(config.embedding.vector_dim));
        Self::new(config, store, embedder, registry)
    }

    /// Persist one artifact through the write pipeline.
    pub async fn write_artifact(&self, draft: &ArtifactDraft) -> Result<WriteOutcome> {
        self.writer.write_artifact(draft).await
    }

    /// Run one retrieval query.
    pub async fn search(&self, query: &MemoryQuery) -> Result<Vec<crate::model::RetrievedRecord>> {
        self.retrieval.search(query).await
    }

    /// Dispatch a request to a specialist.
    pub async fn route_request(&self, text: &str) -> Result<RoutingDecision> {
        self.router.route(text).await
    }

    /// Rebuild the router's prototype cache.
    pub async fn reload_router(&self) -> Result<()> {
        self.router.reload().await
    }

    /// Probe the underlying store.
    pub async fn health_check(&self) -> Result<()> {
        self.store.health_check().await
    }

    /// Take the prune-recommendation receiver. Present once, and only when
    /// the evolution tracker is enabled.
    pub fn take_prune_reports(&mut self) -> Option<mpsc::Receiver<PruneRecommendation>> {
        self.prune_reports.take()
    }

    /// Stop the evolution tracker, if one is running.
    pub async fn shutdown(self) {
        if let Some(handle) = self.evolution {
            handle.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvolutionConfig;
    use crate::router::{RoutingStage, Specialist};
    use std::time::Duration;

    fn registry() -> SpecialistRegistry {
        SpecialistRegistry::new("generalist").register(
            Specialist::new("researcher")
                .with_token("research")
                .with_intent_example("find notes about the graph store"),
        )
    }

    fn draft(topic: &str, body: &str) -> ArtifactDraft {
        ArtifactDraft::new("researcher", topic, "cortex", format!("notes on {}", topic), body)
    }

    #[tokio::test]
    async fn test_write_then_search_round_trip() {
        let fabric = MemoryFabric::in_memory(registry());

        let outcome = fabric
            .write_artifact(&draft("ckb", "the ckb store keeps chunks in a graph"))
            .await
            .unwrap();
        assert!(matches!(outcome, WriteOutcome::Written(_)));

        let records = fabric
            .search(&MemoryQuery::new("notes on ckb chunks graph").with_limit(5))
            .await
            .unwrap();
        assert!(!records.is_empty());
        assert_eq!(records[0].hit.topic, "ckb");
    }

    #[tokio::test]
    async fn test_route_request_through_facade() {
        let fabric = MemoryFabric::in_memory(registry());
        fabric.reload_router().await.unwrap();

        let decision = fabric.route_request("research the cache layer").await.unwrap();
        assert_eq!(decision.specialist, "researcher");
        assert_eq!(decision.stage, RoutingStage::ExplicitToken);
    }

    #[tokio::test]
    async fn test_health_check_in_memory() {
        let fabric = MemoryFabric::in_memory(registry());
        fabric.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn test_evolution_wiring_end_to_end() {
        let mut config = FabricConfig::default();
        config.evolution = EvolutionConfig::default()
            .with_half_life(Duration::from_millis(1))
            .with_report_interval(Duration::from_millis(20))
            .with_prune_threshold(0.5);
        config.evolution.enabled = true;
        config.retrieval.min_score = 0.0;

        let mut fabric = MemoryFabric::in_memory_with_config(config, registry());
        let mut reports = fabric.take_prune_reports().unwrap();

        fabric
            .write_artifact(&draft("ckb", "the ckb store keeps chunks in a graph"))
            .await
            .unwrap();
        fabric
            .search(&MemoryQuery::new("ckb chunks graph"))
            .await
            .unwrap();

        let rec = tokio::time::timeout(Duration::from_secs(2), reports.recv())
            .await
            .expect("no recommendation before timeout")
            .expect("report channel closed");
        assert_eq!(rec.key.topic, "ckb");

        fabric.shutdown().await;
    }
}

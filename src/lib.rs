//! # cortex-fabric
//!
//! A graph-backed semantic memory fabric: typed memory records stored in a
//! remote graph+vector store, written through a validating, deduplicating
//! pipeline and read back through similarity search with graph-neighborhood
//! hydration. A semantic router dispatches free-form requests to registered
//! specialists, and a report-only evolution tracker watches access patterns
//! for stale memory.
//!
//! ## Core Components
//!
//! - **Write pipeline**: validate, fingerprint, embed, persist, link
//! - **Retrieval pipeline**: embed, rank, hydrate neighborhood context
//! - **Semantic router**: explicit token, keyword rule, then cosine dispatch
//! - **Evolution tracker**: decay-weighted access stats, prune reports
//!
//! ## Example
//!
//! ```rust,ignore
//! use cortex_fabric::{ArtifactDraft, MemoryFabric, MemoryQuery, SpecialistRegistry};
//!
//! let fabric = MemoryFabric::from_env(SpecialistRegistry::new("generalist"))?;
//!
//! let draft = ArtifactDraft::new(
//!     "researcher", "ckb", "cortex",
//!     "notes on the ckb store",
//!     "the ckb store keeps chunks in a graph",
//! );
//! fabric.write_artifact(&draft).await?;
//!
//! let records = fabric.search(&MemoryQuery::new("ckb store layout")).await?;
//! ```

pub mod config;
pub mod embed;
pub mod error;
pub mod evolution;
pub mod fabric;
pub mod model;
pub mod retrieval;
pub mod router;
pub mod store;
pub mod write;

// Re-exports for convenience
pub use config::{
    EmbeddingConfig, EvolutionConfig, FabricConfig, RetrievalConfig, RoutingConfig, StoreConfig,
};
pub use embed::{
    cosine_similarity, EmbeddingProvider, HashingEmbedder, HttpEmbeddingClient, SharedEmbedder,
};
pub use error::{EdgeFailure, Error, Result};
pub use evolution::{
    decay_weight, AccessEvent, AccessKey, AccessSender, AccessStat, EvolutionHandle,
    PruneRecommendation,
};
pub use fabric::MemoryFabric;
pub use model::{
    normalized_payload, payload_hash, relation, slugify, Artifact, EdgeDraft, MemoryChunk,
    MemoryEntry, NodeDraft, NodeKind, RelatedArtifact, RetrievedRecord, SearchFilters, SearchHit,
};
pub use retrieval::{MemoryQuery, RetrievalPipeline};
pub use router::{
    RoutingDecision, RoutingStage, SemanticRouter, Specialist, SpecialistRegistry,
};
pub use store::{
    GraphStore, HttpGraphStore, InMemoryGraphStore, SharedGraphStore, StoreCounters,
};
pub use write::{ArtifactDraft, WriteOutcome, WritePipeline, WriteReceipt};

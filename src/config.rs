//! Environment-driven configuration for the fabric and its collaborators.
//!
//! Every config struct has builder methods for programmatic construction
//! (used heavily in tests) and a `from_env()` constructor that reads layered
//! environment variable candidates with deployment-friendly defaults.

use std::env;
use std::time::Duration;

/// Read the first set variable among the candidates.
fn read_env(candidates: &[&str]) -> Option<String> {
    candidates.iter().find_map(|key| env::var(key).ok())
}

fn read_parsed<T: std::str::FromStr>(candidates: &[&str]) -> Option<T> {
    read_env(candidates).and_then(|value| value.parse().ok())
}

fn read_bool(candidates: &[&str]) -> Option<bool> {
    read_env(candidates).map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Connection settings for the remote graph/vector store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Base URL of the store's HTTP gateway
    pub base_url: String,
    /// Optional bearer token
    pub api_token: Option<String>,
    /// Namespace all nodes/edges/vectors are scoped to
    pub namespace: String,
    /// Per-call HTTP timeout in milliseconds
    pub http_timeout_ms: u64,
    /// Max retries per call on transport failure
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries
    pub retry_base_ms: u64,
}

impl StoreConfig {
    const BASE_URL_VARS: [&'static str; 2] = ["CORTEX_STORE_BASE_URL", "GRAPH_STORE_BASE_URL"];
    const API_TOKEN_VARS: [&'static str; 2] = ["CORTEX_STORE_API_TOKEN", "GRAPH_STORE_API_TOKEN"];
    const NAMESPACE_VARS: [&'static str; 2] = ["CORTEX_NAMESPACE", "GRAPH_STORE_NAMESPACE"];
    const TIMEOUT_VARS: [&'static str; 2] =
        ["CORTEX_STORE_TIMEOUT_MS", "GRAPH_STORE_HTTP_TIMEOUT_MS"];

    pub fn from_env() -> Self {
        Self {
            base_url: read_env(&Self::BASE_URL_VARS)
                .unwrap_or_else(|| "http://127.0.0.1:6969".to_string()),
            api_token: read_env(&Self::API_TOKEN_VARS),
            namespace: read_env(&Self::NAMESPACE_VARS).unwrap_or_else(|| "cortex".to_string()),
            http_timeout_ms: read_parsed(&Self::TIMEOUT_VARS).unwrap_or(10_000),
            max_retries: read_parsed(&["CORTEX_STORE_MAX_RETRIES"]).unwrap_or(3),
            retry_base_ms: read_parsed(&["CORTEX_STORE_RETRY_BASE_MS"]).unwrap_or(200),
        }
    }

    /// True when the deployment has pointed the fabric at a real store.
    pub fn is_configured() -> bool {
        read_env(&Self::BASE_URL_VARS).is_some()
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:6969".to_string(),
            api_token: None,
            namespace: "cortex".to_string(),
            http_timeout_ms: 10_000,
            max_retries: 3,
            retry_base_ms: 200,
        }
    }
}

/// Connection settings for the external embedding service.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Vector dimensionality the namespace is configured for
    pub vector_dim: usize,
}

impl EmbeddingConfig {
    const BASE_URL_VARS: [&'static str; 2] = ["CORTEX_EMBEDDING_BASE_URL", "OPENAI_BASE_URL"];
    const API_KEY_VARS: [&'static str; 2] = ["CORTEX_EMBEDDING_API_KEY", "OPENAI_API_KEY"];

    pub fn from_env() -> Self {
        Self {
            base_url: read_env(&Self::BASE_URL_VARS)
                .unwrap_or_else(|| "http://127.0.0.1:9000/v1".to_string()),
            api_key: read_env(&Self::API_KEY_VARS).unwrap_or_else(|| "sk-local".to_string()),
            model: read_env(&["CORTEX_EMBEDDING_MODEL"]).unwrap_or_else(|| "bge-m3".to_string()),
            vector_dim: read_parsed(&["CORTEX_VECTOR_DIM"]).unwrap_or(1024),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_vector_dim(mut self, dim: usize) -> Self {
        self.vector_dim = dim;
        self
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9000/v1".to_string(),
            api_key: "sk-local".to_string(),
            model: "bge-m3".to_string(),
            vector_dim: 1024,
        }
    }
}

/// Semantic routing feature flags.
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    pub enabled: bool,
    /// Minimum cosine similarity for a prototype match
    pub threshold: f32,
    /// How many top-scoring prototypes are considered for tie detection
    pub top_k: usize,
    /// Scores within this distance of the best are treated as tied
    pub tie_epsilon: f32,
}

impl RoutingConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: read_bool(&["CORTEX_ROUTING_ENABLED", "ROUTING_SEMANTIC_ENABLED"])
                .unwrap_or(true),
            threshold: read_parsed(&["CORTEX_ROUTING_THRESHOLD", "ROUTING_SEMANTIC_THRESHOLD"])
                .unwrap_or(0.35),
            top_k: read_parsed(&["CORTEX_ROUTING_TOP_K"]).unwrap_or(5),
            tie_epsilon: 1e-6,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.35,
            top_k: 5,
            tie_epsilon: 1e-6,
        }
    }
}

/// Retrieval pipeline knobs.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Neighbor hydration depth; 0 disables hydration entirely
    pub neighbor_depth: usize,
    /// Hits scoring below this floor are dropped
    pub min_score: f32,
    /// Whether writes dedupe by payload hash
    pub dedupe_enabled: bool,
}

impl RetrievalConfig {
    pub fn from_env() -> Self {
        Self {
            neighbor_depth: read_parsed(&["CORTEX_NEIGHBOR_DEPTH", "RAG_NEIGHBOR_DEPTH"])
                .unwrap_or(1),
            min_score: read_parsed(&["CORTEX_MIN_SCORE"]).unwrap_or(0.25),
            dedupe_enabled: read_bool(&["CORTEX_DEDUPE_ENABLED"]).unwrap_or(true),
        }
    }

    pub fn with_neighbor_depth(mut self, depth: usize) -> Self {
        self.neighbor_depth = depth;
        self
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn with_dedupe(mut self, enabled: bool) -> Self {
        self.dedupe_enabled = enabled;
        self
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            neighbor_depth: 1,
            min_score: 0.25,
            dedupe_enabled: true,
        }
    }
}

/// Evolution tracker knobs. Phase one is strictly report-only.
#[derive(Debug, Clone)]
pub struct EvolutionConfig {
    pub enabled: bool,
    /// Half-life for the decay weight
    pub half_life: Duration,
    /// Cadence of the background staleness report
    pub report_interval: Duration,
    /// Keys whose decay weight falls below this are recommended for pruning
    pub prune_threshold: f64,
}

impl EvolutionConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: read_bool(&["CORTEX_EVOLUTION_ENABLED"]).unwrap_or(false),
            half_life: Duration::from_secs(
                read_parsed(&["CORTEX_DECAY_HALF_LIFE_SECS"]).unwrap_or(7 * 24 * 3600),
            ),
            report_interval: Duration::from_secs(
                read_parsed(&["CORTEX_REPORT_INTERVAL_SECS"]).unwrap_or(3600),
            ),
            prune_threshold: read_parsed(&["CORTEX_PRUNE_THRESHOLD"]).unwrap_or(0.1),
        }
    }

    pub fn with_half_life(mut self, half_life: Duration) -> Self {
        self.half_life = half_life;
        self
    }

    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    pub fn with_prune_threshold(mut self, threshold: f64) -> Self {
        self.prune_threshold = threshold;
        self
    }
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            half_life: Duration::from_secs(7 * 24 * 3600),
            report_interval: Duration::from_secs(3600),
            prune_threshold: 0.1,
        }
    }
}

/// Aggregate configuration for a full fabric instance.
#[derive(Debug, Clone, Default)]
pub struct FabricConfig {
    pub store: StoreConfig,
    pub embedding: EmbeddingConfig,
    pub routing: RoutingConfig,
    pub retrieval: RetrievalConfig,
    pub evolution: EvolutionConfig,
}

impl FabricConfig {
    pub fn from_env() -> Self {
        Self {
            store: StoreConfig::from_env(),
            embedding: EmbeddingConfig::from_env(),
            routing: RoutingConfig::from_env(),
            retrieval: RetrievalConfig::from_env(),
            evolution: EvolutionConfig::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_config_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.namespace, "cortex");
        assert_eq!(config.http_timeout_ms, 10_000);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_store_config_builder() {
        let config = StoreConfig::default()
            .with_base_url("http://store.internal:8080")
            .with_namespace("tenant-a")
            .with_max_retries(1);
        assert_eq!(config.base_url, "http://store.internal:8080");
        assert_eq!(config.namespace, "tenant-a");
        assert_eq!(config.max_retries, 1);
    }

    #[test]
    fn test_routing_config_defaults() {
        let config = RoutingConfig::default();
        assert!(config.enabled);
        assert!((config.threshold - 0.35).abs() < f32::EPSILON);
        assert_eq!(config.top_k, 5);
    }

    #[test]
    fn test_retrieval_depth_zero_disables_hydration() {
        let config = RetrievalConfig::default().with_neighbor_depth(0);
        assert_eq!(config.neighbor_depth, 0);
    }

    #[test]
    fn test_evolution_defaults_report_only() {
        let config = EvolutionConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.half_life, Duration::from_secs(7 * 24 * 3600));
        assert!((config.prune_threshold - 0.1).abs() < f64::EPSILON);
    }
}

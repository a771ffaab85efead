//! Semantic router: dispatch requests to registered specialists.
//!
//! Dispatch runs three stages in strict precedence: explicit token, keyword
//! rule, then cosine similarity against intent prototypes. Anything that
//! clears none of them lands on the default handler. The prototype cache is
//! owned by the router instance and refreshed only by an explicit
//! `reload()`; there is no implicit invalidation and no process-wide state.

use regex::Regex;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::RoutingConfig;
use crate::embed::{cosine_similarity, SharedEmbedder};
use crate::error::{Error, Result};

/// One routable specialist. Registration order is significant: it is the
/// tie-break priority when semantic scores are indistinguishable.
#[derive(Debug, Clone)]
pub struct Specialist {
    pub name: String,
    /// Tokens that route here unconditionally when the lowercased query
    /// contains them; may carry punctuation (e.g. `@researcher`)
    pub explicit_tokens: Vec<String>,
    /// Keyword rules checked before any embedding work, evaluated against
    /// the lowercased query
    pub keyword_patterns: Vec<Regex>,
    /// Representative request texts; averaged into the intent prototype
    pub intent_examples: Vec<String>,
}

impl Specialist {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            explicit_tokens: Vec::new(),
            keyword_patterns: Vec::new(),
            intent_examples: Vec::new(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.explicit_tokens.push(token.into().to_lowercase());
        self
    }

    /// Patterns run against the lowercased query, so literal keywords match
    /// regardless of the caller's casing.
    pub fn with_keyword_pattern(mut self, pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| Error::Config(format!("Bad keyword pattern {:?}: {}", pattern, e)))?;
        self.keyword_patterns.push(regex);
        Ok(self)
    }

    pub fn with_intent_example(mut self, example: impl Into<String>) -> Self {
        self.intent_examples.push(example.into());
        self
    }
}

/// Ordered collection of specialists plus the fallback handler name.
#[derive(Debug, Clone)]
pub struct SpecialistRegistry {
    specialists: Vec<Specialist>,
    default_handler: String,
}

impl SpecialistRegistry {
    pub fn new(default_handler: impl Into<String>) -> Self {
        Self {
            specialists: Vec::new(),
            default_handler: default_handler.into(),
        }
    }

    pub fn register(mut self, specialist: Specialist) -> Self {
        self.specialists.push(specialist);
        self
    }

    pub fn specialists(&self) -> &[Specialist] {
        &self.specialists
    }

    pub fn default_handler(&self) -> &str {
        &self.default_handler
    }
}

/// Which stage produced a routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingStage {
    ExplicitToken,
    KeywordRule,
    Semantic,
    Default,
}

/// The outcome of one dispatch. Ambiguity is a diagnostic flag, never an
/// error; the decision always names exactly one handler.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub specialist: String,
    pub stage: RoutingStage,
    /// Cosine score; present only for semantic decisions
    pub score: Option<f32>,
    /// True when several prototypes scored within epsilon of the winner
    pub ambiguous: bool,
}

impl RoutingDecision {
    fn simple(specialist: &str, stage: RoutingStage) -> Self {
        Self {
            specialist: specialist.to_string(),
            stage,
            score: None,
            ambiguous: false,
        }
    }
}

struct Prototype {
    index: usize,
    name: String,
    vector: Vec<f32>,
}

pub struct SemanticRouter {
    registry: SpecialistRegistry,
    embedder: SharedEmbedder,
    config: RoutingConfig,
    /// Intent prototypes; empty until the first `reload()`
    prototypes: RwLock<Vec<Prototype>>,
}

impl SemanticRouter {
    pub fn new(registry: SpecialistRegistry, embedder: SharedEmbedder, config: RoutingConfig) -> Self {
        Self {
            registry,
            embedder,
            config,
            prototypes: RwLock::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &SpecialistRegistry {
        &self.registry
    }

    /// Rebuild the prototype cache from the registry's intent examples.
    /// Must be called before semantic dispatch can fire; dispatch never
    /// reloads implicitly.
    pub async fn reload(&self) -> Result<()> {
        let mut rebuilt = Vec::new();

        for (index, specialist) in self.registry.specialists.iter().enumerate() {
            if specialist.intent_examples.is_empty() {
                continue;
            }

            let mut sum: Vec<f32> = vec![0.0; self.embedder.dimension()];
            for example in &specialist.intent_examples {
                let vector = self.embedder.embed(example).await?;
                if vector.len() != sum.len() {
                    return Err(Error::embedding(format!(
                        "Prototype dimension mismatch for {}: {} != {}",
                        specialist.name,
                        vector.len(),
                        sum.len()
                    )));
                }
                for (slot, value) in sum.iter_mut().zip(vector.iter()) {
                    *slot += value;
                }
            }

            let count = specialist.intent_examples.len() as f32;
            for slot in sum.iter_mut() {
                *slot /= count;
            }

            rebuilt.push(Prototype {
                index,
                name: specialist.name.clone(),
                vector: sum,
            });
        }

        let count = rebuilt.len();
        *self.prototypes.write().await = rebuilt;
        info!(prototypes = count, "Routing prototypes reloaded");
        Ok(())
    }

    /// Substring containment, so aliases with punctuation
    /// (`specialist:researcher`, `@researcher`) match as registered.
    fn match_explicit_token(&self, query_lower: &str) -> Option<&Specialist> {
        self.registry.specialists.iter().find(|specialist| {
            specialist
                .explicit_tokens
                .iter()
                .any(|token| query_lower.contains(token.as_str()))
        })
    }

    fn match_keyword_rule(&self, query_lower: &str) -> Option<&Specialist> {
        self.registry.specialists.iter().find(|specialist| {
            specialist
                .keyword_patterns
                .iter()
                .any(|p| p.is_match(query_lower))
        })
    }

    async fn match_semantic(&self, query: &str) -> Result<Option<RoutingDecision>> {
        let prototypes = self.prototypes.read().await;
        if prototypes.is_empty() {
            debug!("Prototype cache empty, semantic stage skipped");
            return Ok(None);
        }

        let query_vector = self.embedder.embed(query).await?;
        let mut scored: Vec<(usize, &str, f32)> = prototypes
            .iter()
            .map(|p| (p.index, p.name.as_str(), cosine_similarity(&query_vector, &p.vector)))
            .collect();

        scored.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.config.top_k);

        let Some(&(_, _, best_score)) = scored.first() else {
            return Ok(None);
        };
        if best_score < self.config.threshold {
            return Ok(None);
        }

        // everything within epsilon of the best is a tie candidate; the
        // earliest-registered one wins
        let tied: Vec<&(usize, &str, f32)> = scored
            .iter()
            .filter(|(_, _, score)| best_score - score <= self.config.tie_epsilon)
            .collect();

        let winner = tied
            .iter()
            .min_by_key(|(index, _, _)| *index)
            .copied()
            .copied();

        Ok(winner.map(|(_, name, score)| {
            let ambiguous = tied.len() > 1;
            if ambiguous {
                warn!(specialist = name, score, candidates = tied.len(),
                      "Routing ambiguous, tie broken by registration order");
            }
            RoutingDecision {
                specialist: name.to_string(),
                stage: RoutingStage::Semantic,
                score: Some(score),
                ambiguous,
            }
        }))
    }

    /// Dispatch one request. Always yields a decision.
    pub async fn route(&self, query: &str) -> Result<RoutingDecision> {
        let query_lower = query.to_lowercase();

        if let Some(specialist) = self.match_explicit_token(&query_lower) {
            debug!(specialist = %specialist.name, "Routed by explicit token");
            return Ok(RoutingDecision::simple(
                &specialist.name,
                RoutingStage::ExplicitToken,
            ));
        }

        if let Some(specialist) = self.match_keyword_rule(&query_lower) {
            debug!(specialist = %specialist.name, "Routed by keyword rule");
            return Ok(RoutingDecision::simple(
                &specialist.name,
                RoutingStage::KeywordRule,
            ));
        }

        if self.config.enabled {
            if let Some(decision) = self.match_semantic(query).await? {
                debug!(specialist = %decision.specialist, score = ?decision.score,
                       "Routed by semantic similarity");
                return Ok(decision);
            }
        }

        Ok(RoutingDecision::simple(
            self.registry.default_handler(),
            RoutingStage::Default,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashingEmbedder;
    use std::sync::Arc;

    fn registry() -> SpecialistRegistry {
        SpecialistRegistry::new("generalist")
            .register(
                Specialist::new("researcher")
                    .with_token("research")
                    .with_keyword_pattern(r"(?i)\b(paper|survey|literature)\b")
                    .unwrap()
                    .with_intent_example("find papers about graph retrieval")
                    .with_intent_example("summarize the literature on vector search"),
            )
            .register(
                Specialist::new("coder")
                    .with_token("code")
                    .with_keyword_pattern(r"(?i)\b(implement|refactor|debug)\b")
                    .unwrap()
                    .with_intent_example("implement the retry loop in the client"),
            )
    }

    fn router(config: RoutingConfig) -> SemanticRouter {
        SemanticRouter::new(registry(), Arc::new(HashingEmbedder::new(64)), config)
    }

    #[tokio::test]
    async fn test_explicit_token_wins_over_everything() {
        let router = router(RoutingConfig::default());
        router.reload().await.unwrap();

        // body matches coder's keyword rule and intent, but the token wins
        let decision = router
            .route("research: please implement and debug the parser")
            .await
            .unwrap();
        assert_eq!(decision.specialist, "researcher");
        assert_eq!(decision.stage, RoutingStage::ExplicitToken);
    }

    #[tokio::test]
    async fn test_punctuated_alias_routes_explicitly() {
        let registry = SpecialistRegistry::new("generalist").register(
            Specialist::new("researcher")
                .with_token("specialist:researcher")
                .with_token("@researcher")
                .with_keyword_pattern(r"\bpaper\b")
                .unwrap(),
        );
        let router = SemanticRouter::new(
            registry,
            Arc::new(HashingEmbedder::new(64)),
            RoutingConfig::default(),
        );

        let decision = router
            .route("specialist:researcher please summarize the paper")
            .await
            .unwrap();
        assert_eq!(decision.specialist, "researcher");
        assert_eq!(decision.stage, RoutingStage::ExplicitToken);

        let decision = router.route("ask @Researcher about this").await.unwrap();
        assert_eq!(decision.stage, RoutingStage::ExplicitToken);
    }

    #[tokio::test]
    async fn test_keyword_rule_ignores_query_casing() {
        let registry = SpecialistRegistry::new("generalist").register(
            Specialist::new("researcher")
                .with_keyword_pattern(r"\bliterature\b")
                .unwrap(),
        );
        let router = SemanticRouter::new(
            registry,
            Arc::new(HashingEmbedder::new(64)),
            RoutingConfig::default(),
        );

        let decision = router
            .route("Summarize the LITERATURE on ranking")
            .await
            .unwrap();
        assert_eq!(decision.specialist, "researcher");
        assert_eq!(decision.stage, RoutingStage::KeywordRule);
    }

    #[tokio::test]
    async fn test_keyword_rule_beats_semantic() {
        let router = router(RoutingConfig::default());
        router.reload().await.unwrap();

        let decision = router
            .route("can you refactor the ranking module")
            .await
            .unwrap();
        assert_eq!(decision.specialist, "coder");
        assert_eq!(decision.stage, RoutingStage::KeywordRule);
    }

    #[tokio::test]
    async fn test_semantic_match_above_threshold() {
        let router = router(RoutingConfig::default().with_threshold(0.2));
        router.reload().await.unwrap();

        let decision = router
            .route("find papers about graph retrieval methods")
            .await
            .unwrap();
        assert_eq!(decision.specialist, "researcher");
        assert_eq!(decision.stage, RoutingStage::Semantic);
        assert!(decision.score.unwrap() >= 0.2);
    }

    #[tokio::test]
    async fn test_below_threshold_falls_to_default() {
        let router = router(RoutingConfig::default().with_threshold(0.99));
        router.reload().await.unwrap();

        let decision = router.route("unrelated gibberish xyzzy").await.unwrap();
        assert_eq!(decision.specialist, "generalist");
        assert_eq!(decision.stage, RoutingStage::Default);
        assert!(!decision.ambiguous);
    }

    #[tokio::test]
    async fn test_semantic_skipped_before_reload() {
        let router = router(RoutingConfig::default().with_threshold(0.0));

        // strong intent overlap, but no prototypes loaded yet
        let decision = router
            .route("find papers about graph retrieval methods")
            .await
            .unwrap();
        assert_eq!(decision.stage, RoutingStage::Default);
    }

    #[tokio::test]
    async fn test_routing_disabled_skips_semantic() {
        let router = router(RoutingConfig::default().with_enabled(false).with_threshold(0.0));
        router.reload().await.unwrap();

        let decision = router
            .route("find papers about graph retrieval methods")
            .await
            .unwrap();
        assert_eq!(decision.stage, RoutingStage::Default);
    }

    #[tokio::test]
    async fn test_tie_breaks_to_lowest_registration_index() {
        // two specialists with identical prototypes tie exactly
        let registry = SpecialistRegistry::new("generalist")
            .register(Specialist::new("first").with_intent_example("deploy the staging cluster"))
            .register(Specialist::new("second").with_intent_example("deploy the staging cluster"));

        let router = SemanticRouter::new(
            registry,
            Arc::new(HashingEmbedder::new(64)),
            RoutingConfig::default().with_threshold(0.2),
        );
        router.reload().await.unwrap();

        let decision = router.route("deploy the staging cluster").await.unwrap();
        assert_eq!(decision.specialist, "first");
        assert_eq!(decision.stage, RoutingStage::Semantic);
        assert!(decision.ambiguous);
    }
}

//! Embedding provider boundary.
//!
//! The embedding service is a black box reached over HTTP; this module
//! provides the trait seam, an OpenAI-style client with a bounded in-process
//! cache, and a deterministic offline embedder for tests and smoke runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// Producer of fixed-dimension embedding vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Dimensionality this provider is configured for.
    fn dimension(&self) -> usize;
}

pub type SharedEmbedder = Arc<dyn EmbeddingProvider>;

/// Cosine similarity between two vectors; 0.0 when either norm is zero or
/// dimensions disagree.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

const CACHE_CAPACITY: usize = 512;

/// HTTP client for an OpenAI-style `/embeddings` endpoint.
pub struct HttpEmbeddingClient {
    http: Client,
    config: EmbeddingConfig,
    cache: Mutex<HashMap<String, Vec<f32>>>,
}

#[derive(Debug, Serialize)]
struct EmbeddingApiRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingApiData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiData {
    embedding: Vec<f32>,
}

impl HttpEmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::embedding(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            config,
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn cache_key(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn cache_get(&self, key: &str) -> Option<Vec<f32>> {
        self.cache
            .lock()
            .ok()
            .and_then(|cache| cache.get(key).cloned())
    }

    fn cache_put(&self, key: String, vector: Vec<f32>) {
        if let Ok(mut cache) = self.cache.lock() {
            if cache.len() >= CACHE_CAPACITY {
                cache.clear();
            }
            cache.insert(key, vector);
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = Self::cache_key(text);
        if let Some(hit) = self.cache_get(&key) {
            return Ok(hit);
        }

        let api_request = EmbeddingApiRequest {
            model: self.config.model.clone(),
            input: vec![text.to_string()],
        };

        let url = format!("{}/embeddings", self.config.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::embedding(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::embedding(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(Error::embedding(format!(
                "Embedding API error ({}): {}",
                status, body
            )));
        }

        let api_response: EmbeddingApiResponse = serde_json::from_str(&body)
            .map_err(|e| Error::embedding(format!("Failed to parse response: {}", e)))?;

        let vector = api_response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| Error::embedding("Embedding response missing data"))?;

        if vector.len() != self.config.vector_dim {
            warn!(
                expected = self.config.vector_dim,
                actual = vector.len(),
                "Embedding dimension mismatch"
            );
        }

        self.cache_put(key, vector.clone());
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.config.vector_dim
    }
}

/// Deterministic offline embedder: hashes tokens into a fixed-dimension
/// bag-of-words vector. Not semantically meaningful, but stable, which is
/// what tests and store-less smoke runs need.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn token_bucket(&self, token: &str) -> usize {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        let digest = hasher.finalize();
        let raw = u64::from_le_bytes(digest[..8].try_into().unwrap_or([0u8; 8]));
        (raw % self.dimension as u64) as usize
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            vector[self.token_bucket(token)] += 1.0;
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_bounds() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];

        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &c).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder::new(64);
        let v1 = embedder.embed("store this memory").await.unwrap();
        let v2 = embedder.embed("store this memory").await.unwrap();
        let v3 = embedder.embed("completely different text").await.unwrap();

        assert_eq!(v1, v2);
        assert_eq!(v1.len(), 64);
        assert!(cosine_similarity(&v1, &v3) < cosine_similarity(&v1, &v2));
    }

    #[tokio::test]
    async fn test_hashing_embedder_overlap_scores_higher() {
        let embedder = HashingEmbedder::default();
        let query = embedder.embed("vector search over memories").await.unwrap();
        let close = embedder.embed("search memories by vector").await.unwrap();
        let far = embedder.embed("gpu cluster budget planning").await.unwrap();

        assert!(cosine_similarity(&query, &close) > cosine_similarity(&query, &far));
    }
}

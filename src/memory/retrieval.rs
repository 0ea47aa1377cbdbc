//! Retrieval Engine
//!
//! Cosine similarity, top-k ranking over any embedded collection, and the
//! embedding front door (chunked batches, dimension checks, query reuse).

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::EmbeddingProvider;
use crate::agent::{AgentError, AgentResult, RetryPolicy};
use crate::config::RetrievalConfig;

/// Cosine similarity in [-1, 1]; 0.0 when either side has no magnitude or
/// the lengths disagree.
pub fn similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0) as f32
}

/// Anything the engine can rank.
pub trait Retrievable: Clone + Send + Sync {
    fn embedding(&self) -> &[f32];

    /// Category matched by the optional retrieval filter.
    fn category(&self) -> Option<&str> {
        None
    }

    /// Ineligible items (e.g. deprecated rules) are never returned.
    fn is_retrievable(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scored<T> {
    pub item: T,
    pub score: f32,
}

fn passes_filter<T: Retrievable>(item: &T, filter: Option<&str>) -> bool {
    match filter {
        None => true,
        Some(wanted) => item.category().map_or(false, |c| c.eq_ignore_ascii_case(wanted)),
    }
}

/// Top-k by similarity, descending; equal scores keep insertion order.
pub fn rank<T: Retrievable>(query: &[f32], items: &[T], k: usize, filter: Option<&str>) -> Vec<Scored<T>> {
    if k == 0 {
        return Vec::new();
    }

    let mut scored: Vec<(usize, f32)> = items
        .par_iter()
        .enumerate()
        .filter(|(_, item)| item.is_retrievable() && passes_filter(*item, filter))
        .map(|(i, item)| (i, similarity(query, item.embedding())))
        .collect();

    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scored.truncate(k);

    scored
        .into_iter()
        .map(|(i, score)| Scored { item: items[i].clone(), score })
        .collect()
}

pub struct RetrievalEngine {
    embedder: Arc<dyn EmbeddingProvider>,
    dimension: usize,
    batch_size: usize,
    cache_size: usize,
    retry: RetryPolicy,
    query_cache: RwLock<HashMap<String, Vec<f32>>>,
}

impl RetrievalEngine {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, config: &RetrievalConfig) -> Self {
        Self {
            embedder,
            dimension: config.dimension,
            batch_size: config.batch_size.max(1),
            cache_size: config.query_cache_size,
            retry: RetryPolicy::default(),
            query_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed a single text, reusing an earlier embedding of the same text.
    pub async fn embed(&self, text: &str) -> AgentResult<Vec<f32>> {
        if let Some(hit) = self.query_cache.read().await.get(text) {
            return Ok(hit.clone());
        }

        let vector = self
            .embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::RetrievalUnavailable("embedder returned no vector".into()))?;

        if self.cache_size > 0 {
            let mut cache = self.query_cache.write().await;
            if cache.len() >= self.cache_size {
                cache.clear();
            }
            cache.insert(text.to_string(), vector.clone());
        }
        Ok(vector)
    }

    /// Embed many texts, at most `batch_size` per provider call.
    pub async fn embed_batch(&self, texts: &[String]) -> AgentResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(self.batch_size) {
            debug!("Embedding chunk of {} text(s)", chunk.len());
            let vectors = self
                .retry
                .run("embed", || {
                    let embedder = self.embedder.clone();
                    let chunk = chunk.to_vec();
                    async move { embedder.embed_batch(chunk).await }
                })
                .await
                .map_err(|e| AgentError::RetrievalUnavailable(e.to_string()))?;

            if vectors.len() != chunk.len() {
                return Err(AgentError::RetrievalUnavailable(format!(
                    "embedder returned {} vectors for {} texts",
                    vectors.len(),
                    chunk.len()
                )));
            }
            for v in &vectors {
                if v.len() != self.dimension {
                    return Err(AgentError::DimensionMismatch { expected: self.dimension, actual: v.len() });
                }
            }
            out.extend(vectors);
        }
        Ok(out)
    }

    /// Embed `query` (or reuse it) and rank `items` against it.
    pub async fn retrieve<T: Retrievable>(
        &self,
        query: &str,
        items: &[T],
        k: usize,
        filter: Option<&str>,
    ) -> AgentResult<Vec<Scored<T>>> {
        let query_embedding = self.embed(query).await?;
        Ok(rank(&query_embedding, items, k, filter))
    }

    /// Like [`retrieve`](Self::retrieve), but an unreachable embedder yields no results.
    pub async fn retrieve_or_empty<T: Retrievable>(
        &self,
        query: &str,
        items: &[T],
        k: usize,
        filter: Option<&str>,
    ) -> Vec<Scored<T>> {
        match self.retrieve(query, items, k, filter).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Retrieval degraded to empty context: {}", e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug)]
    struct Item {
        name: &'static str,
        embedding: Vec<f32>,
        category: &'static str,
        live: bool,
    }

    impl Retrievable for Item {
        fn embedding(&self) -> &[f32] {
            &self.embedding
        }
        fn category(&self) -> Option<&str> {
            Some(self.category)
        }
        fn is_retrievable(&self) -> bool {
            self.live
        }
    }

    fn item(name: &'static str, embedding: Vec<f32>) -> Item {
        Item { name, embedding, category: "pension", live: true }
    }

    #[test]
    fn test_similarity_identity_symmetry_zero() {
        let v = vec![0.3f32; 1536];
        assert!((similarity(&v, &v) - 1.0).abs() < 1e-6);

        let a = vec![1.0, 2.0, -0.5];
        let b = vec![-0.2, 0.7, 3.0];
        assert_eq!(similarity(&a, &b), similarity(&b, &a));

        let zero = vec![0.0; 3];
        assert_eq!(similarity(&a, &zero), 0.0);
        assert_eq!(similarity(&zero, &zero), 0.0);
    }

    #[test]
    fn test_similarity_range() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((similarity(&a, &b) + 1.0).abs() < 1e-6);
        assert_eq!(similarity(&a, &[1.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_rank_orders_truncates_and_is_stable() {
        let items = vec![
            item("a", vec![1.0, 0.0]),
            item("b", vec![0.8, 0.2]),
            item("c", vec![0.0, 1.0]),
            item("d", vec![0.6, 0.4]),
            item("e", vec![0.9, 0.1]),
        ];
        let query = [1.0, 0.0];

        let first = rank(&query, &items, 3, None);
        assert_eq!(first.len(), 3);
        assert!(first.windows(2).all(|w| w[0].score >= w[1].score));
        assert_eq!(first.iter().map(|s| s.item.name).collect::<Vec<_>>(), vec!["a", "e", "b"]);

        let again = rank(&query, &items, 3, None);
        assert_eq!(
            first.iter().map(|s| s.item.name).collect::<Vec<_>>(),
            again.iter().map(|s| s.item.name).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_rank_ties_break_by_insertion() {
        let items = vec![item("first", vec![1.0, 1.0]), item("second", vec![1.0, 1.0])];
        let ranked = rank(&[1.0, 1.0], &items, 2, None);
        assert_eq!(ranked[0].item.name, "first");
    }

    #[test]
    fn test_rank_skips_ineligible_and_filters() {
        let mut dead = item("dead", vec![1.0, 0.0]);
        dead.live = false;
        let mut other = item("other", vec![1.0, 0.0]);
        other.category = "mortgage";
        let items = vec![dead, other, item("kept", vec![0.5, 0.5])];

        let ranked = rank(&[1.0, 0.0], &items, 10, Some("Pension"));
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].item.name, "kept");
        assert!(rank(&[1.0, 0.0], &items, 0, None).is_empty());
    }

    struct FixedEmbedder {
        dim: usize,
        calls: AtomicUsize,
        max_batch: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed_batch(&self, texts: Vec<String>) -> anyhow::Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.max_batch.fetch_max(texts.len(), Ordering::SeqCst);
            Ok(texts.iter().map(|t| vec![t.len() as f32; self.dim]).collect())
        }
    }

    fn engine(dim: usize, provider_dim: usize, batch: usize) -> (RetrievalEngine, Arc<FixedEmbedder>) {
        let embedder = Arc::new(FixedEmbedder { dim: provider_dim, calls: AtomicUsize::new(0), max_batch: AtomicUsize::new(0) });
        let config = RetrievalConfig { dimension: dim, batch_size: batch, ..RetrievalConfig::default() };
        let engine = RetrievalEngine::new(embedder.clone(), &config).with_retry(RetryPolicy::immediate());
        (engine, embedder)
    }

    #[tokio::test]
    async fn test_embed_batch_chunks_requests() {
        let (engine, embedder) = engine(4, 4, 2);
        let texts: Vec<String> = (0..5).map(|i| format!("text {}", i)).collect();
        let vectors = engine.embed_batch(&texts).await.unwrap();
        assert_eq!(vectors.len(), 5);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
        assert_eq!(embedder.max_batch.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_query_embedding_is_reused() {
        let (engine, embedder) = engine(4, 4, 8);
        engine.embed("same question").await.unwrap();
        engine.embed("same question").await.unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_typed() {
        let (engine, _) = engine(8, 4, 8);
        let err = engine.embed("x").await.unwrap_err();
        assert!(matches!(err, AgentError::DimensionMismatch { expected: 8, actual: 4 }));
    }
}

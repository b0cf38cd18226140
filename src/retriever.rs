//! Context retrieval against a named vector store.
//!
//! The orchestrator reaches retrieval through the [`ContextRetriever`] trait
//! so tests (and alternative backends) can stand in for the vector-backed
//! implementation. [`VectorRetriever`] executes one of three strategies and
//! never raises: any failure to resolve the store, the embedder, or the
//! settings degrades to a single synthetic error document so the turn can
//! continue without context.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RagError;
use crate::message::Document;
use crate::models::EmbeddingModel;
use crate::settings::{RagSettings, SearchStrategy, VectorStoreDescriptor};
use crate::store::{ScoredChunk, VectorStore};

/// Source label attached to the synthetic document produced when retrieval
/// degrades.
pub const ERROR_SOURCE: &str = "retrieval-error";

#[async_trait]
pub trait ContextRetriever: Send + Sync {
    /// Ranked documents for a query. Infallible by contract: implementations
    /// degrade internally rather than failing the turn.
    async fn retrieve(&self, query: &str) -> Vec<Document>;
}

pub struct VectorRetriever {
    store: VectorStore,
    embedder: Arc<dyn EmbeddingModel>,
    descriptor: VectorStoreDescriptor,
    settings: RagSettings,
}

impl VectorRetriever {
    pub fn new(
        store: VectorStore,
        embedder: Arc<dyn EmbeddingModel>,
        descriptor: VectorStoreDescriptor,
        settings: RagSettings,
    ) -> Self {
        Self {
            store,
            embedder,
            descriptor,
            settings,
        }
    }

    async fn try_retrieve(&self, query: &str) -> Result<Vec<Document>, RagError> {
        let store_name = self.descriptor.store_name();
        if !self.store.table_exists(&store_name).await? {
            return Err(RagError::Config(format!(
                "vector store '{store_name}' does not exist"
            )));
        }

        let query_embedding = self
            .embedder
            .embed(&[query.to_string()])
            .await
            .map_err(|err| RagError::Embedding(err.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::Embedding("embedder returned no vector".into()))?;

        let metric = self.descriptor.distance_metric;
        match self.settings.strategy {
            SearchStrategy::Similarity => {
                let hits = self
                    .store
                    .nearest(&self.descriptor, &query_embedding, self.settings.top_k)
                    .await?;
                Ok(hits.into_iter().map(|h| to_document(h, metric)).collect())
            }
            SearchStrategy::SimilarityScoreThreshold => {
                let threshold = self.settings.score_threshold.ok_or_else(|| {
                    RagError::Config(
                        "similarity_score_threshold requires a score_threshold".into(),
                    )
                })?;
                let hits = self
                    .store
                    .nearest(&self.descriptor, &query_embedding, self.settings.top_k)
                    .await?;
                Ok(hits
                    .into_iter()
                    .map(|h| to_document(h, metric))
                    .filter(|d| d.score.is_some_and(|s| s >= threshold))
                    .collect())
            }
            SearchStrategy::Mmr => {
                let fetch_k = self.settings.fetch_k.max(self.settings.top_k);
                let candidates = self
                    .store
                    .nearest(&self.descriptor, &query_embedding, fetch_k)
                    .await?;
                let selected = maximal_marginal_relevance(
                    &query_embedding,
                    candidates,
                    self.settings.top_k,
                    self.settings.lambda_mult,
                );
                Ok(selected
                    .into_iter()
                    .map(|h| to_document(h, metric))
                    .collect())
            }
        }
    }
}

#[async_trait]
impl ContextRetriever for VectorRetriever {
    async fn retrieve(&self, query: &str) -> Vec<Document> {
        match self.try_retrieve(query).await {
            Ok(documents) => documents,
            Err(err) => {
                tracing::warn!(error = %err, "retrieval degraded to synthetic error document");
                vec![Document::new(
                    format!("Context retrieval failed: {err}"),
                    ERROR_SOURCE,
                )]
            }
        }
    }
}

fn to_document(hit: ScoredChunk, metric: crate::settings::DistanceMetric) -> Document {
    Document::new(hit.content, hit.source).with_score(metric.score(hit.distance))
}

/// Greedy MMR re-ranking over a candidate pool.
///
/// Each round picks the candidate maximizing
/// `lambda * sim(query, c) - (1 - lambda) * max sim(c, selected)`.
fn maximal_marginal_relevance(
    query: &[f32],
    candidates: Vec<ScoredChunk>,
    top_k: usize,
    lambda: f32,
) -> Vec<ScoredChunk> {
    let mut pool: Vec<(ScoredChunk, f32)> = candidates
        .into_iter()
        .map(|c| {
            let relevance = c
                .embedding
                .as_ref()
                .map_or(0.0, |e| cosine_similarity(query, e));
            (c, relevance)
        })
        .collect();

    let mut selected: Vec<ScoredChunk> = Vec::new();
    while selected.len() < top_k && !pool.is_empty() {
        let mut best = 0usize;
        let mut best_score = f32::NEG_INFINITY;
        for (i, (candidate, relevance)) in pool.iter().enumerate() {
            let redundancy = selected
                .iter()
                .filter_map(|s| {
                    match (&candidate.embedding, &s.embedding) {
                        (Some(a), Some(b)) => Some(cosine_similarity(a, b)),
                        _ => None,
                    }
                })
                .fold(0.0f32, f32::max);
            let score = lambda * relevance - (1.0 - lambda) * redundancy;
            if score > best_score {
                best_score = score;
                best = i;
            }
        }
        selected.push(pool.swap_remove(best).0);
    }
    selected
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

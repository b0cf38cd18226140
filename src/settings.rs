//! Retrieval settings and the vector-store descriptor.
//!
//! A [`VectorStoreDescriptor`] is the configuration fingerprint identifying
//! one vector store: alias, embedding model, splitter geometry, distance
//! metric, and index type. Its physical store name is a deterministic,
//! collision-free function of those fields — two descriptors with identical
//! fields always address the same store, and changing any field addresses a
//! different one. The descriptor also serializes to the flat JSON object
//! persisted in the store catalog; that JSON is the only catalog there is.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::RagError;

/// Search strategy executed by the retriever.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    /// Plain top-k nearest neighbours.
    Similarity,
    /// Top-k filtered to results at or above a minimum relevance score.
    SimilarityScoreThreshold,
    /// Maximal marginal relevance: fetch a wider candidate pool, re-rank
    /// trading relevance against diversity.
    Mmr,
}

impl SearchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchStrategy::Similarity => "similarity",
            SearchStrategy::SimilarityScoreThreshold => "similarity_score_threshold",
            SearchStrategy::Mmr => "mmr",
        }
    }
}

impl FromStr for SearchStrategy {
    type Err = RagError;

    /// Unknown strategy strings are a fatal configuration error, not a
    /// degrade path.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "similarity" => Ok(SearchStrategy::Similarity),
            "similarity_score_threshold" => Ok(SearchStrategy::SimilarityScoreThreshold),
            "mmr" => Ok(SearchStrategy::Mmr),
            other => Err(RagError::Config(format!(
                "unsupported search strategy '{other}'"
            ))),
        }
    }
}

/// Distance metric used by a store and its index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    Cosine,
    L2,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::L2 => "l2",
        }
    }

    /// SQL function computing this metric over two vectors.
    pub(crate) fn distance_fn(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "vec_distance_cosine",
            DistanceMetric::L2 => "vec_distance_l2",
        }
    }

    /// Convert a raw distance into a relevance score in a comparable range
    /// (higher is better).
    pub(crate) fn score(&self, distance: f32) -> f32 {
        match self {
            DistanceMetric::Cosine => 1.0 - distance,
            DistanceMetric::L2 => 1.0 / (1.0 + distance),
        }
    }
}

impl FromStr for DistanceMetric {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cosine" => Ok(DistanceMetric::Cosine),
            "l2" => Ok(DistanceMetric::L2),
            other => Err(RagError::Config(format!(
                "unsupported distance metric '{other}'"
            ))),
        }
    }
}

/// Per-turn retrieval settings supplied by the caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RagSettings {
    /// Master switch: when off, the retriever is never invoked.
    pub enabled: bool,
    pub strategy: SearchStrategy,
    pub top_k: usize,
    /// Minimum relevance score for `SimilarityScoreThreshold`.
    pub score_threshold: Option<f32>,
    /// Candidate pool size for `Mmr`.
    pub fetch_k: usize,
    /// Diversity weight for `Mmr`: 1.0 is pure relevance, 0.0 pure diversity.
    pub lambda_mult: f32,
    /// When off, retrieved context is trusted unconditionally.
    pub grading: bool,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: SearchStrategy::Similarity,
            top_k: 4,
            score_threshold: None,
            fetch_k: 20,
            lambda_mult: 0.5,
            grading: true,
        }
    }
}

/// Configuration fingerprint identifying one vector store.
///
/// Serializes to the flat JSON object written into the store catalog.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VectorStoreDescriptor {
    pub alias: String,
    pub embedding_model: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub distance_metric: DistanceMetric,
    pub index_type: String,
}

impl VectorStoreDescriptor {
    pub fn new(
        alias: impl Into<String>,
        embedding_model: impl Into<String>,
        chunk_size: usize,
        chunk_overlap: usize,
        distance_metric: DistanceMetric,
        index_type: impl Into<String>,
    ) -> Self {
        Self {
            alias: alias.into(),
            embedding_model: embedding_model.into(),
            chunk_size,
            chunk_overlap,
            distance_metric,
            index_type: index_type.into(),
        }
    }

    /// Physical store name: sanitized alias plus a fingerprint over every
    /// field. Identical fields always yield the same name; any field change
    /// yields a different one.
    #[must_use]
    pub fn store_name(&self) -> String {
        let canonical = format!(
            "{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}",
            self.alias,
            self.embedding_model,
            self.chunk_size,
            self.chunk_overlap,
            self.distance_metric.as_str(),
            self.index_type,
        );
        let digest = Sha256::digest(canonical.as_bytes());
        let fingerprint = format!("{digest:x}");
        format!("{}_{}", sanitize_identifier(&self.alias), &fingerprint[..12])
    }

    /// Derived name of the disposable staging table.
    #[must_use]
    pub fn staging_name(&self) -> String {
        format!("{}__staging", self.store_name())
    }

    /// Derived name of the ANN index table.
    #[must_use]
    pub fn index_name(&self) -> String {
        format!("{}__idx", self.store_name())
    }
}

fn sanitize_identifier(input: &str) -> String {
    let mut out: String = input
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() || out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, 's');
    }
    out
}

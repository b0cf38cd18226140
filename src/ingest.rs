//! Vector store ingestion pipeline.
//!
//! Extends a persisted store with no partially-visible intermediate state
//! and no redundant re-embedding within one call:
//!
//! 1. dedup chunks by exact text (first occurrence wins);
//! 2. drop any stale staging table, create a fresh one;
//! 3. embed in fixed-size batches, self-throttled when a requests-per-minute
//!    limit is configured;
//! 4. one atomic insert-where-not-present merge from staging into the
//!    target, keyed by content hash;
//! 5. drop staging;
//! 6. rebuild the ANN index (best effort — failure is logged and swallowed);
//! 7. write the descriptor JSON into the store catalog.
//!
//! Embedding and merge failures abort the run; because every intermediate
//! write lands in the disposable staging table, an aborted run leaves the
//! target exactly as it was.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::error::RagError;
use crate::models::EmbeddingModel;
use crate::settings::VectorStoreDescriptor;
use crate::splitter::{SplitterConfig, TextSplitter};
use crate::store::{Chunk, VectorStore};

/// Default number of chunks per embedding call.
pub const DEFAULT_EMBED_BATCH: usize = 500;

pub struct IngestionPipeline {
    store: VectorStore,
    embedder: Arc<dyn EmbeddingModel>,
    batch_size: usize,
    /// Embedding requests per minute; `None` disables throttling.
    rate_limit: Option<u32>,
}

impl IngestionPipeline {
    pub fn new(store: VectorStore, embedder: Arc<dyn EmbeddingModel>) -> Self {
        Self {
            store,
            embedder,
            batch_size: DEFAULT_EMBED_BATCH,
            rate_limit: None,
        }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Sleep `60 / rate_limit` seconds between embedding batches. This is a
    /// self-throttle against upstream rate limits, not a throughput knob.
    #[must_use]
    pub fn with_rate_limit(mut self, requests_per_minute: u32) -> Self {
        self.rate_limit = Some(requests_per_minute.max(1));
        self
    }

    /// Split raw `(source, text)` documents with the descriptor's splitter
    /// geometry, then ingest the resulting chunks.
    pub async fn ingest_files(
        &self,
        descriptor: &VectorStoreDescriptor,
        files: &[(String, String)],
    ) -> Result<usize, RagError> {
        let splitter = TextSplitter::new(SplitterConfig {
            chunk_size: descriptor.chunk_size,
            chunk_overlap: descriptor.chunk_overlap,
        })?;
        let mut chunks = Vec::new();
        for (source, text) in files {
            chunks.extend(splitter.split_source(source, text));
        }
        self.ingest_chunks(descriptor, chunks).await
    }

    /// Run the full staged pipeline. Returns the number of chunks embedded.
    pub async fn ingest_chunks(
        &self,
        descriptor: &VectorStoreDescriptor,
        chunks: Vec<Chunk>,
    ) -> Result<usize, RagError> {
        let store_name = descriptor.store_name();
        let staging = descriptor.staging_name();

        let deduped = dedup_by_content(chunks);
        tracing::debug!(
            store = %store_name,
            chunks = deduped.len(),
            "starting ingestion run"
        );

        // A stale staging table from an aborted run is dropped, which is
        // what makes retrying an ingestion idempotent.
        self.store.drop_table(&staging).await?;
        self.store.ensure_chunk_table(&staging).await?;

        let mut embedded = 0usize;
        let batches: Vec<&[Chunk]> = deduped.chunks(self.batch_size).collect();
        let batch_count = batches.len();
        for (i, batch) in batches.into_iter().enumerate() {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let vectors = self
                .embedder
                .embed(&texts)
                .await
                .map_err(|err| RagError::Embedding(err.to_string()))?;
            if vectors.len() != batch.len() {
                return Err(RagError::Embedding(format!(
                    "embedder returned {} vectors for {} chunks",
                    vectors.len(),
                    batch.len()
                )));
            }

            let rows: Vec<Chunk> = batch
                .iter()
                .cloned()
                .zip(vectors)
                .map(|(chunk, vector)| chunk.with_embedding(vector))
                .collect();
            self.store.insert_chunks(&staging, rows).await?;
            embedded += batch.len();

            if let Some(rpm) = self.rate_limit
                && i + 1 < batch_count
            {
                tokio::time::sleep(Duration::from_secs_f64(60.0 / f64::from(rpm))).await;
            }
        }

        self.store.ensure_chunk_table(&store_name).await?;
        let inserted = self.store.merge(&staging, &store_name).await?;
        self.store.drop_table(&staging).await?;

        if let Err(err) = self.store.rebuild_index(descriptor).await {
            tracing::warn!(
                store = %store_name,
                error = %err,
                "index rebuild failed, store remains usable unindexed"
            );
        }

        self.store.write_descriptor(descriptor).await?;
        tracing::debug!(
            store = %store_name,
            embedded,
            inserted,
            "ingestion run complete"
        );
        Ok(embedded)
    }
}

/// Keep the first occurrence of each exact text value.
fn dedup_by_content(chunks: Vec<Chunk>) -> Vec<Chunk> {
    let mut seen = HashSet::new();
    chunks
        .into_iter()
        .filter(|chunk| seen.insert(chunk.content.clone()))
        .collect()
}

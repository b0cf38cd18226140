//! Integration tests for the staged ingestion pipeline against a real
//! sqlite-vec store, using deterministic mock embeddings.

use std::sync::Arc;

use tempfile::tempdir;

use ragmill::ingest::IngestionPipeline;
use ragmill::models::mock::MockEmbeddingModel;
use ragmill::retriever::{ContextRetriever, VectorRetriever};
use ragmill::settings::{DistanceMetric, RagSettings, SearchStrategy, VectorStoreDescriptor};
use ragmill::store::{Chunk, VectorStore};

fn descriptor(alias: &str) -> VectorStoreDescriptor {
    VectorStoreDescriptor::new(alias, "mock-embed", 500, 50, DistanceMetric::Cosine, "vec0")
}

async fn open_store(dir: &tempfile::TempDir) -> VectorStore {
    VectorStore::open(dir.path().join("vectors.db")).await.unwrap()
}

fn pipeline(store: &VectorStore) -> IngestionPipeline {
    IngestionPipeline::new(store.clone(), Arc::new(MockEmbeddingModel::new()))
}

/// Text whose 500/50 windows are all distinct: a running counter is woven
/// through the whole document.
fn distinct_text(len: usize) -> String {
    let mut text = String::new();
    let mut i = 0usize;
    while text.len() < len {
        text.push_str(&format!("unit {i:05} lorem ipsum dolor sit amet "));
        i += 1;
    }
    text.truncate(len);
    text
}

#[tokio::test]
async fn duplicate_chunk_contents_collapse_to_one_row() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir).await;
    let descriptor = descriptor("dedup");

    let chunks = vec![
        Chunk::new("alpha content", "one.txt", 0),
        Chunk::new("beta content", "one.txt", 1),
        Chunk::new("alpha content", "two.txt", 0),
        Chunk::new("alpha content", "two.txt", 3),
    ];
    let embedded = pipeline(&store)
        .ingest_chunks(&descriptor, chunks)
        .await
        .unwrap();

    // Two unique contents were embedded, and two rows landed.
    assert_eq!(embedded, 2);
    assert_eq!(store.count(&descriptor.store_name()).await.unwrap(), 2);
}

#[tokio::test]
async fn reingesting_identical_content_is_idempotent() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir).await;
    let descriptor = descriptor("idempotent");

    let chunks = || {
        vec![
            Chunk::new("first passage", "doc.md", 0),
            Chunk::new("second passage", "doc.md", 1),
            Chunk::new("third passage", "doc.md", 2),
        ]
    };

    pipeline(&store)
        .ingest_chunks(&descriptor, chunks())
        .await
        .unwrap();
    assert_eq!(store.count(&descriptor.store_name()).await.unwrap(), 3);

    pipeline(&store)
        .ingest_chunks(&descriptor, chunks())
        .await
        .unwrap();
    assert_eq!(store.count(&descriptor.store_name()).await.unwrap(), 3);
}

#[tokio::test]
async fn two_files_with_duplicate_windows_yield_unique_rows() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir).await;
    let descriptor = descriptor("files");

    // 4550 chars → ten 500-char windows at stride 450; the second file is
    // the first 950 chars of the first, so its two windows duplicate the
    // first file's opening windows exactly.
    let file_one = distinct_text(4550);
    let file_two = file_one[..950].to_string();
    let files = vec![
        ("one.txt".to_string(), file_one),
        ("two.txt".to_string(), file_two),
    ];

    let embedded = pipeline(&store)
        .ingest_files(&descriptor, &files)
        .await
        .unwrap();
    assert_eq!(embedded, 10, "12 windows minus 2 exact duplicates");
    assert_eq!(store.count(&descriptor.store_name()).await.unwrap(), 10);

    // Re-running the same ingestion leaves the row count unchanged.
    let files = vec![
        ("one.txt".to_string(), distinct_text(4550)),
        ("two.txt".to_string(), distinct_text(4550)[..950].to_string()),
    ];
    pipeline(&store)
        .ingest_files(&descriptor, &files)
        .await
        .unwrap();
    assert_eq!(store.count(&descriptor.store_name()).await.unwrap(), 10);
}

#[tokio::test]
async fn merge_extends_an_existing_store_without_duplicates() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir).await;
    let descriptor = descriptor("extend");

    pipeline(&store)
        .ingest_chunks(
            &descriptor,
            vec![
                Chunk::new("kept from the first run", "a.md", 0),
                Chunk::new("shared between runs", "a.md", 1),
            ],
        )
        .await
        .unwrap();

    pipeline(&store)
        .ingest_chunks(
            &descriptor,
            vec![
                Chunk::new("shared between runs", "b.md", 0),
                Chunk::new("new in the second run", "b.md", 1),
            ],
        )
        .await
        .unwrap();

    assert_eq!(store.count(&descriptor.store_name()).await.unwrap(), 3);
}

#[tokio::test]
async fn embedding_failure_leaves_no_visible_data() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir).await;
    let descriptor = descriptor("aborted");

    let failing =
        IngestionPipeline::new(store.clone(), Arc::new(MockEmbeddingModel::failing()));
    let err = failing
        .ingest_chunks(&descriptor, vec![Chunk::new("doomed", "x.md", 0)])
        .await
        .unwrap_err();
    assert!(matches!(err, ragmill::RagError::Embedding(_)));

    // The target table was never created; only staging saw writes.
    assert!(!store.table_exists(&descriptor.store_name()).await.unwrap());

    // A later, healthy run recovers: the stale staging table is dropped on
    // entry and the data lands.
    pipeline(&store)
        .ingest_chunks(&descriptor, vec![Chunk::new("recovered", "x.md", 0)])
        .await
        .unwrap();
    assert_eq!(store.count(&descriptor.store_name()).await.unwrap(), 1);
    assert!(!store.table_exists(&descriptor.staging_name()).await.unwrap());
}

#[tokio::test]
async fn descriptor_is_written_as_catalog_metadata() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir).await;
    let descriptor = descriptor("cataloged");

    pipeline(&store)
        .ingest_chunks(&descriptor, vec![Chunk::new("row", "a.md", 0)])
        .await
        .unwrap();

    let read = store
        .read_descriptor(&descriptor.store_name())
        .await
        .unwrap();
    assert_eq!(read, Some(descriptor));
}

#[tokio::test]
async fn rate_limited_batches_still_ingest_everything() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir).await;
    let descriptor = descriptor("throttled");

    let embedded = pipeline(&store)
        .with_batch_size(2)
        .with_rate_limit(60_000)
        .ingest_chunks(
            &descriptor,
            vec![
                Chunk::new("a", "f", 0),
                Chunk::new("b", "f", 1),
                Chunk::new("c", "f", 2),
                Chunk::new("d", "f", 3),
                Chunk::new("e", "f", 4),
            ],
        )
        .await
        .unwrap();
    assert_eq!(embedded, 5);
    assert_eq!(store.count(&descriptor.store_name()).await.unwrap(), 5);
}

#[tokio::test]
async fn similarity_search_finds_the_exact_chunk_first() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir).await;
    let descriptor = descriptor("searchable");
    let embedder = Arc::new(MockEmbeddingModel::new());

    IngestionPipeline::new(store.clone(), embedder.clone())
        .ingest_chunks(
            &descriptor,
            vec![
                Chunk::new("the staging table is disposable", "merge.md", 0),
                Chunk::new("grading fails closed on ambiguity", "grade.md", 1),
                Chunk::new("indexes are rebuilt after each merge", "index.md", 2),
            ],
        )
        .await
        .unwrap();

    let settings = RagSettings {
        strategy: SearchStrategy::Similarity,
        top_k: 2,
        ..RagSettings::default()
    };
    let retriever = VectorRetriever::new(store, embedder, descriptor, settings);

    let documents = retriever
        .retrieve("the staging table is disposable")
        .await;
    assert_eq!(documents.len(), 2);
    assert_eq!(documents[0].content, "the staging table is disposable");
    assert_eq!(documents[0].source, "merge.md");
    assert!(documents[0].score.unwrap() > 0.99);
}

#[tokio::test]
async fn score_threshold_filters_weak_matches() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir).await;
    let descriptor = descriptor("thresholded");
    let embedder = Arc::new(MockEmbeddingModel::new());

    IngestionPipeline::new(store.clone(), embedder.clone())
        .ingest_chunks(
            &descriptor,
            vec![
                Chunk::new("an exact match for the query text", "hit.md", 0),
                Chunk::new("entirely unrelated musings about soup", "miss.md", 1),
            ],
        )
        .await
        .unwrap();

    let settings = RagSettings {
        strategy: SearchStrategy::SimilarityScoreThreshold,
        top_k: 5,
        score_threshold: Some(0.99),
        ..RagSettings::default()
    };
    let retriever = VectorRetriever::new(store, embedder, descriptor, settings);

    let documents = retriever.retrieve("an exact match for the query text").await;
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].source, "hit.md");
}

#[tokio::test]
async fn mmr_returns_top_k_documents() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir).await;
    let descriptor = descriptor("diverse");
    let embedder = Arc::new(MockEmbeddingModel::new());

    IngestionPipeline::new(store.clone(), embedder.clone())
        .ingest_chunks(
            &descriptor,
            vec![
                Chunk::new("merge semantics and row identity", "a.md", 0),
                Chunk::new("batching and rate limits", "b.md", 1),
                Chunk::new("catalog descriptors in json", "c.md", 2),
                Chunk::new("relevance grading of context", "d.md", 3),
            ],
        )
        .await
        .unwrap();

    let settings = RagSettings {
        strategy: SearchStrategy::Mmr,
        top_k: 2,
        fetch_k: 4,
        lambda_mult: 0.7,
        ..RagSettings::default()
    };
    let retriever = VectorRetriever::new(store, embedder, descriptor, settings);

    let documents = retriever.retrieve("merge semantics and row identity").await;
    assert_eq!(documents.len(), 2);
    assert_eq!(documents[0].content, "merge semantics and row identity");
}

//! # ragmill: retrieval-augmented conversation engine
//!
//! Two halves, one crate:
//!
//! ```text
//! Source files ──► splitter ──► ingest (dedup ─► staging ─► batch embed
//!                                  ─► atomic merge ─► index ─► catalog)
//!                                               │
//!                                               ▼
//!                                         store (sqlite-vec)
//!                                               │
//! User turn ──► turn::TurnEngine ──► retriever ─┘
//!                    │    │
//!                    │    └──► grader (yes/no, fail closed)
//!                    ▼
//!              envelope::ChatCompletion  (+ stream of token deltas)
//! ```
//!
//! The conversation side runs each turn as an explicit state machine
//! ([`turn::TurnEngine`]): decide whether to retrieve, grade the retrieved
//! context, generate grounded or direct, and normalize the reply into one
//! [`envelope::ChatCompletion`]. Upstream failures degrade instead of
//! killing the conversation.
//!
//! The ingestion side ([`ingest::IngestionPipeline`]) turns documents into
//! deduplicated, embedded, indexed rows of a persisted vector store using a
//! stage-then-merge pattern, so retries and concurrent runs converge instead
//! of duplicating data.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use ragmill::history::MemoryHistory;
//! use ragmill::ingest::IngestionPipeline;
//! use ragmill::models::EmbeddingModel;
//! use ragmill::models::mock::{MockChatModel, MockEmbeddingModel};
//! use ragmill::retriever::VectorRetriever;
//! use ragmill::settings::{DistanceMetric, RagSettings, VectorStoreDescriptor};
//! use ragmill::store::VectorStore;
//! use ragmill::turn::{TurnConfig, TurnEngine};
//!
//! # async fn demo() -> Result<(), ragmill::error::RagError> {
//! let store = VectorStore::open("knowledge.db").await?;
//! let embedder = Arc::new(MockEmbeddingModel::new());
//! let descriptor = VectorStoreDescriptor::new(
//!     "docs", embedder.model_name(), 500, 50, DistanceMetric::Cosine, "vec0",
//! );
//!
//! let pipeline = IngestionPipeline::new(store.clone(), embedder.clone());
//! let files = vec![("guide.md".to_string(), "…document text…".to_string())];
//! pipeline.ingest_files(&descriptor, &files).await?;
//!
//! let retriever = VectorRetriever::new(
//!     store, embedder, descriptor, RagSettings::default(),
//! );
//! let engine = TurnEngine::builder()
//!     .chat(Arc::new(MockChatModel::with_replies(vec!["yes", "answer"])))
//!     .retriever(Arc::new(retriever))
//!     .history(Arc::new(MemoryHistory::new()))
//!     .config(TurnConfig::default())
//!     .build();
//!
//! let completion = engine.run("thread-1", "What does the guide say?").await?;
//! println!("{}", completion.content().unwrap_or_default());
//! # Ok(())
//! # }
//! ```
//!
//! ## Module guide
//!
//! - [`message`] — chat and retrieval message variants, documents
//! - [`history`] — append-only conversation history behind a trait
//! - [`models`] — chat/embedding adapter traits, HTTP adapter, mocks
//! - [`splitter`] — fixed-size overlapping chunking
//! - [`store`] — sqlite-vec backed stores, staging, merge, index, catalog
//! - [`ingest`] — the staged ingestion pipeline
//! - [`retriever`] — similarity / threshold / MMR search with degrade
//! - [`grader`] — binary relevance grading, fail closed
//! - [`turn`] — the per-turn state machine
//! - [`envelope`] — the normalized completion envelope
//! - [`stream`] — visible-tagged token streaming with an end sentinel

pub mod envelope;
pub mod error;
pub mod grader;
pub mod history;
pub mod ingest;
pub mod message;
pub mod models;
pub mod retriever;
pub mod settings;
pub mod splitter;
pub mod store;
pub mod stream;
pub mod turn;

pub use envelope::{ChatCompletion, FinishReason, Usage};
pub use error::RagError;
pub use message::{Document, Message, Role};
pub use settings::{DistanceMetric, RagSettings, SearchStrategy, VectorStoreDescriptor};
pub use store::{Chunk, VectorStore};
pub use stream::{StreamFragment, TokenSink};
pub use turn::{TurnConfig, TurnEngine};

//! SQLite-backed vector storage.
//!
//! One database file holds any number of logical stores. Each store is a
//! plain chunk table addressed by its descriptor-derived name, an optional
//! `vec0` ANN index table (`<store>__idx`), and a row in the `store_catalog`
//! table carrying the descriptor JSON — the catalog row is the only
//! persisted metadata format the crate defines.
//!
//! # Layout
//!
//! ```text
//! <store>            hash TEXT PRIMARY KEY, source, seq, content, embedding
//! <store>__staging   identical shape, disposable, rebuilt per ingestion run
//! <store>__idx       vec0 virtual table over the store's embeddings
//! store_catalog      store_name TEXT PRIMARY KEY, descriptor TEXT (flat JSON)
//! ```
//!
//! Row identity is the SHA-256 of the chunk content, which is what makes the
//! staging → target merge idempotent and commutative across concurrent
//! ingestion runs.

use std::mem::transmute;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::Once;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio_rusqlite::{Connection, OptionalExtension, ffi};

use crate::error::RagError;
use crate::settings::{DistanceMetric, VectorStoreDescriptor};

/// A bounded span of source text plus provenance; the unit of embedding and
/// retrieval. Immutable once stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// The chunk text.
    pub content: String,
    /// Source filename or identifier.
    pub source: String,
    /// Zero-based sequence id within the source.
    pub seq: usize,
    /// The embedding vector, once computed.
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    pub fn new(content: impl Into<String>, source: impl Into<String>, seq: usize) -> Self {
        Self {
            content: content.into(),
            source: source.into(),
            seq,
            embedding: None,
        }
    }

    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Content-derived row identity.
    #[must_use]
    pub fn content_hash(&self) -> String {
        let digest = Sha256::digest(self.content.as_bytes());
        format!("{digest:x}")
    }
}

/// A chunk returned from a similarity query, with its raw distance.
#[derive(Clone, Debug)]
pub struct ScoredChunk {
    pub content: String,
    pub source: String,
    pub seq: usize,
    pub embedding: Option<Vec<f32>>,
    pub distance: f32,
}

/// Handle to one SQLite database holding vector stores.
#[derive(Clone)]
pub struct VectorStore {
    conn: Connection,
}

impl VectorStore {
    /// Open (or create) the database at `path` with the `sqlite-vec`
    /// extension registered.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, RagError> {
        register_sqlite_vec()?;
        let conn = Connection::open(path)
            .await
            .map_err(|err| RagError::Storage(err.to_string()))?;
        Self::init(conn).await
    }

    /// In-process database for tests and scratch work.
    pub async fn open_in_memory() -> Result<Self, RagError> {
        register_sqlite_vec()?;
        let conn = Connection::open_in_memory()
            .await
            .map_err(|err| RagError::Storage(err.to_string()))?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, RagError> {
        conn.call(|conn| {
            // Sanity-check the extension before anything touches vec_* SQL.
            let result = conn.query_row("select vec_version()", [], |row| row.get::<_, String>(0));
            match result {
                Ok(_) => {}
                Err(err) => return Err(err),
            }
            // WAL keeps concurrent ingestion runs and readers off each
            // other's toes on the same file.
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS store_catalog (
                     store_name TEXT PRIMARY KEY,
                     descriptor TEXT NOT NULL
                 )",
                [],
            )?;
            Ok(())
        })
        .await
        .map_err(|err| RagError::Storage(err.to_string()))?;
        Ok(Self { conn })
    }

    /// Underlying connection, for operations this type does not cover.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Create a chunk table if it does not exist yet.
    pub async fn ensure_chunk_table(&self, name: &str) -> Result<(), RagError> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS \"{name}\" (
                 hash TEXT PRIMARY KEY,
                 source TEXT,
                 seq TEXT,
                 content TEXT,
                 embedding TEXT
             )"
        );
        self.conn
            .call(move |conn| {
                conn.execute(&sql, [])?;
                Ok(())
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))
    }

    /// Drop a table (chunk or index) if present.
    pub async fn drop_table(&self, name: &str) -> Result<(), RagError> {
        let sql = format!("DROP TABLE IF EXISTS \"{name}\"");
        self.conn
            .call(move |conn| {
                conn.execute(&sql, [])?;
                Ok(())
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))
    }

    pub async fn table_exists(&self, name: &str) -> Result<bool, RagError> {
        let name = name.to_string();
        self.conn
            .call(move |conn| {
                let found = conn
                    .query_row(
                        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
                        [&name],
                        |_| Ok(()),
                    )
                    .optional()?;
                Ok(found.is_some())
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))
    }

    /// Insert embedded chunks into `table` inside one transaction.
    ///
    /// Rows are keyed by content hash; a duplicate hash is ignored rather
    /// than duplicated.
    pub async fn insert_chunks(&self, table: &str, chunks: Vec<Chunk>) -> Result<(), RagError> {
        if chunks.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "INSERT OR IGNORE INTO \"{table}\" (hash, source, seq, content, embedding)
             VALUES (?, ?, ?, ?, ?)"
        );
        self.conn
            .call(move |conn| {
                let tx = conn
                    .transaction()?;
                {
                    let mut stmt = tx.prepare(&sql)?;
                    for chunk in &chunks {
                        let embedding = chunk
                            .embedding
                            .as_ref()
                            .map(|v| serde_json::to_string(v).unwrap_or_default())
                            .unwrap_or_default();
                        stmt.execute([
                            chunk.content_hash(),
                            chunk.source.clone(),
                            chunk.seq.to_string(),
                            chunk.content.clone(),
                            embedding,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))
    }

    /// Merge `staging` into `target` with one atomic
    /// insert-where-not-present statement keyed on the content hash.
    ///
    /// Re-running the merge, or racing it from a second ingestion, converges
    /// on the same target rows instead of duplicating them. Returns the
    /// number of rows actually inserted.
    pub async fn merge(&self, staging: &str, target: &str) -> Result<usize, RagError> {
        let sql = format!(
            "INSERT INTO \"{target}\" (hash, source, seq, content, embedding)
             SELECT s.hash, s.source, s.seq, s.content, s.embedding
             FROM \"{staging}\" s
             WHERE NOT EXISTS (SELECT 1 FROM \"{target}\" t WHERE t.hash = s.hash)"
        );
        self.conn
            .call(move |conn| {
                conn.execute(&sql, [])
            })
            .await
            .map_err(|err| RagError::Storage(err.to_string()))
    }

    /// Drop and rebuild the store's `vec0` index from its current rows.
    ///
    /// A store with no embedded rows gets no index; that is not an error.
    pub async fn rebuild_index(&self, descriptor: &VectorStoreDescriptor) -> Result<(), RagError> {
        let store = descriptor.store_name();
        let index = descriptor.index_name();
        let metric = descriptor.distance_metric;
        self.conn
            .call(move |conn| {
                let sample: Option<String> = conn
                    .query_row(
                        &format!(
                            "SELECT embedding FROM \"{store}\" WHERE embedding != '' LIMIT 1"
                        ),
                        [],
                        |row| row.get(0),
                    )
                    .optional()?;

                conn.execute(&format!("DROP TABLE IF EXISTS \"{index}\""), [])?;

                let Some(sample) = sample else {
                    return Ok(());
                };
                let dimensions = serde_json::from_str::<Vec<f32>>(&sample)
                    .map(|v| v.len())
                    .unwrap_or(0);
                if dimensions == 0 {
                    return Ok(());
                }

                let column = match metric {
                    DistanceMetric::Cosine => {
                        format!("embedding float[{dimensions}] distance_metric=cosine")
                    }
                    DistanceMetric::L2 => format!("embedding float[{dimensions}]"),
                };
                conn.execute(
                    &format!("CREATE VIRTUAL TABLE \"{index}\" USING vec0({column})"),
                    [],
                )?;
                conn.execute(
                    &format!(
                        "INSERT INTO \"{index}\" (rowid, embedding)
                         SELECT rowid, vec_f32(embedding) FROM \"{store}\"
                         WHERE embedding != ''"
                    ),
                    [],
                )?;
                Ok(())
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))
    }

    /// Write or refresh the descriptor JSON attached to a store.
    pub async fn write_descriptor(
        &self,
        descriptor: &VectorStoreDescriptor,
    ) -> Result<(), RagError> {
        let store_name = descriptor.store_name();
        let json = serde_json::to_string(descriptor)
            .map_err(|err| RagError::Storage(err.to_string()))?;
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO store_catalog (store_name, descriptor) VALUES (?, ?)
                     ON CONFLICT(store_name) DO UPDATE SET descriptor = excluded.descriptor",
                    [store_name, json],
                )?;
                Ok(())
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))
    }

    /// Read back the descriptor attached to a store, if one was written.
    pub async fn read_descriptor(
        &self,
        store_name: &str,
    ) -> Result<Option<VectorStoreDescriptor>, RagError> {
        let store_name = store_name.to_string();
        let json: Option<String> = self
            .conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT descriptor FROM store_catalog WHERE store_name = ?",
                    [&store_name],
                    |row| row.get(0),
                )
                .optional()
            })
            .await
            .map_err(|err| RagError::Storage(err.to_string()))?;
        match json {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|err| RagError::Storage(format!("corrupt descriptor: {err}"))),
            None => Ok(None),
        }
    }

    /// Number of rows in a chunk table.
    pub async fn count(&self, table: &str) -> Result<usize, RagError> {
        let sql = format!("SELECT COUNT(*) FROM \"{table}\"");
        self.conn
            .call(move |conn| {
                let count: i64 = conn
                    .query_row(&sql, [], |row| row.get(0))?;
                Ok(count as usize)
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))
    }

    /// K-nearest chunks for a query embedding.
    ///
    /// Prefers the `vec0` index when it exists; falls back to a brute-force
    /// distance scan over the chunk table when it is missing or fails, so an
    /// unindexed store stays queryable.
    pub async fn nearest(
        &self,
        descriptor: &VectorStoreDescriptor,
        query_embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, RagError> {
        let query_json = serde_json::to_string(query_embedding)
            .map_err(|err| RagError::Storage(err.to_string()))?;
        let store = descriptor.store_name();
        let index = descriptor.index_name();

        if self.table_exists(&index).await? {
            match self.knn_via_index(&store, &index, &query_json, k).await {
                Ok(hits) => return Ok(hits),
                Err(err) => {
                    tracing::debug!(
                        store = %store,
                        error = %err,
                        "index query failed, falling back to scan"
                    );
                }
            }
        }
        self.scan(&store, descriptor.distance_metric, &query_json, k)
            .await
    }

    async fn knn_via_index(
        &self,
        store: &str,
        index: &str,
        query_json: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, RagError> {
        let sql = format!(
            "SELECT b.content, b.source, b.seq, b.embedding, i.distance
             FROM (SELECT rowid, distance FROM \"{index}\"
                   WHERE embedding MATCH vec_f32(?)
                   ORDER BY distance LIMIT {k}) i
             JOIN \"{store}\" b ON b.rowid = i.rowid
             ORDER BY i.distance ASC"
        );
        self.query_scored(sql, query_json.to_string()).await
    }

    async fn scan(
        &self,
        store: &str,
        metric: DistanceMetric,
        query_json: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, RagError> {
        let sql = format!(
            "SELECT content, source, seq, embedding,
                    {distance_fn}(vec_f32(embedding), vec_f32(?)) AS distance
             FROM \"{store}\"
             WHERE embedding != ''
             ORDER BY distance ASC
             LIMIT {k}",
            distance_fn = metric.distance_fn(),
        );
        self.query_scored(sql, query_json.to_string()).await
    }

    async fn query_scored(
        &self,
        sql: String,
        query_json: String,
    ) -> Result<Vec<ScoredChunk>, RagError> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([&query_json], |row| {
                        let embedding_json: String = row.get(3)?;
                        Ok(ScoredChunk {
                            content: row.get(0)?,
                            source: row.get(1)?,
                            seq: row.get::<_, String>(2)?.parse().unwrap_or(0),
                            embedding: serde_json::from_str(&embedding_json).ok(),
                            distance: row.get(4)?,
                        })
                    })?;
                let mut hits = Vec::new();
                for row in rows {
                    hits.push(row?);
                }
                Ok(hits)
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))
    }
}

fn register_sqlite_vec() -> Result<(), RagError> {
    use std::sync::Mutex;

    static INIT: Once = Once::new();
    static INIT_RESULT: Mutex<Option<Result<(), String>>> = Mutex::new(None);

    INIT.call_once(|| {
        let result = unsafe {
            type SqliteExtensionInit = unsafe extern "C" fn(
                *mut ffi::sqlite3,
                *mut *mut c_char,
                *const ffi::sqlite3_api_routines,
            ) -> i32;

            let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
            let init_fn: SqliteExtensionInit =
                transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
            let rc = ffi::sqlite3_auto_extension(Some(init_fn));
            if rc != 0 {
                Err(format!(
                    "failed to register sqlite-vec extension (code {rc})"
                ))
            } else {
                Ok(())
            }
        };
        *INIT_RESULT.lock().expect("init result mutex poisoned") = Some(result);
    });

    INIT_RESULT
        .lock()
        .expect("init result mutex poisoned")
        .clone()
        .expect("init was called but result not set")
        .map_err(RagError::Storage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_tracks_content_only() {
        let a = Chunk::new("same text", "a.txt", 0);
        let b = Chunk::new("same text", "b.txt", 7);
        let c = Chunk::new("other text", "a.txt", 0);
        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a.content_hash(), c.content_hash());
    }

    #[tokio::test]
    async fn catalog_round_trips_descriptors() {
        let store = VectorStore::open_in_memory().await.unwrap();
        let descriptor = VectorStoreDescriptor::new(
            "notes",
            "mock-embed",
            500,
            50,
            DistanceMetric::Cosine,
            "vec0",
        );
        store.write_descriptor(&descriptor).await.unwrap();
        let read = store
            .read_descriptor(&descriptor.store_name())
            .await
            .unwrap();
        assert_eq!(read, Some(descriptor.clone()));

        // Refresh overwrites rather than duplicating.
        store.write_descriptor(&descriptor).await.unwrap();
        assert_eq!(store.count("store_catalog").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn merge_inserts_only_missing_hashes() {
        let store = VectorStore::open_in_memory().await.unwrap();
        store.ensure_chunk_table("target").await.unwrap();
        store.ensure_chunk_table("stage").await.unwrap();

        store
            .insert_chunks(
                "target",
                vec![Chunk::new("alpha", "f", 0).with_embedding(vec![1.0, 0.0])],
            )
            .await
            .unwrap();
        store
            .insert_chunks(
                "stage",
                vec![
                    Chunk::new("alpha", "f", 0).with_embedding(vec![1.0, 0.0]),
                    Chunk::new("beta", "f", 1).with_embedding(vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let inserted = store.merge("stage", "target").await.unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(store.count("target").await.unwrap(), 2);

        // Re-running the merge is a no-op.
        let inserted = store.merge("stage", "target").await.unwrap();
        assert_eq!(inserted, 0);
        assert_eq!(store.count("target").await.unwrap(), 2);
    }
}

//! Vector store repository backed by SurrealDB

use async_trait::async_trait;
use chatrag_core::{
    ChunkMetadata, CollectionInfo, CoreError, IndexedChunk, Neighbors, ScoredChunk, VectorStore,
    WriterLease,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::{CollectionLocks, DbConnection, DbError, Result};

const COLLECTION_TABLE: &str = "collection";
const CHUNK_TABLE: &str = "chunk";

/// Repository for all database operations
#[derive(Clone)]
pub struct Repository {
    db: DbConnection,
    locks: CollectionLocks,
}

impl Repository {
    /// Create a new repository
    pub fn new(db: DbConnection) -> Self {
        Self::with_locks(db, CollectionLocks::new())
    }

    /// Create a repository sharing writer locks with other handles on the
    /// same database
    pub fn with_locks(db: DbConnection, locks: CollectionLocks) -> Self {
        Self { db, locks }
    }

    // ==========================================
    // COLLECTION OPERATIONS
    // ==========================================

    /// Empty `collection` and hold it exclusively until the lease drops
    #[instrument(skip(self))]
    pub async fn reset_collection(
        &self,
        collection: &str,
        embedding_model: &str,
    ) -> Result<WriterLease> {
        validate_collection_name(collection)?;
        let exclusive = self.locks.lock_for(collection).exclusive().await;

        self.db
            .query("DELETE chunk WHERE collection_name = $collection")
            .bind(("collection", collection.to_string()))
            .await?
            .check()?;
        let _: Option<CollectionRow> = self.db.delete((COLLECTION_TABLE, collection)).await?;
        self.create_collection(collection, embedding_model).await?;

        info!("Reset collection {}", collection);
        Ok(WriterLease::new(collection, true, exclusive))
    }

    /// Create `collection` if needed and share it with other appenders
    #[instrument(skip(self))]
    pub async fn ensure_collection(
        &self,
        collection: &str,
        embedding_model: &str,
    ) -> Result<WriterLease> {
        validate_collection_name(collection)?;
        let lock = self.locks.lock_for(collection);
        let shared = lock.shared().await;
        let _setup = lock.setup().await;

        match self.collection_row(collection).await? {
            Some(row) => {
                if row.embedding_model != embedding_model {
                    warn!(
                        "Collection {} was built with {}, now writing with {}",
                        collection, row.embedding_model, embedding_model
                    );
                }
            }
            None => {
                self.create_collection(collection, embedding_model).await?;
                info!("Created collection {}", collection);
            }
        }
        Ok(WriterLease::new(collection, false, shared))
    }

    #[instrument(skip(self))]
    pub async fn collection_info(&self, collection: &str) -> Result<Option<CollectionInfo>> {
        validate_collection_name(collection)?;
        let row = match self.collection_row(collection).await? {
            Some(row) => row,
            None => return Ok(None),
        };
        let count = self.chunk_count(collection).await?;

        Ok(Some(CollectionInfo {
            name: row.name,
            count,
            dimension: row.dimension,
            embedding_model: row.embedding_model,
            created_at: row.created_at,
        }))
    }

    async fn collection_row(&self, collection: &str) -> Result<Option<CollectionRow>> {
        let row: Option<CollectionRow> = self.db.select((COLLECTION_TABLE, collection)).await?;
        Ok(row)
    }

    async fn create_collection(&self, collection: &str, embedding_model: &str) -> Result<()> {
        let row = CollectionRow {
            name: collection.to_string(),
            embedding_model: embedding_model.to_string(),
            dimension: None,
            created_at: Utc::now().to_rfc3339(),
        };
        let created: Option<CollectionRow> = self
            .db
            .create((COLLECTION_TABLE, collection))
            .content(row)
            .await?;

        created
            .map(|_| ())
            .ok_or_else(|| DbError::QueryFailed(format!("create collection {}", collection)))
    }

    async fn chunk_count(&self, collection: &str) -> Result<usize> {
        let count: Option<CountRow> = self
            .db
            .query("SELECT count() FROM chunk WHERE collection_name = $collection GROUP ALL")
            .bind(("collection", collection.to_string()))
            .await?
            .take(0)?;

        Ok(count.map(|c| c.count).unwrap_or(0))
    }

    // ==========================================
    // CHUNK OPERATIONS
    // ==========================================

    /// Write chunks as one transaction, replacing existing ids.
    ///
    /// The first write fixes the collection's dimension. Writers racing
    /// for it are serialized; the loser sees the winner's dimension.
    #[instrument(skip(self, chunks), fields(collection = lease.collection(), count = chunks.len()))]
    pub async fn upsert_chunks(
        &self,
        lease: &WriterLease,
        chunks: Vec<IndexedChunk>,
    ) -> chatrag_core::Result<()> {
        let collection = lease.collection();
        let dimension = match chunks.first() {
            Some(first) => first.dimension(),
            None => return Ok(()),
        };
        validate_collection_name(collection)?;
        if dimension == 0 {
            return Err(CoreError::Config(format!(
                "chunk {} has an empty embedding",
                chunks[0].id
            )));
        }
        if let Some(odd) = chunks.iter().find(|c| c.dimension() != dimension) {
            return Err(CoreError::InvalidEmbeddingDimension {
                expected: dimension,
                actual: odd.dimension(),
            });
        }

        match self.stored_dimension(collection).await? {
            Some(expected) => {
                check_dimension(expected, dimension)?;
                self.write_batch(collection, dimension, chunks).await
            }
            None => {
                let _setup = self.locks.lock_for(collection).setup().await;
                if let Some(expected) = self.stored_dimension(collection).await? {
                    check_dimension(expected, dimension)?;
                }
                self.write_batch(collection, dimension, chunks).await
            }
        }
    }

    /// Dimension of an existing collection, `None` before the first write
    async fn stored_dimension(&self, collection: &str) -> chatrag_core::Result<Option<usize>> {
        let row = self
            .collection_row(collection)
            .await?
            .ok_or_else(|| CoreError::Config(format!("unknown collection: {}", collection)))?;
        Ok(row.dimension)
    }

    async fn write_batch(
        &self,
        collection: &str,
        dimension: usize,
        chunks: Vec<IndexedChunk>,
    ) -> chatrag_core::Result<()> {
        let rows: Vec<UpsertRow> = chunks
            .into_iter()
            .map(|chunk| UpsertRow {
                key: chunk_key(collection, &chunk.id),
                content: ChunkRow::from_chunk(collection, chunk),
            })
            .collect();
        let written = rows.len();

        let outcome = self
            .db
            .query(UPSERT_BATCH)
            .bind(("rows", rows))
            .bind(("collection", collection.to_string()))
            .bind(("dimension", dimension))
            .await
            .map_err(DbError::from)?
            .check();

        if let Err(e) = outcome {
            // another process may have fixed a different dimension first
            if let Some(expected) = self.stored_dimension(collection).await? {
                check_dimension(expected, dimension)?;
            }
            return Err(DbError::QueryFailed(format!("upsert into {}: {}", collection, e)).into());
        }

        debug!("Upserted {} chunks into {}", written, collection);
        Ok(())
    }

    /// Nearest chunks by cosine similarity
    #[instrument(skip(self, embedding))]
    pub async fn nearest(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> chatrag_core::Result<Vec<ScoredChunk>> {
        validate_collection_name(collection)?;
        let row = self
            .collection_row(collection)
            .await?
            .ok_or_else(|| CoreError::Config(format!("unknown collection: {}", collection)))?;

        let expected = match row.dimension {
            Some(dimension) => dimension,
            // nothing has been written yet
            None => return Ok(Vec::new()),
        };
        if expected != embedding.len() {
            return Err(CoreError::InvalidEmbeddingDimension {
                expected,
                actual: embedding.len(),
            });
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let rows: Vec<ScoredRow> = self
            .db
            .query(NEAREST)
            .bind(("collection", collection.to_string()))
            .bind(("embedding", embedding.to_vec()))
            .bind(("limit", top_k))
            .await
            .map_err(DbError::from)?
            .take(0)
            .map_err(DbError::from)?;

        let mut results: Vec<ScoredChunk> = rows.into_iter().map(ScoredRow::into_scored).collect();
        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });

        debug!("Nearest search in {} returned {} chunks", collection, results.len());
        Ok(results)
    }

    #[instrument(skip(self))]
    pub async fn get_chunk(&self, collection: &str, id: &str) -> Result<Option<IndexedChunk>> {
        validate_collection_name(collection)?;
        let row: Option<ChunkRow> = self.db.select((CHUNK_TABLE, chunk_key(collection, id))).await?;
        Ok(row.map(ChunkRow::into_chunk))
    }

    #[instrument(skip(self))]
    pub async fn timeline_neighbors(
        &self,
        collection: &str,
        timestamp: &str,
        n: usize,
    ) -> Result<Neighbors> {
        validate_collection_name(collection)?;
        if timestamp.is_empty() || n == 0 {
            return Ok(Neighbors::default());
        }

        let mut response = self
            .db
            .query(NEIGHBORS)
            .bind(("collection", collection.to_string()))
            .bind(("timestamp", timestamp.to_string()))
            .bind(("limit", n))
            .await?;
        let before: Vec<ChunkRow> = response.take(0)?;
        let after: Vec<ChunkRow> = response.take(1)?;

        Ok(Neighbors {
            before: before.into_iter().rev().map(ChunkRow::into_chunk).collect(),
            after: after.into_iter().map(ChunkRow::into_chunk).collect(),
        })
    }

    #[instrument(skip(self))]
    pub async fn chunk_ids(&self, collection: &str) -> Result<Vec<String>> {
        validate_collection_name(collection)?;
        let rows: Vec<IdRow> = self
            .db
            .query("SELECT chunk_id FROM chunk WHERE collection_name = $collection")
            .bind(("collection", collection.to_string()))
            .await?
            .take(0)?;

        let mut ids: Vec<String> = rows.into_iter().map(|r| r.chunk_id).collect();
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl VectorStore for Repository {
    async fn reset(
        &self,
        collection: &str,
        embedding_model: &str,
    ) -> chatrag_core::Result<WriterLease> {
        Ok(self.reset_collection(collection, embedding_model).await?)
    }

    async fn ensure(
        &self,
        collection: &str,
        embedding_model: &str,
    ) -> chatrag_core::Result<WriterLease> {
        Ok(self.ensure_collection(collection, embedding_model).await?)
    }

    async fn info(&self, collection: &str) -> chatrag_core::Result<Option<CollectionInfo>> {
        Ok(self.collection_info(collection).await?)
    }

    async fn upsert(&self, lease: &WriterLease, chunks: Vec<IndexedChunk>) -> chatrag_core::Result<()> {
        self.upsert_chunks(lease, chunks).await
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> chatrag_core::Result<Vec<ScoredChunk>> {
        self.nearest(collection, embedding, top_k).await
    }

    async fn get(&self, collection: &str, id: &str) -> chatrag_core::Result<Option<IndexedChunk>> {
        Ok(self.get_chunk(collection, id).await?)
    }

    async fn neighbors(
        &self,
        collection: &str,
        timestamp: &str,
        n: usize,
    ) -> chatrag_core::Result<Neighbors> {
        Ok(self.timeline_neighbors(collection, timestamp, n).await?)
    }

    async fn ids(&self, collection: &str) -> chatrag_core::Result<Vec<String>> {
        Ok(self.chunk_ids(collection).await?)
    }
}

/// Collection names become part of record keys, so keep them simple
pub fn validate_collection_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 128
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(DbError::InvalidCollectionName(name.to_string()))
    }
}

fn check_dimension(expected: usize, actual: usize) -> chatrag_core::Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(CoreError::InvalidEmbeddingDimension { expected, actual })
    }
}

fn chunk_key(collection: &str, id: &str) -> String {
    format!("{}/{}", collection, id)
}

const UPSERT_BATCH: &str = r#"
BEGIN TRANSACTION;
LET $current = (SELECT VALUE dimension FROM type::thing('collection', $collection))[0];
IF type::is::number($current) AND $current != $dimension {
    THROW "embedding dimension mismatch";
};
FOR $row IN $rows {
    UPSERT type::thing('chunk', $row.key) CONTENT $row.content;
};
UPDATE type::thing('collection', $collection) SET dimension = $dimension;
COMMIT TRANSACTION;
"#;

const NEAREST: &str = r#"
SELECT
    chunk_id,
    document,
    embedding,
    sender,
    sent_at,
    reply_to,
    vector::similarity::cosine(embedding, $embedding) AS score
FROM chunk
WHERE collection_name = $collection
ORDER BY score DESC, chunk_id ASC
LIMIT $limit
"#;

const NEIGHBORS: &str = r#"
SELECT chunk_id, document, embedding, sender, sent_at, reply_to
FROM chunk
WHERE collection_name = $collection AND sent_at != '' AND sent_at < $timestamp
ORDER BY sent_at DESC, chunk_id DESC
LIMIT $limit;

SELECT chunk_id, document, embedding, sender, sent_at, reply_to
FROM chunk
WHERE collection_name = $collection AND sent_at > $timestamp
ORDER BY sent_at ASC, chunk_id ASC
LIMIT $limit;
"#;

// ==========================================
// ROW TYPES
// ==========================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CollectionRow {
    name: String,
    embedding_model: String,
    #[serde(default)]
    dimension: Option<usize>,
    #[serde(default)]
    created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChunkRow {
    #[serde(default)]
    collection_name: String,
    chunk_id: String,
    document: String,
    #[serde(default)]
    embedding: Vec<f32>,
    #[serde(default)]
    sender: String,
    #[serde(default)]
    sent_at: String,
    #[serde(default)]
    reply_to: Option<String>,
}

impl ChunkRow {
    fn from_chunk(collection: &str, chunk: IndexedChunk) -> Self {
        Self {
            collection_name: collection.to_string(),
            chunk_id: chunk.id,
            document: chunk.document,
            embedding: chunk.embedding,
            sender: chunk.metadata.sender,
            sent_at: chunk.metadata.timestamp,
            reply_to: chunk.metadata.reply_to,
        }
    }

    fn into_chunk(self) -> IndexedChunk {
        IndexedChunk {
            id: self.chunk_id,
            embedding: self.embedding,
            document: self.document,
            metadata: ChunkMetadata {
                sender: self.sender,
                timestamp: self.sent_at,
                reply_to: self.reply_to,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct UpsertRow {
    key: String,
    content: ChunkRow,
}

#[derive(Debug, Deserialize)]
struct ScoredRow {
    chunk_id: String,
    document: String,
    #[serde(default)]
    embedding: Vec<f32>,
    #[serde(default)]
    sender: String,
    #[serde(default)]
    sent_at: String,
    #[serde(default)]
    reply_to: Option<String>,
    score: f32,
}

impl ScoredRow {
    fn into_scored(self) -> ScoredChunk {
        let chunk = ChunkRow {
            collection_name: String::new(),
            chunk_id: self.chunk_id,
            document: self.document,
            embedding: self.embedding,
            sender: self.sender,
            sent_at: self.sent_at,
            reply_to: self.reply_to,
        }
        .into_chunk();
        ScoredChunk {
            chunk,
            score: self.score,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CountRow {
    count: usize,
}

#[derive(Debug, Deserialize)]
struct IdRow {
    chunk_id: String,
}

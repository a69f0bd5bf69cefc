//! Database layer for ChatRAG
//!
//! Provides the SurrealDB-backed vector store: collection registry, chunk
//! storage and cosine-similarity search.

pub mod error;
pub mod locks;
pub mod repository;
pub mod schema;

pub use error::{DbError, Result};
pub use locks::{CollectionLock, CollectionLocks};
pub use repository::Repository;

use surrealdb::engine::local::{Db, Mem};
use surrealdb::Surreal;
use tracing::info;

/// Database connection type
pub type DbConnection = Surreal<Db>;

/// Initialize database with RocksDB (persistent)
#[cfg(feature = "rocksdb")]
pub async fn init_persistent(path: impl AsRef<std::path::Path>) -> Result<DbConnection> {
    use surrealdb::engine::local::RocksDb;

    let path = path.as_ref();
    info!("Opening vector store at {}", path.display());
    let db = Surreal::new::<RocksDb>(path)
        .await
        .map_err(|e| DbError::Connection(format!("{}: {}", path.display(), e)))?;
    setup_database(&db).await?;
    Ok(db)
}

/// Initialize database in-memory (for testing)
pub async fn init_memory() -> Result<DbConnection> {
    let db = Surreal::new::<Mem>(()).await?;
    setup_database(&db).await?;
    Ok(db)
}

/// Setup database namespace, database, and schema
async fn setup_database(db: &DbConnection) -> Result<()> {
    db.use_ns("chatrag").use_db("transcripts").await?;
    schema::initialize_schema(db).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_memory() {
        let db = init_memory().await.expect("Failed to init memory db");
        let rows: Vec<serde_json::Value> = db
            .query("SELECT count() FROM chunk GROUP ALL")
            .await
            .unwrap()
            .take(0)
            .unwrap();
        assert!(rows.is_empty());
    }

    #[cfg(feature = "rocksdb")]
    #[tokio::test]
    async fn test_init_persistent_creates_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");
        init_persistent(&path).await.expect("open persistent store");
        assert!(path.exists());
    }
}

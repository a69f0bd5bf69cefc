//! SurrealDB schema definitions

use crate::{DbConnection, DbError, Result};
use tracing::info;

/// Initialize the database schema. Safe to run on an existing database.
pub async fn initialize_schema(db: &DbConnection) -> Result<()> {
    info!("Initializing database schema...");

    db.query(SCHEMA_DEFINITION)
        .await?
        .check()
        .map_err(|e| DbError::SchemaInit(e.to_string()))?;

    info!("Schema initialized successfully");
    Ok(())
}

const SCHEMA_DEFINITION: &str = r#"
-- One record per named collection: embedding model and width
DEFINE TABLE IF NOT EXISTS collection SCHEMALESS;

-- Chunks of every collection, keyed by "<collection>/<message id>"
DEFINE TABLE IF NOT EXISTS chunk SCHEMALESS;

DEFINE INDEX IF NOT EXISTS idx_chunk_collection ON chunk FIELDS collection_name;
DEFINE INDEX IF NOT EXISTS idx_chunk_timeline ON chunk FIELDS collection_name, sent_at;
"#;

#[cfg(test)]
mod tests {
    use crate::init_memory;

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let db = init_memory().await.expect("Failed to init db");
        super::initialize_schema(&db).await.expect("second run");
    }
}

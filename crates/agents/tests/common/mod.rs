//! Common test utilities

use std::path::PathBuf;
use std::sync::Arc;

use chatrag_agents::testing::EchoModel;
use chatrag_agents::{Pipeline, RagConfig};
use chatrag_core::{EmbeddingCapability, ModelCapability};
use chatrag_db::{init_memory, Repository};
use serde_json::json;

/// Create a test repository with in-memory database
pub async fn create_test_repo() -> Arc<Repository> {
    let db = init_memory().await.expect("Failed to create test database");
    Arc::new(Repository::new(db))
}

/// Pipeline over the given capabilities with default settings
pub fn pipeline(
    embedder: Arc<dyn EmbeddingCapability>,
    store: Arc<Repository>,
    model: Arc<dyn ModelCapability>,
) -> Pipeline {
    Pipeline::new(&RagConfig::default(), embedder, store, model)
}

pub fn echo_model() -> Arc<EchoModel> {
    Arc::new(EchoModel::new(100_000).with_reply("They settled on Friday."))
}

/// A small Telegram Desktop export, written to a temp dir
pub fn write_export(dir: &tempfile::TempDir) -> PathBuf {
    let export = json!({
        "name": "Weekend plans",
        "type": "personal_chat",
        "id": 4242,
        "messages": [
            { "id": 1, "type": "message", "date": "2023-06-01T18:00:00", "from": "Alice",
              "text": "Anyone up for a hike on Saturday?" },
            { "id": 2, "type": "service", "date": "2023-06-01T18:01:00", "actor": "Bob",
              "action": "pin_message", "text": "" },
            { "id": 3, "type": "message", "date": "2023-06-01T18:05:00", "from": "Bob",
              "text": ["I'd rather ", { "type": "bold", "text": "go to the lake" }],
              "reply_to_message_id": 1 },
            { "id": 4, "type": "message", "date": "2023-06-01T18:07:00", "from": "Carol",
              "photo": "photos/photo_1.jpg", "text": "" },
            { "id": 5, "type": "message", "date": "2023-06-01T18:10:00", "from": "Carol",
              "text": "Lake on Saturday works, I will bring sandwiches" },
            { "id": 6, "type": "message", "date": "2023-06-01T18:12:00", "from": "Alice",
              "text": "Fine, lake it is. Leaving at nine." }
        ]
    });
    let path = dir.path().join("result.json");
    std::fs::write(&path, export.to_string()).expect("Failed to write export");
    path
}

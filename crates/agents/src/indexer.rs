//! Batch Indexer - embeds normalized records and writes them to a collection
//!
//! Records are cut into consecutive batches. Each batch costs one embedding
//! call and one store write; a failed batch is reported with its id range
//! and does not stop the batches around it.

use std::sync::Arc;

use chatrag_core::{
    BatchFailure, BatchRange, CoreError, EmbeddingCapability, IndexingReport, NormalizedRecord,
    Result, VectorStore, WriterLease,
};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

pub struct BatchIndexer {
    embedder: Arc<dyn EmbeddingCapability>,
    store: Arc<dyn VectorStore>,
    concurrency: usize,
}

impl BatchIndexer {
    pub fn new(embedder: Arc<dyn EmbeddingCapability>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            embedder,
            store,
            concurrency: 1,
        }
    }

    /// Allow up to `concurrency` batches in flight, further capped by the
    /// embedder's own limit
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    fn parallelism(&self) -> usize {
        self.concurrency.min(self.embedder.max_concurrency()).max(1)
    }

    /// Load `records` into `collection`.
    ///
    /// With `reset` the collection is dropped and recreated before anything
    /// is written. Cancellation is honoured between batches only; batches
    /// already running are allowed to finish.
    #[instrument(skip(self, records, cancel), fields(records = records.len()))]
    pub async fn load(
        &self,
        records: Vec<NormalizedRecord>,
        collection: &str,
        batch_size: usize,
        reset: bool,
        cancel: &CancellationToken,
    ) -> Result<IndexingReport> {
        if batch_size == 0 {
            return Err(CoreError::Config("batch size must be at least 1".to_string()));
        }

        // Held until every batch task has been joined, so a reset-and-reload
        // never interleaves with another writer on the same collection.
        let model_id = self.embedder.model_id();
        let lease = Arc::new(if reset {
            self.store.reset(collection, model_id).await?
        } else {
            self.store.ensure(collection, model_id).await?
        });

        let mut report = IndexingReport {
            total_input: records.len(),
            ..Default::default()
        };
        let batches = into_batches(records, batch_size);
        let total_batches = batches.len();
        let parallelism = self.parallelism();
        info!(
            "Indexing {} records into {} ({} batches of up to {}, {} at a time)",
            report.total_input, collection, total_batches, batch_size, parallelism
        );

        let semaphore = Arc::new(Semaphore::new(parallelism));
        let mut tasks = Vec::with_capacity(total_batches);

        for (index, batch) in batches.into_iter().enumerate() {
            let range = batch_range(index + 1, &batch);

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            info!(
                "batch {}/{} ({} records, ids {}..{})",
                range.batch, total_batches, range.len, range.first_id, range.last_id
            );
            report.batches_attempted += 1;

            let embedder = Arc::clone(&self.embedder);
            let store = Arc::clone(&self.store);
            let lease = Arc::clone(&lease);
            let handle = tokio::spawn(async move {
                let _permit = permit;
                index_batch(embedder.as_ref(), store.as_ref(), &lease, batch).await
            });
            tasks.push((range, handle));
        }

        for (range, handle) in tasks {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(CoreError::Store(format!("indexing task failed: {}", e))),
            };
            match outcome {
                Ok(written) => report.total_loaded += written,
                Err(e) => {
                    error!("Failed {}: {}", range, e);
                    report.batches_failed += 1;
                    report.failures.push(BatchFailure {
                        range,
                        error: e.to_string(),
                    });
                }
            }
        }

        drop(lease);

        if report.cancelled {
            warn!(
                "Load into {} cancelled after {} of {} batches",
                collection, report.batches_attempted, total_batches
            );
        }
        info!(
            "Loaded {}/{} records into {} ({} batches failed)",
            report.total_loaded, report.total_input, collection, report.batches_failed
        );
        Ok(report)
    }
}

async fn index_batch(
    embedder: &dyn EmbeddingCapability,
    store: &dyn VectorStore,
    lease: &WriterLease,
    batch: Vec<NormalizedRecord>,
) -> Result<usize> {
    let texts: Vec<String> = batch.iter().map(|r| r.text.clone()).collect();
    let embeddings = embedder.embed(&texts).await?;
    if embeddings.len() != batch.len() {
        return Err(CoreError::Embedding(format!(
            "expected {} vectors, got {}",
            batch.len(),
            embeddings.len()
        )));
    }

    let written = batch.len();
    let chunks = batch
        .into_iter()
        .zip(embeddings)
        .map(|(record, embedding)| record.into_chunk(embedding))
        .collect();
    store.upsert(lease, chunks).await?;
    Ok(written)
}

fn into_batches(records: Vec<NormalizedRecord>, batch_size: usize) -> Vec<Vec<NormalizedRecord>> {
    let mut batches = Vec::with_capacity(records.len().div_ceil(batch_size));
    let mut records = records.into_iter().peekable();
    while records.peek().is_some() {
        batches.push(records.by_ref().take(batch_size).collect());
    }
    batches
}

fn batch_range(batch: usize, records: &[NormalizedRecord]) -> BatchRange {
    BatchRange {
        batch,
        first_id: records.first().map(|r| r.id.clone()).unwrap_or_default(),
        last_id: records.last().map(|r| r.id.clone()).unwrap_or_default(),
        len: records.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingEmbedder, HashEmbedder};
    use chatrag_core::{ErrorKind, TranscriptParser};
    use chatrag_db::{init_memory, Repository};
    use serde_json::json;
    use std::time::Duration;

    async fn store() -> Arc<Repository> {
        Arc::new(Repository::new(init_memory().await.unwrap()))
    }

    fn records(n: usize) -> Vec<NormalizedRecord> {
        (1..=n)
            .map(|i| NormalizedRecord::new(i.to_string(), format!("message number {}", i)))
            .collect()
    }

    #[tokio::test]
    async fn test_three_message_scenario() {
        let transcript = TranscriptParser::new()
            .parse(&json!([
                { "id": 1, "text": "hi" },
                { "id": 2, "text": "" },
                { "id": 3, "text": [{ "text": "bye" }] }
            ]))
            .unwrap();
        let store = store().await;
        let indexer = BatchIndexer::new(Arc::new(HashEmbedder::new(8)), store.clone());

        let report = indexer
            .load(transcript.records, "chat", 1, true, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.total_input, 2);
        assert_eq!(report.total_loaded, 2);
        assert_eq!(report.batches_attempted, 2);
        assert_eq!(report.batches_failed, 0);
        assert!(report.is_complete());
        assert_eq!(store.ids("chat").await.unwrap(), vec!["1", "3"]);
    }

    #[tokio::test]
    async fn test_zero_batch_size_is_config_error() {
        let indexer = BatchIndexer::new(Arc::new(HashEmbedder::new(8)), store().await);
        let err = indexer
            .load(records(1), "chat", 0, false, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[tokio::test]
    async fn test_failed_batch_is_reported_and_others_commit() {
        let store = store().await;
        let indexer = BatchIndexer::new(Arc::new(FailingEmbedder::on_call(8, 2)), store.clone());

        let report = indexer
            .load(records(2), "chat", 1, true, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.total_loaded, 1);
        assert_eq!(report.batches_attempted, 2);
        assert_eq!(report.batches_failed, 1);
        assert!(!report.is_complete());
        let failure = &report.failures[0];
        assert_eq!(failure.range.batch, 2);
        assert_eq!(failure.range.first_id, "2");
        assert_eq!(failure.range.last_id, "2");
        assert_eq!(store.ids("chat").await.unwrap(), vec!["1"]);
    }

    #[tokio::test]
    async fn test_batch_split_does_not_change_stored_state() {
        let store = store().await;
        let embedder = Arc::new(HashEmbedder::new(8));
        let indexer = BatchIndexer::new(embedder.clone(), store.clone());
        let cancel = CancellationToken::new();

        indexer.load(records(7), "small", 2, true, &cancel).await.unwrap();
        indexer.load(records(7), "large", 5, true, &cancel).await.unwrap();

        assert_eq!(
            store.ids("small").await.unwrap(),
            store.ids("large").await.unwrap()
        );
        // ceil(7/2) + ceil(7/5)
        assert_eq!(embedder.calls(), 4 + 2);
    }

    #[tokio::test]
    async fn test_append_upserts_existing_ids() {
        let store = store().await;
        let indexer = BatchIndexer::new(Arc::new(HashEmbedder::new(8)), store.clone());
        let cancel = CancellationToken::new();

        indexer.load(records(3), "chat", 10, true, &cancel).await.unwrap();
        let edited = vec![NormalizedRecord::new("2", "edited text")];
        let report = indexer.load(edited, "chat", 10, false, &cancel).await.unwrap();

        assert_eq!(report.total_loaded, 1);
        assert_eq!(store.ids("chat").await.unwrap(), vec!["1", "2", "3"]);
        let chunk = store.get("chat", "2").await.unwrap().unwrap();
        assert_eq!(chunk.document, "edited text");
    }

    #[tokio::test]
    async fn test_reset_loads_on_one_collection_run_one_after_another() {
        let store = store().await;
        let embedder = Arc::new(HashEmbedder::new(8).with_delay(Duration::from_millis(5)));
        let first = BatchIndexer::new(embedder.clone(), store.clone());
        let second = BatchIndexer::new(embedder.clone(), store.clone());
        let cancel = CancellationToken::new();
        let tagged = |tag: char| -> Vec<NormalizedRecord> {
            (1..=10)
                .map(|i| NormalizedRecord::new(format!("{}{:02}", tag, i), format!("note {}", i)))
                .collect()
        };

        let (a, b) = tokio::join!(
            first.load(tagged('a'), "chat", 1, true, &cancel),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                second.load(tagged('b'), "chat", 1, true, &cancel).await
            }
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.total_loaded, 10);
        assert_eq!(b.total_loaded, 10);
        let expected: Vec<String> = (1..=10).map(|i| format!("b{:02}", i)).collect();
        assert_eq!(store.ids("chat").await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_append_load_waits_for_running_reset() {
        let store = store().await;
        let embedder = Arc::new(HashEmbedder::new(8).with_delay(Duration::from_millis(5)));
        let indexer = BatchIndexer::new(embedder, store.clone());
        let cancel = CancellationToken::new();

        let (reset, append) = tokio::join!(
            indexer.load(records(6), "chat", 1, true, &cancel),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let extra = vec![NormalizedRecord::new("7", "late message")];
                indexer.load(extra, "chat", 1, false, &cancel).await
            }
        );

        assert_eq!(reset.unwrap().total_loaded, 6);
        assert_eq!(append.unwrap().total_loaded, 1);
        assert_eq!(
            store.ids("chat").await.unwrap(),
            vec!["1", "2", "3", "4", "5", "6", "7"]
        );
    }

    #[tokio::test]
    async fn test_concurrency_capped_by_embedder() {
        let store = store().await;
        let embedder = Arc::new(
            HashEmbedder::new(8)
                .with_concurrency(2)
                .with_delay(Duration::from_millis(20)),
        );
        let indexer = BatchIndexer::new(embedder.clone(), store.clone()).with_concurrency(8);

        let report = indexer
            .load(records(12), "chat", 2, true, &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.is_complete());
        assert_eq!(report.batches_attempted, 6);
        assert!(embedder.peak_in_flight() <= 2);
        assert_eq!(store.ids("chat").await.unwrap().len(), 12);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let store = store().await;
        let indexer = BatchIndexer::new(Arc::new(HashEmbedder::new(8)), store.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = indexer.load(records(4), "chat", 2, true, &cancel).await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.batches_attempted, 0);
        assert_eq!(report.batches_failed, 0);
        assert_eq!(report.total_loaded, 0);
        assert!(!report.is_complete());
    }

    #[test]
    fn test_into_batches() {
        let batches = into_batches(records(5), 2);
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(batch_range(3, &batches[2]).first_id, "5");
        assert!(into_batches(Vec::new(), 3).is_empty());
    }
}
